use super::types::{FieldUpdate, Request, ToplevelId, ToplevelSnapshot};
use log::{debug, warn};

/// Outbound side of a toplevel: the remote handle requests are sent on.
pub trait ToplevelHandle {
    type Seat;

    fn activate(&self, seat: &Self::Seat);
    fn set_maximized(&self, maximized: bool);
    fn set_minimized(&self, minimized: bool);
    fn set_fullscreen(&self, fullscreen: bool);
    fn close(&self);

    /// Called once after the toplevel has been reported closed.
    fn release(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Announced,
    Syncing,
    Synced,
    Closed,
}

#[derive(Debug)]
pub struct ToplevelObject<H> {
    id: ToplevelId,
    handle: H,
    committed: Option<ToplevelSnapshot>,
    pending: ToplevelSnapshot,
    phase: Phase,
    alive: bool,
}

impl<H: ToplevelHandle> ToplevelObject<H> {
    pub fn new(id: ToplevelId, handle: H) -> Self {
        Self {
            id,
            handle,
            committed: None,
            pending: ToplevelSnapshot::default(),
            phase: Phase::Announced,
            alive: true,
        }
    }

    pub fn id(&self) -> ToplevelId {
        self.id
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Last snapshot made visible by a `done`, if there was one.
    pub fn committed(&self) -> Option<&ToplevelSnapshot> {
        self.committed.as_ref()
    }

    pub(super) fn has_pending_changes(&self) -> bool {
        self.committed.as_ref() != Some(&self.pending)
    }

    pub fn apply_field_update(&mut self, update: FieldUpdate) {
        if !self.alive {
            debug!(target: "Toplevel::apply_field_update", "Ignoring {update:?} for closed toplevel {}", self.id);
            return;
        }

        match update {
            FieldUpdate::Title(title) => self.pending.title = Some(title),
            FieldUpdate::AppId(app_id) => self.pending.app_id = Some(app_id),
            FieldUpdate::States(states) => self.pending.states = states,
            FieldUpdate::OutputEnter(output) => {
                self.pending.outputs.insert(output);
            }
            FieldUpdate::OutputLeave(output) => {
                self.pending.outputs.remove(&output);
            }
            FieldUpdate::Parent(parent) => self.pending.parent = parent,
            FieldUpdate::Unknown { field } => {
                debug!(target: "Toplevel::apply_field_update", "Ignoring unknown field {field} on toplevel {}", self.id);
            }
        }

        self.phase = match self.phase {
            Phase::Synced | Phase::Announced => Phase::Syncing,
            phase => phase,
        };
    }

    /// Promotes the pending buffer to the committed snapshot. The pending
    /// buffer keeps its values so later updates patch on top of them.
    pub fn commit(&mut self) -> &ToplevelSnapshot {
        self.phase = Phase::Synced;
        self.committed.insert(self.pending.clone())
    }

    pub(super) fn mark_syncing(&mut self) {
        if self.phase == Phase::Announced {
            self.phase = Phase::Syncing;
        }
    }

    pub(super) fn mark_closed(&mut self) {
        self.alive = false;
        self.phase = Phase::Closed;
    }

    fn ensure_alive(&self, request: &str) -> bool {
        if !self.alive {
            warn!(target: "Toplevel::request", "Dropping {request} request for closed toplevel {}", self.id);
        }
        self.alive
    }

    pub fn activate(&self, seat: &H::Seat) {
        if self.ensure_alive("activate") {
            self.handle.activate(seat);
        }
    }

    pub fn set_maximize(&self, maximized: bool) {
        if self.ensure_alive("maximize") {
            self.handle.set_maximized(maximized);
        }
    }

    pub fn set_minimize(&self, minimized: bool) {
        if self.ensure_alive("minimize") {
            self.handle.set_minimized(minimized);
        }
    }

    pub fn set_fullscreen(&self, fullscreen: bool) {
        if self.ensure_alive("fullscreen") {
            self.handle.set_fullscreen(fullscreen);
        }
    }

    pub fn close(&self) {
        if self.ensure_alive("close") {
            self.handle.close();
        }
    }

    pub fn send(&self, request: Request, seat: Option<&H::Seat>) {
        match request {
            Request::Activate => match seat {
                Some(seat) => self.activate(seat),
                None => {
                    warn!(target: "Toplevel::request", "No seat available to activate toplevel {}", self.id);
                }
            },
            Request::SetMaximized(value) => self.set_maximize(value),
            Request::SetMinimized(value) => self.set_minimize(value),
            Request::SetFullscreen(value) => self.set_fullscreen(value),
            Request::Close => self.close(),
        }
    }
}
