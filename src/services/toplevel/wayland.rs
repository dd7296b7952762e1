use super::{
    object::ToplevelHandle,
    registry::{ToplevelObserver, ToplevelRegistry},
    types::{FieldUpdate, Request, StateFlag, ToplevelEvent, ToplevelId},
};
use log::{debug, info, warn};
use thiserror::Error;
use wayland_client::{
    ConnectError, Connection, Dispatch, DispatchError, EventQueue, Proxy, QueueHandle,
    backend::WaylandError,
    event_created_child,
    globals::{BindError, GlobalError, GlobalListContents, registry_queue_init},
    protocol::{
        wl_output::WlOutput,
        wl_registry::{self, WlRegistry},
        wl_seat::WlSeat,
    },
};
use wayland_protocols_wlr::foreign_toplevel::v1::client::{
    zwlr_foreign_toplevel_handle_v1::{self, ZwlrForeignToplevelHandleV1},
    zwlr_foreign_toplevel_manager_v1::{self, ZwlrForeignToplevelManagerV1},
};

/// Highest `zwlr_foreign_toplevel_manager_v1` version this client understands.
pub const MAX_MANAGER_VERSION: u32 = 3;

const FULLSCREEN_SINCE: u32 = 2;
const OUTPUT_VERSION: u32 = 4;

#[derive(Debug, Error)]
pub enum ToplevelError {
    #[error("failed to connect to the Wayland compositor")]
    Connect(#[from] ConnectError),
    #[error("failed to list Wayland globals")]
    Globals(#[from] GlobalError),
    #[error("the compositor does not support wlr foreign toplevel management")]
    Unsupported(#[source] BindError),
    #[error("lost connection to the Wayland compositor")]
    ConnectionLost(#[from] DispatchError),
    #[error("failed to send requests to the Wayland compositor")]
    Flush(#[from] WaylandError),
}

impl ToplevelHandle for ZwlrForeignToplevelHandleV1 {
    type Seat = WlSeat;

    fn activate(&self, seat: &WlSeat) {
        ZwlrForeignToplevelHandleV1::activate(self, seat);
    }

    fn set_maximized(&self, maximized: bool) {
        if maximized {
            ZwlrForeignToplevelHandleV1::set_maximized(self);
        } else {
            self.unset_maximized();
        }
    }

    fn set_minimized(&self, minimized: bool) {
        if minimized {
            ZwlrForeignToplevelHandleV1::set_minimized(self);
        } else {
            self.unset_minimized();
        }
    }

    fn set_fullscreen(&self, fullscreen: bool) {
        if self.version() < FULLSCREEN_SINCE {
            warn!(target: "Toplevel::set_fullscreen", "Fullscreen needs manager version {FULLSCREEN_SINCE}, bound {}", self.version());
            return;
        }

        if fullscreen {
            ZwlrForeignToplevelHandleV1::set_fullscreen(self, None);
        } else {
            self.unset_fullscreen();
        }
    }

    fn close(&self) {
        ZwlrForeignToplevelHandleV1::close(self);
    }

    fn release(&self) {
        self.destroy();
    }
}

fn toplevel_id(handle: &ZwlrForeignToplevelHandleV1) -> ToplevelId {
    ToplevelId(handle.id().protocol_id())
}

/// Owns the Wayland connection and feeds the toplevel registry from it.
pub struct ToplevelService {
    connection: Connection,
    manager: ZwlrForeignToplevelManagerV1,
    event_queue: EventQueue<ToplevelServiceData>,
    data: ToplevelServiceData,
}

impl ToplevelService {
    pub fn connect(max_manager_version: u32, dedup_synced: bool) -> Result<Self, ToplevelError> {
        let connection = Connection::connect_to_env()?;
        Self::from_connection(connection, max_manager_version, dedup_synced)
    }

    pub fn from_connection(
        connection: Connection,
        max_manager_version: u32,
        dedup_synced: bool,
    ) -> Result<Self, ToplevelError> {
        let (globals, event_queue) = registry_queue_init::<ToplevelServiceData>(&connection)?;
        let handle = event_queue.handle();

        let max_version = max_manager_version.clamp(1, MAX_MANAGER_VERSION);
        let manager = globals
            .bind::<ZwlrForeignToplevelManagerV1, _, _>(&handle, 1..=max_version, ())
            .map_err(ToplevelError::Unsupported)?;
        info!(target: "ToplevelService::connect", "Bound toplevel manager version {}", manager.version());

        let seat = match globals.bind::<WlSeat, _, _>(&handle, 1..=1, ()) {
            Ok(seat) => Some(seat),
            Err(err) => {
                warn!(target: "ToplevelService::connect", "No seat available, activation disabled: {err}");
                None
            }
        };

        let outputs: Vec<(WlOutput, u32)> = globals.contents().with_list(|list| {
            list.iter()
                .filter(|global| global.interface == WlOutput::interface().name)
                .map(|global| {
                    debug!(target: "ToplevelService::connect", "Adding output with name {} and version {}", global.name, global.version);
                    let output: WlOutput = globals.registry().bind(
                        global.name,
                        global.version.min(OUTPUT_VERSION),
                        &handle,
                        (),
                    );
                    (output, global.name)
                })
                .collect()
        });

        let registry = ToplevelRegistry::new(manager.version())
            .with_dedup_synced(dedup_synced)
            .with_seat(seat);

        Ok(Self {
            connection,
            manager,
            event_queue,
            data: ToplevelServiceData { registry, outputs },
        })
    }

    pub fn subscribe(&mut self, observer: Box<dyn ToplevelObserver<ZwlrForeignToplevelHandleV1>>) {
        self.data.registry.subscribe(observer);
    }

    pub fn registry(&self) -> &ToplevelRegistry<ZwlrForeignToplevelHandleV1> {
        &self.data.registry
    }

    /// Waits until the compositor has processed everything sent so far,
    /// which includes the initial burst of toplevels after binding.
    pub fn roundtrip(&mut self) -> Result<usize, ToplevelError> {
        let dispatched = self.event_queue.roundtrip(&mut self.data)?;
        self.data.registry.flush_deferred();
        self.connection.flush()?;
        Ok(dispatched)
    }

    pub fn request(&mut self, id: ToplevelId, request: Request) -> Result<(), ToplevelError> {
        self.data.registry.request(id, request);
        self.connection.flush()?;
        Ok(())
    }

    /// Dispatches events until the compositor finishes the manager or the
    /// connection breaks.
    pub fn run(&mut self) -> Result<(), ToplevelError> {
        while !self.data.registry.is_finished() {
            self.event_queue.blocking_dispatch(&mut self.data)?;
            self.data.registry.flush_deferred();
            self.connection.flush()?;
        }

        Ok(())
    }

    /// Asks the compositor to stop sending toplevel events and waits for `finished`.
    pub fn stop(&mut self) -> Result<(), ToplevelError> {
        if self.data.registry.is_finished() {
            return Ok(());
        }

        self.manager.stop();
        self.run()
    }
}

pub struct ToplevelServiceData {
    registry: ToplevelRegistry<ZwlrForeignToplevelHandleV1>,
    outputs: Vec<(WlOutput, u32)>,
}

impl ToplevelServiceData {
    /// Global name of a bound output, which stays stable while the output exists.
    fn output_name(&self, output: &WlOutput) -> Option<u32> {
        self.outputs
            .iter()
            .find(|(known, _)| known == output)
            .map(|(_, name)| *name)
    }
}

impl Dispatch<WlRegistry, GlobalListContents> for ToplevelServiceData {
    fn event(
        state: &mut Self,
        proxy: &WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        handle: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => {
                if interface == WlOutput::interface().name {
                    debug!(target: "ToplevelService::WlRegistry::Event::Global", "Adding output with name {name} and version {version}");
                    let output: WlOutput = proxy.bind(name, version.min(OUTPUT_VERSION), handle, ());
                    state.outputs.push((output, name));
                }
            }
            wl_registry::Event::GlobalRemove { name } => {
                if let Some(index) = state.outputs.iter().position(|(_, n)| *n == name) {
                    debug!(target: "ToplevelService::WlRegistry::Event::GlobalRemove", "Output with name {name} was removed");
                    let (output, _) = state.outputs.remove(index);
                    if output.version() >= 3 {
                        output.release();
                    }
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<WlSeat, ()> for ToplevelServiceData {
    fn event(
        _state: &mut Self,
        _proxy: &WlSeat,
        _event: <WlSeat as Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<WlOutput, ()> for ToplevelServiceData {
    fn event(
        _state: &mut Self,
        _proxy: &WlOutput,
        _event: <WlOutput as Proxy>::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<ZwlrForeignToplevelManagerV1, ()> for ToplevelServiceData {
    fn event(
        state: &mut Self,
        _proxy: &ZwlrForeignToplevelManagerV1,
        event: zwlr_foreign_toplevel_manager_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
        match event {
            zwlr_foreign_toplevel_manager_v1::Event::Toplevel { toplevel } => {
                let id = toplevel_id(&toplevel);
                state.registry.handle(ToplevelEvent::Announced {
                    id,
                    handle: toplevel,
                });
            }
            zwlr_foreign_toplevel_manager_v1::Event::Finished => {
                state.registry.handle(ToplevelEvent::Finished);
            }
            _ => {}
        }
    }

    event_created_child!(ToplevelServiceData, ZwlrForeignToplevelManagerV1, [
        zwlr_foreign_toplevel_manager_v1::EVT_TOPLEVEL_OPCODE => (ZwlrForeignToplevelHandleV1, ())
    ]);
}

impl Dispatch<ZwlrForeignToplevelHandleV1, ()> for ToplevelServiceData {
    fn event(
        state: &mut Self,
        proxy: &ZwlrForeignToplevelHandleV1,
        event: zwlr_foreign_toplevel_handle_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qhandle: &QueueHandle<Self>,
    ) {
        let id = toplevel_id(proxy);
        let update = match event {
            zwlr_foreign_toplevel_handle_v1::Event::Done => {
                state.registry.handle(ToplevelEvent::Done { id });
                return;
            }
            zwlr_foreign_toplevel_handle_v1::Event::Closed => {
                state.registry.handle(ToplevelEvent::Closed { id });
                return;
            }
            zwlr_foreign_toplevel_handle_v1::Event::Title { title } => FieldUpdate::Title(title),
            zwlr_foreign_toplevel_handle_v1::Event::AppId { app_id } => FieldUpdate::AppId(app_id),
            zwlr_foreign_toplevel_handle_v1::Event::State { state: raw } => {
                FieldUpdate::States(StateFlag::parse_array(&raw))
            }
            zwlr_foreign_toplevel_handle_v1::Event::OutputEnter { output } => {
                let Some(name) = state.output_name(&output) else {
                    debug!(target: "ToplevelService::OutputEnter", "Toplevel {id} entered an unknown output");
                    return;
                };
                FieldUpdate::OutputEnter(name)
            }
            zwlr_foreign_toplevel_handle_v1::Event::OutputLeave { output } => {
                let Some(name) = state.output_name(&output) else {
                    debug!(target: "ToplevelService::OutputLeave", "Toplevel {id} left an unknown output");
                    return;
                };
                FieldUpdate::OutputLeave(name)
            }
            zwlr_foreign_toplevel_handle_v1::Event::Parent { parent } => {
                FieldUpdate::Parent(parent.as_ref().map(toplevel_id))
            }
            other => FieldUpdate::Unknown {
                field: format!("{other:?}"),
            },
        };

        state.registry.handle(ToplevelEvent::Field { id, update });
    }
}
