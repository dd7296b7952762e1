use itertools::Itertools;
use serde::Serialize;
use std::{collections::BTreeSet, fmt};

/// Protocol object id of a toplevel handle. Unique while the handle is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ToplevelId(pub u32);

impl fmt::Display for ToplevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StateFlag {
    Maximized,
    Minimized,
    Activated,
    Fullscreen,
    /// A state value this client does not know about yet.
    Other(u32),
}

impl StateFlag {
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => StateFlag::Maximized,
            1 => StateFlag::Minimized,
            2 => StateFlag::Activated,
            3 => StateFlag::Fullscreen,
            other => StateFlag::Other(other),
        }
    }

    /// Decodes the `wl_array` of native-endian u32 values carried by the `state` event.
    /// A trailing partial value is dropped.
    pub fn parse_array(bytes: &[u8]) -> BTreeSet<StateFlag> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                StateFlag::from_raw(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            })
            .collect()
    }
}

impl fmt::Display for StateFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateFlag::Maximized => write!(f, "maximized"),
            StateFlag::Minimized => write!(f, "minimized"),
            StateFlag::Activated => write!(f, "activated"),
            StateFlag::Fullscreen => write!(f, "fullscreen"),
            StateFlag::Other(value) => write!(f, "state#{value}"),
        }
    }
}

/// A single attribute change reported for a toplevel before the next `done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Title(String),
    AppId(String),
    States(BTreeSet<StateFlag>),
    OutputEnter(u32),
    OutputLeave(u32),
    Parent(Option<ToplevelId>),
    /// Anything the protocol grows later. Ignored when applied.
    Unknown { field: String },
}

/// The externally visible view of a toplevel, as of its last `done`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToplevelSnapshot {
    pub title: Option<String>,
    pub app_id: Option<String>,
    pub states: BTreeSet<StateFlag>,
    pub outputs: BTreeSet<u32>,
    pub parent: Option<ToplevelId>,
}

impl ToplevelSnapshot {
    pub fn has_state(&self, state: StateFlag) -> bool {
        self.states.contains(&state)
    }

    pub fn states_label(&self) -> String {
        self.states.iter().join(",")
    }
}

/// One-way requests a client can send on a toplevel handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Activate,
    SetMaximized(bool),
    SetMinimized(bool),
    SetFullscreen(bool),
    Close,
}

/// Inbound messages understood by the registry, as translated from the wire.
#[derive(Debug)]
pub enum ToplevelEvent<H> {
    Announced { id: ToplevelId, handle: H },
    Field { id: ToplevelId, update: FieldUpdate },
    Done { id: ToplevelId },
    Closed { id: ToplevelId },
    Finished,
}
