pub mod object;
pub mod registry;
pub mod types;
pub mod wayland;

pub use self::object::{ToplevelHandle, ToplevelObject};
pub use self::registry::{RequestQueue, ToplevelObserver};
pub use self::types::{Request, StateFlag, ToplevelId, ToplevelSnapshot};
pub use self::wayland::{MAX_MANAGER_VERSION, ToplevelService};
