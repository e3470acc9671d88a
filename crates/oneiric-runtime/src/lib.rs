mod builtin;
mod error;
mod runtime;
mod snapshot;
mod supervisor;
mod watcher;

pub use builtin::register_builtins;
pub use error::RuntimeError;
pub use runtime::{Runtime, SlotRow};
pub use snapshot::{ComponentHealth, HealthSnapshot};
pub use supervisor::Supervisor;
pub use watcher::SelectionWatcher;
