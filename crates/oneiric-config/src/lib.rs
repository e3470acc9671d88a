mod error;
mod loader;
mod raw;
mod selection;
mod settings;

pub use error::ConfigError;
pub use loader::{apply_profile, load_selection, load_settings, ENV_PREFIX};
pub use selection::{SelectionChange, SelectionDoc};
pub use settings::{
    HttpSettings, LifecycleSettings, RemoteSettings, SecuritySettings, Settings, StoreSettings,
    SupervisorSettings, WatcherSettings,
};
