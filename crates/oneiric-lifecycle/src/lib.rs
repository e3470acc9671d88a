mod cancel;
mod error;
mod factory;
mod instance;
mod manager;

pub use cancel::CancelToken;
pub use error::{LifecycleError, RollbackReport};
pub use factory::FactoryRegistry;
pub use instance::{BoxError, Health, ProviderInstance};
pub use manager::{EntryStatus, HealthRecord, LifecycleConfig, LifecycleManager, SwapRecord};
