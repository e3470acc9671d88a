mod error;
mod memory;
mod records;
mod redb_store;
mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use records::{TaskRecord, TaskSchedule, WorkflowCheckpoint};
pub use redb_store::RedbStore;
pub use store::RuntimeStore;
