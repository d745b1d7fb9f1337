// Database layer module

pub mod memory;
pub mod pool;
pub mod repositories;
pub mod store;

pub use memory::InMemoryStore;
pub use pool::DbPool;
pub use repositories::{ExecutionRepository, TriggerRepository};
pub use store::{ExecutionStore, TriggerStore};
