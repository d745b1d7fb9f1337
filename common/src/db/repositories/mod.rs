// PostgreSQL repositories backing the storage traits

pub mod execution;
pub mod trigger;

pub use execution::ExecutionRepository;
pub use trigger::TriggerRepository;
