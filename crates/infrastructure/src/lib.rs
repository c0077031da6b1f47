pub mod database;
pub mod in_memory;
pub mod observability;

pub use database::*;
pub use in_memory::{InMemoryMaintenanceJobRepository, InMemoryStorageNodeRepository};
pub use observability::*;
