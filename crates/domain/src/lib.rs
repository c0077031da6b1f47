pub mod entities;
pub mod ports;
pub mod replication_policy;
pub mod repositories;

pub use entities::*;
pub use maintenance_core::{MaintenanceError, MaintenanceResult};
pub use ports::*;
pub use replication_policy::*;
pub use repositories::*;
