pub mod sqlite_job_repository;
pub mod sqlite_storage_node_repository;

pub use sqlite_job_repository::SqliteMaintenanceJobRepository;
pub use sqlite_storage_node_repository::SqliteStorageNodeRepository;
