use anyhow::Result;
use chrono::Utc;
use maintenance_core::config::DatabaseConfig;
use maintenance_domain::entities::{JobFailure, MaintenanceStep, OperationMode, StepFailureStrategy};
use maintenance_domain::repositories::*;
use maintenance_infrastructure::database::{
    DatabaseManager, SqliteMaintenanceJobRepository, SqliteStorageNodeRepository,
};
use maintenance_testing_utils::{JobBuilder, StorageNodeBuilder};
use serde_json::json;
use tempfile::TempDir;

async fn job_repository() -> Result<SqliteMaintenanceJobRepository> {
    let manager = DatabaseManager::in_memory().await?;
    Ok(SqliteMaintenanceJobRepository::new(manager.pool().clone()))
}

#[tokio::test]
async fn test_job_roundtrip_preserves_steps_and_configuration() -> Result<()> {
    let repo = job_repository().await?;
    let job = JobBuilder::deploy("10.0.0.4")
        .with_snapshot(&["10.0.0.1", "10.0.0.2"])
        .with_step(
            MaintenanceStep::new("AnnounceStorageNode")
                .with_description("Announce new node 10.0.0.4 to 10.0.0.1")
                .with_target("10.0.0.1")
                .with_parameters(json!({ "address": "10.0.0.4" })),
        )
        .with_steps(&["BootstrapNode"])
        .build();

    let created = repo.create(&job).await?;
    assert!(created.job_number > 0);
    assert_eq!(created.step_names(), vec!["AnnounceStorageNode", "BootstrapNode"]);
    assert_eq!(created.target(), Some("10.0.0.4"));
    assert_eq!(created.cluster_snapshot, vec!["10.0.0.1", "10.0.0.2"]);
    assert_eq!(created.steps[0].target(), Some("10.0.0.1"));
    assert!(created.steps.iter().all(|s| s.job_number == created.job_number));

    let loaded = repo.find_by_job_number(created.job_number).await?.unwrap();
    assert_eq!(loaded, created);
    Ok(())
}

#[tokio::test]
async fn test_find_all_is_queue_ordered_and_idempotent() -> Result<()> {
    let repo = job_repository().await?;
    let first = repo.create(&JobBuilder::deploy("10.0.0.4").with_steps(&["A", "B"]).build()).await?;
    let second = repo.create(&JobBuilder::deploy("10.0.0.5").with_steps(&["C"]).build()).await?;

    let queue = repo.find_all().await?;
    let numbers: Vec<i64> = queue.iter().map(|j| j.job_number).collect();
    assert_eq!(numbers, vec![first.job_number, second.job_number]);

    let again = repo.find_all().await?;
    assert_eq!(queue, again);
    Ok(())
}

#[tokio::test]
async fn test_update_replaces_steps_atomically() -> Result<()> {
    let repo = job_repository().await?;
    let mut job = repo.create(&JobBuilder::deploy("10.0.0.4").with_steps(&["A", "B", "C"]).build()).await?;

    job.remove_step(1);
    job.pending_operation = Some(77);
    job.started_at = Some(Utc::now());
    repo.update(&job).await?;

    let loaded = repo.find_by_job_number(job.job_number).await?.unwrap();
    assert_eq!(loaded.step_names(), vec!["B", "C"]);
    assert_eq!(loaded.steps[0].step_number, 2);
    assert_eq!(loaded.pending_operation, Some(77));
    assert!(loaded.is_started());

    let by_operation = repo.find_by_pending_operation(77).await?.unwrap();
    assert_eq!(by_operation.job_number, job.job_number);
    assert!(repo.find_by_pending_operation(78).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_requeue_deletes_old_job_and_appends_replacement() -> Result<()> {
    let repo = job_repository().await?;
    let first = repo.create(&JobBuilder::deploy("10.0.0.4").with_steps(&["A", "B"]).build()).await?;
    let second = repo.create(&JobBuilder::deploy("10.0.0.5").with_steps(&["C"]).build()).await?;

    let mut replacement = first.clone();
    replacement.remove_step(1);
    replacement.renumber_steps();
    replacement.last_failure = Some(JobFailure {
        step_number: 2,
        step_name: "B".to_string(),
        strategy: StepFailureStrategy::Abort,
        message: "节点不可达".to_string(),
        failed_at: Utc::now(),
    });

    let requeued = repo.requeue(first.job_number, &replacement).await?;
    assert!(requeued.job_number > second.job_number);
    assert_eq!(requeued.steps[0].step_number, 1);
    assert_eq!(requeued.last_failure.as_ref().map(|f| f.step_name.as_str()), Some("B"));

    assert!(repo.find_by_job_number(first.job_number).await?.is_none());
    let queue = repo.find_all().await?;
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].job_number, second.job_number);
    assert_eq!(queue[1].job_number, requeued.job_number);
    Ok(())
}

#[tokio::test]
async fn test_delete_cascades_to_steps() -> Result<()> {
    let manager = DatabaseManager::in_memory().await?;
    let repo = SqliteMaintenanceJobRepository::new(manager.pool().clone());
    let job = repo.create(&JobBuilder::deploy("10.0.0.4").with_steps(&["A", "B"]).build()).await?;

    assert!(repo.remove_step(job.job_number, 1).await?);
    assert!(!repo.remove_step(job.job_number, 1).await?);
    assert!(repo.delete(job.job_number).await?);
    assert_eq!(repo.count().await?, 0);

    let orphaned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM maintenance_steps")
        .fetch_one(manager.pool())
        .await?;
    assert_eq!(orphaned, 0);
    Ok(())
}

#[tokio::test]
async fn test_storage_node_repository() -> Result<()> {
    let manager = DatabaseManager::in_memory().await?;
    let repo = SqliteStorageNodeRepository::new(manager.pool().clone());

    repo.create(&StorageNodeBuilder::normal("10.0.0.2").build()).await?;
    repo.create(&StorageNodeBuilder::normal("10.0.0.1").with_maintenance_pending(true).build()).await?;
    let new_node = repo.create(&StorageNodeBuilder::new("10.0.0.4").build()).await?;
    assert!(new_node.id > 0);
    assert_eq!(new_node.operation_mode, OperationMode::Announce);

    let normal = repo.find_by_mode(OperationMode::Normal).await?;
    let addresses: Vec<&str> = normal.iter().map(|n| n.address.as_str()).collect();
    assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);

    let pending = repo.find_maintenance_pending(OperationMode::Normal).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].address, "10.0.0.1");

    let mut node = new_node.clone();
    node.set_operation_mode(OperationMode::Bootstrap);
    node.record_failure("部署已中止", Some(9));
    repo.update(&node).await?;

    let loaded = repo.find_by_address("10.0.0.4").await?.unwrap();
    assert_eq!(loaded.operation_mode, OperationMode::Bootstrap);
    assert_eq!(loaded.error_message.as_deref(), Some("部署已中止"));
    assert_eq!(loaded.failed_operation, Some(9));
    assert_eq!(loaded.cql_port, new_node.cql_port);

    assert!(repo
        .update(&StorageNodeBuilder::new("10.9.9.9").build())
        .await
        .is_err());
    Ok(())
}

#[tokio::test]
async fn test_file_database_survives_reconnect() -> Result<()> {
    let dir = TempDir::new()?;
    let config = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("maintenance.db").display()),
        ..DatabaseConfig::default()
    };

    let job_number = {
        let manager = DatabaseManager::new(&config).await?;
        let repo = SqliteMaintenanceJobRepository::new(manager.pool().clone());
        let job = repo.create(&JobBuilder::deploy("10.0.0.4").with_steps(&["A"]).build()).await?;
        manager.close().await;
        job.job_number
    };

    let manager = DatabaseManager::new(&config).await?;
    manager.health_check().await?;
    let repo = SqliteMaintenanceJobRepository::new(manager.pool().clone());
    let loaded = repo.find_by_job_number(job_number).await?.unwrap();
    assert_eq!(loaded.step_names(), vec!["A"]);
    Ok(())
}
