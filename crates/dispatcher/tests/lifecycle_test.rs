use std::sync::Arc;

use maintenance_core::config::{ClusterSettings, SchemaConfig};
use maintenance_core::MaintenanceError;
use maintenance_dispatcher::{
    event_channel, step_names, CalculatorLookup, MaintenanceEngine, MaintenanceEvent,
    MaintenanceEventListener, MaintenanceQueue, StepRunnerRegistry, StorageNodeLifecycle,
};
use maintenance_domain::entities::{JobType, OperationMode, StorageNode};
use maintenance_domain::ports::{operations, MembershipEvent};
use maintenance_domain::repositories::StorageNodeRepository;
use maintenance_infrastructure::{
    InMemoryMaintenanceJobRepository, InMemoryStorageNodeRepository, MaintenanceMetrics,
};
use maintenance_testing_utils::{
    CompletionBuilder, JobBuilder, RecordingOperationDispatcher, RecordingStorageSession,
    ScheduledOperation, StorageNodeBuilder,
};
use serde_json::json;

struct LifecycleHarness {
    node_repo: Arc<InMemoryStorageNodeRepository>,
    dispatcher: Arc<RecordingOperationDispatcher>,
    session: Arc<RecordingStorageSession>,
    queue: Arc<MaintenanceQueue>,
    engine: Arc<MaintenanceEngine>,
    lifecycle: Arc<StorageNodeLifecycle>,
    listener: MaintenanceEventListener,
}

impl LifecycleHarness {
    async fn with_cluster(addresses: &[&str]) -> Self {
        let node_repo = Arc::new(InMemoryStorageNodeRepository::new());
        for address in addresses {
            node_repo
                .create(&StorageNodeBuilder::normal(address).build())
                .await
                .unwrap();
        }
        let dispatcher = Arc::new(RecordingOperationDispatcher::new());
        let session = Arc::new(RecordingStorageSession::new());
        let cluster = ClusterSettings::default();
        let schema = SchemaConfig::default();

        let queue = Arc::new(MaintenanceQueue::new(
            Arc::new(InMemoryMaintenanceJobRepository::new()),
            node_repo.clone(),
            CalculatorLookup::with_defaults(&cluster, &schema),
        ));
        let runners = StepRunnerRegistry::with_defaults(
            node_repo.clone(),
            dispatcher.clone(),
            session.clone(),
            &schema,
        );
        let lifecycle = Arc::new(StorageNodeLifecycle::new(
            node_repo.clone(),
            queue.clone(),
            dispatcher.clone(),
            cluster,
            MaintenanceMetrics::disabled(),
        ));
        let engine = Arc::new(
            MaintenanceEngine::new(queue.clone(), runners, MaintenanceMetrics::disabled())
                .with_observer(lifecycle.clone()),
        );
        let (_sender, receiver) = event_channel(16);
        let listener = MaintenanceEventListener::new(lifecycle.clone(), engine.clone(), receiver);

        Self {
            node_repo,
            dispatcher,
            session,
            queue,
            engine,
            lifecycle,
            listener,
        }
    }

    async fn node(&self, address: &str) -> StorageNode {
        self.node_repo.find_by_address(address).await.unwrap().unwrap()
    }

    async fn complete(&self, operation: &ScheduledOperation) {
        let completion = CompletionBuilder::new(
            operation.operation_id,
            &operation.target_address,
            &operation.operation_name,
        )
        .with_parameters(operation.parameters.clone())
        .build();
        self.listener
            .process_event(&MaintenanceEvent::OperationUpdate(completion))
            .await
            .unwrap();
    }

    async fn fail(&self, operation: &ScheduledOperation, message: &str) {
        let completion = CompletionBuilder::new(
            operation.operation_id,
            &operation.target_address,
            &operation.operation_name,
        )
        .failed(message)
        .build();
        self.listener
            .process_event(&MaintenanceEvent::OperationUpdate(completion))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_announce_requires_existing_cluster() {
    let harness = LifecycleHarness::with_cluster(&[]).await;
    let err = harness
        .lifecycle
        .announce_storage_node(StorageNode::new("10.0.0.3"))
        .await
        .unwrap_err();
    assert!(matches!(err, MaintenanceError::InvalidTopology(_)));
    assert_eq!(harness.dispatcher.count(), 0);
}

#[tokio::test]
async fn test_announce_chains_through_cluster_then_bootstraps() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;

    let new_node = harness
        .lifecycle
        .announce_storage_node(StorageNode::new("10.0.0.3"))
        .await
        .unwrap();
    assert_eq!(new_node.operation_mode, OperationMode::Announce);
    assert!(harness.node("10.0.0.1").await.maintenance_pending);
    assert!(harness.node("10.0.0.2").await.maintenance_pending);

    // 一次只通知一个节点
    let first = harness.dispatcher.last_operation().unwrap();
    assert_eq!(harness.dispatcher.count(), 1);
    assert_eq!(first.operation_name, operations::UPDATE_KNOWN_NODES);
    assert_eq!(first.target_address, "10.0.0.1");
    assert_eq!(
        first.parameters["addresses"],
        json!(["10.0.0.1", "10.0.0.2", "10.0.0.3"])
    );

    harness.complete(&first).await;
    assert!(!harness.node("10.0.0.1").await.maintenance_pending);
    let second = harness.dispatcher.last_operation().unwrap();
    assert_eq!(second.operation_name, operations::UPDATE_KNOWN_NODES);
    assert_eq!(second.target_address, "10.0.0.2");
    assert_eq!(harness.node("10.0.0.3").await.operation_mode, OperationMode::Announce);

    harness.complete(&second).await;
    assert_eq!(harness.node("10.0.0.3").await.operation_mode, OperationMode::Bootstrap);
    let bootstrap = harness.dispatcher.last_operation().unwrap();
    assert_eq!(bootstrap.operation_name, operations::PREPARE_FOR_BOOTSTRAP);
    assert_eq!(bootstrap.target_address, "10.0.0.3");
    assert_eq!(bootstrap.parameters["cqlPort"], json!(9142));
    assert_eq!(bootstrap.parameters["gossipPort"], json!(7100));
    assert_eq!(
        bootstrap.parameters["addresses"],
        json!(["10.0.0.1", "10.0.0.2", "10.0.0.3"])
    );
}

#[tokio::test]
async fn test_announce_failure_halts_deployment() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;
    harness
        .lifecycle
        .announce_storage_node(StorageNode::new("10.0.0.3"))
        .await
        .unwrap();
    let first = harness.dispatcher.last_operation().unwrap();

    harness.fail(&first, "connection refused").await;

    let new_node = harness.node("10.0.0.3").await;
    let cluster_node = harness.node("10.0.0.1").await;
    assert_eq!(new_node.operation_mode, OperationMode::Announce);
    assert!(new_node.error_message.as_ref().unwrap().contains("10.0.0.1"));
    assert!(cluster_node.error_message.as_ref().unwrap().contains("10.0.0.3"));
    assert_eq!(cluster_node.failed_operation, Some(first.operation_id));
    assert_eq!(new_node.failed_operation, Some(first.operation_id));

    // 不再有后续操作
    assert_eq!(harness.dispatcher.count(), 1);
    harness.engine.execute().await.unwrap();
    assert_eq!(harness.dispatcher.count(), 1);
    assert_eq!(harness.node("10.0.0.3").await.operation_mode, OperationMode::Announce);
}

#[tokio::test]
async fn test_log_error_is_serialized_with_completion_handling() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;
    harness
        .lifecycle
        .announce_storage_node(StorageNode::new("10.0.0.3"))
        .await
        .unwrap();
    let first = harness.dispatcher.last_operation().unwrap();

    tokio::join!(
        harness
            .lifecycle
            .log_error(OperationMode::Announce, "部署过程中出现意外错误"),
        harness.complete(&first),
    );

    let new_node = harness.node("10.0.0.3").await;
    assert_eq!(new_node.error_message.as_deref(), Some("部署过程中出现意外错误"));
    assert_eq!(new_node.operation_mode, OperationMode::Announce);
    assert!(!harness.node("10.0.0.1").await.maintenance_pending);
    assert_eq!(harness.dispatcher.last_operation().unwrap().target_address, "10.0.0.2");
}

#[tokio::test]
async fn test_prepare_for_bootstrap_failure_marks_new_node() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1"]).await;
    harness
        .node_repo
        .create(&StorageNodeBuilder::new("10.0.0.2").build())
        .await
        .unwrap();
    let handle = harness
        .lifecycle
        .bootstrap_storage_node(&StorageNode::new("10.0.0.2"))
        .await
        .unwrap();
    assert_eq!(handle.operation_name, operations::PREPARE_FOR_BOOTSTRAP);
    let operation = harness.dispatcher.last_operation().unwrap();

    harness.fail(&operation, "port in use").await;

    let node = harness.node("10.0.0.2").await;
    assert_eq!(node.operation_mode, OperationMode::Bootstrap);
    assert!(node.has_error());
    assert_eq!(node.failed_operation, Some(operation.operation_id));
    assert!(harness.node("10.0.0.1").await.error_message.is_none());
}

#[tokio::test]
async fn test_join_runs_add_node_maintenance_until_normal() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;
    harness
        .node_repo
        .create(
            &StorageNodeBuilder::new("10.0.0.3")
                .with_mode(OperationMode::Bootstrap)
                .build(),
        )
        .await
        .unwrap();

    harness
        .listener
        .process_event(&MaintenanceEvent::Membership(MembershipEvent::NodeJoined {
            address: "10.0.0.3".to_string(),
        }))
        .await
        .unwrap();

    assert_eq!(
        harness.node("10.0.0.3").await.operation_mode,
        OperationMode::AddNodeMaintenance
    );
    let queue = harness.queue.load_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].job_type, JobType::AddNodeMaintenance);
    let targets: Vec<_> = queue[0].steps.iter().filter_map(|s| s.target()).collect();
    assert_eq!(targets, vec!["10.0.0.3", "10.0.0.1", "10.0.0.2"]);

    for expected in ["10.0.0.3", "10.0.0.1", "10.0.0.2"] {
        let summary = harness.engine.execute().await.unwrap();
        assert!(summary.awaiting_operation);
        let operation = harness.dispatcher.last_operation().unwrap();
        assert_eq!(operation.operation_name, operations::ADD_NODE_MAINTENANCE);
        assert_eq!(operation.target_address, expected);
        assert_eq!(operation.parameters["runRepair"], json!(false));
        harness.complete(&operation).await;
        assert!(!harness.node(expected).await.maintenance_pending);
    }

    assert_eq!(harness.node("10.0.0.3").await.operation_mode, OperationMode::Normal);
    assert!(harness.queue.load_queue().await.unwrap().is_empty());
    // 2 → 3 不修改复制因子
    assert!(harness.session.statements().is_empty());
}

#[tokio::test]
async fn test_join_of_second_node_updates_schema() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1"]).await;
    harness
        .node_repo
        .create(
            &StorageNodeBuilder::new("10.0.0.2")
                .with_mode(OperationMode::Bootstrap)
                .build(),
        )
        .await
        .unwrap();

    let job = harness
        .lifecycle
        .perform_add_node_maintenance_if_necessary("10.0.0.2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.steps[0].name, step_names::UPDATE_SCHEMA);
    assert_eq!(job.configuration()["runRepair"], json!(true));
    assert_eq!(job.configuration()["replicationFactor"], json!(2));
    assert_eq!(job.configuration()["gcGraceSeconds"], json!(691200));

    harness.engine.execute().await.unwrap();
    let statements = harness.session.statements();
    assert!(statements.iter().any(|s| s.contains("'replication_factor': 2")));
    assert!(statements.iter().any(|s| s.contains("gc_grace_seconds = 691200")));
}

#[tokio::test]
async fn test_schema_failure_after_join_marks_new_node_and_halts() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1"]).await;
    harness
        .node_repo
        .create(
            &StorageNodeBuilder::new("10.0.0.2")
                .with_mode(OperationMode::Bootstrap)
                .build(),
        )
        .await
        .unwrap();
    harness.session.fail_with("keyspace rhq unavailable");
    harness
        .lifecycle
        .perform_add_node_maintenance_if_necessary("10.0.0.2")
        .await
        .unwrap();

    let summary = harness.engine.execute().await.unwrap();
    assert_eq!(summary.jobs_requeued, 1);

    let new_node = harness.node("10.0.0.2").await;
    assert_eq!(new_node.operation_mode, OperationMode::AddNodeMaintenance);
    assert!(new_node
        .error_message
        .as_ref()
        .unwrap()
        .contains(step_names::UPDATE_SCHEMA));

    // 错误清除之前不再重试
    let summary = harness.engine.execute().await.unwrap();
    assert_eq!(summary.jobs_requeued, 0);
    assert_eq!(summary.steps_executed, 0);
    assert_eq!(harness.queue.load_queue().await.unwrap().len(), 1);
    assert_eq!(harness.dispatcher.count(), 0);
}

#[tokio::test]
async fn test_add_node_maintenance_failure_halts_and_marks_both_nodes() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;
    harness
        .node_repo
        .create(
            &StorageNodeBuilder::new("10.0.0.3")
                .with_mode(OperationMode::Bootstrap)
                .build(),
        )
        .await
        .unwrap();
    harness
        .lifecycle
        .perform_add_node_maintenance_if_necessary("10.0.0.3")
        .await
        .unwrap();

    harness.engine.execute().await.unwrap();
    let own = harness.dispatcher.last_operation().unwrap();
    harness.complete(&own).await;

    harness.engine.execute().await.unwrap();
    let on_cluster_node = harness.dispatcher.last_operation().unwrap();
    assert_eq!(on_cluster_node.target_address, "10.0.0.1");
    harness.fail(&on_cluster_node, "repair failed").await;

    let new_node = harness.node("10.0.0.3").await;
    assert_eq!(new_node.operation_mode, OperationMode::AddNodeMaintenance);
    assert!(new_node.has_error());
    assert!(harness.node("10.0.0.1").await.has_error());
    assert!(harness.queue.load_queue().await.unwrap().is_empty());

    let dispatched = harness.dispatcher.count();
    harness.engine.execute().await.unwrap();
    assert_eq!(harness.dispatcher.count(), dispatched);
}

#[tokio::test]
async fn test_join_skipped_when_not_bootstrapping_or_deploy_queued() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;
    let skipped = harness
        .lifecycle
        .perform_add_node_maintenance_if_necessary("10.0.0.1")
        .await
        .unwrap();
    assert!(skipped.is_none());

    harness
        .node_repo
        .create(
            &StorageNodeBuilder::new("10.0.0.3")
                .with_mode(OperationMode::Bootstrap)
                .build(),
        )
        .await
        .unwrap();
    harness
        .queue
        .schedule_maintenance(JobBuilder::deploy("10.0.0.3").build())
        .await
        .unwrap();

    let skipped = harness
        .lifecycle
        .perform_add_node_maintenance_if_necessary("10.0.0.3")
        .await
        .unwrap();
    assert!(skipped.is_none());
    assert_eq!(
        harness.node("10.0.0.3").await.operation_mode,
        OperationMode::Bootstrap
    );
}

#[tokio::test]
async fn test_listener_stops_when_channel_closes() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1"]).await;
    let (sender, receiver) = event_channel(4);
    let listener = MaintenanceEventListener::new(
        harness.lifecycle.clone(),
        harness.engine.clone(),
        receiver,
    );

    sender
        .send(MaintenanceEvent::Membership(MembershipEvent::NodeLeft {
            address: "10.0.0.1".to_string(),
        }))
        .await
        .unwrap();
    drop(sender);

    listener.listen().await.unwrap();
    assert!(!listener.is_running().await);
}

#[tokio::test]
async fn test_deploy_job_owns_its_remote_operations() {
    let harness = LifecycleHarness::with_cluster(&["10.0.0.1", "10.0.0.2"]).await;
    harness
        .node_repo
        .create(&StorageNodeBuilder::new("10.0.0.3").build())
        .await
        .unwrap();
    harness
        .queue
        .schedule_maintenance(JobBuilder::deploy("10.0.0.3").build())
        .await
        .unwrap();

    harness.engine.execute().await.unwrap();
    let announce = harness.dispatcher.last_operation().unwrap();
    assert_eq!(announce.operation_name, operations::UPDATE_KNOWN_NODES);
    assert_eq!(announce.target_address, "10.0.0.1");

    // 作业下发的操作不触发编排器的通告链
    harness.complete(&announce).await;
    assert_eq!(harness.dispatcher.count(), 1);
    assert_eq!(harness.node("10.0.0.3").await.operation_mode, OperationMode::Announce);

    harness.engine.execute().await.unwrap();
    let second = harness.dispatcher.last_operation().unwrap();
    assert_eq!(second.target_address, "10.0.0.2");

    // CONTINUE 失败后跳过该节点，继续引导
    harness.fail(&second, "agent down").await;
    harness.engine.execute().await.unwrap();
    let bootstrap = harness.dispatcher.last_operation().unwrap();
    assert_eq!(bootstrap.operation_name, operations::PREPARE_FOR_BOOTSTRAP);
    assert_eq!(bootstrap.target_address, "10.0.0.3");
    assert_eq!(harness.node("10.0.0.3").await.operation_mode, OperationMode::Bootstrap);

    // 部署作业仍在队列中时，加入事件不会另起维护作业
    harness
        .listener
        .process_event(&MaintenanceEvent::Membership(MembershipEvent::NodeJoined {
            address: "10.0.0.3".to_string(),
        }))
        .await
        .unwrap();
    let queue = harness.queue.load_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].job_type, JobType::Deploy);
}
