use std::sync::Arc;

use async_trait::async_trait;
use maintenance_core::MaintenanceResult;
use maintenance_domain::entities::{
    job_properties, JobType, MaintenanceStep, OperationMode, StepFailureStrategy, StorageMaintenanceJob,
};
use maintenance_domain::ports::{operations, RemoteOperationDispatcher};
use maintenance_domain::repositories::StorageNodeRepository;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{StepOutcome, StepRunner};
use crate::step_names;

async fn dispatch(
    dispatcher: &dyn RemoteOperationDispatcher,
    step: &MaintenanceStep,
    operation: &str,
    parameters: Value,
) -> MaintenanceResult<StepOutcome> {
    let target = step.required_target()?;
    let handle = dispatcher.schedule_operation(target, operation, parameters).await?;
    debug!(
        step = %step.name,
        address = target,
        operation,
        operation_id = handle.operation_id,
        "远程操作已下发"
    );
    Ok(StepOutcome::Dispatched(handle))
}

fn step_parameters(step: &MaintenanceStep) -> Value {
    step.parameters().cloned().unwrap_or_else(|| json!({}))
}

/// 通知已有节点新节点的存在
pub struct AnnounceStorageNodeRunner {
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
}

impl AnnounceStorageNodeRunner {
    pub fn new(dispatcher: Arc<dyn RemoteOperationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepRunner for AnnounceStorageNodeRunner {
    fn name(&self) -> &str {
        step_names::ANNOUNCE_STORAGE_NODE
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Continue
    }

    async fn execute(
        &self,
        job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        // 已知节点列表 = 快照中的节点 + 新节点
        let mut addresses = job.cluster_snapshot.clone();
        if let Some(new_node) = step
            .parameters()
            .and_then(|p| p.get(job_properties::ADDRESS))
            .and_then(Value::as_str)
        {
            if !addresses.iter().any(|a| a == new_node) {
                addresses.push(new_node.to_string());
            }
        }

        dispatch(
            self.dispatcher.as_ref(),
            step,
            operations::UPDATE_KNOWN_NODES,
            json!({ job_properties::ADDRESSES: addresses }),
        )
        .await
    }
}

/// 从剩余节点的已知列表中移除下线节点
pub struct UnannounceStorageNodeRunner {
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
}

impl UnannounceStorageNodeRunner {
    pub fn new(dispatcher: Arc<dyn RemoteOperationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepRunner for UnannounceStorageNodeRunner {
    fn name(&self) -> &str {
        step_names::UNANNOUNCE_STORAGE_NODE
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Continue
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        let addresses = step
            .parameters()
            .and_then(|p| p.get(job_properties::ADDRESSES))
            .cloned()
            .unwrap_or_else(|| json!([]));

        dispatch(
            self.dispatcher.as_ref(),
            step,
            operations::UPDATE_KNOWN_NODES,
            json!({ job_properties::ADDRESSES: addresses }),
        )
        .await
    }
}

/// 让新节点带着端口和种子列表加入集群
pub struct BootstrapNodeRunner {
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
}

impl BootstrapNodeRunner {
    pub fn new(dispatcher: Arc<dyn RemoteOperationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepRunner for BootstrapNodeRunner {
    fn name(&self) -> &str {
        step_names::BOOTSTRAP_NODE
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Abort
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        dispatch(
            self.dispatcher.as_ref(),
            step,
            operations::PREPARE_FOR_BOOTSTRAP,
            step_parameters(step),
        )
        .await
    }
}

/// 在单个节点上修复一张表
///
/// 失败时提交一个只修复这张表的后续作业。
pub struct RunRepairRunner {
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
}

impl RunRepairRunner {
    pub fn new(dispatcher: Arc<dyn RemoteOperationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepRunner for RunRepairRunner {
    fn name(&self) -> &str {
        step_names::RUN_REPAIR
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Continue
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        dispatch(self.dispatcher.as_ref(), step, operations::REPAIR, step_parameters(step)).await
    }

    async fn follow_up_job(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
        error_message: &str,
    ) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let Some(target) = step.target() else {
            return Ok(None);
        };
        let parameters = step_parameters(step);
        let keyspace = parameters.get(job_properties::KEYSPACE).and_then(Value::as_str);
        let table = parameters.get(job_properties::TABLE).and_then(Value::as_str);
        let (Some(keyspace), Some(table)) = (keyspace, table) else {
            return Ok(None);
        };

        info!(address = target, keyspace, table, error = error_message, "修复失败，提交后续修复作业");
        let job = StorageMaintenanceJob::new(
            JobType::Repair,
            format!("Repair {keyspace}.{table} on {target}"),
            json!({
                job_properties::TARGET: target,
                job_properties::KEYSPACE: keyspace,
                job_properties::TABLE: table,
            }),
        );
        Ok(Some(job))
    }
}

pub struct DecommissionNodeRunner {
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
}

impl DecommissionNodeRunner {
    pub fn new(dispatcher: Arc<dyn RemoteOperationDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl StepRunner for DecommissionNodeRunner {
    fn name(&self) -> &str {
        step_names::DECOMMISSION_NODE
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Abort
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        dispatch(
            self.dispatcher.as_ref(),
            step,
            operations::DECOMMISSION,
            step_parameters(step),
        )
        .await
    }
}

/// 新节点加入后在单个节点上更新种子列表并按需修复
///
/// 目标节点已经不再待维护时直接跳过。
pub struct AddNodeMaintenanceRunner {
    node_repo: Arc<dyn StorageNodeRepository>,
    dispatcher: Arc<dyn RemoteOperationDispatcher>,
}

impl AddNodeMaintenanceRunner {
    pub fn new(
        node_repo: Arc<dyn StorageNodeRepository>,
        dispatcher: Arc<dyn RemoteOperationDispatcher>,
    ) -> Self {
        Self {
            node_repo,
            dispatcher,
        }
    }
}

#[async_trait]
impl StepRunner for AddNodeMaintenanceRunner {
    fn name(&self) -> &str {
        step_names::ADD_NODE_MAINTENANCE
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Continue
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        let target = step.required_target()?;
        let pending = match self.node_repo.find_by_address(target).await? {
            Some(node) => {
                node.maintenance_pending
                    && matches!(
                        node.operation_mode,
                        OperationMode::Normal | OperationMode::AddNodeMaintenance
                    )
            }
            None => false,
        };
        if !pending {
            info!(address = target, "节点没有待处理的维护，跳过");
            return Ok(StepOutcome::Completed);
        }

        dispatch(
            self.dispatcher.as_ref(),
            step,
            operations::ADD_NODE_MAINTENANCE,
            step_parameters(step),
        )
        .await
    }
}
