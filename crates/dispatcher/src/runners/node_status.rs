use std::sync::Arc;

use async_trait::async_trait;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{
    job_properties, MaintenanceStep, OperationMode, StepFailureStrategy, StorageMaintenanceJob,
};
use maintenance_domain::repositories::StorageNodeRepository;
use serde_json::Value;
use tracing::info;

use super::{StepOutcome, StepRunner};
use crate::step_names;

/// 修改目标节点的运行模式，只写存储
pub struct UpdateStorageNodeStatusRunner {
    node_repo: Arc<dyn StorageNodeRepository>,
}

impl UpdateStorageNodeStatusRunner {
    pub fn new(node_repo: Arc<dyn StorageNodeRepository>) -> Self {
        Self { node_repo }
    }
}

#[async_trait]
impl StepRunner for UpdateStorageNodeStatusRunner {
    fn name(&self) -> &str {
        step_names::UPDATE_STORAGE_NODE_STATUS
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Abort
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        let address = step.required_target()?;
        let mode: OperationMode = step
            .property(job_properties::OPERATION_MODE)
            .and_then(Value::as_str)
            .ok_or_else(|| MaintenanceError::step_execution(&step.name, "步骤配置缺少目标运行模式"))?
            .parse()?;

        let Some(mut node) = self.node_repo.find_by_address(address).await? else {
            return Ok(StepOutcome::Failed(
                MaintenanceError::StorageNodeNotFound {
                    address: address.to_string(),
                }
                .to_string(),
            ));
        };

        node.set_operation_mode(mode);
        if mode == OperationMode::Normal {
            node.maintenance_pending = false;
            node.clear_error();
        }
        self.node_repo.update(&node).await?;

        info!(address, mode = %mode, "存储节点运行模式已更新");
        Ok(StepOutcome::Completed)
    }
}
