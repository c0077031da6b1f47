use maintenance_core::MaintenanceResult;
use maintenance_domain::entities::{job_properties, JobType, MaintenanceStep, StorageMaintenanceJob};
use serde_json::{json, Value};
use tracing::warn;

use super::{required_target, update_schema_step, StepCalculator};
use crate::step_names;

/// 新节点加入后的集群维护
///
/// 先对新节点执行，再依次对快照中的每个已有节点执行。
#[derive(Default)]
pub struct AddNodeMaintenanceCalculator;

impl AddNodeMaintenanceCalculator {
    pub fn new() -> Self {
        Self
    }
}

impl StepCalculator for AddNodeMaintenanceCalculator {
    fn job_type(&self) -> JobType {
        JobType::AddNodeMaintenance
    }

    fn calculate_steps(&self, mut job: StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let new_node = required_target(&job)?;
        let config = job.configuration().clone();

        let run_repair = config
            .get(job_properties::RUN_REPAIR)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let seeds_list = config
            .get(job_properties::SEEDS_LIST)
            .cloned()
            .unwrap_or_else(|| json!(job.cluster_snapshot));

        if let Some(replication_factor) = config
            .get(job_properties::REPLICATION_FACTOR)
            .and_then(Value::as_u64)
        {
            let gc_grace = config
                .get(job_properties::GC_GRACE_SECONDS)
                .and_then(Value::as_u64)
                .map(|s| s as u32);
            job.add_step(update_schema_step(replication_factor as u32, gc_grace));
        }

        let parameters = json!({
            job_properties::RUN_REPAIR: run_repair,
            job_properties::UPDATE_SEEDS_LIST: true,
            job_properties::SEEDS_LIST: seeds_list,
        });

        let mut targets = vec![new_node.clone()];
        targets.extend(job.cluster_snapshot.iter().filter(|a| **a != new_node).cloned());

        for address in targets {
            job.add_step(
                MaintenanceStep::new(step_names::ADD_NODE_MAINTENANCE)
                    .with_description(format!(
                        "Run add node maintenance on {address} for new node {new_node}"
                    ))
                    .with_target(&address)
                    .with_parameters(parameters.clone()),
            );
        }

        Ok(job)
    }

    /// 任一节点的维护失败都会中止整个新增节点流程
    fn update_steps(
        &self,
        job: &mut StorageMaintenanceJob,
        failed_step: &MaintenanceStep,
    ) -> MaintenanceResult<()> {
        warn!(
            job_number = job.job_number,
            step = %failed_step.name,
            remaining = job.steps.len(),
            "新增节点维护失败，放弃剩余步骤"
        );
        job.steps.clear();
        Ok(())
    }
}
