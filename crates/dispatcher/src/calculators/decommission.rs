use maintenance_core::config::SchemaConfig;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{
    job_properties, JobType, MaintenanceStep, OperationMode, StorageMaintenanceJob,
};
use maintenance_domain::replication_policy::schema_changes_for_removal;
use serde_json::json;

use super::{apply_schema_changes, repair_steps, required_target, update_status_step, StepCalculator};
use crate::step_names;

/// 节点下线：先降低复制因子，再退役节点，最后让剩余节点忘记它
///
/// 作业快照只包含剩余节点。
pub struct DecommissionNodeCalculator {
    schema: SchemaConfig,
}

impl DecommissionNodeCalculator {
    pub fn new(schema: SchemaConfig) -> Self {
        Self { schema }
    }
}

impl StepCalculator for DecommissionNodeCalculator {
    fn job_type(&self) -> JobType {
        JobType::Decommission
    }

    fn calculate_steps(&self, mut job: StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let node = required_target(&job)?;
        let remaining = job.cluster_snapshot.clone();
        let changes = schema_changes_for_removal(remaining.len() + 1, remaining.len())?;

        job.add_step(update_status_step(&node, OperationMode::Decommission));
        apply_schema_changes(&mut job, &changes);

        job.add_step(
            MaintenanceStep::new(step_names::DECOMMISSION_NODE)
                .with_description(format!("Decommission node {node}"))
                .with_target(&node)
                .with_parameters(json!({})),
        );

        job.add_step(update_status_step(&node, OperationMode::RemoveMaintenance));

        if changes.repair_needed() {
            for step in repair_steps(&self.schema, &remaining) {
                job.add_step(step);
            }
        }

        job.add_step(update_status_step(&node, OperationMode::Unannounce));

        for address in &remaining {
            job.add_step(
                MaintenanceStep::new(step_names::UNANNOUNCE_STORAGE_NODE)
                    .with_description(format!("Unannounce node {node} from {address}"))
                    .with_target(address)
                    .with_parameters(json!({
                        job_properties::ADDRESS: node,
                        job_properties::ADDRESSES: remaining,
                    })),
            );
        }

        Ok(job)
    }

    fn update_steps(
        &self,
        job: &mut StorageMaintenanceJob,
        failed_step: &MaintenanceStep,
    ) -> MaintenanceResult<()> {
        match failed_step.name.as_str() {
            step_names::UNANNOUNCE_STORAGE_NODE | step_names::RUN_REPAIR => {
                job.remove_step(failed_step.step_number);
                Ok(())
            }
            _ => Err(MaintenanceError::UnsupportedStepFailure {
                step: failed_step.name.clone(),
            }),
        }
    }
}
