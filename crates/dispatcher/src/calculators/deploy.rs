use maintenance_core::config::{ClusterSettings, SchemaConfig};
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{
    job_properties, JobType, MaintenanceStep, OperationMode, StorageMaintenanceJob,
};
use maintenance_domain::replication_policy::schema_changes_for_addition;
use serde_json::json;
use tracing::debug;

use super::{apply_schema_changes, repair_steps, required_target, update_status_step, StepCalculator};
use crate::step_names;

/// 新节点部署：通告、引导、schema 更新、修复，最后切换为 NORMAL
pub struct DeployNodeCalculator {
    cluster: ClusterSettings,
    schema: SchemaConfig,
}

impl DeployNodeCalculator {
    pub fn new(cluster: ClusterSettings, schema: SchemaConfig) -> Self {
        Self { cluster, schema }
    }
}

impl StepCalculator for DeployNodeCalculator {
    fn job_type(&self) -> JobType {
        JobType::Deploy
    }

    fn calculate_steps(&self, mut job: StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let new_node = required_target(&job)?;
        let snapshot = job.cluster_snapshot.clone();

        job.add_step(update_status_step(&new_node, OperationMode::Announce));

        for address in &snapshot {
            job.add_step(
                MaintenanceStep::new(step_names::ANNOUNCE_STORAGE_NODE)
                    .with_description(format!("Announce new node {new_node} to {address}"))
                    .with_target(address)
                    .with_parameters(json!({ job_properties::ADDRESS: new_node })),
            );
        }

        job.add_step(update_status_step(&new_node, OperationMode::Bootstrap));

        let mut addresses = vec![new_node.clone()];
        addresses.extend(snapshot.iter().cloned());

        job.add_step(
            MaintenanceStep::new(step_names::BOOTSTRAP_NODE)
                .with_description(format!("Bootstrap new node {new_node}"))
                .with_target(&new_node)
                .with_parameters(json!({
                    job_properties::CQL_PORT: self.cluster.cql_port,
                    job_properties::GOSSIP_PORT: self.cluster.gossip_port,
                    job_properties::ADDRESSES: addresses,
                })),
        );

        let changes = schema_changes_for_addition(snapshot.len(), snapshot.len() + 1)?;
        apply_schema_changes(&mut job, &changes);

        job.add_step(update_status_step(&new_node, OperationMode::AddNodeMaintenance));

        if changes.repair_needed() {
            let mut repair_targets = snapshot.clone();
            repair_targets.push(new_node.clone());
            for step in repair_steps(&self.schema, &repair_targets) {
                job.add_step(step);
            }
        }

        job.add_step(update_status_step(&new_node, OperationMode::Normal));

        debug!(
            target_node = %new_node,
            steps = job.steps.len(),
            "部署作业步骤计算完成"
        );
        Ok(job)
    }

    /// 通告失败时，该节点不再参与本次部署，同时去掉针对它的修复步骤
    fn update_steps(
        &self,
        job: &mut StorageMaintenanceJob,
        failed_step: &MaintenanceStep,
    ) -> MaintenanceResult<()> {
        match failed_step.name.as_str() {
            step_names::ANNOUNCE_STORAGE_NODE => {
                let address = failed_step.required_target()?.to_string();
                job.steps.retain(|step| {
                    step.step_number != failed_step.step_number
                        && !(step.name == step_names::RUN_REPAIR && step.target() == Some(address.as_str()))
                });
                Ok(())
            }
            step_names::RUN_REPAIR => {
                job.remove_step(failed_step.step_number);
                Ok(())
            }
            _ => Err(MaintenanceError::UnsupportedStepFailure {
                step: failed_step.name.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calculator() -> DeployNodeCalculator {
        DeployNodeCalculator::new(ClusterSettings::default(), SchemaConfig::default())
    }

    fn deploy_job(snapshot: &[&str]) -> StorageMaintenanceJob {
        StorageMaintenanceJob::for_target(JobType::Deploy, "Deploy 10.0.0.9", "10.0.0.9")
            .with_cluster_snapshot(snapshot.iter().map(|a| a.to_string()).collect())
    }

    fn table_count() -> usize {
        SchemaConfig::default().keyspaces.iter().map(|k| k.tables.len()).sum()
    }

    #[test]
    fn test_deploy_to_single_node_cluster() {
        let job = calculator().calculate_steps(deploy_job(&["10.0.0.1"])).unwrap();

        let names = job.step_names();
        assert_eq!(names[0], step_names::UPDATE_STORAGE_NODE_STATUS);
        assert_eq!(names[1], step_names::ANNOUNCE_STORAGE_NODE);
        assert_eq!(names[2], step_names::UPDATE_STORAGE_NODE_STATUS);
        assert_eq!(names[3], step_names::BOOTSTRAP_NODE);
        assert_eq!(names[4], step_names::UPDATE_SCHEMA);
        assert_eq!(names[5], step_names::UPDATE_STORAGE_NODE_STATUS);
        assert_eq!(*names.last().unwrap(), step_names::UPDATE_STORAGE_NODE_STATUS);

        // 1 -> 2 节点：复制因子变为2并放宽 gc_grace
        let schema_step = &job.steps[4];
        assert_eq!(schema_step.property(job_properties::REPLICATION_FACTOR), Some(&json!(2)));
        assert_eq!(schema_step.property(job_properties::GC_GRACE_SECONDS), Some(&json!(691_200)));
        assert_eq!(
            job.configuration().get(job_properties::REPLICATION_FACTOR_CHANGED),
            Some(&json!(true))
        );

        let repairs = job.steps.iter().filter(|s| s.name == step_names::RUN_REPAIR).count();
        assert_eq!(repairs, table_count() * 2);
        assert_eq!(job.steps.len(), 7 + repairs);

        let numbers: Vec<i32> = job.steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, (1..=job.steps.len() as i32).collect::<Vec<_>>());
    }

    #[test]
    fn test_deploy_without_replication_change_skips_schema_and_repair() {
        let job = calculator()
            .calculate_steps(deploy_job(&["10.0.0.1", "10.0.0.2"]))
            .unwrap();

        assert!(!job.step_names().contains(&step_names::UPDATE_SCHEMA));
        assert!(!job.step_names().contains(&step_names::RUN_REPAIR));
        // 状态 + 2次通告 + 状态 + 引导 + 状态 + 状态
        assert_eq!(job.steps.len(), 7);

        let bootstrap = &job.steps[4];
        let parameters = bootstrap.parameters().unwrap();
        assert_eq!(parameters[job_properties::CQL_PORT], json!(9142));
        assert_eq!(parameters[job_properties::GOSSIP_PORT], json!(7100));
        assert_eq!(
            parameters[job_properties::ADDRESSES],
            json!(["10.0.0.9", "10.0.0.1", "10.0.0.2"])
        );
    }

    #[test]
    fn test_deploy_to_empty_cluster_is_invalid() {
        let result = calculator().calculate_steps(deploy_job(&[]));
        assert!(matches!(result, Err(MaintenanceError::InvalidTopology(_))));
    }

    #[test]
    fn test_failed_announce_drops_repairs_for_that_node() {
        let calculator = calculator();
        let mut job = calculator
            .calculate_steps(deploy_job(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]))
            .unwrap();
        let before = job.steps.len();
        let failed = job
            .steps
            .iter()
            .find(|s| s.name == step_names::ANNOUNCE_STORAGE_NODE && s.target() == Some("10.0.0.2"))
            .cloned()
            .unwrap();

        calculator.update_steps(&mut job, &failed).unwrap();

        assert!(job.find_step(failed.step_number).is_none());
        assert!(!job
            .steps
            .iter()
            .any(|s| s.name == step_names::RUN_REPAIR && s.target() == Some("10.0.0.2")));
        assert_eq!(before - job.steps.len(), 1 + table_count());
        assert!(job
            .steps
            .iter()
            .any(|s| s.name == step_names::RUN_REPAIR && s.target() == Some("10.0.0.1")));
    }

    #[test]
    fn test_update_steps_rejects_abort_steps() {
        let calculator = calculator();
        let mut job = calculator.calculate_steps(deploy_job(&["10.0.0.1"])).unwrap();
        let bootstrap = job.steps[3].clone();
        assert!(matches!(
            calculator.update_steps(&mut job, &bootstrap),
            Err(MaintenanceError::UnsupportedStepFailure { .. })
        ));
    }
}
