use maintenance_core::config::SchemaConfig;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{job_properties, JobType, MaintenanceStep, StorageMaintenanceJob};
use serde_json::Value;

use super::{remove_failed_step, repair_step, StepCalculator};

/// 集群修复
///
/// 作业配置可以限定目标节点、键空间和表，未限定时修复快照中所有节点的所有表。
pub struct RepairCalculator {
    schema: SchemaConfig,
}

impl RepairCalculator {
    pub fn new(schema: SchemaConfig) -> Self {
        Self { schema }
    }

    fn tables(&self, keyspace: Option<&str>, table: Option<&str>) -> Vec<(String, String)> {
        if let (Some(keyspace), Some(table)) = (keyspace, table) {
            return vec![(keyspace.to_string(), table.to_string())];
        }
        self.schema
            .keyspaces
            .iter()
            .filter(|k| keyspace.map_or(true, |name| k.name == name))
            .flat_map(|k| k.tables.iter().map(move |t| (k.name.clone(), t.clone())))
            .collect()
    }
}

impl StepCalculator for RepairCalculator {
    fn job_type(&self) -> JobType {
        JobType::Repair
    }

    fn calculate_steps(&self, mut job: StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let config = job.configuration();
        let keyspace = config.get(job_properties::KEYSPACE).and_then(Value::as_str);
        let table = config.get(job_properties::TABLE).and_then(Value::as_str);

        let nodes: Vec<String> = match job.target() {
            Some(target) => vec![target.to_string()],
            None => job.cluster_snapshot.clone(),
        };
        if nodes.is_empty() {
            return Err(MaintenanceError::InvalidTopology(format!(
                "修复作业 '{}' 没有可修复的节点",
                job.job_name
            )));
        }

        let tables = self.tables(keyspace, table);
        if tables.is_empty() {
            return Err(MaintenanceError::Configuration(format!(
                "未配置的键空间: {}",
                keyspace.unwrap_or_default()
            )));
        }

        let steps: Vec<MaintenanceStep> = tables
            .iter()
            .flat_map(|(keyspace, table)| nodes.iter().map(move |node| repair_step(node, keyspace, table)))
            .collect();
        for step in steps {
            job.add_step(step);
        }
        Ok(job)
    }

    /// 修复步骤之间互不依赖，只删除失败的那一步
    fn update_steps(
        &self,
        job: &mut StorageMaintenanceJob,
        failed_step: &MaintenanceStep,
    ) -> MaintenanceResult<()> {
        remove_failed_step(job, failed_step);
        Ok(())
    }
}
