//! 步骤计算器
//!
//! 每种作业类型对应一个计算器：`calculate_steps` 根据集群快照生成完整的步骤列表，
//! `update_steps` 在 CONTINUE 失败后调整剩余步骤。计算器不访问存储，结果只取决于
//! 作业配置与快照。

use std::collections::HashMap;
use std::sync::Arc;

use maintenance_core::config::{ClusterSettings, SchemaConfig};
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{
    job_properties, JobType, MaintenanceStep, OperationMode, StorageMaintenanceJob,
};
use maintenance_domain::replication_policy::SchemaChanges;
use serde_json::json;

use crate::step_names;

pub mod add_node_maintenance;
pub mod decommission;
pub mod deploy;
pub mod repair;

pub use add_node_maintenance::AddNodeMaintenanceCalculator;
pub use decommission::DecommissionNodeCalculator;
pub use deploy::DeployNodeCalculator;
pub use repair::RepairCalculator;

pub trait StepCalculator: Send + Sync {
    fn job_type(&self) -> JobType;

    /// 为新作业追加完整的步骤列表
    fn calculate_steps(&self, job: StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob>;

    /// CONTINUE 失败后调整剩余步骤，不得重新编号
    fn update_steps(
        &self,
        job: &mut StorageMaintenanceJob,
        failed_step: &MaintenanceStep,
    ) -> MaintenanceResult<()>;
}

/// 作业类型到计算器的注册表
#[derive(Clone, Default)]
pub struct CalculatorLookup {
    calculators: HashMap<JobType, Arc<dyn StepCalculator>>,
}

impl CalculatorLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置计算器
    pub fn with_defaults(cluster: &ClusterSettings, schema: &SchemaConfig) -> Self {
        let mut lookup = Self::new();
        lookup.register(Arc::new(DeployNodeCalculator::new(cluster.clone(), schema.clone())));
        lookup.register(Arc::new(DecommissionNodeCalculator::new(schema.clone())));
        lookup.register(Arc::new(RepairCalculator::new(schema.clone())));
        lookup.register(Arc::new(AddNodeMaintenanceCalculator::new()));
        lookup
    }

    pub fn register(&mut self, calculator: Arc<dyn StepCalculator>) {
        self.calculators.insert(calculator.job_type(), calculator);
    }

    pub fn get(&self, job_type: JobType) -> MaintenanceResult<Arc<dyn StepCalculator>> {
        self.calculators
            .get(&job_type)
            .cloned()
            .ok_or_else(|| MaintenanceError::UnrecognizedJobType(job_type.to_string()))
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.calculators.contains_key(&job_type)
    }
}

pub(crate) fn required_target(job: &StorageMaintenanceJob) -> MaintenanceResult<String> {
    job.target().map(str::to_string).ok_or_else(|| {
        MaintenanceError::Configuration(format!("作业 '{}' 缺少目标节点地址", job.job_name))
    })
}

pub(crate) fn update_status_step(target: &str, mode: OperationMode) -> MaintenanceStep {
    MaintenanceStep::new(step_names::UPDATE_STORAGE_NODE_STATUS)
        .with_description(format!("Update operation mode of {target} to {mode}"))
        .with_configuration(json!({
            job_properties::TARGET: target,
            job_properties::OPERATION_MODE: mode.as_str(),
        }))
}

pub(crate) fn repair_step(address: &str, keyspace: &str, table: &str) -> MaintenanceStep {
    MaintenanceStep::new(step_names::RUN_REPAIR)
        .with_description(format!("Run repair on {keyspace}.{table} on {address}"))
        .with_target(address)
        .with_parameters(json!({
            job_properties::PRIMARY_RANGE: true,
            job_properties::SNAPSHOT: false,
            job_properties::KEYSPACE: keyspace,
            job_properties::TABLE: table,
        }))
}

/// 每个键空间的每张表在每个节点上修复一次
pub(crate) fn repair_steps(schema: &SchemaConfig, addresses: &[String]) -> Vec<MaintenanceStep> {
    let mut steps = Vec::new();
    for keyspace in &schema.keyspaces {
        for table in &keyspace.tables {
            for address in addresses {
                steps.push(repair_step(address, &keyspace.name, table));
            }
        }
    }
    steps
}

/// 复制因子变化时才生成 schema 更新步骤，并在作业配置中记录结果
pub(crate) fn apply_schema_changes(job: &mut StorageMaintenanceJob, changes: &SchemaChanges) {
    job.set_property(
        job_properties::REPLICATION_FACTOR_CHANGED,
        json!(changes.replication_factor_changed),
    );
    if !changes.replication_factor_changed {
        return;
    }
    job.add_step(update_schema_step(changes.replication_factor, changes.gc_grace_seconds));
}

pub(crate) fn update_schema_step(replication_factor: u32, gc_grace_seconds: Option<u32>) -> MaintenanceStep {
    let mut configuration = json!({ job_properties::REPLICATION_FACTOR: replication_factor });
    if let Some(seconds) = gc_grace_seconds {
        configuration[job_properties::GC_GRACE_SECONDS] = json!(seconds);
    }
    MaintenanceStep::new(step_names::UPDATE_SCHEMA)
        .with_description(format!(
            "Update Storage Cluster with new replication_factor of {replication_factor}"
        ))
        .with_configuration(configuration)
}

/// 删除失败的步骤本身
pub(crate) fn remove_failed_step(job: &mut StorageMaintenanceJob, failed_step: &MaintenanceStep) {
    job.remove_step(failed_step.step_number);
}
