use std::sync::Arc;

use async_trait::async_trait;
use maintenance_core::config::SchemaConfig;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{
    job_properties, MaintenanceStep, StepFailureStrategy, StorageMaintenanceJob,
};
use maintenance_domain::ports::StorageSession;
use serde_json::Value;
use tracing::info;

use super::{StepOutcome, StepRunner};
use crate::step_names;

/// 修改复制因子，必要时同时修改指标表的 gc_grace_seconds
pub struct UpdateSchemaRunner {
    session: Arc<dyn StorageSession>,
    schema: SchemaConfig,
}

impl UpdateSchemaRunner {
    pub fn new(session: Arc<dyn StorageSession>, schema: SchemaConfig) -> Self {
        Self { session, schema }
    }

    pub fn replication_statements(&self, replication_factor: u64) -> Vec<String> {
        self.schema
            .keyspaces
            .iter()
            .map(|keyspace| {
                format!(
                    "ALTER KEYSPACE {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
                    keyspace.name, replication_factor
                )
            })
            .collect()
    }

    pub fn gc_grace_statements(&self, seconds: u64) -> Vec<String> {
        self.schema
            .keyspace(&self.schema.metrics_keyspace)
            .map(|keyspace| {
                keyspace
                    .tables
                    .iter()
                    .map(|table| {
                        format!(
                            "ALTER COLUMNFAMILY {}.{} WITH gc_grace_seconds = {}",
                            keyspace.name, table, seconds
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepRunner for UpdateSchemaRunner {
    fn name(&self) -> &str {
        step_names::UPDATE_SCHEMA
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        StepFailureStrategy::Abort
    }

    async fn execute(
        &self,
        _job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        let replication_factor = step
            .property(job_properties::REPLICATION_FACTOR)
            .and_then(Value::as_u64)
            .ok_or_else(|| MaintenanceError::step_execution(&step.name, "步骤配置缺少复制因子"))?;

        let mut statements = self.replication_statements(replication_factor);
        if let Some(seconds) = step
            .property(job_properties::GC_GRACE_SECONDS)
            .and_then(Value::as_u64)
        {
            statements.extend(self.gc_grace_statements(seconds));
        }

        for statement in &statements {
            if let Err(e) = self.session.execute(statement).await {
                return Ok(StepOutcome::Failed(format!("执行 '{statement}' 失败: {e}")));
            }
        }

        info!(replication_factor, statements = statements.len(), "存储集群 schema 已更新");
        Ok(StepOutcome::Completed)
    }
}
