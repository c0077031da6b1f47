//! Test data builders for creating test entities

use chrono::Utc;
use maintenance_domain::entities::{
    JobType, MaintenanceStep, OperationMode, StorageMaintenanceJob, StorageNode,
};
use maintenance_domain::ports::{OperationCompletion, OperationStatus};
use serde_json::{json, Value};

/// Builder for creating test StorageNode entities
pub struct StorageNodeBuilder {
    node: StorageNode,
}

impl StorageNodeBuilder {
    pub fn new(address: &str) -> Self {
        Self {
            node: StorageNode::new(address),
        }
    }

    pub fn normal(address: &str) -> Self {
        Self::new(address).with_mode(OperationMode::Normal)
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.node.id = id;
        self
    }

    pub fn with_mode(mut self, mode: OperationMode) -> Self {
        self.node.operation_mode = mode;
        self
    }

    pub fn with_maintenance_pending(mut self, pending: bool) -> Self {
        self.node.maintenance_pending = pending;
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.node.error_message = Some(message.to_string());
        self
    }

    pub fn with_cql_port(mut self, port: u16) -> Self {
        self.node.cql_port = port;
        self
    }

    pub fn build(self) -> StorageNode {
        self.node
    }
}

/// Builder for creating test maintenance jobs
pub struct JobBuilder {
    job: StorageMaintenanceJob,
}

impl JobBuilder {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job: StorageMaintenanceJob::new(job_type, format!("{job_type} test job"), json!({})),
        }
    }

    pub fn deploy(target: &str) -> Self {
        Self::new(JobType::Deploy).with_target(target)
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.job_name = name.to_string();
        self
    }

    pub fn with_job_number(mut self, job_number: i64) -> Self {
        self.job.assign_job_number(job_number);
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.job.set_property("target", json!(target));
        self
    }

    pub fn with_property(mut self, key: &str, value: Value) -> Self {
        self.job.set_property(key, value);
        self
    }

    pub fn with_snapshot(mut self, addresses: &[&str]) -> Self {
        self.job.cluster_snapshot = addresses.iter().map(|a| a.to_string()).collect();
        self
    }

    /// 按名称追加步骤，编号自动递增
    pub fn with_steps(mut self, names: &[&str]) -> Self {
        for name in names {
            self.job.add_step(MaintenanceStep::new(*name));
        }
        self
    }

    pub fn with_step(mut self, step: MaintenanceStep) -> Self {
        self.job.add_step(step);
        self
    }

    pub fn started(mut self) -> Self {
        self.job.started_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> StorageMaintenanceJob {
        self.job
    }
}

/// Builder for operation completion callbacks
pub struct CompletionBuilder {
    completion: OperationCompletion,
}

impl CompletionBuilder {
    pub fn new(operation_id: i64, target_address: &str, operation_name: &str) -> Self {
        Self {
            completion: OperationCompletion {
                operation_id,
                target_address: target_address.to_string(),
                operation_name: operation_name.to_string(),
                status: OperationStatus::Success,
                error_message: None,
                parameters: json!({}),
            },
        }
    }

    pub fn failed(mut self, message: &str) -> Self {
        self.completion.status = OperationStatus::Failure;
        self.completion.error_message = Some(message.to_string());
        self
    }

    pub fn canceled(mut self) -> Self {
        self.completion.status = OperationStatus::Canceled;
        self
    }

    pub fn in_progress(mut self) -> Self {
        self.completion.status = OperationStatus::InProgress;
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.completion.parameters = parameters;
        self
    }

    pub fn build(self) -> OperationCompletion {
        self.completion
    }
}
