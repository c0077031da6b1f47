use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{OperationMode, StorageMaintenanceJob, StorageNode};
use maintenance_domain::repositories::{MaintenanceJobRepository, StorageNodeRepository};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存维护队列
///
/// 适用于嵌入式部署和测试。每个操作持有一次写锁，对外表现为原子操作。
#[derive(Debug)]
pub struct InMemoryMaintenanceJobRepository {
    state: RwLock<JobQueueState>,
}

#[derive(Debug)]
struct JobQueueState {
    /// 按入队顺序排列
    jobs: Vec<StorageMaintenanceJob>,
    next_job_number: i64,
}

impl JobQueueState {
    fn position(&self, job_number: i64) -> Option<usize> {
        self.jobs.iter().position(|j| j.job_number == job_number)
    }

    fn append(&mut self, job: &StorageMaintenanceJob) -> StorageMaintenanceJob {
        let mut new_job = job.clone();
        new_job.assign_job_number(self.next_job_number);
        self.next_job_number += 1;
        self.jobs.push(new_job.clone());
        new_job
    }
}

impl InMemoryMaintenanceJobRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(JobQueueState {
                jobs: Vec::new(),
                next_job_number: 1,
            }),
        }
    }
}

impl Default for InMemoryMaintenanceJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MaintenanceJobRepository for InMemoryMaintenanceJobRepository {
    async fn create(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let mut state = self.state.write().await;
        let created = state.append(job);
        debug!(job_number = created.job_number, "维护作业已入队");
        Ok(created)
    }

    async fn find_by_job_number(&self, job_number: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|j| j.job_number == job_number).cloned())
    }

    async fn find_all(&self) -> MaintenanceResult<Vec<StorageMaintenanceJob>> {
        Ok(self.state.read().await.jobs.clone())
    }

    async fn find_by_pending_operation(&self, operation_id: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .iter()
            .find(|j| j.pending_operation == Some(operation_id))
            .cloned())
    }

    async fn update(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let mut state = self.state.write().await;
        let index = state.position(job.job_number).ok_or(MaintenanceError::JobNotFound {
            job_number: job.job_number,
        })?;
        let mut updated = job.clone();
        updated.assign_job_number(job.job_number);
        state.jobs[index] = updated.clone();
        Ok(updated)
    }

    async fn remove_step(&self, job_number: i64, step_number: i32) -> MaintenanceResult<bool> {
        let mut state = self.state.write().await;
        let Some(index) = state.position(job_number) else {
            return Ok(false);
        };
        Ok(state.jobs[index].remove_step(step_number).is_some())
    }

    async fn delete(&self, job_number: i64) -> MaintenanceResult<bool> {
        let mut state = self.state.write().await;
        match state.position(job_number) {
            Some(index) => {
                state.jobs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue(
        &self,
        old_job_number: i64,
        replacement: &StorageMaintenanceJob,
    ) -> MaintenanceResult<StorageMaintenanceJob> {
        let mut state = self.state.write().await;
        let index = state.position(old_job_number).ok_or(MaintenanceError::JobNotFound {
            job_number: old_job_number,
        })?;
        state.jobs.remove(index);
        let requeued = state.append(replacement);
        debug!(
            old_job_number,
            new_job_number = requeued.job_number,
            "维护作业已重新入队"
        );
        Ok(requeued)
    }

    async fn count(&self) -> MaintenanceResult<usize> {
        Ok(self.state.read().await.jobs.len())
    }
}

/// 内存存储节点仓储，按地址索引
#[derive(Debug)]
pub struct InMemoryStorageNodeRepository {
    state: RwLock<NodeState>,
}

#[derive(Debug)]
struct NodeState {
    nodes: BTreeMap<String, StorageNode>,
    next_id: i64,
}

impl InMemoryStorageNodeRepository {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(NodeState {
                nodes: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }
}

impl Default for InMemoryStorageNodeRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageNodeRepository for InMemoryStorageNodeRepository {
    async fn create(&self, node: &StorageNode) -> MaintenanceResult<StorageNode> {
        let mut state = self.state.write().await;
        if state.nodes.contains_key(&node.address) {
            return Err(MaintenanceError::Persistence(format!(
                "存储节点已存在: {}",
                node.address
            )));
        }
        let mut created = node.clone();
        created.id = state.next_id;
        state.next_id += 1;
        state.nodes.insert(created.address.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_address(&self, address: &str) -> MaintenanceResult<Option<StorageNode>> {
        Ok(self.state.read().await.nodes.get(address).cloned())
    }

    async fn find_all(&self) -> MaintenanceResult<Vec<StorageNode>> {
        Ok(self.state.read().await.nodes.values().cloned().collect())
    }

    async fn find_by_mode(&self, mode: OperationMode) -> MaintenanceResult<Vec<StorageNode>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .filter(|n| n.operation_mode == mode)
            .cloned()
            .collect())
    }

    async fn find_maintenance_pending(&self, mode: OperationMode) -> MaintenanceResult<Vec<StorageNode>> {
        let state = self.state.read().await;
        Ok(state
            .nodes
            .values()
            .filter(|n| n.operation_mode == mode && n.maintenance_pending)
            .cloned()
            .collect())
    }

    async fn update(&self, node: &StorageNode) -> MaintenanceResult<StorageNode> {
        let mut state = self.state.write().await;
        let existing = state
            .nodes
            .get_mut(&node.address)
            .ok_or_else(|| MaintenanceError::StorageNodeNotFound {
                address: node.address.clone(),
            })?;
        let mut updated = node.clone();
        updated.id = existing.id;
        updated.updated_at = Utc::now();
        *existing = updated.clone();
        Ok(updated)
    }
}
