//! 领域仓储抽象
//!
//! 维护队列与存储节点的持久化接口，调用方只依赖这些 trait

use async_trait::async_trait;
use maintenance_core::MaintenanceResult;

use crate::entities::{OperationMode, StorageMaintenanceJob, StorageNode};

/// 维护作业仓储，按入队顺序保存作业
#[async_trait]
pub trait MaintenanceJobRepository: Send + Sync {
    /// 分配新的作业编号并放到队尾
    async fn create(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob>;
    async fn find_by_job_number(&self, job_number: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>>;
    /// 按队列顺序返回全部作业
    async fn find_all(&self) -> MaintenanceResult<Vec<StorageMaintenanceJob>>;
    async fn find_by_pending_operation(&self, operation_id: i64) -> MaintenanceResult<Option<StorageMaintenanceJob>>;
    /// 原子地替换作业内容与步骤，队列位置不变
    async fn update(&self, job: &StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob>;
    async fn remove_step(&self, job_number: i64, step_number: i32) -> MaintenanceResult<bool>;
    async fn delete(&self, job_number: i64) -> MaintenanceResult<bool>;
    /// 原子地删除旧作业并把替代作业追加到队尾
    async fn requeue(
        &self,
        old_job_number: i64,
        replacement: &StorageMaintenanceJob,
    ) -> MaintenanceResult<StorageMaintenanceJob>;
    async fn count(&self) -> MaintenanceResult<usize>;
}

/// 存储节点仓储
#[async_trait]
pub trait StorageNodeRepository: Send + Sync {
    async fn create(&self, node: &StorageNode) -> MaintenanceResult<StorageNode>;
    async fn find_by_address(&self, address: &str) -> MaintenanceResult<Option<StorageNode>>;
    async fn find_all(&self) -> MaintenanceResult<Vec<StorageNode>>;
    async fn find_by_mode(&self, mode: OperationMode) -> MaintenanceResult<Vec<StorageNode>>;
    /// 指定模式下仍有待处理维护的节点，按地址排序
    async fn find_maintenance_pending(&self, mode: OperationMode) -> MaintenanceResult<Vec<StorageNode>>;
    async fn update(&self, node: &StorageNode) -> MaintenanceResult<StorageNode>;
}
