//! 步骤执行器
//!
//! 执行器按步骤名称注册。本地步骤同步完成，远程步骤只负责下发操作，
//! 结果由之后的完成回调决定。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use maintenance_core::config::SchemaConfig;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{MaintenanceStep, StepFailureStrategy, StorageMaintenanceJob};
use maintenance_domain::ports::{OperationHandle, RemoteOperationDispatcher, StorageSession};
use maintenance_domain::repositories::StorageNodeRepository;

pub mod node_status;
pub mod remote;
pub mod schema;

pub use node_status::UpdateStorageNodeStatusRunner;
pub use remote::{
    AddNodeMaintenanceRunner, AnnounceStorageNodeRunner, BootstrapNodeRunner, DecommissionNodeRunner,
    RunRepairRunner, UnannounceStorageNodeRunner,
};
pub use schema::UpdateSchemaRunner;

/// 一次步骤执行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Completed,
    /// 已下发远程操作，等待完成回调
    Dispatched(OperationHandle),
    Failed(String),
}

#[async_trait]
pub trait StepRunner: Send + Sync {
    fn name(&self) -> &str;

    fn failure_strategy(&self) -> StepFailureStrategy;

    async fn execute(
        &self,
        job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome>;

    /// CONTINUE 失败时可以提供一个后续作业
    async fn follow_up_job(
        &self,
        _job: &StorageMaintenanceJob,
        _step: &MaintenanceStep,
        _error_message: &str,
    ) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        Ok(None)
    }
}

/// 步骤名称到执行器的注册表
#[derive(Clone, Default)]
pub struct StepRunnerRegistry {
    runners: HashMap<String, Arc<dyn StepRunner>>,
}

impl StepRunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置执行器
    pub fn with_defaults(
        node_repo: Arc<dyn StorageNodeRepository>,
        dispatcher: Arc<dyn RemoteOperationDispatcher>,
        session: Arc<dyn StorageSession>,
        schema: &SchemaConfig,
    ) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(UpdateStorageNodeStatusRunner::new(node_repo.clone())));
        registry.register(Arc::new(AnnounceStorageNodeRunner::new(dispatcher.clone())));
        registry.register(Arc::new(UnannounceStorageNodeRunner::new(dispatcher.clone())));
        registry.register(Arc::new(BootstrapNodeRunner::new(dispatcher.clone())));
        registry.register(Arc::new(RunRepairRunner::new(dispatcher.clone())));
        registry.register(Arc::new(DecommissionNodeRunner::new(dispatcher.clone())));
        registry.register(Arc::new(AddNodeMaintenanceRunner::new(node_repo, dispatcher)));
        registry.register(Arc::new(UpdateSchemaRunner::new(session, schema.clone())));
        registry
    }

    pub fn register(&mut self, runner: Arc<dyn StepRunner>) {
        self.runners.insert(runner.name().to_string(), runner);
    }

    pub fn get(&self, name: &str) -> MaintenanceResult<Arc<dyn StepRunner>> {
        self.runners
            .get(name)
            .cloned()
            .ok_or_else(|| MaintenanceError::UnrecognizedStep(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runners.keys().cloned().collect();
        names.sort();
        names
    }
}
