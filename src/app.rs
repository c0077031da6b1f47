use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use maintenance_core::config::AppConfig;
use maintenance_dispatcher::{
    event_channel, CalculatorLookup, MaintenanceEngine, MaintenanceEvent, MaintenanceEventListener,
    MaintenanceQueue, StepRunnerRegistry, StorageNodeLifecycle,
};
use maintenance_domain::ports::{RemoteOperationDispatcher, StorageSession};
use maintenance_domain::repositories::{MaintenanceJobRepository, StorageNodeRepository};
use maintenance_infrastructure::{
    DatabaseManager, MaintenanceMetrics, SqliteMaintenanceJobRepository, SqliteStorageNodeRepository,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::shutdown::ShutdownManager;

/// 事件通道容量
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// 持久化存储以及基于它的作业队列
pub struct MaintenanceStore {
    pub database: DatabaseManager,
    pub job_repo: Arc<dyn MaintenanceJobRepository>,
    pub node_repo: Arc<dyn StorageNodeRepository>,
    pub queue: Arc<MaintenanceQueue>,
}

impl MaintenanceStore {
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .with_context(|| format!("打开维护数据库失败: {}", config.database.url))?;
        Ok(Self::from_database(database, config))
    }

    pub fn from_database(database: DatabaseManager, config: &AppConfig) -> Self {
        let job_repo: Arc<dyn MaintenanceJobRepository> =
            Arc::new(SqliteMaintenanceJobRepository::new(database.pool().clone()));
        let node_repo: Arc<dyn StorageNodeRepository> =
            Arc::new(SqliteStorageNodeRepository::new(database.pool().clone()));
        let queue = Arc::new(MaintenanceQueue::new(
            job_repo.clone(),
            node_repo.clone(),
            CalculatorLookup::with_defaults(&config.cluster, &config.schema),
        ));

        Self {
            database,
            job_repo,
            node_repo,
            queue,
        }
    }
}

/// 维护服务
///
/// 远程操作下发和存储会话由宿主注入，完成回调与成员事件通过 [`Application::event_sender`] 投递。
pub struct Application {
    config: AppConfig,
    store: MaintenanceStore,
    engine: Arc<MaintenanceEngine>,
    lifecycle: Arc<StorageNodeLifecycle>,
    listener: Arc<MaintenanceEventListener>,
    events: mpsc::Sender<MaintenanceEvent>,
}

impl Application {
    pub async fn new(
        config: AppConfig,
        dispatcher: Arc<dyn RemoteOperationDispatcher>,
        session: Arc<dyn StorageSession>,
    ) -> Result<Self> {
        let store = MaintenanceStore::open(&config).await?;
        Ok(Self::with_store(config, store, dispatcher, session))
    }

    pub fn with_store(
        config: AppConfig,
        store: MaintenanceStore,
        dispatcher: Arc<dyn RemoteOperationDispatcher>,
        session: Arc<dyn StorageSession>,
    ) -> Self {
        info!("初始化存储集群维护服务");
        let metrics = MaintenanceMetrics::from_config(&config.observability);

        let runners = StepRunnerRegistry::with_defaults(
            store.node_repo.clone(),
            dispatcher.clone(),
            session,
            &config.schema,
        );
        let lifecycle = Arc::new(StorageNodeLifecycle::new(
            store.node_repo.clone(),
            store.queue.clone(),
            dispatcher,
            config.cluster.clone(),
            metrics,
        ));
        let engine = Arc::new(
            MaintenanceEngine::new(store.queue.clone(), runners, metrics)
                .with_observer(lifecycle.clone()),
        );

        let (events, receiver) = event_channel(EVENT_CHANNEL_CAPACITY);
        let listener = Arc::new(MaintenanceEventListener::new(
            lifecycle.clone(),
            engine.clone(),
            receiver,
        ));

        Self {
            config,
            store,
            engine,
            lifecycle,
            listener,
            events,
        }
    }

    pub fn queue(&self) -> &Arc<MaintenanceQueue> {
        &self.store.queue
    }

    pub fn node_repository(&self) -> &Arc<dyn StorageNodeRepository> {
        &self.store.node_repo
    }

    pub fn engine(&self) -> &Arc<MaintenanceEngine> {
        &self.engine
    }

    pub fn lifecycle(&self) -> &Arc<StorageNodeLifecycle> {
        &self.lifecycle
    }

    /// 远程操作完成回调和集群成员事件的投递入口
    pub fn event_sender(&self) -> mpsc::Sender<MaintenanceEvent> {
        self.events.clone()
    }

    /// 运行事件监听和周期性执行，直到收到关闭信号
    pub async fn run(&self, shutdown: &ShutdownManager) -> Result<()> {
        shutdown.register_engine(self.engine.clone()).await;
        let mut signal = shutdown.signal();

        self.store
            .database
            .health_check()
            .await
            .context("维护数据库健康检查失败")?;

        let listener = self.listener.clone();
        let listener_handle = tokio::spawn(async move {
            if let Err(e) = listener.listen().await {
                error!("维护事件监听异常退出: {e}");
            }
        });

        let mut ticker = tokio::time::interval(Duration::from_secs(
            self.config.engine.tick_interval_seconds,
        ));
        info!(
            tick_interval_seconds = self.config.engine.tick_interval_seconds,
            engine_enabled = self.config.engine.enabled,
            "存储集群维护服务已启动"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.config.engine.enabled {
                        continue;
                    }
                    match self.engine.execute().await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => {
                            error!("维护队列执行失败，等待下一次触发: {e}");
                        }
                        Err(e) => warn!("维护队列执行出错: {e}"),
                    }
                }
                _ = signal.recv() => {
                    info!("收到关闭信号，停止维护服务");
                    break;
                }
            }
        }

        self.engine.stop();
        self.listener.stop().await;
        if let Err(e) = listener_handle.await {
            error!("等待事件监听退出失败: {e}");
        }
        self.store.database.close().await;
        info!("存储集群维护服务已停止");
        Ok(())
    }
}
