use std::sync::Arc;

use maintenance_dispatcher::MaintenanceEngine;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// 维护服务的关闭协调
///
/// 关闭时先让已登记的执行引擎在当前步骤结束后停下，再通知所有等待方，
/// 这样正在进行的一轮执行不会拖住服务退出。
#[derive(Clone)]
pub struct ShutdownManager {
    sender: Arc<watch::Sender<bool>>,
    engines: Arc<Mutex<Vec<Arc<MaintenanceEngine>>>>,
}

/// 等待关闭的一端
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// 已经关闭时立即返回
    pub async fn recv(&mut self) {
        // 发送端随管理器一起释放时同样视为关闭
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            engines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 登记关闭时需要停止的执行引擎，关闭之后登记的引擎会被立即停止
    pub async fn register_engine(&self, engine: Arc<MaintenanceEngine>) {
        if self.is_shutdown() {
            engine.stop();
            return;
        }
        self.engines.lock().await.push(engine);
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    pub async fn shutdown(&self) {
        if self.is_shutdown() {
            debug!("维护服务已经在关闭中");
            return;
        }

        let engines = self.engines.lock().await;
        info!(engines = engines.len(), "关闭维护服务，停止执行引擎");
        for engine in engines.iter() {
            engine.stop();
        }
        drop(engines);

        self.sender.send_replace(true);
        debug!(receivers = self.sender.receiver_count(), "关闭信号已发送");
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn wait_for_shutdown(&self) {
        self.signal().recv().await;
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}
