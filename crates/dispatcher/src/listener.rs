use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use maintenance_core::MaintenanceResult;
use maintenance_domain::ports::{MembershipEvent, OperationCompletion};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info};

use crate::engine::MaintenanceEngine;
use crate::lifecycle::StorageNodeLifecycle;

/// 外部协作方投递给维护核心的事件
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum MaintenanceEvent {
    OperationUpdate(OperationCompletion),
    Membership(MembershipEvent),
}

pub fn event_channel(
    capacity: usize,
) -> (mpsc::Sender<MaintenanceEvent>, mpsc::Receiver<MaintenanceEvent>) {
    mpsc::channel(capacity)
}

/// 按到达顺序逐个处理事件：先交给生命周期编排器，再交给执行引擎
pub struct MaintenanceEventListener {
    lifecycle: Arc<StorageNodeLifecycle>,
    engine: Arc<MaintenanceEngine>,
    receiver: Mutex<mpsc::Receiver<MaintenanceEvent>>,
    running: Arc<RwLock<bool>>,
    stop_requested: AtomicBool,
}

impl MaintenanceEventListener {
    pub fn new(
        lifecycle: Arc<StorageNodeLifecycle>,
        engine: Arc<MaintenanceEngine>,
        receiver: mpsc::Receiver<MaintenanceEvent>,
    ) -> Self {
        Self {
            lifecycle,
            engine,
            receiver: Mutex::new(receiver),
            running: Arc::new(RwLock::new(false)),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// 在 listen 开始之前调用同样有效
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut running = self.running.write().await;
        *running = false;
        info!("维护事件监听器停止信号已发送");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 持续消费事件，直到收到停止信号或所有发送端关闭
    pub async fn listen(&self) -> MaintenanceResult<()> {
        {
            let mut running = self.running.write().await;
            *running = true;
        }
        info!("启动维护事件监听");

        let mut receiver = self.receiver.lock().await;
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                info!("收到停止信号，退出维护事件监听");
                break;
            }

            match tokio::time::timeout(Duration::from_millis(100), receiver.recv()).await {
                Ok(Some(event)) => {
                    if let Err(e) = self.process_event(&event).await {
                        error!("处理维护事件时出错: {e}");
                        if e.is_fatal() {
                            return Err(e);
                        }
                    }
                }
                Ok(None) => {
                    info!("事件通道已关闭，退出维护事件监听");
                    break;
                }
                Err(_) => continue,
            }
        }

        let mut running = self.running.write().await;
        *running = false;
        Ok(())
    }

    pub async fn process_event(&self, event: &MaintenanceEvent) -> MaintenanceResult<()> {
        match event {
            MaintenanceEvent::OperationUpdate(completion) => {
                debug!(
                    operation_id = completion.operation_id,
                    operation = %completion.operation_name,
                    status = %completion.status,
                    "收到远程操作状态更新"
                );
                self.lifecycle.handle_operation_update(completion).await;
                self.engine.handle_operation_completion(completion).await?;
            }
            MaintenanceEvent::Membership(membership) => {
                debug!(address = membership.address(), "收到集群成员事件");
                self.lifecycle.handle_membership_event(membership).await?;
            }
        }
        Ok(())
    }
}
