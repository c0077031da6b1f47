//! 外部系统端口
//!
//! 远程操作的下发与完成回调、存储集群会话、成员变化事件

use std::fmt;

use async_trait::async_trait;
use maintenance_core::MaintenanceResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 存储节点代理支持的远程操作名称
pub mod operations {
    pub const UPDATE_KNOWN_NODES: &str = "updateKnownNodes";
    pub const PREPARE_FOR_BOOTSTRAP: &str = "prepareForBootstrap";
    pub const ADD_NODE_MAINTENANCE: &str = "addNodeMaintenance";
    pub const REPAIR: &str = "repair";
    pub const DECOMMISSION: &str = "decommission";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    InProgress,
    Success,
    Failure,
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::InProgress)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::InProgress => "INPROGRESS",
            OperationStatus::Success => "SUCCESS",
            OperationStatus::Failure => "FAILURE",
            OperationStatus::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

/// 已下发的远程操作
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationHandle {
    pub operation_id: i64,
    pub target_address: String,
    pub operation_name: String,
}

/// 远程操作的状态回调
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationCompletion {
    pub operation_id: i64,
    pub target_address: String,
    pub operation_name: String,
    pub status: OperationStatus,
    pub error_message: Option<String>,
    /// 下发时附带的参数
    pub parameters: Value,
}

impl OperationCompletion {
    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }

    pub fn failure_message(&self) -> String {
        self.error_message
            .clone()
            .unwrap_or_else(|| format!("操作 {} 状态为 {}", self.operation_name, self.status))
    }
}

/// 向节点代理下发远程操作
#[async_trait]
pub trait RemoteOperationDispatcher: Send + Sync {
    async fn schedule_operation(
        &self,
        target_address: &str,
        operation_name: &str,
        parameters: Value,
    ) -> MaintenanceResult<OperationHandle>;
}

/// 存储集群的语句执行会话
#[async_trait]
pub trait StorageSession: Send + Sync {
    async fn execute(&self, statement: &str) -> MaintenanceResult<()>;
}

/// 集群成员变化
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MembershipEvent {
    NodeJoined { address: String },
    NodeLeft { address: String },
}

impl MembershipEvent {
    pub fn address(&self) -> &str {
        match self {
            MembershipEvent::NodeJoined { address } | MembershipEvent::NodeLeft { address } => address,
        }
    }
}
