use thiserror::Error;

/// 维护系统错误类型定义
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// 持久化存储不可用，调用方需要重试整个调用
    #[error("持久化错误: {0}")]
    Persistence(String),

    #[error("步骤 {step} 执行失败: {message}")]
    StepExecution { step: String, message: String },

    #[error("远程操作 {operation_id} 已被取消")]
    OperationCanceled { operation_id: i64 },

    /// 集群拓扑不合法（例如集群规模为0），不会自动重试
    #[error("无效的集群拓扑: {0}")]
    InvalidTopology(String),

    #[error("未注册的作业类型: {0}")]
    UnrecognizedJobType(String),

    #[error("未注册的步骤: {0}")]
    UnrecognizedStep(String),

    #[error("步骤 {step} 的失败不支持重新计算后续步骤")]
    UnsupportedStepFailure { step: String },

    #[error("维护作业未找到: {job_number}")]
    JobNotFound { job_number: i64 },

    #[error("存储节点未找到: {address}")]
    StorageNodeNotFound { address: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MaintenanceError {
    /// 是否为必须中止当前调用的错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MaintenanceError::Persistence(_) | MaintenanceError::InvalidTopology(_)
        )
    }

    pub fn step_execution(step: impl Into<String>, message: impl Into<String>) -> Self {
        MaintenanceError::StepExecution {
            step: step.into(),
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for MaintenanceError {
    fn from(err: sqlx::Error) -> Self {
        MaintenanceError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for MaintenanceError {
    fn from(err: serde_json::Error) -> Self {
        MaintenanceError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, MaintenanceError>;
