use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use maintenance_core::{MaintenanceError, MaintenanceResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// 步骤与作业配置中使用的键
pub mod job_properties {
    pub const TARGET: &str = "target";
    pub const OPERATION_MODE: &str = "operationMode";
    pub const PARAMETERS: &str = "parameters";
    pub const ADDRESS: &str = "address";
    pub const ADDRESSES: &str = "addresses";
    pub const CQL_PORT: &str = "cqlPort";
    pub const GOSSIP_PORT: &str = "gossipPort";
    pub const KEYSPACE: &str = "keyspace";
    pub const TABLE: &str = "table";
    pub const PRIMARY_RANGE: &str = "primaryRange";
    pub const SNAPSHOT: &str = "snapshot";
    pub const REPLICATION_FACTOR: &str = "replicationFactor";
    pub const REPLICATION_FACTOR_CHANGED: &str = "replicationFactorChanged";
    pub const GC_GRACE_SECONDS: &str = "gcGraceSeconds";
    pub const RUN_REPAIR: &str = "runRepair";
    pub const SEEDS_LIST: &str = "seedsList";
    pub const UPDATE_SEEDS_LIST: &str = "updateSeedsList";
}

/// 存储节点的生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationMode {
    Announce,
    Bootstrap,
    AddNodeMaintenance,
    Normal,
    Decommission,
    RemoveMaintenance,
    Unannounce,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Announce => "ANNOUNCE",
            OperationMode::Bootstrap => "BOOTSTRAP",
            OperationMode::AddNodeMaintenance => "ADD_NODE_MAINTENANCE",
            OperationMode::Normal => "NORMAL",
            OperationMode::Decommission => "DECOMMISSION",
            OperationMode::RemoveMaintenance => "REMOVE_MAINTENANCE",
            OperationMode::Unannounce => "UNANNOUNCE",
        }
    }

    /// 处于拓扑变更过程中的状态
    pub fn is_transitional(&self) -> bool {
        !matches!(self, OperationMode::Normal)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANNOUNCE" => Ok(OperationMode::Announce),
            "BOOTSTRAP" => Ok(OperationMode::Bootstrap),
            "ADD_NODE_MAINTENANCE" => Ok(OperationMode::AddNodeMaintenance),
            "NORMAL" => Ok(OperationMode::Normal),
            "DECOMMISSION" => Ok(OperationMode::Decommission),
            "REMOVE_MAINTENANCE" => Ok(OperationMode::RemoveMaintenance),
            "UNANNOUNCE" => Ok(OperationMode::Unannounce),
            _ => Err(MaintenanceError::Serialization(format!(
                "无效的节点运行模式: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageNode {
    pub id: i64,
    pub address: String,
    pub cql_port: u16,
    pub jmx_port: u16,
    pub operation_mode: OperationMode,
    pub maintenance_pending: bool,
    pub error_message: Option<String>,
    /// 导致部署中止的远程操作
    pub failed_operation: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageNode {
    pub const DEFAULT_CQL_PORT: u16 = 9142;
    pub const DEFAULT_JMX_PORT: u16 = 7299;

    /// 新加入的节点从 ANNOUNCE 开始
    pub fn new(address: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由存储生成
            address: address.into(),
            cql_port: Self::DEFAULT_CQL_PORT,
            jmx_port: Self::DEFAULT_JMX_PORT,
            operation_mode: OperationMode::Announce,
            maintenance_pending: false,
            error_message: None,
            failed_operation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_mode(mut self, mode: OperationMode) -> Self {
        self.operation_mode = mode;
        self
    }

    pub fn with_ports(mut self, cql_port: u16, jmx_port: u16) -> Self {
        self.cql_port = cql_port;
        self.jmx_port = jmx_port;
        self
    }

    pub fn is_normal(&self) -> bool {
        self.operation_mode == OperationMode::Normal
    }

    pub fn has_error(&self) -> bool {
        self.error_message.is_some()
    }

    pub fn set_operation_mode(&mut self, mode: OperationMode) {
        self.operation_mode = mode;
        self.updated_at = Utc::now();
    }

    pub fn record_failure(&mut self, message: impl Into<String>, operation_id: Option<i64>) {
        self.error_message = Some(message.into());
        self.failed_operation = operation_id;
        self.updated_at = Utc::now();
    }

    pub fn clear_error(&mut self) {
        self.error_message = None;
        self.failed_operation = None;
        self.updated_at = Utc::now();
    }
}

impl fmt::Display for StorageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StorageNode[address={}, mode={}]",
            self.address, self.operation_mode
        )
    }
}

/// 维护作业类型，每种类型对应一个步骤计算器
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Deploy,
    Decommission,
    Repair,
    AddNodeMaintenance,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Deploy => "DEPLOY",
            JobType::Decommission => "DECOMMISSION",
            JobType::Repair => "REPAIR",
            JobType::AddNodeMaintenance => "ADD_NODE_MAINTENANCE",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPLOY" => Ok(JobType::Deploy),
            "DECOMMISSION" => Ok(JobType::Decommission),
            "REPAIR" => Ok(JobType::Repair),
            "ADD_NODE_MAINTENANCE" => Ok(JobType::AddNodeMaintenance),
            _ => Err(MaintenanceError::UnrecognizedJobType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepFailureStrategy {
    /// 停止当前作业，剩余步骤作为新作业重新入队
    Abort,
    /// 允许后续作业并继续执行剩余步骤
    Continue,
}

impl StepFailureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepFailureStrategy::Abort => "ABORT",
            StepFailureStrategy::Continue => "CONTINUE",
        }
    }
}

impl FromStr for StepFailureStrategy {
    type Err = MaintenanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ABORT" => Ok(StepFailureStrategy::Abort),
            "CONTINUE" => Ok(StepFailureStrategy::Continue),
            _ => Err(MaintenanceError::Serialization(format!(
                "无效的步骤失败策略: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MaintenanceStep {
    pub job_number: i64,
    /// 作业内的执行顺序，从1开始
    pub step_number: i32,
    pub name: String,
    pub description: String,
    pub configuration: Value,
}

impl MaintenanceStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job_number: 0,
            step_number: 0,
            name: name.into(),
            description: String::new(),
            configuration: Value::Object(Map::new()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_target(mut self, address: impl Into<String>) -> Self {
        self.set_property(job_properties::TARGET, json!(address.into()));
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.set_property(job_properties::PARAMETERS, parameters);
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.configuration
            .get(job_properties::TARGET)
            .and_then(Value::as_str)
    }

    pub fn parameters(&self) -> Option<&Value> {
        self.configuration.get(job_properties::PARAMETERS)
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.configuration.get(key)
    }

    pub fn set_property(&mut self, key: &str, value: Value) {
        if !self.configuration.is_object() {
            self.configuration = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.configuration {
            map.insert(key.to_string(), value);
        }
    }

    /// 缺少目标地址的步骤无法执行
    pub fn required_target(&self) -> MaintenanceResult<&str> {
        self.target().ok_or_else(|| {
            MaintenanceError::step_execution(&self.name, "步骤配置缺少目标节点地址")
        })
    }
}

/// 作业上记录的最近一次步骤失败
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub step_number: i32,
    pub step_name: String,
    pub strategy: StepFailureStrategy,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageMaintenanceJob {
    pub job_number: i64,
    pub job_name: String,
    pub job_type: JobType,
    /// 描述作业本身的步骤，携带作业配置
    pub base_step: MaintenanceStep,
    /// 调度时的集群节点地址
    pub cluster_snapshot: Vec<String>,
    pub steps: Vec<MaintenanceStep>,
    /// 正在等待完成回调的远程操作
    pub pending_operation: Option<i64>,
    pub last_failure: Option<JobFailure>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
}

impl StorageMaintenanceJob {
    pub fn new(job_type: JobType, job_name: impl Into<String>, configuration: Value) -> Self {
        let base_step = MaintenanceStep::new(job_type.as_str()).with_configuration(configuration);
        Self {
            job_number: 0, // 入队时分配
            job_name: job_name.into(),
            job_type,
            base_step,
            cluster_snapshot: Vec::new(),
            steps: Vec::new(),
            pending_operation: None,
            last_failure: None,
            scheduled_at: Utc::now(),
            started_at: None,
        }
    }

    /// 以目标节点为配置创建作业
    pub fn for_target(job_type: JobType, job_name: impl Into<String>, target: &str) -> Self {
        Self::new(job_type, job_name, json!({ job_properties::TARGET: target }))
    }

    pub fn with_cluster_snapshot(mut self, snapshot: Vec<String>) -> Self {
        self.cluster_snapshot = snapshot;
        self
    }

    pub fn target(&self) -> Option<&str> {
        self.base_step.target()
    }

    pub fn configuration(&self) -> &Value {
        &self.base_step.configuration
    }

    pub fn set_property(&mut self, key: &str, value: Value) {
        self.base_step.set_property(key, value);
    }

    /// 追加步骤，步骤编号在作业内连续递增
    pub fn add_step(&mut self, mut step: MaintenanceStep) {
        step.step_number = self.steps.last().map(|s| s.step_number + 1).unwrap_or(1);
        step.job_number = self.job_number;
        self.steps.push(step);
    }

    pub fn next_step(&self) -> Option<&MaintenanceStep> {
        self.steps.first()
    }

    pub fn find_step(&self, step_number: i32) -> Option<&MaintenanceStep> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    pub fn remove_step(&mut self, step_number: i32) -> Option<MaintenanceStep> {
        let index = self.steps.iter().position(|s| s.step_number == step_number)?;
        Some(self.steps.remove(index))
    }

    pub fn is_complete(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn is_awaiting_operation(&self) -> bool {
        self.pending_operation.is_some()
    }

    /// 设置作业编号并同步到所有步骤
    pub fn assign_job_number(&mut self, job_number: i64) {
        self.job_number = job_number;
        self.base_step.job_number = job_number;
        for step in &mut self.steps {
            step.job_number = job_number;
        }
    }

    /// 重新从1开始编号，仅用于拆分出的新作业
    pub fn renumber_steps(&mut self) {
        for (index, step) in self.steps.iter_mut().enumerate() {
            step.step_number = index as i32 + 1;
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "维护作业 '{}' (编号: {}, 类型: {}, 剩余步骤: {})",
            self.job_name,
            self.job_number,
            self.job_type,
            self.steps.len()
        )
    }
}
