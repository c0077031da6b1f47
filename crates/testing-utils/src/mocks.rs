//! Recording test doubles for the external collaborator ports
//!
//! 远程操作和存储会话只记录调用，由测试决定何时回调完成事件。

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::ports::{OperationHandle, RemoteOperationDispatcher, StorageSession};
use serde_json::Value;

/// 一次记录下来的远程操作下发
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledOperation {
    pub operation_id: i64,
    pub target_address: String,
    pub operation_name: String,
    pub parameters: Value,
}

/// Mock implementation of RemoteOperationDispatcher for testing
#[derive(Debug, Clone)]
pub struct RecordingOperationDispatcher {
    operations: Arc<Mutex<Vec<ScheduledOperation>>>,
    next_id: Arc<Mutex<i64>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
}

impl RecordingOperationDispatcher {
    pub fn new() -> Self {
        Self {
            operations: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(100)),
            unreachable: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 对该地址的下发直接返回错误
    pub fn mark_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    pub fn operations(&self) -> Vec<ScheduledOperation> {
        self.operations.lock().unwrap().clone()
    }

    pub fn last_operation(&self) -> Option<ScheduledOperation> {
        self.operations.lock().unwrap().last().cloned()
    }

    pub fn operations_named(&self, name: &str) -> Vec<ScheduledOperation> {
        self.operations
            .lock()
            .unwrap()
            .iter()
            .filter(|op| op.operation_name == name)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.operations.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.operations.lock().unwrap().clear();
    }
}

impl Default for RecordingOperationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteOperationDispatcher for RecordingOperationDispatcher {
    async fn schedule_operation(
        &self,
        target_address: &str,
        operation_name: &str,
        parameters: Value,
    ) -> MaintenanceResult<OperationHandle> {
        if self.unreachable.lock().unwrap().contains(target_address) {
            return Err(MaintenanceError::step_execution(
                operation_name,
                format!("节点 {target_address} 不可达"),
            ));
        }

        let operation_id = {
            let mut next_id = self.next_id.lock().unwrap();
            let id = *next_id;
            *next_id += 1;
            id
        };

        self.operations.lock().unwrap().push(ScheduledOperation {
            operation_id,
            target_address: target_address.to_string(),
            operation_name: operation_name.to_string(),
            parameters,
        });

        Ok(OperationHandle {
            operation_id,
            target_address: target_address.to_string(),
            operation_name: operation_name.to_string(),
        })
    }
}

/// Mock implementation of StorageSession for testing
#[derive(Debug, Clone, Default)]
pub struct RecordingStorageSession {
    statements: Arc<Mutex<Vec<String>>>,
    fail_with: Arc<Mutex<Option<String>>>,
}

impl RecordingStorageSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后的每条语句都返回该错误
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageSession for RecordingStorageSession {
    async fn execute(&self, statement: &str) -> MaintenanceResult<()> {
        if let Some(message) = self.fail_with.lock().unwrap().clone() {
            return Err(MaintenanceError::step_execution("UpdateSchema", message));
        }
        self.statements.lock().unwrap().push(statement.to_string());
        Ok(())
    }
}
