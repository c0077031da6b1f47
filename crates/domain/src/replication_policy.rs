//! 集群规模变化时的复制因子策略
//!
//! 纯函数，不访问存储，调用方据此生成 UpdateSchema 和修复步骤。

use maintenance_core::{MaintenanceError, MaintenanceResult};
use serde::{Deserialize, Serialize};

/// 从单节点扩展为两节点时放宽的 gc_grace_seconds（8天）
pub const EXPANDED_GC_GRACE_SECONDS: u32 = 691_200;

/// 缩减到单节点时的 gc_grace_seconds
pub const SINGLE_NODE_GC_GRACE_SECONDS: u32 = 0;

pub const MAX_REPLICATION_FACTOR: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaChanges {
    /// 变更后的复制因子
    pub replication_factor: u32,
    pub replication_factor_changed: bool,
    pub gc_grace_seconds: Option<u32>,
}

impl SchemaChanges {
    fn unchanged(replication_factor: u32) -> Self {
        Self {
            replication_factor,
            replication_factor_changed: false,
            gc_grace_seconds: None,
        }
    }

    fn changed(replication_factor: u32, gc_grace_seconds: Option<u32>) -> Self {
        Self {
            replication_factor,
            replication_factor_changed: true,
            gc_grace_seconds,
        }
    }

    /// 复制因子变化后必须在所有节点上运行修复
    pub fn repair_needed(&self) -> bool {
        self.replication_factor_changed
    }

    pub fn has_changes(&self) -> bool {
        self.replication_factor_changed || self.gc_grace_seconds.is_some()
    }
}

/// 新增节点后的 schema 变化
pub fn schema_changes_for_addition(
    previous_cluster_size: usize,
    new_cluster_size: usize,
) -> MaintenanceResult<SchemaChanges> {
    if previous_cluster_size == 0 {
        return Err(MaintenanceError::InvalidTopology(
            "扩容前的集群规模不能为0".to_string(),
        ));
    }
    if new_cluster_size <= previous_cluster_size {
        return Err(MaintenanceError::InvalidTopology(format!(
            "扩容后的集群规模 {new_cluster_size} 必须大于扩容前的规模 {previous_cluster_size}"
        )));
    }

    let changes = match previous_cluster_size {
        1 => SchemaChanges::changed(2, Some(EXPANDED_GC_GRACE_SECONDS)),
        2 if new_cluster_size == 3 => SchemaChanges::unchanged(2),
        2 | 3 => SchemaChanges::changed(MAX_REPLICATION_FACTOR, None),
        _ => SchemaChanges::unchanged(MAX_REPLICATION_FACTOR),
    };
    Ok(changes)
}

/// 移除节点后的 schema 变化
pub fn schema_changes_for_removal(
    previous_cluster_size: usize,
    new_cluster_size: usize,
) -> MaintenanceResult<SchemaChanges> {
    if previous_cluster_size == 0 || new_cluster_size == 0 {
        return Err(MaintenanceError::InvalidTopology(format!(
            "集群规模不能为0 (缩容前: {previous_cluster_size}, 缩容后: {new_cluster_size})"
        )));
    }
    if previous_cluster_size.abs_diff(new_cluster_size) != 1 {
        return Err(MaintenanceError::InvalidTopology(format!(
            "缩容前规模 {previous_cluster_size} 与缩容后规模 {new_cluster_size} 的差值必须为1"
        )));
    }

    let changes = match (previous_cluster_size, new_cluster_size) {
        (_, 1) => SchemaChanges::changed(1, Some(SINGLE_NODE_GC_GRACE_SECONDS)),
        (_, n) if n >= 5 => SchemaChanges::unchanged(MAX_REPLICATION_FACTOR),
        (p, _) if p > 4 => SchemaChanges::unchanged(MAX_REPLICATION_FACTOR),
        (4, 3) => SchemaChanges::changed(2, None),
        (3, 2) => SchemaChanges::unchanged(2),
        (p, n) => {
            return Err(MaintenanceError::InvalidTopology(format!(
                "不支持从 {p} 个节点缩容到 {n} 个节点"
            )))
        }
    };
    Ok(changes)
}
