use async_trait::async_trait;
use chrono::Utc;
use maintenance_core::{MaintenanceError, MaintenanceResult};
use maintenance_domain::entities::{OperationMode, StorageNode};
use maintenance_domain::repositories::StorageNodeRepository;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

const NODE_COLUMNS: &str = "id, address, cql_port, jmx_port, operation_mode, maintenance_pending, \
                            error_message, failed_operation, created_at, updated_at";

pub struct SqliteStorageNodeRepository {
    pool: SqlitePool,
}

impl SqliteStorageNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn port(row: &SqliteRow, column: &str) -> MaintenanceResult<u16> {
        let value: i64 = row.try_get(column)?;
        u16::try_from(value)
            .map_err(|_| MaintenanceError::Serialization(format!("无效的端口 {column}: {value}")))
    }

    fn row_to_node(row: &SqliteRow) -> MaintenanceResult<StorageNode> {
        let operation_mode: String = row.try_get("operation_mode")?;
        Ok(StorageNode {
            id: row.try_get("id")?,
            address: row.try_get("address")?,
            cql_port: Self::port(row, "cql_port")?,
            jmx_port: Self::port(row, "jmx_port")?,
            operation_mode: operation_mode.parse()?,
            maintenance_pending: row.try_get("maintenance_pending")?,
            error_message: row.try_get("error_message")?,
            failed_operation: row.try_get("failed_operation")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_nodes(&self, sql: &str, mode: Option<OperationMode>) -> MaintenanceResult<Vec<StorageNode>> {
        let mut query = sqlx::query(sql);
        if let Some(mode) = mode {
            query = query.bind(mode.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_node).collect()
    }
}

#[async_trait]
impl StorageNodeRepository for SqliteStorageNodeRepository {
    #[instrument(skip(self, node), fields(address = %node.address))]
    async fn create(&self, node: &StorageNode) -> MaintenanceResult<StorageNode> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO storage_nodes (address, cql_port, jmx_port, operation_mode, maintenance_pending,
                                       error_message, failed_operation, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(&node.address)
        .bind(i64::from(node.cql_port))
        .bind(i64::from(node.jmx_port))
        .bind(node.operation_mode.as_str())
        .bind(node.maintenance_pending)
        .bind(&node.error_message)
        .bind(node.failed_operation)
        .bind(node.created_at)
        .bind(node.updated_at)
        .fetch_one(&self.pool)
        .await?;

        debug!("存储节点已登记");
        Self::row_to_node(&row)
    }

    async fn find_by_address(&self, address: &str) -> MaintenanceResult<Option<StorageNode>> {
        let row = sqlx::query(&format!(
            "SELECT {NODE_COLUMNS} FROM storage_nodes WHERE address = ?"
        ))
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_node).transpose()
    }

    async fn find_all(&self) -> MaintenanceResult<Vec<StorageNode>> {
        self.fetch_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM storage_nodes ORDER BY address"),
            None,
        )
        .await
    }

    async fn find_by_mode(&self, mode: OperationMode) -> MaintenanceResult<Vec<StorageNode>> {
        self.fetch_nodes(
            &format!("SELECT {NODE_COLUMNS} FROM storage_nodes WHERE operation_mode = ? ORDER BY address"),
            Some(mode),
        )
        .await
    }

    async fn find_maintenance_pending(&self, mode: OperationMode) -> MaintenanceResult<Vec<StorageNode>> {
        self.fetch_nodes(
            &format!(
                "SELECT {NODE_COLUMNS} FROM storage_nodes \
                 WHERE operation_mode = ? AND maintenance_pending = 1 ORDER BY address"
            ),
            Some(mode),
        )
        .await
    }

    #[instrument(skip(self, node), fields(address = %node.address, mode = %node.operation_mode))]
    async fn update(&self, node: &StorageNode) -> MaintenanceResult<StorageNode> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE storage_nodes
            SET cql_port = ?, jmx_port = ?, operation_mode = ?, maintenance_pending = ?,
                error_message = ?, failed_operation = ?, updated_at = ?
            WHERE address = ?
            RETURNING {NODE_COLUMNS}
            "#
        ))
        .bind(i64::from(node.cql_port))
        .bind(i64::from(node.jmx_port))
        .bind(node.operation_mode.as_str())
        .bind(node.maintenance_pending)
        .bind(&node.error_message)
        .bind(node.failed_operation)
        .bind(Utc::now())
        .bind(&node.address)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_node(&row),
            None => Err(MaintenanceError::StorageNodeNotFound {
                address: node.address.clone(),
            }),
        }
    }
}
