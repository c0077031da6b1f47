use serde::{Deserialize, Serialize};

/// 存储集群连接参数，随 prepareForBootstrap 下发给新节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterSettings {
    pub cql_port: u16,
    pub gossip_port: u16,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            cql_port: 9142,
            gossip_port: 7100,
        }
    }
}

impl ClusterSettings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cql_port == 0 || self.gossip_port == 0 {
            return Err(anyhow::anyhow!("集群端口必须大于0"));
        }
        if self.cql_port == self.gossip_port {
            return Err(anyhow::anyhow!(
                "CQL端口与Gossip端口不能相同: {}",
                self.cql_port
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyspaceConfig {
    pub name: String,
    pub tables: Vec<String>,
}

/// 需要修复和调整 gc_grace_seconds 的键空间与表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaConfig {
    pub keyspaces: Vec<KeyspaceConfig>,
    /// 调整 gc_grace_seconds 的键空间
    pub metrics_keyspace: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            keyspaces: vec![
                KeyspaceConfig {
                    name: "system_auth".to_string(),
                    tables: vec![
                        "users".to_string(),
                        "credentials".to_string(),
                        "permissions".to_string(),
                    ],
                },
                KeyspaceConfig {
                    name: "rhq".to_string(),
                    tables: vec![
                        "metrics_index".to_string(),
                        "raw_metrics".to_string(),
                        "one_hour_metrics".to_string(),
                        "six_hour_metrics".to_string(),
                        "twenty_four_hour_metrics".to_string(),
                        "schema_version".to_string(),
                    ],
                },
            ],
            metrics_keyspace: "rhq".to_string(),
        }
    }
}

impl SchemaConfig {
    pub fn keyspace(&self, name: &str) -> Option<&KeyspaceConfig> {
        self.keyspaces.iter().find(|k| k.name == name)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.keyspaces.is_empty() {
            return Err(anyhow::anyhow!("至少需要配置一个键空间"));
        }
        for keyspace in &self.keyspaces {
            if keyspace.name.is_empty() {
                return Err(anyhow::anyhow!("键空间名称不能为空"));
            }
            if keyspace.tables.is_empty() {
                return Err(anyhow::anyhow!("键空间 {} 没有配置表", keyspace.name));
            }
        }
        if self.keyspace(&self.metrics_keyspace).is_none() {
            return Err(anyhow::anyhow!(
                "指标键空间 {} 不在键空间列表中",
                self.metrics_keyspace
            ));
        }
        Ok(())
    }
}
