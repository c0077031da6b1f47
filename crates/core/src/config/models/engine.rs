use serde::{Deserialize, Serialize};

/// 维护执行引擎配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub enabled: bool,
    /// 周期性触发 `execute()` 的间隔（秒）
    pub tick_interval_seconds: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_seconds: 30,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_seconds == 0 {
            return Err(anyhow::anyhow!("执行引擎触发间隔必须大于0"));
        }
        Ok(())
    }
}
