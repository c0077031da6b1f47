use anyhow::{Context, Result};
use maintenance_core::config::{AppConfig, LogFormat};
use tracing::info;

/// 命令行启动参数
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    pub config_path: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
}

pub fn parse_log_format(value: &str) -> Result<LogFormat> {
    match value {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        "compact" => Ok(LogFormat::Compact),
        _ => Err(anyhow::anyhow!("不支持的日志格式: {value}")),
    }
}

/// 加载配置并应用命令行覆盖
pub fn load_config(startup: &StartupConfig) -> Result<AppConfig> {
    if let Some(path) = startup.config_path.as_deref() {
        if !std::path::Path::new(path).exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {path}"));
        }
    }

    let mut config = AppConfig::load(startup.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup.config_path.as_deref().unwrap_or("<默认配置>")
        )
    })?;

    if let Some(level) = &startup.log_level {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = &startup.log_format {
        config.observability.log_format = parse_log_format(format)?;
    }

    config.validate().context("配置校验失败")?;
    Ok(config)
}

/// 加载配置并初始化日志
pub fn bootstrap(startup: &StartupConfig) -> Result<AppConfig> {
    let config = load_config(startup)?;
    maintenance_infrastructure::init_logging(&config.observability)?;
    info!(
        database = %config.database.url,
        engine_enabled = config.engine.enabled,
        "配置加载完成"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json").unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format("compact").unwrap(), LogFormat::Compact);
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let startup = StartupConfig {
            config_path: Some("/nonexistent/maintenance.toml".to_string()),
            ..Default::default()
        };
        assert!(load_config(&startup).is_err());
    }

    #[test]
    fn test_load_config_applies_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = AppConfig::default().to_toml().unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let startup = StartupConfig {
            config_path: Some(file.path().to_string_lossy().into_owned()),
            log_level: Some("debug".to_string()),
            log_format: Some("json".to_string()),
        };
        let config = load_config(&startup).unwrap();

        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
