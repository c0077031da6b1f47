use anyhow::Result;
use maintenance_core::config::{LogFormat, ObservabilityConfig};
use metrics::{counter, gauge};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// 维护系统的指标名称
pub mod metric_names {
    pub const STEPS_EXECUTED_TOTAL: &str = "maintenance_steps_executed_total";
    pub const STEP_FAILURES_TOTAL: &str = "maintenance_step_failures_total";
    pub const JOBS_REQUEUED_TOTAL: &str = "maintenance_jobs_requeued_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "maintenance_jobs_completed_total";
    pub const NODE_TRANSITIONS_TOTAL: &str = "storage_node_transitions_total";
    pub const QUEUE_DEPTH: &str = "maintenance_queue_depth";
}

/// Metrics recorder for the maintenance engine and lifecycle orchestrator
///
/// 只通过 `metrics` 门面记录，导出器由宿主进程安装。
#[derive(Debug, Clone, Copy)]
pub struct MaintenanceMetrics {
    enabled: bool,
}

impl MaintenanceMetrics {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    pub fn from_config(config: &ObservabilityConfig) -> Self {
        Self::new(config.metrics_enabled)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn record_step_executed(&self, step_name: &str) {
        if self.enabled {
            counter!(metric_names::STEPS_EXECUTED_TOTAL, "step" => step_name.to_string()).increment(1);
        }
    }

    pub fn record_step_failure(&self, step_name: &str, strategy: &str) {
        if self.enabled {
            counter!(
                metric_names::STEP_FAILURES_TOTAL,
                "step" => step_name.to_string(),
                "strategy" => strategy.to_string()
            )
            .increment(1);
        }
    }

    pub fn record_job_requeued(&self, job_type: &str) {
        if self.enabled {
            counter!(metric_names::JOBS_REQUEUED_TOTAL, "job_type" => job_type.to_string()).increment(1);
        }
    }

    pub fn record_job_completed(&self, job_type: &str) {
        if self.enabled {
            counter!(metric_names::JOBS_COMPLETED_TOTAL, "job_type" => job_type.to_string()).increment(1);
        }
    }

    pub fn record_node_transition(&self, mode: &str) {
        if self.enabled {
            counter!(metric_names::NODE_TRANSITIONS_TOTAL, "mode" => mode.to_string()).increment(1);
        }
    }

    pub fn update_queue_depth(&self, depth: usize) {
        if self.enabled {
            gauge!(metric_names::QUEUE_DEPTH).set(depth as f64);
        }
    }
}

impl Default for MaintenanceMetrics {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Initialize structured logging with tracing
///
/// `RUST_LOG` 优先于配置中的日志级别。重复初始化会返回错误。
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .pretty()
                .with_file(true)
                .with_line_number(true);
            registry.with(fmt_layer).try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = tracing_subscriber::fmt::layer().compact().with_target(false);
            registry.with(fmt_layer).try_init()?;
        }
    }

    info!(
        logging.format = ?config.log_format,
        logging.level = %config.log_level,
        metrics.enabled = config.metrics_enabled,
        "日志系统初始化完成"
    );

    Ok(())
}
