use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgMatches, Command};
use serde_json::json;
use storage_maintenance::app::MaintenanceStore;
use storage_maintenance::common::{bootstrap, StartupConfig};
use tracing::info;

fn cli() -> Command {
    Command::new("storage-maintenance")
        .version("1.0.0")
        .about("存储集群维护队列检查工具")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty", "compact"])
                .global(true),
        )
        .subcommand(Command::new("queue").about("按队列顺序列出维护作业"))
        .subcommand(
            Command::new("job")
                .about("查看单个维护作业")
                .arg(job_number_arg()),
        )
        .subcommand(
            Command::new("refresh")
                .about("按当前集群拓扑重新计算未开始作业的步骤")
                .arg(job_number_arg()),
        )
        .subcommand(Command::new("nodes").about("列出存储节点及其运行模式"))
}

fn job_number_arg() -> Arg {
    Arg::new("job-number")
        .value_name("JOB_NUMBER")
        .help("作业编号")
        .required(true)
        .value_parser(value_parser!(i64))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let startup = StartupConfig {
        config_path: matches.get_one::<String>("config").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        log_format: matches.get_one::<String>("log-format").cloned(),
    };
    let config = bootstrap(&startup)?;
    let store = MaintenanceStore::open(&config).await?;

    let result = run_command(&store, &matches).await;
    store.database.close().await;
    result
}

async fn run_command(store: &MaintenanceStore, matches: &ArgMatches) -> Result<()> {
    let output = match matches.subcommand() {
        Some(("queue", _)) => {
            let jobs = store.queue.load_queue().await?;
            info!("维护队列中有 {} 个作业", jobs.len());
            serde_json::to_value(jobs)?
        }
        Some(("job", sub)) => {
            let job = store.queue.load_job(job_number(sub)?).await?;
            serde_json::to_value(job)?
        }
        Some(("refresh", sub)) => {
            let job = store.queue.refresh_job(job_number(sub)?).await?;
            serde_json::to_value(job)?
        }
        Some(("nodes", _)) => {
            let nodes = store.node_repo.find_all().await?;
            json!(nodes
                .iter()
                .map(|node| json!({
                    "address": node.address,
                    "operation_mode": node.operation_mode,
                    "maintenance_pending": node.maintenance_pending,
                    "error_message": node.error_message,
                }))
                .collect::<Vec<_>>())
        }
        _ => return Err(anyhow::anyhow!("未知的子命令")),
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("序列化输出失败")?
    );
    Ok(())
}

fn job_number(matches: &ArgMatches) -> Result<i64> {
    matches
        .get_one::<i64>("job-number")
        .copied()
        .ok_or_else(|| anyhow::anyhow!("缺少作业编号"))
}
