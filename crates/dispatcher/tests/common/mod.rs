#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use maintenance_core::MaintenanceResult;
use maintenance_dispatcher::{
    CalculatorLookup, MaintenanceEngine, MaintenanceQueue, StepCalculator, StepOutcome, StepRunner,
    StepRunnerRegistry,
};
use maintenance_domain::entities::{
    JobType, MaintenanceStep, StepFailureStrategy, StorageMaintenanceJob,
};
use maintenance_infrastructure::{
    InMemoryMaintenanceJobRepository, InMemoryStorageNodeRepository, MaintenanceMetrics,
};
use serde_json::{json, Value};

/// 所有脚本化执行器共享的执行记录
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<(String, String)>>>,
}

impl ExecutionLog {
    pub fn record(&self, job_name: &str, step_name: &str) {
        self.entries
            .lock()
            .unwrap()
            .push((job_name.to_string(), step_name.to_string()));
    }

    /// 按执行顺序返回 (作业名称, 步骤名称)
    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn steps_of(&self, job_name: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(job, _)| job == job_name)
            .map(|(_, step)| step)
            .collect()
    }
}

/// 按脚本返回结果的执行器，脚本用完后一律成功
pub struct ScriptedStepRunner {
    name: String,
    strategy: StepFailureStrategy,
    script: Mutex<VecDeque<StepOutcome>>,
    follow_up: Mutex<Option<StorageMaintenanceJob>>,
    log: ExecutionLog,
}

impl ScriptedStepRunner {
    pub fn new(name: &str, strategy: StepFailureStrategy, log: &ExecutionLog) -> Self {
        Self {
            name: name.to_string(),
            strategy,
            script: Mutex::new(VecDeque::new()),
            follow_up: Mutex::new(None),
            log: log.clone(),
        }
    }

    pub fn succeeding(name: &str, log: &ExecutionLog) -> Self {
        Self::new(name, StepFailureStrategy::Abort, log)
    }

    pub fn then(self, outcome: StepOutcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn fail_once(self, message: &str) -> Self {
        self.then(StepOutcome::Failed(message.to_string()))
    }

    pub fn with_follow_up(self, job: StorageMaintenanceJob) -> Self {
        *self.follow_up.lock().unwrap() = Some(job);
        self
    }
}

#[async_trait]
impl StepRunner for ScriptedStepRunner {
    fn name(&self) -> &str {
        &self.name
    }

    fn failure_strategy(&self) -> StepFailureStrategy {
        self.strategy
    }

    async fn execute(
        &self,
        job: &StorageMaintenanceJob,
        step: &MaintenanceStep,
    ) -> MaintenanceResult<StepOutcome> {
        self.log.record(&job.job_name, &step.name);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(StepOutcome::Completed))
    }

    async fn follow_up_job(
        &self,
        _job: &StorageMaintenanceJob,
        _step: &MaintenanceStep,
        _error_message: &str,
    ) -> MaintenanceResult<Option<StorageMaintenanceJob>> {
        Ok(self.follow_up.lock().unwrap().take())
    }
}

/// 从作业配置的 `steps` 数组生成步骤
///
/// CONTINUE 失败时删除失败步骤以及 `superseded` 中列出的步骤编号。
pub struct ScriptedCalculator {
    job_type: JobType,
    superseded: Vec<i32>,
}

impl ScriptedCalculator {
    pub fn new(job_type: JobType) -> Self {
        Self {
            job_type,
            superseded: Vec::new(),
        }
    }

    pub fn superseding(mut self, step_numbers: &[i32]) -> Self {
        self.superseded = step_numbers.to_vec();
        self
    }
}

impl StepCalculator for ScriptedCalculator {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    fn calculate_steps(&self, mut job: StorageMaintenanceJob) -> MaintenanceResult<StorageMaintenanceJob> {
        let names: Vec<String> = job
            .configuration()
            .get("steps")
            .and_then(Value::as_array)
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        for name in names {
            job.add_step(MaintenanceStep::new(name));
        }
        Ok(job)
    }

    fn update_steps(
        &self,
        job: &mut StorageMaintenanceJob,
        failed_step: &MaintenanceStep,
    ) -> MaintenanceResult<()> {
        job.remove_step(failed_step.step_number);
        for step_number in &self.superseded {
            job.remove_step(*step_number);
        }
        Ok(())
    }
}

/// 由脚本化计算器生成步骤的作业
pub fn scripted_job(job_type: JobType, name: &str, steps: &[&str]) -> StorageMaintenanceJob {
    StorageMaintenanceJob::new(job_type, name, json!({ "steps": steps }))
        .with_cluster_snapshot(vec!["10.0.0.1".to_string()])
}

pub struct EngineHarness {
    pub job_repo: Arc<InMemoryMaintenanceJobRepository>,
    pub node_repo: Arc<InMemoryStorageNodeRepository>,
    pub queue: Arc<MaintenanceQueue>,
    pub engine: Arc<MaintenanceEngine>,
}

impl EngineHarness {
    pub fn new(calculators: Vec<Arc<dyn StepCalculator>>, runners: Vec<Arc<dyn StepRunner>>) -> Self {
        let mut lookup = CalculatorLookup::new();
        for calculator in calculators {
            lookup.register(calculator);
        }
        let mut registry = StepRunnerRegistry::new();
        for runner in runners {
            registry.register(runner);
        }

        let job_repo = Arc::new(InMemoryMaintenanceJobRepository::new());
        let node_repo = Arc::new(InMemoryStorageNodeRepository::new());
        let queue = Arc::new(MaintenanceQueue::new(job_repo.clone(), node_repo.clone(), lookup));
        let engine = Arc::new(MaintenanceEngine::new(
            queue.clone(),
            registry,
            MaintenanceMetrics::disabled(),
        ));

        Self {
            job_repo,
            node_repo,
            queue,
            engine,
        }
    }
}
