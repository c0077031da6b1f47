//! 存储集群维护核心
//!
//! 作业队列、步骤计算器与执行器、执行引擎，以及新节点的生命周期编排。

pub mod calculators;
pub mod engine;
pub mod lifecycle;
pub mod listener;
pub mod queue;
pub mod runners;
pub mod step_names;

pub use calculators::{CalculatorLookup, StepCalculator};
pub use engine::{ExecutionSummary, MaintenanceEngine, MaintenanceJobObserver};
pub use lifecycle::StorageNodeLifecycle;
pub use listener::{event_channel, MaintenanceEvent, MaintenanceEventListener};
pub use queue::MaintenanceQueue;
pub use runners::{StepOutcome, StepRunner, StepRunnerRegistry};
