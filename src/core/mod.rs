//! 核心编排层：错误、编排器与构建器、后台周期任务、任务队列执行器、优雅关闭

pub mod builder;
pub mod error;
pub mod jobs_task;
pub mod orchestrator;
pub mod shutdown;
pub mod task_scheduler;

pub use builder::OrchestratorBuilder;
pub use error::AgentError;
pub use jobs_task::{JobRunnerTask, PROMPT_JOB_KIND};
pub use orchestrator::Orchestrator;
pub use shutdown::{
    run_with_graceful_shutdown, RecallFlushCleanup, ShutdownCleanup, ShutdownCoordinator,
    ShutdownManager, ShutdownReason,
};
pub use task_scheduler::{BackgroundScheduler, PeriodicTask};
