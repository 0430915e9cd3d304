//! 单次请求的流水线：Planner → Executor → Reporter
//!
//! 每个请求构造一个 `Pipeline`，持有本次的 `PipelineState`；`run` 消费自身，结束即丢弃。

pub mod planner;
pub mod reporter;
pub mod rules;
pub mod state;
pub mod step;

pub use planner::{PlanOutcome, Planner};
pub use reporter::{PipelineResponse, Reporter, ResponseSource};
pub use rules::{default_rules, Rule, RuleInput};
pub use state::{step_key, Context, Phase, PipelineState, StepOutcome, StepResult};
pub use step::{Action, Step};

use crate::core::AgentError;
use crate::tools::ToolExecutor;

pub struct Pipeline<'a> {
    planner: &'a Planner,
    executor: &'a ToolExecutor,
    reporter: &'a Reporter,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        planner: &'a Planner,
        executor: &'a ToolExecutor,
        reporter: &'a Reporter,
        state: PipelineState,
    ) -> Self {
        Self {
            planner,
            executor,
            reporter,
            state,
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub async fn run(mut self) -> Result<PipelineResponse, AgentError> {
        let outcome = self.planner.plan(self.state.latest_utterance())?;
        let response = match outcome {
            PlanOutcome::Recalled {
                response,
                confidence,
            } => self
                .reporter
                .passthrough(&mut self.state, response, confidence),
            PlanOutcome::Plan(steps) => {
                self.state.begin_execution(steps);
                self.executor.run_plan(&mut self.state).await;
                self.reporter.report(&mut self.state).await
            }
            PlanOutcome::Chat => {
                self.state.begin_execution(Vec::new());
                self.reporter.report(&mut self.state).await
            }
        };
        tracing::info!(
            session = %self.state.session_id(),
            source = ?response.source,
            steps = response.steps.len(),
            "Pipeline finished"
        );
        Ok(response)
    }
}
