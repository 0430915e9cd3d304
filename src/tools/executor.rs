//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，按计划顺序逐步调用工具：
//! - 未注册的工具 → "Tool {id} not implemented"
//! - 工具返回 Err / panic / 超时 → "Error: ..."
//! 任何结果都记入上下文并前移游标，单步失败不会中断后续步骤；每次调用输出结构化审计日志（JSON）。

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::time::timeout;

use crate::pipeline::{PipelineState, Step, StepOutcome, StepResult};
use crate::tools::ToolRegistry;

/// 工具执行器：对每次调用施加超时并捕获 panic
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 从当前游标执行到计划结束
    pub async fn run_plan(&self, state: &mut PipelineState) {
        while let Some(step) = state.current_step().cloned() {
            let result = self.run_step(&step).await;
            state.record_step(result);
        }
    }

    /// 执行单步；永不返回错误
    pub async fn run_step(&self, step: &Step) -> StepResult {
        let tool_id = step.tool_id().to_string();
        let args = step.params();
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let (outcome, output) = match self.registry.get(&tool_id) {
            None => (
                StepOutcome::UnknownTool,
                format!("Tool {} not implemented", tool_id),
            ),
            Some(tool) => {
                let call = AssertUnwindSafe(tool.execute(args)).catch_unwind();
                match timeout(self.timeout, call).await {
                    Ok(Ok(Ok(content))) => (StepOutcome::Ok, content),
                    Ok(Ok(Err(e))) => (StepOutcome::Error, format!("Error: {}", e)),
                    Ok(Err(panic)) => (
                        StepOutcome::Panicked,
                        format!("Error: tool panicked: {}", panic_message(panic.as_ref())),
                    ),
                    Err(_) => (
                        StepOutcome::TimedOut,
                        format!("Error: timed out after {}s", self.timeout.as_secs_f32()),
                    ),
                }
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_id,
            "ok": outcome == StepOutcome::Ok,
            "outcome": outcome.as_str(),
            "duration_ms": duration_ms,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        StepResult {
            tool: tool_id,
            outcome,
            output,
        }
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Action;
    use crate::tools::{EchoTool, Tool};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("boom".into())
        }
    }

    struct Panicking;

    #[async_trait]
    impl Tool for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }
        fn description(&self) -> &str {
            "panics"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            panic!("tool exploded")
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Tool for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("woke".into())
        }
    }

    fn step(tool: &str) -> Step {
        let action = if tool == "echo" {
            Action::Echo {
                text: "hello".into(),
            }
        } else {
            Action::Other {
                tool: tool.into(),
                params: Value::Null,
            }
        };
        Step::new(action, tool)
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(Failing);
        registry.register(Panicking);
        registry.register(Sleepy);
        ToolExecutor::new(Arc::new(registry), 30).with_timeout(Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_failed_step_does_not_abort_plan() {
        let mut state = PipelineState::new("run", "s");
        state.begin_execution(vec![step("echo"), step("failing"), step("echo")]);
        executor().run_plan(&mut state).await;

        assert_eq!(state.cursor(), 3);
        let results = state.context().step_results();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].line(), "echo: hello");
        assert_eq!(results[1].outcome, StepOutcome::Error);
        assert_eq!(results[1].line(), "failing: Error: boom");
        assert_eq!(results[2].outcome, StepOutcome::Ok);
        assert_eq!(
            state.context().get("step.1.failing").map(|r| r.outcome),
            Some(StepOutcome::Error)
        );
        assert_eq!(state.context().keys()[2], "step.2.echo");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_recorded() {
        let result = executor().run_step(&step("jira_create_issue")).await;
        assert_eq!(result.outcome, StepOutcome::UnknownTool);
        assert_eq!(
            result.line(),
            "jira_create_issue: Tool jira_create_issue not implemented"
        );
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let result = executor().run_step(&step("panicking")).await;
        assert_eq!(result.outcome, StepOutcome::Panicked);
        assert!(result.output.contains("tool exploded"));
    }

    #[tokio::test]
    async fn test_timeout_is_caught() {
        let result = executor().run_step(&step("sleepy")).await;
        assert_eq!(result.outcome, StepOutcome::TimedOut);
        assert!(result.output.starts_with("Error: timed out"));
    }
}
