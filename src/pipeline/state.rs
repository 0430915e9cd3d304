//! 单次请求的流水线状态
//!
//! 由一次请求独占：消息历史、计划、步骤游标、上下文、最终回复。
//! 游标只增不减且不超过计划长度；上下文键在一次运行内只增不改。

use crate::memory::{Message, Role};
use crate::pipeline::step::Step;

/// 流水线阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Executing,
    Reporting,
    Done,
}

/// 单步执行结果类别
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Ok,
    Error,
    UnknownTool,
    Panicked,
    TimedOut,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Ok => "ok",
            StepOutcome::Error => "error",
            StepOutcome::UnknownTool => "unknown_tool",
            StepOutcome::Panicked => "panic",
            StepOutcome::TimedOut => "timeout",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub tool: String,
    pub outcome: StepOutcome,
    pub output: String,
}

impl StepResult {
    /// 汇报时使用的 `"{tool}: {output}"` 形式
    pub fn line(&self) -> String {
        format!("{}: {}", self.tool, self.output)
    }
}

/// 上下文：执行器按 `step.{序号}.{tool}` 写入的步骤结果，键只增不改，保持写入顺序
#[derive(Clone, Debug, Default)]
pub struct Context {
    keys: Vec<String>,
    step_results: Vec<StepResult>,
}

impl Context {
    /// 键已存在时不覆盖，返回 false
    pub fn insert(&mut self, key: impl Into<String>, result: StepResult) -> bool {
        let key = key.into();
        if self.keys.contains(&key) {
            tracing::debug!(key = %key, "Context key already set, ignoring");
            return false;
        }
        self.keys.push(key);
        self.step_results.push(result);
        true
    }

    pub fn get(&self, key: &str) -> Option<&StepResult> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|i| &self.step_results[i])
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    /// 全部步骤结果，每步一行
    pub fn joined_results(&self) -> String {
        self.step_results
            .iter()
            .map(StepResult::line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 第 index 步结果在上下文中的键
pub fn step_key(index: usize, tool: &str) -> String {
    format!("step.{}.{}", index, tool)
}

#[derive(Debug)]
pub struct PipelineState {
    session_id: String,
    messages: Vec<Message>,
    plan: Vec<Step>,
    cursor: usize,
    context: Context,
    final_response: Option<String>,
    phase: Phase,
}

impl PipelineState {
    pub fn new(utterance: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: vec![Message::user(utterance)],
            plan: Vec::new(),
            cursor: 0,
            context: Context::default(),
            final_response: None,
            phase: Phase::Planning,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// 最新一条 user 消息
    pub fn latest_utterance(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn plan(&self) -> &[Step] {
        &self.plan
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn final_response(&self) -> Option<&str> {
        self.final_response.as_deref()
    }

    /// 规划结束：写入计划并进入执行阶段
    pub fn begin_execution(&mut self, plan: Vec<Step>) {
        debug_assert_eq!(self.phase, Phase::Planning);
        self.plan = plan;
        self.cursor = 0;
        self.phase = Phase::Executing;
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.plan.get(self.cursor)
    }

    /// 以 `step_key(cursor, tool)` 记录当前步骤结果并前移游标
    pub fn record_step(&mut self, result: StepResult) {
        if self.cursor >= self.plan.len() {
            return;
        }
        let key = step_key(self.cursor, &result.tool);
        self.context.insert(key, result);
        self.cursor += 1;
    }

    pub fn is_plan_done(&self) -> bool {
        self.cursor >= self.plan.len()
    }

    pub fn begin_reporting(&mut self) {
        self.phase = Phase::Reporting;
    }

    /// 写入最终回复并结束；Planning 阶段直接结束表示缓存短路
    pub fn finish(&mut self, response: impl Into<String>) {
        self.final_response = Some(response.into());
        self.phase = Phase::Done;
    }
}
