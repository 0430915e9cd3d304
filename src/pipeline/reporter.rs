//! Reporter：把工具结果或对话历史合成为最终回复
//!
//! 三种模式：
//! - 直通：规划阶段命中缓存，原样返回
//! - 工具结果合成：只依据步骤结果作答，语言与输入一致
//! - 聊天合成：注入最近若干轮历史与当前日期
//!
//! 回复统一去掉 `<|...|>` 控制标记；非降级回复按配置写回缓存；每轮（user, assistant）写入短期记忆。

use std::sync::Arc;

use regex::Regex;

use crate::config::{BrainSection, ReporterSection};
use crate::llm::LlmClient;
use crate::memory::{truncate_chars, Message, RecallCache, Role, ShortTermMemory};
use crate::pipeline::state::{PipelineState, StepResult};

pub const EMPTY_REPORT_PREFIX: &str = "Task executed successfully.\n\nDetails:\n";
pub const DEGRADED_REPORT_PREFIX: &str =
    "Task executed, but the report could not be generated because every language model provider is unavailable.\n\nRaw Output:\n";
pub const CHAT_APOLOGY: &str =
    "I'm sorry, I can't reach any language model right now. Please try again in a moment.";
const NO_TOOL_RESULTS: &str = "No tools executed.";

/// 回复来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseSource {
    Recall,
    ToolSynthesis,
    Chat,
    /// 所有 provider 失败或无可用输出时的固定回复；不会写回缓存
    Degraded,
}

/// 流水线的最终产物
#[derive(Clone, Debug)]
pub struct PipelineResponse {
    pub text: String,
    pub source: ResponseSource,
    /// 仅缓存命中时有值
    pub confidence: Option<f32>,
    pub steps: Vec<StepResult>,
}

impl PipelineResponse {
    pub fn is_degraded(&self) -> bool {
        self.source == ResponseSource::Degraded
    }
}

pub struct Reporter {
    llm: Arc<dyn LlmClient>,
    recall: Arc<RecallCache>,
    memory: Arc<dyn ShortTermMemory>,
    config: ReporterSection,
    auto_learn: bool,
    learn_max_chars: usize,
    control_tokens: Regex,
}

impl Reporter {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        recall: Arc<RecallCache>,
        memory: Arc<dyn ShortTermMemory>,
        config: ReporterSection,
        brain: &BrainSection,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            llm,
            recall,
            memory,
            config,
            auto_learn: brain.auto_learn,
            learn_max_chars: brain.learn_max_chars,
            control_tokens: Regex::new(r"<\|.*?\|>")?,
        })
    }

    /// 缓存直通：原样返回，仍记入短期记忆
    pub fn passthrough(
        &self,
        state: &mut PipelineState,
        response: String,
        confidence: f32,
    ) -> PipelineResponse {
        self.remember_turn(state, &response);
        state.finish(response.clone());
        PipelineResponse {
            text: response,
            source: ResponseSource::Recall,
            confidence: Some(confidence),
            steps: Vec::new(),
        }
    }

    /// 执行阶段结束后的汇报
    pub async fn report(&self, state: &mut PipelineState) -> PipelineResponse {
        state.begin_reporting();
        let (text, source) = if state.plan().is_empty() {
            self.chat(state).await
        } else {
            self.synthesize_tools(state).await
        };

        if source != ResponseSource::Degraded && self.auto_learn {
            let learned: String = text.chars().take(self.learn_max_chars).collect();
            self.recall
                .learn_in_background(state.latest_utterance(), &learned, true);
        }
        self.remember_turn(state, &text);
        state.finish(text.clone());

        PipelineResponse {
            text,
            source,
            confidence: None,
            steps: state.context().step_results().to_vec(),
        }
    }

    async fn synthesize_tools(&self, state: &PipelineState) -> (String, ResponseSource) {
        let results = state.context().joined_results();
        let results = if results.is_empty() {
            NO_TOOL_RESULTS.to_string()
        } else {
            results
        };
        let bounded: String = results.chars().take(self.config.max_result_chars).collect();
        let system = format!(
            "You are {name}, an assistant reporting the results of actions taken for the user.\n\
             Answer the user's request using ONLY the tool results below.\n\
             Respond in the SAME language as the user's request.\n\
             Do not add information that is not contained in the results.\n\
             If the results show failures, apologize briefly and say what failed.\n\n\
             Tool results:\n{bounded}",
            name = self.config.assistant_name,
        );
        let messages = [
            Message::system(system),
            Message::user(state.latest_utterance()),
        ];

        match self.llm.complete(&messages).await {
            Ok(raw) => {
                let text = self.clean(&raw);
                if text.is_empty() {
                    (format!("{}{}", EMPTY_REPORT_PREFIX, results), ResponseSource::ToolSynthesis)
                } else {
                    (text, ResponseSource::ToolSynthesis)
                }
            }
            Err(e) => {
                tracing::error!("Report synthesis failed: {}", e);
                (format!("{}{}", DEGRADED_REPORT_PREFIX, results), ResponseSource::Degraded)
            }
        }
    }

    async fn chat(&self, state: &PipelineState) -> (String, ResponseSource) {
        let history = self
            .memory
            .get_recent(self.config.history_limit, state.session_id())
            .into_iter()
            .map(|m| {
                format!(
                    "{}: {}",
                    m.role.as_str(),
                    truncate_chars(&m.content, self.config.history_entry_chars)
                )
            })
            .collect::<Vec<_>>();
        let history = if history.is_empty() {
            "(no previous conversation)".to_string()
        } else {
            history.join("\n")
        };
        let system = format!(
            "You are {name}, a helpful assistant.\n\
             Current date: {date}.\n\n\
             Recent conversation (oldest first):\n{history}\n\n\
             Stay consistent with the conversation above when the user refers back to it.\n\
             DO NOT make up conversation history or facts about earlier turns that are not shown.",
            name = self.config.assistant_name,
            date = chrono::Local::now().format("%Y-%m-%d (%A)"),
        );
        let messages = [
            Message::system(system),
            Message::user(state.latest_utterance()),
        ];

        match self.llm.complete(&messages).await {
            Ok(raw) => {
                let text = self.clean(&raw);
                if text.is_empty() {
                    tracing::warn!("Chat synthesis returned empty text");
                    (CHAT_APOLOGY.to_string(), ResponseSource::Degraded)
                } else {
                    (text, ResponseSource::Chat)
                }
            }
            Err(e) => {
                tracing::error!("Chat synthesis failed: {}", e);
                (CHAT_APOLOGY.to_string(), ResponseSource::Degraded)
            }
        }
    }

    /// 去掉 provider 控制标记并 trim
    pub fn clean(&self, raw: &str) -> String {
        self.control_tokens.replace_all(raw, "").trim().to_string()
    }

    fn remember_turn(&self, state: &PipelineState, answer: &str) {
        let session = state.session_id();
        let saved = self
            .memory
            .save(Role::User, state.latest_utterance(), session)
            .and_then(|_| self.memory.save(Role::Assistant, answer, session));
        if let Err(e) = saved {
            tracing::warn!(session = %session, "Failed to save conversation turn: {}", e);
        }
    }
}
