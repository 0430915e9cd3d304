//! 编排器：持有全部共享组件，每个请求构造一条独立的 Pipeline
//!
//! 回忆缓存、LLM 电路与短期记忆以 Arc 共享，请求处理与后台任务使用同一份实例。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{AgentError, OrchestratorBuilder};
use crate::memory::{Message, RecallCache, RecallStats, ShortTermMemory};
use crate::pipeline::{Pipeline, PipelineResponse, PipelineState, Planner, Reporter};
use crate::tools::ToolExecutor;

pub struct Orchestrator {
    config: AppConfig,
    recall: Arc<RecallCache>,
    short_term: Arc<dyn ShortTermMemory>,
    planner: Planner,
    executor: ToolExecutor,
    reporter: Reporter,
}

impl Orchestrator {
    pub(crate) fn new(
        config: AppConfig,
        recall: Arc<RecallCache>,
        short_term: Arc<dyn ShortTermMemory>,
        planner: Planner,
        executor: ToolExecutor,
        reporter: Reporter,
    ) -> Self {
        Self {
            config,
            recall,
            short_term,
            planner,
            executor,
            reporter,
        }
    }

    pub fn builder(config: AppConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    /// 处理一条用户输入；只有空输入会返回错误
    pub async fn handle(
        &self,
        utterance: &str,
        session_id: &str,
    ) -> Result<PipelineResponse, AgentError> {
        if utterance.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }
        tracing::info!(session = %session_id, "Handling utterance");
        let state = PipelineState::new(utterance, session_id);
        Pipeline::new(&self.planner, &self.executor, &self.reporter, state)
            .run()
            .await
    }

    /// 用户确认（或否定）一次回答；只有 helpful 才会写入缓存
    pub fn feedback(&self, query: &str, response: &str, helpful: bool) -> bool {
        let learned = self.recall.learn(query, response, helpful);
        tracing::info!(helpful, learned, "Feedback received");
        learned
    }

    pub fn recall_stats(&self) -> RecallStats {
        self.recall.stats()
    }

    pub fn recall(&self) -> &Arc<RecallCache> {
        &self.recall
    }

    pub fn history(&self, session_id: &str, limit: usize) -> Vec<Message> {
        self.short_term.get_recent(limit, session_id)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.executor.registry().tool_names()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::memory::InMemoryShortTerm;

    fn orchestrator(llm: MockLlmClient) -> Orchestrator {
        Orchestrator::builder(AppConfig::default())
            .with_llm(Arc::new(llm))
            .with_recall(Arc::new(RecallCache::in_memory()))
            .with_short_term(Arc::new(InMemoryShortTerm::new(10)))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_empty_utterance_is_rejected() {
        let orch = orchestrator(MockLlmClient::echo());
        assert!(matches!(
            orch.handle(" \n ", "s").await,
            Err(AgentError::EmptyInput)
        ));
    }

    #[tokio::test]
    async fn test_feedback_learns_only_when_helpful() {
        let orch = orchestrator(MockLlmClient::echo());
        assert!(!orch.feedback("capital of france", "Paris", false));
        assert!(orch.feedback("capital of france", "Paris", true));
        assert!(!orch.feedback("capital of france", "Lyon", true));
        assert_eq!(
            orch.recall().lookup("Capital of France").response.as_deref(),
            Some("Paris")
        );
        assert_eq!(orch.recall_stats().learned_patterns, 1);
    }

    #[tokio::test]
    async fn test_builtin_tools_registered() {
        let orch = orchestrator(MockLlmClient::echo());
        assert_eq!(
            orch.tool_names(),
            vec!["collect_images", "echo", "list_directory", "web_search"]
        );
    }
}
