//! Orchestrator 构建器：统一的组件初始化逻辑
//!
//! 默认从 AppConfig 构建全部组件（provider 电路、回忆缓存、短期记忆、内置工具、默认规则表）；
//! 嵌入方或测试可以用 `with_*` 替换其中任意一个。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator};
use crate::llm::{
    LlmAuditLog, LlmCircuit, LlmClient, OpenAiClient, PersistentRateLimiter, ProviderSlot,
};
use crate::memory::{InMemoryShortTerm, RecallCache, ShortTermMemory, SqliteShortTerm};
use crate::pipeline::{Planner, Reporter, Rule};
use crate::tools::{builtin_registry, Tool, ToolExecutor, ToolRegistry};

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    recall: Option<Arc<RecallCache>>,
    short_term: Option<Arc<dyn ShortTermMemory>>,
    tools: Option<ToolRegistry>,
    extra_tools: Vec<Arc<dyn Tool>>,
    extra_rules: Vec<Rule>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            recall: None,
            short_term: None,
            tools: None,
            extra_tools: Vec::new(),
            extra_rules: Vec::new(),
        }
    }

    /// 替换 LLM 电路（测试中通常传入 MockLlmClient）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_recall(mut self, recall: Arc<RecallCache>) -> Self {
        self.recall = Some(recall);
        self
    }

    pub fn with_short_term(mut self, memory: Arc<dyn ShortTermMemory>) -> Self {
        self.short_term = Some(memory);
        self
    }

    /// 用给定注册表替换内置工具
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// 追加一个工具（同名覆盖内置实现）
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.extra_tools.push(Arc::new(tool));
        self
    }

    /// 追加一条规则，排在默认规则之前；多次调用时后加的优先
    pub fn with_rule_first(mut self, rule: Rule) -> Self {
        self.extra_rules.push(rule);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 按优先级构建 provider 电路：每个 provider 一个 OpenAI 兼容客户端，配置了配额的挂上持久化限流器
    pub fn build_circuit(&self) -> LlmCircuit {
        let data_dir = &self.config.app.data_dir;
        let slots = self
            .config
            .llm
            .ordered_providers()
            .into_iter()
            .map(|p| {
                let client: Arc<dyn LlmClient> = Arc::new(OpenAiClient::from_provider(&p));
                let mut slot = ProviderSlot::new(p.id.clone(), client)
                    .with_model(p.model.clone())
                    .with_timeout(Duration::from_secs(p.timeout_secs));
                if let Some(limit) = &p.rate_limit {
                    slot = slot.with_limiter(Arc::new(PersistentRateLimiter::new(
                        &p.id, limit, data_dir,
                    )));
                }
                slot
            })
            .collect::<Vec<_>>();
        tracing::info!(
            providers = %slots.iter().map(|s| s.id.as_str()).collect::<Vec<_>>().join(" -> "),
            "LLM circuit configured"
        );
        LlmCircuit::new(slots)
            .with_retry(self.config.llm.retry.clone())
            .with_audit(Arc::new(LlmAuditLog::new(self.config.llm.audit.clone())))
    }

    pub fn build_short_term(&self) -> Result<Arc<dyn ShortTermMemory>, AgentError> {
        match &self.config.memory.sqlite_path {
            Some(path) => {
                let store = SqliteShortTerm::open(path).map_err(|e| {
                    AgentError::ConfigError(format!(
                        "short-term memory at {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(InMemoryShortTerm::new(
                self.config.memory.max_context_turns,
            ))),
        }
    }

    pub fn build_tool_registry(&mut self) -> ToolRegistry {
        let mut tools = self
            .tools
            .take()
            .unwrap_or_else(|| builtin_registry(&self.config.tools));
        for tool in self.extra_tools.drain(..) {
            tools.register_arc(tool);
        }
        tools
    }

    pub fn build(mut self) -> Result<Orchestrator, AgentError> {
        let llm: Arc<dyn LlmClient> = match self.llm.take() {
            Some(llm) => llm,
            None => Arc::new(self.build_circuit()),
        };
        let recall = match self.recall.take() {
            Some(recall) => recall,
            None => Arc::new(RecallCache::open(&self.config.brain.path)),
        };
        let short_term = match self.short_term.take() {
            Some(memory) => memory,
            None => self.build_short_term()?,
        };
        let tools = Arc::new(self.build_tool_registry());

        let mut planner = Planner::with_default_rules(Arc::clone(&recall), &self.config.planner)?;
        for rule in self.extra_rules.drain(..) {
            planner = planner.with_rule_first(rule);
        }
        let executor = ToolExecutor::new(tools, self.config.tools.tool_timeout_secs);
        let reporter = Reporter::new(
            Arc::clone(&llm),
            Arc::clone(&recall),
            Arc::clone(&short_term),
            self.config.reporter.clone(),
            &self.config.brain,
        )?;

        tracing::info!(
            tools = %executor.registry().tool_names().join(","),
            rules = %planner.rule_names().join(","),
            learned = recall.len(),
            "Orchestrator ready"
        );
        Ok(Orchestrator::new(
            self.config,
            recall,
            short_term,
            planner,
            executor,
            reporter,
        ))
    }
}
