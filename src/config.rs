//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAGGLE__*` 覆盖（双下划线表示嵌套，如 `WAGGLE__BRAIN__AUTO_LEARN=false`）。
//! 所有字段都有默认值，空配置即可运行。

use std::path::PathBuf;

use serde::Deserialize;

use crate::llm::{AuditConfig, RateLimitConfig, RetryConfig};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub brain: BrainSection,
    pub planner: PlannerSection,
    pub reporter: ReporterSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
    pub scheduler: SchedulerSection,
}

/// [app] 段：应用名、数据目录、默认会话
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 限流状态等运行时文件的目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_session_id")]
    pub session_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            data_dir: default_data_dir(),
            session_id: default_session_id(),
        }
    }
}

fn default_app_name() -> String {
    "waggle".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_session_id() -> String {
    "default".to_string()
}

/// [llm] 段：provider 列表（按 priority 升序尝试）、重试与审计
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            retry: RetryConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl LlmSection {
    /// 按 priority 排序后的 provider（priority 相同保持声明顺序）
    pub fn ordered_providers(&self) -> Vec<ProviderConfig> {
        let mut providers = self.providers.clone();
        providers.sort_by_key(|p| p.priority);
        providers
    }
}

/// [[llm.providers]]：一个 OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default)]
    pub priority: u32,
    pub base_url: String,
    pub model: String,
    /// 存放 API Key 的环境变量名；本地端点可省略
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: "ollama".to_string(),
            priority: 0,
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3".to_string(),
            api_key_env: None,
            timeout_secs: default_provider_timeout_secs(),
            rate_limit: None,
        }
    }
}

fn default_provider_timeout_secs() -> u64 {
    30
}

/// 默认电路：Gemini → Groq（1000 次/小时）→ 本地 Ollama
fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "gemini".to_string(),
            priority: 0,
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai/".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key_env: Some("GEMINI_API_KEY".to_string()),
            timeout_secs: 30,
            rate_limit: None,
        },
        ProviderConfig {
            id: "groq".to_string(),
            priority: 1,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: Some("GROQ_API_KEY".to_string()),
            timeout_secs: 15,
            rate_limit: Some(RateLimitConfig {
                limit: 1000,
                window_secs: 3600,
            }),
        },
        ProviderConfig {
            priority: 2,
            timeout_secs: 60,
            ..ProviderConfig::default()
        },
    ]
}

/// [brain] 段：回忆缓存文件与自动学习
#[derive(Debug, Clone, Deserialize)]
pub struct BrainSection {
    #[serde(default = "default_brain_path")]
    pub path: PathBuf,
    /// 汇报后自动把（问题, 回答）作为正反馈写入缓存
    #[serde(default = "default_true")]
    pub auto_learn: bool,
    #[serde(default = "default_learn_max_chars")]
    pub learn_max_chars: usize,
}

impl Default for BrainSection {
    fn default() -> Self {
        Self {
            path: default_brain_path(),
            auto_learn: true,
            learn_max_chars: default_learn_max_chars(),
        }
    }
}

fn default_brain_path() -> PathBuf {
    PathBuf::from("data/brain_memory.json")
}

fn default_true() -> bool {
    true
}

fn default_learn_max_chars() -> usize {
    500
}

/// [planner] 段
#[derive(Debug, Clone, Deserialize)]
pub struct PlannerSection {
    #[serde(default = "default_jira_project_key")]
    pub jira_project_key: String,
    /// 提到「桌面」时使用的目录；未设置时为 $HOME/Desktop
    #[serde(default)]
    pub desktop_dir: Option<PathBuf>,
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            jira_project_key: default_jira_project_key(),
            desktop_dir: None,
        }
    }
}

fn default_jira_project_key() -> String {
    "KAN".to_string()
}

/// [reporter] 段：汇报时的截断与历史窗口
#[derive(Debug, Clone, Deserialize)]
pub struct ReporterSection {
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_history_entry_chars")]
    pub history_entry_chars: usize,
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
}

impl Default for ReporterSection {
    fn default() -> Self {
        Self {
            max_result_chars: default_max_result_chars(),
            history_limit: default_history_limit(),
            history_entry_chars: default_history_entry_chars(),
            assistant_name: default_assistant_name(),
        }
    }
}

fn default_max_result_chars() -> usize {
    15_000
}

fn default_history_limit() -> usize {
    5
}

fn default_history_entry_chars() -> usize {
    200
}

fn default_assistant_name() -> String {
    "Waggle".to_string()
}

/// [memory] 段：短期记忆后端；未设置 sqlite_path 时使用内存实现
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    /// 内存实现每个会话保留的轮数
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            max_context_turns: default_max_context_turns(),
        }
    }
}

fn default_max_context_turns() -> usize {
    20
}

/// [tools] 段：工具超时、文件工具根目录、搜索
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            workspace_root: None,
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.search] 段：搜索端点（查询以 `q` 参数附加）、超时、最大字符数
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_search_max_chars")]
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_search_max_chars(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://html.duckduckgo.com/html/".to_string()
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_search_max_chars() -> usize {
    8000
}

/// [scheduler] 段：后台任务队列
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_jobs_path")]
    pub jobs_path: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 第 n 次失败后等待 retry_backoff_secs * 2^(n-1) 秒再重试
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            jobs_path: default_jobs_path(),
            interval_secs: default_interval_secs(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

fn default_jobs_path() -> PathBuf {
    PathBuf::from("data/jobs.json")
}

fn default_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    30
}

/// 从 config 目录加载配置，环境变量 WAGGLE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAGGLE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("WAGGLE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        let cfg = AppConfig::default();
        let ids: Vec<_> = cfg
            .llm
            .ordered_providers()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["gemini", "groq", "ollama"]);
        assert!(cfg.brain.auto_learn);
        assert_eq!(cfg.reporter.max_result_chars, 15_000);
        assert_eq!(cfg.reporter.history_limit, 5);
        assert_eq!(cfg.planner.jira_project_key, "KAN");
        assert_eq!(cfg.llm.retry.max_attempts, 3);
    }

    #[test]
    fn test_load_from_file_overrides_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waggle.toml");
        std::fs::write(
            &path,
            r#"
[brain]
auto_learn = false

[[llm.providers]]
id = "local"
base_url = "http://127.0.0.1:8080/v1"
model = "tiny"

[scheduler]
enabled = true
interval_secs = 5
"#,
        )
        .unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert!(!cfg.brain.auto_learn);
        assert_eq!(cfg.llm.providers.len(), 1);
        assert_eq!(cfg.llm.providers[0].timeout_secs, 30);
        assert!(cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.interval_secs, 5);
        assert_eq!(cfg.reporter.history_entry_chars, 200);
    }
}
