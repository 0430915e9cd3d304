//! LLM 调用审计日志（JSONL）
//!
//! 每次 provider 尝试写一行：timestamp / request_id / provider / model / outcome / latency_ms /
//! input_len / output_len / response_preview（≤200 字符）。文件超过 max_bytes 时轮转为 `.1`…`.N`。
//! 同时以 `audit` 字段输出到 tracing，与工具审计一致。

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::memory::truncate_chars;

const PREVIEW_CHARS: usize = 200;

/// 审计配置（对应 `[llm.audit]`）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// 为空时只输出 tracing
    pub path: Option<PathBuf>,
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

/// 一次 provider 尝试
#[derive(Debug, Clone, Serialize)]
pub struct LlmAttempt<'a> {
    pub request_id: &'a str,
    pub provider: &'a str,
    pub model: &'a str,
    pub outcome: &'a str,
    pub latency_ms: u64,
    pub input_len: usize,
    pub output_len: usize,
    pub response_preview: String,
}

impl<'a> LlmAttempt<'a> {
    pub fn preview(text: &str) -> String {
        truncate_chars(text, PREVIEW_CHARS)
    }
}

#[derive(Debug, Default)]
pub struct LlmAuditLog {
    config: AuditConfig,
    file_lock: Mutex<()>,
}

impl LlmAuditLog {
    pub fn new(config: AuditConfig) -> Self {
        Self {
            config,
            file_lock: Mutex::new(()),
        }
    }

    pub fn record(&self, attempt: &LlmAttempt<'_>) {
        let mut line = serde_json::json!({
            "event": "llm_audit",
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let (Some(obj), Ok(serde_json::Value::Object(fields))) =
            (line.as_object_mut(), serde_json::to_value(attempt))
        {
            obj.extend(fields);
        }
        let line = line.to_string();
        tracing::info!(audit = %line, "llm");

        if let Some(path) = &self.config.path {
            let _guard = self
                .file_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Err(e) = self.append(path, &line) {
                tracing::warn!(path = %path.display(), "LLM audit write failed: {}", e);
            }
        }
    }

    fn append(&self, path: &Path, line: &str) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if size > 0 && size + line.len() as u64 + 1 > self.config.max_bytes {
            rotate(path, self.config.max_files)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)
    }
}

/// path.N-1 → path.N … path → path.1；超出 max_files 的最旧文件被覆盖
fn rotate(path: &Path, max_files: usize) -> std::io::Result<()> {
    if max_files == 0 {
        return std::fs::remove_file(path);
    }
    let numbered = |n: usize| {
        let mut p = path.as_os_str().to_os_string();
        p.push(format!(".{}", n));
        PathBuf::from(p)
    };
    for n in (1..max_files).rev() {
        let from = numbered(n);
        if from.exists() {
            std::fs::rename(&from, numbered(n + 1))?;
        }
    }
    std::fs::rename(path, numbered(1))
}
