//! 回忆缓存（Brain）：规范化查询的精确匹配记忆
//!
//! - 键：规范化（trim + 小写）后查询的 SHA-256 十六进制
//! - 查找只做精确匹配，不做相似度检索；命中置信度 0.98，未命中 0.15（交给 LLM）
//! - learn 先写先得：同一键一旦写入永不覆盖
//! - 启动时整表加载；每次成功 learn 后整表原子写回（临时文件 + rename）
//!
//! 跨进程并发写同一文件不做同步，单进程部署是前提。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 命中时的置信度
pub const HIT_CONFIDENCE: f32 = 0.98;
/// 未命中时的置信度（低于任何可用阈值，交给 LLM）
pub const MISS_CONFIDENCE: f32 = 0.15;

#[derive(Error, Debug)]
pub enum RecallError {
    #[error("Recall cache IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recall cache encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// lookup 结果
#[derive(Debug, Clone, PartialEq)]
pub struct Recall {
    pub hit: bool,
    pub response: Option<String>,
    pub confidence: f32,
}

/// 统计信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecallStats {
    pub total_queries: u64,
    pub hits: u64,
    pub learned_patterns: usize,
}

/// 规范化查询：去首尾空白并小写
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// 规范化查询的内容哈希
pub fn query_key(query: &str) -> String {
    let digest = Sha256::digest(normalize_query(query).as_bytes());
    hex::encode(digest)
}

/// 回忆缓存：内存 map + 单文件 JSON 持久化
#[derive(Debug)]
pub struct RecallCache {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<String, String>>,
    /// 串行化文件写入，保证最后一次写入的是最新快照
    persist_lock: Mutex<()>,
    total_queries: AtomicU64,
    hits: AtomicU64,
}

impl RecallCache {
    /// 从文件加载；文件缺失或损坏时得到空缓存
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = load_entries(&path);
        tracing::info!(
            path = %path.display(),
            patterns = entries.len(),
            "Recall cache loaded"
        );
        Self {
            path: Some(path),
            entries: RwLock::new(entries),
            persist_lock: Mutex::new(()),
            total_queries: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// 纯内存缓存（不落盘）
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            total_queries: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn lookup(&self, query: &str) -> Recall {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        let key = query_key(query);
        let found = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
            .cloned();

        match found {
            Some(response) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Recall hit");
                Recall {
                    hit: true,
                    response: Some(response),
                    confidence: HIT_CONFIDENCE,
                }
            }
            None => Recall {
                hit: false,
                response: None,
                confidence: MISS_CONFIDENCE,
            },
        }
    }

    /// 学习一条（查询, 回答）；仅 positive 且键不存在时写入并持久化。返回是否写入
    pub fn learn(&self, query: &str, response: &str, positive: bool) -> bool {
        if !self.remember(query, response, positive) {
            return false;
        }
        self.flush_logged();
        true
    }

    /// 内存立即写入，持久化放到阻塞线程池；需在 tokio 运行时内调用
    pub fn learn_in_background(self: &Arc<Self>, query: &str, response: &str, positive: bool) -> bool {
        if !self.remember(query, response, positive) {
            return false;
        }
        let cache = Arc::clone(self);
        tokio::task::spawn_blocking(move || cache.flush_logged());
        true
    }

    /// 写盘；无路径时为空操作
    pub fn flush(&self) -> Result<(), RecallError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            serde_json::to_string_pretty(&*entries)?
        };
        write_atomic(path, snapshot.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RecallStats {
        RecallStats {
            total_queries: self.total_queries.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            learned_patterns: self.len(),
        }
    }

    fn remember(&self, query: &str, response: &str, positive: bool) -> bool {
        if !positive || response.trim().is_empty() || normalize_query(query).is_empty() {
            return false;
        }
        let key = query_key(query);
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, response.to_string());
        tracing::info!(total = entries.len(), "Recall cache learned new pattern");
        true
    }

    fn flush_logged(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Recall cache persist failed (kept in memory): {}", e);
        }
    }
}

fn load_entries(path: &Path) -> HashMap<String, String> {
    let data = match std::fs::read_to_string(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "No recall cache file, starting empty");
            return HashMap::new();
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "Recall cache read failed: {}", e);
            return HashMap::new();
        }
    };
    match serde_json::from_str::<serde_json::Value>(&data) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        Ok(_) => {
            tracing::error!(path = %path.display(), "Recall cache root is not an object, starting empty");
            HashMap::new()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), "Recall cache corrupt ({}), starting empty", e);
            HashMap::new()
        }
    }
}

/// 临时文件 + rename；父目录不存在时自动创建
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
