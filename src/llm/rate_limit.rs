//! 持久化滑动窗口限流
//!
//! 每个 provider 一个时间戳列表（Unix 秒，f64），存于 `rate_limit_{provider}.json`。
//! 每次准入检查先剔除窗口外的旧记录，计数达到上限即拒绝，否则追加当前时间并写回。
//! 进程内由 Mutex 串行化；多进程共享同一文件时的读改写竞争不处理。

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::memory::write_atomic;

/// 限流配置（对应 provider 的 `rate_limit` 表）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub limit: usize,
    pub window_secs: u64,
}

#[derive(Debug)]
pub struct PersistentRateLimiter {
    provider: String,
    limit: usize,
    window_secs: f64,
    path: Option<PathBuf>,
    timestamps: Mutex<Vec<f64>>,
}

impl PersistentRateLimiter {
    /// 时间戳持久化到 `{data_dir}/rate_limit_{provider}.json`
    pub fn new(provider: &str, config: &RateLimitConfig, data_dir: impl AsRef<Path>) -> Self {
        let path = data_dir
            .as_ref()
            .join(format!("rate_limit_{}.json", provider));
        let timestamps = load_timestamps(&path);
        Self {
            provider: provider.to_string(),
            limit: config.limit,
            window_secs: config.window_secs as f64,
            path: Some(path),
            timestamps: Mutex::new(timestamps),
        }
    }

    pub fn in_memory(provider: &str, config: &RateLimitConfig) -> Self {
        Self {
            provider: provider.to_string(),
            limit: config.limit,
            window_secs: config.window_secs as f64,
            path: None,
            timestamps: Mutex::new(Vec::new()),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// 准入检查：允许时记录本次请求
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(now_secs())
    }

    pub fn try_acquire_at(&self, now: f64) -> bool {
        let mut guard = self
            .timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(path) = &self.path {
            *guard = load_timestamps(path);
        }
        let cutoff = now - self.window_secs;
        guard.retain(|ts| *ts > cutoff);

        if guard.len() >= self.limit {
            tracing::warn!(
                provider = %self.provider,
                used = guard.len(),
                limit = self.limit,
                "Rate limit reached"
            );
            return false;
        }

        guard.push(now);
        self.persist(&guard);
        true
    }

    /// 窗口内剩余额度（不记录请求）
    pub fn remaining(&self) -> usize {
        self.remaining_at(now_secs())
    }

    pub fn remaining_at(&self, now: f64) -> usize {
        let mut guard = self
            .timestamps
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(path) = &self.path {
            *guard = load_timestamps(path);
        }
        let cutoff = now - self.window_secs;
        let used = guard.iter().filter(|ts| **ts > cutoff).count();
        self.limit.saturating_sub(used)
    }

    fn persist(&self, timestamps: &[f64]) {
        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec(timestamps)
            .map_err(std::io::Error::other)
            .and_then(|bytes| write_atomic(path, &bytes));
        if let Err(e) = result {
            tracing::warn!(provider = %self.provider, "Failed to save rate limit state: {}", e);
        }
    }
}

fn load_timestamps(path: &Path) -> Vec<f64> {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), "Rate limit file unreadable, resetting: {}", e);
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(limit: usize, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig { limit, window_secs }
    }

    #[test]
    fn test_sliding_window() {
        let limiter = PersistentRateLimiter::in_memory("groq", &cfg(2, 60));
        let t0 = 1_000_000.0;
        assert!(limiter.try_acquire_at(t0));
        assert!(limiter.try_acquire_at(t0 + 1.0));
        assert!(!limiter.try_acquire_at(t0 + 2.0));
        assert_eq!(limiter.remaining_at(t0 + 2.0), 0);
        // 第一条记录滑出窗口
        assert!(limiter.try_acquire_at(t0 + 60.5));
        assert!(!limiter.try_acquire_at(t0 + 60.6));
    }

    #[test]
    fn test_denied_request_is_not_recorded() {
        let limiter = PersistentRateLimiter::in_memory("groq", &cfg(1, 60));
        assert!(limiter.try_acquire_at(0.0));
        assert!(!limiter.try_acquire_at(1.0));
        assert!(!limiter.try_acquire_at(2.0));
        assert!(limiter.try_acquire_at(60.5));
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let t0 = 5_000.0;
        {
            let limiter = PersistentRateLimiter::new("groq", &cfg(2, 3600), dir.path());
            assert!(limiter.try_acquire_at(t0));
            assert!(limiter.try_acquire_at(t0 + 1.0));
        }
        assert!(dir.path().join("rate_limit_groq.json").exists());
        let limiter = PersistentRateLimiter::new("groq", &cfg(2, 3600), dir.path());
        assert!(!limiter.try_acquire_at(t0 + 2.0));
        assert_eq!(limiter.remaining_at(t0 + 3601.5), 2);
    }

    #[test]
    fn test_corrupt_file_resets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("rate_limit_groq.json"), "garbage").unwrap();
        let limiter = PersistentRateLimiter::new("groq", &cfg(1, 60), dir.path());
        assert!(limiter.try_acquire_at(10.0));
    }
}
