//! 持久化任务队列（单个 JSON 数组文件）
//!
//! - 文件不存在：空列表
//! - JSON 无法解析或根不是数组：原文件移到 `<stem>.corrupted.<timestamp>.json`，返回空列表
//! - 单条记录不符合 `Job`（其他程序写入的任务等）：不出现在 load 结果里，但原样留在文件原位置
//! - 写入为整表原子替换；append 读-改-写，进程内用 Mutex 串行化

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::write_atomic;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 一条任务记录；未知字段原样保留
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub status: JobStatus,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Job {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            status: JobStatus::Pending,
            payload,
            attempts: 0,
            next_run_at: None,
            created_at: Utc::now(),
            result: None,
            error: None,
            extra: serde_json::Map::new(),
        }
    }

    /// 提示词任务：payload = {"prompt": ..., "session_id": ...}
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self::new("prompt", serde_json::json!({ "prompt": prompt.into() }))
    }

    /// pending 且已到执行时间
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.next_run_at.map_or(true, |t| t <= now)
    }
}

#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JobStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件中所有可识别的任务
    pub fn load(&self) -> anyhow::Result<Vec<Job>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(typed_view(&self.load_unlocked()?))
    }

    /// 用 jobs 替换可识别的任务；无法识别的记录保持原样
    pub fn save(&self, jobs: &[Job]) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let records = self.load_unlocked()?;
        self.save_unlocked(merge(records, jobs.to_vec())?)
    }

    pub fn append(&self, job: Job) -> anyhow::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut records = self.load_unlocked()?;
        tracing::debug!(id = %job.id, kind = %job.kind, "Job appended");
        records.push(serde_json::to_value(&job)?);
        self.save_unlocked(records)
    }

    /// 在锁内读-改-写，供 job runner 更新状态
    pub fn update<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Vec<Job>),
    {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let records = self.load_unlocked()?;
        let mut jobs = typed_view(&records);
        f(&mut jobs);
        self.save_unlocked(merge(records, jobs)?)
    }

    fn load_unlocked(&self) -> anyhow::Result<Vec<Value>> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read jobs file {}", self.path.display()))
            }
        };
        if data.trim().is_empty() {
            return Ok(Vec::new());
        }
        match serde_json::from_str::<Value>(&data) {
            Ok(Value::Array(records)) => Ok(records),
            Ok(_) => {
                self.quarantine("root is not a list")?;
                Ok(Vec::new())
            }
            Err(e) => {
                self.quarantine(&e.to_string())?;
                Ok(Vec::new())
            }
        }
    }

    fn save_unlocked(&self, records: Vec<Value>) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(&Value::Array(records))?;
        write_atomic(&self.path, data.as_bytes())
            .with_context(|| format!("Failed to write jobs file {}", self.path.display()))
    }

    fn quarantine(&self, reason: &str) -> anyhow::Result<()> {
        let backup = self.corrupted_path();
        std::fs::rename(&self.path, &backup)
            .with_context(|| format!("Failed to move corrupted jobs file to {}", backup.display()))?;
        tracing::error!(
            path = %self.path.display(),
            backup = %backup.display(),
            "Jobs file corrupted ({}), moved aside",
            reason
        );
        Ok(())
    }

    fn corrupted_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("jobs");
        let ts = Utc::now().format("%Y%m%d%H%M%S%3f");
        self.path
            .with_file_name(format!("{}.corrupted.{}.json", stem, ts))
    }
}

fn as_job(record: &Value) -> Option<Job> {
    serde_json::from_value(record.clone()).ok()
}

fn typed_view(records: &[Value]) -> Vec<Job> {
    records.iter().filter_map(as_job).collect()
}

/// 把修改后的任务按原顺序写回可识别的位置；多出的追加到末尾，被移除的删掉
fn merge(records: Vec<Value>, jobs: Vec<Job>) -> anyhow::Result<Vec<Value>> {
    let mut jobs = jobs.into_iter();
    let mut merged = Vec::with_capacity(records.len());
    for record in records {
        if as_job(&record).is_none() {
            merged.push(record);
        } else if let Some(job) = jobs.next() {
            merged.push(serde_json::to_value(&job)?);
        }
    }
    for job in jobs {
        merged.push(serde_json::to_value(&job)?);
    }
    Ok(merged)
}
