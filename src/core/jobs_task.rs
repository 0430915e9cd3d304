//! 任务队列执行器：周期性处理到期的 prompt 任务
//!
//! 任务通过 Orchestrator 执行，与前台请求共享回忆缓存和 LLM 电路。
//! 失败后按 retry_backoff_secs * 2^(attempts-1) 延迟重试，达到 max_attempts 标记为 failed。
//! 未知 kind 的任务不做处理。
//! 结果写回失败的任务记在内存里，下一轮先把它们放回 pending。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::SchedulerSection;
use crate::core::{Orchestrator, PeriodicTask};
use crate::memory::{Job, JobStatus, JobStore};

pub const PROMPT_JOB_KIND: &str = "prompt";
const DEFAULT_JOB_SESSION: &str = "scheduler";

pub struct JobRunnerTask {
    store: Arc<JobStore>,
    orchestrator: Arc<Orchestrator>,
    config: SchedulerSection,
    /// 已认领但结果未能写回的任务 id
    stranded: Mutex<Vec<String>>,
}

impl JobRunnerTask {
    pub fn new(
        store: Arc<JobStore>,
        orchestrator: Arc<Orchestrator>,
        config: SchedulerSection,
    ) -> Self {
        Self {
            store,
            orchestrator,
            config,
            stranded: Mutex::new(Vec::new()),
        }
    }

    /// 上次进程退出时仍处于 running 的任务重新置为 pending
    pub fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let mut recovered = 0;
        self.store.update(|jobs| {
            for job in jobs.iter_mut().filter(|j| j.status == JobStatus::Running) {
                job.status = JobStatus::Pending;
                recovered += 1;
            }
        })?;
        if recovered > 0 {
            tracing::warn!(recovered, "Interrupted jobs returned to pending");
        }
        Ok(recovered)
    }

    fn retry_delay(&self, attempts: u32) -> chrono::Duration {
        let exp = attempts.saturating_sub(1).min(20);
        let secs = self.config.retry_backoff_secs.saturating_mul(1u64 << exp);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// 把仍处于 running 的 stranded 任务放回 pending；失败时保留待下一轮
    fn release_stranded(&self) -> anyhow::Result<()> {
        let mut stranded = self.stranded.lock().unwrap_or_else(|p| p.into_inner());
        if stranded.is_empty() {
            return Ok(());
        }
        let ids = stranded.clone();
        self.store.update(|jobs| {
            for job in jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Running && ids.contains(&j.id))
            {
                job.status = JobStatus::Pending;
            }
        })?;
        tracing::warn!(count = ids.len(), "Stranded jobs returned to pending");
        stranded.clear();
        Ok(())
    }

    /// 处理全部到期任务，返回处理数量
    ///
    /// 单个任务的结果写回失败不会中断其余任务；全部处理完后返回汇总错误。
    pub async fn run_due(&self) -> anyhow::Result<usize> {
        self.release_stranded()?;
        let now = Utc::now();
        let has_due = self
            .store
            .load()?
            .iter()
            .any(|j| j.kind == PROMPT_JOB_KIND && j.is_due(now));
        if !has_due {
            return Ok(0);
        }

        let mut claimed: Vec<Job> = Vec::new();
        self.store.update(|jobs| {
            for job in jobs
                .iter_mut()
                .filter(|j| j.kind == PROMPT_JOB_KIND && j.is_due(now))
            {
                job.status = JobStatus::Running;
                job.attempts += 1;
                claimed.push(job.clone());
            }
        })?;

        let mut unsaved = Vec::new();
        for job in &claimed {
            let outcome = self.execute(job).await;
            if let Err(e) = self.finish(&job.id, outcome) {
                tracing::error!(id = %job.id, "Failed to save job outcome: {:#}", e);
                unsaved.push(job.id.clone());
            }
        }
        if unsaved.is_empty() {
            return Ok(claimed.len());
        }

        let count = unsaved.len();
        self.stranded
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(unsaved);
        if let Err(e) = self.release_stranded() {
            tracing::warn!("Stranded jobs will be released next tick: {:#}", e);
        }
        anyhow::bail!(
            "{} of {} job outcomes could not be saved to {}",
            count,
            claimed.len(),
            self.store.path().display()
        )
    }

    async fn execute(&self, job: &Job) -> Result<String, String> {
        let prompt = job
            .payload
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let session = job
            .payload
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_JOB_SESSION);
        tracing::info!(id = %job.id, attempt = job.attempts, "Running job");

        match self.orchestrator.handle(prompt, session).await {
            Ok(resp) if resp.is_degraded() => Err(resp.text),
            Ok(resp) => Ok(resp.text),
            Err(e) => Err(e.to_string()),
        }
    }

    fn finish(&self, id: &str, outcome: Result<String, String>) -> anyhow::Result<()> {
        let now = Utc::now();
        let max_attempts = self.config.max_attempts;
        let mut retry_at = None;
        if outcome.is_err() {
            if let Some(job) = self.store.load()?.iter().find(|j| j.id == id) {
                if job.attempts < max_attempts {
                    retry_at = now.checked_add_signed(self.retry_delay(job.attempts));
                }
            }
        }

        self.store.update(|jobs| {
            let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
                tracing::warn!(id = %id, "Job disappeared while running");
                return;
            };
            match outcome {
                Ok(text) => {
                    job.status = JobStatus::Completed;
                    job.result = Some(text);
                    job.error = None;
                    job.next_run_at = None;
                    tracing::info!(id = %id, "Job completed");
                }
                Err(err) => {
                    job.error = Some(err);
                    match retry_at {
                        Some(at) => {
                            job.status = JobStatus::Pending;
                            job.next_run_at = Some(at);
                            tracing::warn!(id = %id, attempts = job.attempts, retry_at = %at, "Job failed, retry scheduled");
                        }
                        None => {
                            job.status = JobStatus::Failed;
                            job.next_run_at = None;
                            tracing::error!(id = %id, attempts = job.attempts, "Job failed permanently");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl PeriodicTask for JobRunnerTask {
    fn name(&self) -> &'static str {
        "job_runner"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs.max(1))
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let processed = self.run_due().await?;
        if processed > 0 {
            tracing::info!(processed, "Job runner tick finished");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{LlmError, MockLlmClient};
    use crate::memory::{InMemoryShortTerm, RecallCache};

    fn runner(
        dir: &std::path::Path,
        llm: MockLlmClient,
        max_attempts: u32,
    ) -> (Arc<JobStore>, JobRunnerTask) {
        let orch = Orchestrator::builder(AppConfig::default())
            .with_llm(Arc::new(llm))
            .with_recall(Arc::new(RecallCache::in_memory()))
            .with_short_term(Arc::new(InMemoryShortTerm::new(10)))
            .build()
            .unwrap();
        let store = Arc::new(JobStore::new(dir.join("jobs.json")));
        let config = SchedulerSection {
            max_attempts,
            retry_backoff_secs: 30,
            ..SchedulerSection::default()
        };
        let task = JobRunnerTask::new(Arc::clone(&store), Arc::new(orch), config);
        (store, task)
    }

    #[tokio::test]
    async fn test_due_prompt_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let (store, task) = runner(dir.path(), MockLlmClient::replying("done"), 3);
        let job = Job::prompt("tell me a joke");
        store.append(job.clone()).unwrap();

        assert_eq!(task.run_due().await.unwrap(), 1);
        let jobs = store.load().unwrap();
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert_eq!(jobs[0].result.as_deref(), Some("done"));
        assert_eq!(jobs[0].attempts, 1);

        assert_eq!(task.run_due().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_is_rescheduled_then_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, task) = runner(
            dir.path(),
            MockLlmClient::failing(LlmError::Api("down".into())),
            2,
        );
        store.append(Job::prompt("tell me a joke")).unwrap();

        task.run_due().await.unwrap();
        let job = store.load().unwrap().remove(0);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.next_run_at.unwrap() > Utc::now() + chrono::Duration::seconds(20));
        assert!(job.error.is_some());

        // 还没到重试时间
        assert_eq!(task.run_due().await.unwrap(), 0);

        store
            .update(|jobs| jobs[0].next_run_at = Some(Utc::now()))
            .unwrap();
        task.run_due().await.unwrap();
        let job = store.load().unwrap().remove(0);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
    }

    #[tokio::test]
    async fn test_unknown_kind_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (store, task) = runner(dir.path(), MockLlmClient::replying("done"), 3);
        let job = Job::new("post_tweet", serde_json::json!({"text": "hi"}));
        store.append(job.clone()).unwrap();

        assert_eq!(task.run_due().await.unwrap(), 0);
        assert_eq!(store.load().unwrap(), vec![job]);
    }

    #[test]
    fn test_retry_delay_doubles() {
        let dir = tempfile::tempdir().unwrap();
        let (_, task) = runner(dir.path(), MockLlmClient::echo(), 3);
        assert_eq!(task.retry_delay(1), chrono::Duration::seconds(30));
        assert_eq!(task.retry_delay(2), chrono::Duration::seconds(60));
        assert_eq!(task.retry_delay(3), chrono::Duration::seconds(120));
    }

    #[test]
    fn test_running_jobs_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let (store, task) = runner(dir.path(), MockLlmClient::echo(), 3);
        let mut job = Job::prompt("x");
        job.status = JobStatus::Running;
        store.append(job).unwrap();
        assert_eq!(task.recover_interrupted().unwrap(), 1);
        assert_eq!(store.load().unwrap()[0].status, JobStatus::Pending);
    }

    /// 第一次调用时把任务文件换成目录，让之后的写回全部失败
    struct FileSwappingLlm {
        path: std::path::PathBuf,
        swapped: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl crate::llm::LlmClient for FileSwappingLlm {
        async fn complete(
            &self,
            _messages: &[crate::memory::Message],
        ) -> Result<String, LlmError> {
            if !self.swapped.swap(true, std::sync::atomic::Ordering::SeqCst) {
                std::fs::rename(&self.path, self.path.with_extension("bak")).unwrap();
                std::fs::create_dir(&self.path).unwrap();
            }
            Ok("done".into())
        }
    }

    #[tokio::test]
    async fn test_unsaved_outcomes_do_not_strand_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        let store = Arc::new(JobStore::new(&path));
        let orch = Orchestrator::builder(AppConfig::default())
            .with_llm(Arc::new(FileSwappingLlm {
                path: path.clone(),
                swapped: std::sync::atomic::AtomicBool::new(false),
            }))
            .with_recall(Arc::new(RecallCache::in_memory()))
            .with_short_term(Arc::new(InMemoryShortTerm::new(10)))
            .build()
            .unwrap();
        let task = JobRunnerTask::new(
            Arc::clone(&store),
            Arc::new(orch),
            SchedulerSection::default(),
        );
        store.append(Job::prompt("first question")).unwrap();
        store.append(Job::prompt("second question")).unwrap();

        let err = task.run_due().await.unwrap_err();
        assert!(err.to_string().starts_with("2 of 2 job outcomes"));

        std::fs::remove_dir(&path).unwrap();
        std::fs::rename(path.with_extension("bak"), &path).unwrap();
        assert!(store
            .load()
            .unwrap()
            .iter()
            .all(|j| j.status == JobStatus::Running));

        assert_eq!(task.run_due().await.unwrap(), 2);
        let jobs = store.load().unwrap();
        assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
        assert!(jobs.iter().all(|j| j.attempts == 2));
    }
}
