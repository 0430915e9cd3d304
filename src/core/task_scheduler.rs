//! 后台任务调度：固定数量的长驻周期任务，统一由 CancellationToken 停止
//!
//! 每个任务一个 tokio 任务；tick 失败只记日志，下一个周期照常执行。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// 周期任务
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn tick(&self) -> anyhow::Result<()>;
}

pub struct BackgroundScheduler {
    token: CancellationToken,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundScheduler {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            handles: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// 启动任务：立即执行第一次 tick，之后按 interval 重复；错过的周期直接跳过
    pub fn spawn(&mut self, task: Arc<dyn PeriodicTask>) {
        let token = self.token.clone();
        let name = task.name();
        let period = task.interval().max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(task = name, interval_secs = period.as_secs_f64(), "Background task started");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = task.tick().await {
                            tracing::warn!(task = name, "Background task tick failed: {:#}", e);
                        }
                    }
                }
            }
            tracing::info!(task = name, "Background task stopped");
        });
        self.handles.push((name, handle));
    }

    /// 取消全部任务并等待退出；正在执行的 tick 先跑完
    pub async fn shutdown(self) {
        self.token.cancel();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(task = name, "Background task join failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        ticks: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn tick(&self) -> anyhow::Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runs_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = BackgroundScheduler::new(CancellationToken::new());
        scheduler.spawn(Arc::new(Counter {
            ticks: ticks.clone(),
            fail: false,
        }));
        assert_eq!(scheduler.len(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown().await;

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 2);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_failing_tick_keeps_running() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut scheduler = BackgroundScheduler::new(CancellationToken::new());
        scheduler.spawn(Arc::new(Counter {
            ticks: ticks.clone(),
            fail: true,
        }));
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.shutdown().await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
