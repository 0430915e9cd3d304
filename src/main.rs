//! Waggle 命令行入口
//!
//! 初始化日志、加载配置、构建编排器并（按配置）启动任务队列执行器，然后逐行读取 stdin：
//! - `/stats` 查看回忆缓存统计
//! - `/good`  确认上一条回答，写入回忆缓存
//! - `/quit`  退出
//! Ctrl+C / SIGTERM / stdin 结束同样触发优雅关闭：停止后台任务并把回忆缓存落盘。

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use waggle::config::{load_config, AppConfig};
use waggle::core::{
    run_with_graceful_shutdown, BackgroundScheduler, JobRunnerTask, Orchestrator,
    RecallFlushCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use waggle::memory::JobStore;
use waggle::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    std::fs::create_dir_all(&cfg.app.data_dir).with_context(|| {
        format!("Failed to create data dir {}", cfg.app.data_dir.display())
    })?;

    let orchestrator = Arc::new(
        Orchestrator::builder(cfg.clone())
            .build()
            .context("Failed to build orchestrator")?,
    );

    let shutdown = Arc::new(ShutdownManager::new());
    let mut scheduler = BackgroundScheduler::new(shutdown.token());
    if cfg.scheduler.enabled {
        let store = Arc::new(JobStore::new(&cfg.scheduler.jobs_path));
        let runner = JobRunnerTask::new(store, Arc::clone(&orchestrator), cfg.scheduler.clone());
        if let Err(e) = runner.recover_interrupted() {
            tracing::warn!("Failed to recover interrupted jobs: {:#}", e);
        }
        scheduler.spawn(Arc::new(runner));
    }

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(RecallFlushCleanup::new(Arc::clone(orchestrator.recall())));

    let repl = run_repl(
        Arc::clone(&orchestrator),
        Arc::clone(&shutdown),
        cfg.app.session_id.clone(),
    );
    run_with_graceful_shutdown(shutdown, repl, || async move {
        scheduler.shutdown().await;
        coordinator.run_cleanup().await;
    })
    .await;

    Ok(())
}

/// stdin 放到独立线程读取，关闭时不会卡在阻塞读上
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

async fn run_repl(orchestrator: Arc<Orchestrator>, shutdown: Arc<ShutdownManager>, session: String) {
    let mut lines = spawn_stdin_reader();
    let mut last_answer: Option<(String, String)> = None;
    println!(
        "{} ready. Commands: /stats, /good, /quit",
        orchestrator.config().app.name
    );

    while let Some(line) = lines.recv().await {
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => {
                shutdown.shutdown(ShutdownReason::UserInitiated);
                return;
            }
            "/stats" => {
                let stats = orchestrator.recall_stats();
                println!(
                    "queries: {}  hits: {}  learned: {}",
                    stats.total_queries, stats.hits, stats.learned_patterns
                );
            }
            "/good" => match &last_answer {
                Some((query, answer)) => {
                    if orchestrator.feedback(query, answer, true) {
                        println!("Learned.");
                    } else {
                        println!("Already known.");
                    }
                }
                None => println!("Nothing to confirm yet."),
            },
            _ => match orchestrator.handle(input, &session).await {
                Ok(resp) => {
                    println!("{}", resp.text);
                    last_answer = if resp.is_degraded() {
                        None
                    } else {
                        Some((input.to_string(), resp.text))
                    };
                }
                Err(e) => println!("Error: {}", e),
            },
        }
    }

    shutdown.shutdown(ShutdownReason::InputClosed);
}
