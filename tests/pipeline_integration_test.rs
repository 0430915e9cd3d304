//! 流水线集成测试：Planner → Executor → Reporter，全部使用 Mock LLM 与内存/临时目录协作者

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use waggle::config::AppConfig;
use waggle::core::{JobRunnerTask, Orchestrator};
use waggle::llm::{
    LlmCircuit, LlmClient, LlmError, MockLlmClient, PersistentRateLimiter, ProviderSlot,
    RateLimitConfig, RetryConfig,
};
use waggle::memory::{InMemoryShortTerm, Job, JobStatus, JobStore, Message, RecallCache};
use waggle::pipeline::{Action, ResponseSource, Rule, Step, StepOutcome};

fn orchestrator_with(llm: Arc<dyn LlmClient>) -> Orchestrator {
    Orchestrator::builder(AppConfig::default())
        .with_llm(llm)
        .with_recall(Arc::new(RecallCache::in_memory()))
        .with_short_term(Arc::new(InMemoryShortTerm::new(20)))
        .build()
        .unwrap()
}

/// 记录每次收到的消息
#[derive(Default)]
struct RecordingLlm {
    seen: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl LlmClient for RecordingLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(format!("reply #{}", self.seen.lock().unwrap().len()))
    }
}

#[tokio::test]
async fn test_repeated_question_is_served_from_cache() {
    let mock = MockLlmClient::replying("4");
    let calls = mock.call_counter();
    let orch = orchestrator_with(Arc::new(mock));

    let first = orch.handle("2+2", "s").await.unwrap();
    assert_eq!(first.text, "4");
    assert_eq!(first.source, ResponseSource::Chat);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let second = orch.handle("2+2", "s").await.unwrap();
    assert_eq!(second.text, "4");
    assert_eq!(second.source, ResponseSource::Recall);
    assert_eq!(second.confidence, Some(0.98));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    let stats = orch.recall_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.learned_patterns, 1);
    assert_eq!(orch.history("s", 10).len(), 4);
}

#[tokio::test]
async fn test_unknown_tool_still_yields_a_response() {
    let orch = orchestrator_with(Arc::new(MockLlmClient::failing(
        LlmError::AllProvidersExhausted {
            attempted: vec!["a".into(), "b".into()],
        },
    )));

    let resp = orch
        .handle("create a jira ticket: login page is broken", "s")
        .await
        .unwrap();
    assert_eq!(resp.steps.len(), 1);
    assert_eq!(resp.steps[0].outcome, StepOutcome::UnknownTool);
    assert_eq!(
        resp.steps[0].output,
        "Tool jira_create_issue not implemented"
    );
    assert!(resp.is_degraded());
    assert!(resp.text.contains("jira_create_issue: Tool jira_create_issue not implemented"));
    assert_eq!(orch.recall_stats().learned_patterns, 0);
}

#[tokio::test]
async fn test_failing_primary_fails_over_on_every_call() {
    let primary = MockLlmClient::failing(LlmError::Transient("503".into()));
    let secondary = MockLlmClient::replying("from backup");
    let (primary_calls, secondary_calls) = (primary.call_counter(), secondary.call_counter());
    let circuit = LlmCircuit::new(vec![
        ProviderSlot::new("a", Arc::new(primary)),
        ProviderSlot::new("b", Arc::new(secondary)),
    ])
    .with_retry(RetryConfig::no_delay(1));
    let orch = orchestrator_with(Arc::new(circuit));

    let first = orch.handle("tell me a joke", "s").await.unwrap();
    let second = orch.handle("tell me another joke", "s").await.unwrap();
    assert_eq!(first.text, "from backup");
    assert_eq!(second.text, "from backup");
    assert_eq!(primary_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(secondary_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_saturated_provider_is_skipped_without_a_call() {
    let limited = MockLlmClient::replying("primary");
    let limited_calls = limited.call_counter();
    let limiter = Arc::new(PersistentRateLimiter::in_memory(
        "a",
        &RateLimitConfig {
            limit: 1,
            window_secs: 60,
        },
    ));
    let circuit = LlmCircuit::new(vec![
        ProviderSlot::new("a", Arc::new(limited)).with_limiter(limiter),
        ProviderSlot::new("b", Arc::new(MockLlmClient::replying("backup"))),
    ])
    .with_retry(RetryConfig::no_delay(1));
    let orch = orchestrator_with(Arc::new(circuit));

    assert_eq!(orch.handle("first question", "s").await.unwrap().text, "primary");
    assert_eq!(orch.handle("second question", "s").await.unwrap().text, "backup");
    assert_eq!(limited_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_chat_prompt_carries_recent_history() {
    let llm = Arc::new(RecordingLlm::default());
    let orch = orchestrator_with(llm.clone());

    orch.handle("My name is Ann", "s").await.unwrap();
    orch.handle("Do you remember me?", "s").await.unwrap();
    orch.handle("Unrelated session", "other").await.unwrap();

    let seen = llm.seen.lock().unwrap();
    let system = &seen[1][0].content;
    assert!(system.contains("user: My name is Ann"));
    assert!(system.contains("assistant: reply #1"));
    assert!(system.contains("DO NOT make up conversation history"));
    assert_eq!(seen[1][1], Message::user("Do you remember me?"));
    assert!(!seen[2][0].content.contains("Ann"));
}

#[tokio::test]
async fn test_custom_tool_and_rule_flow_into_synthesis() {
    let llm = Arc::new(RecordingLlm::default());
    let orch = Orchestrator::builder(AppConfig::default())
        .with_llm(llm.clone())
        .with_recall(Arc::new(RecallCache::in_memory()))
        .with_short_term(Arc::new(InMemoryShortTerm::default()))
        .with_rule_first(Rule::new(
            "echo_twice",
            |i| i.lowered.starts_with("say "),
            |i| {
                let text = i.text[4..].to_string();
                vec![
                    Step::new(Action::Echo { text: text.clone() }, "echo"),
                    Step::new(
                        Action::Other {
                            tool: "missing".into(),
                            params: serde_json::json!({}),
                        },
                        "missing tool",
                    ),
                    Step::new(Action::Echo { text }, "echo again"),
                ]
            },
        ))
        .build()
        .unwrap();

    let resp = orch.handle("say hello", "s").await.unwrap();
    assert_eq!(resp.source, ResponseSource::ToolSynthesis);
    let outputs: Vec<_> = resp.steps.iter().map(|s| s.output.as_str()).collect();
    assert_eq!(
        outputs,
        vec!["hello", "Tool missing not implemented", "hello"]
    );

    let seen = llm.seen.lock().unwrap();
    assert!(seen[0][0]
        .content
        .contains("echo: hello\nmissing: Tool missing not implemented\necho: hello"));
}

#[tokio::test]
async fn test_list_directory_request_runs_builtin_tool() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("report.txt"), b"hi").unwrap();
    let orch = orchestrator_with(Arc::new(MockLlmClient::replying("one file")));

    let request = format!("list files in {}", dir.path().display());
    let resp = orch.handle(&request, "s").await.unwrap();
    assert_eq!(resp.text, "one file");
    assert_eq!(resp.steps[0].tool, "list_directory");
    assert_eq!(resp.steps[0].outcome, StepOutcome::Ok);
    assert!(resp.steps[0].output.contains("report.txt"));
}

#[tokio::test]
async fn test_corrupted_brain_file_starts_empty_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let brain = dir.path().join("brain_memory.json");
    std::fs::write(&brain, b"{ not json").unwrap();

    let mut config = AppConfig::default();
    config.brain.path = brain.clone();
    let orch = Orchestrator::builder(config)
        .with_llm(Arc::new(MockLlmClient::replying("fine")))
        .with_short_term(Arc::new(InMemoryShortTerm::default()))
        .build()
        .unwrap();
    assert!(orch.recall().is_empty());

    assert!(orch.feedback("how are you", "fine", true));
    let reloaded = RecallCache::open(&brain);
    assert_eq!(reloaded.lookup("How are you").response.as_deref(), Some("fine"));
}

#[tokio::test]
async fn test_scheduled_job_shares_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mock = MockLlmClient::replying("4");
    let calls = mock.call_counter();
    let orch = Arc::new(orchestrator_with(Arc::new(mock)));
    let store = Arc::new(JobStore::new(dir.path().join("jobs.json")));
    store.append(Job::prompt("2+2")).unwrap();

    let runner = JobRunnerTask::new(
        Arc::clone(&store),
        Arc::clone(&orch),
        AppConfig::default().scheduler,
    );
    assert_eq!(runner.run_due().await.unwrap(), 1);
    assert_eq!(store.load().unwrap()[0].status, JobStatus::Completed);

    let resp = orch.handle("2+2", "s").await.unwrap();
    assert_eq!(resp.source, ResponseSource::Recall);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}
