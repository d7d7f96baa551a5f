//! Scheduler tests against the in-memory store in dry-run mode: relay
//! ordering, terminal summaries, mutual exclusion, and the safety cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use swarm_relay::config::SwarmConfig;
use swarm_relay::errors::SwarmError;
use swarm_relay::executor::{ExecutionOptions, PhaseExecutor, SwarmOutcome};
use swarm_relay::notify::ProgressNotifier;
use swarm_relay::plan::{AgentRole, Phase, PlannedTask, SwarmPlan, SwarmProgress};
use swarm_relay::queue::{MemoryTaskStore, TaskQueueStore};
use swarm_relay::registry::ActiveSwarms;
use swarm_relay::session::{RemoteSessions, SessionSnapshot};

struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }

    fn phase_starts(&self) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.starts_with("Phase "))
            .count()
    }

    fn contains(&self, needle: &str) -> bool {
        self.messages.lock().unwrap().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl ProgressNotifier for RecordingNotifier {
    async fn notify(&self, _channel: &str, text: &str) -> Result<(), SwarmError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Remote that must never be reached in dry-run mode.
struct UnreachableRemote;

#[async_trait]
impl RemoteSessions for UnreachableRemote {
    async fn create(&self, _account: &str, _prompt: &str) -> Result<String, SwarmError> {
        panic!("dry run must not create remote sessions");
    }
    async fn get(&self, _account: &str, _handle: &str) -> Result<SessionSnapshot, SwarmError> {
        panic!("dry run must not poll remote sessions");
    }
    async fn validate(&self, _account: &str) -> Result<(), SwarmError> {
        panic!("dry run must not validate credentials");
    }
}

fn planned(id: &str, deps: &[&str]) -> PlannedTask {
    PlannedTask {
        id: id.into(),
        title: format!("title {id}"),
        prompt: format!("prompt {id}"),
        depends_on: deps.iter().map(|s| s.to_string()).collect(),
        requires_approval: false,
    }
}

/// Architect(T1) → Data(T2 dep T1) → UI(T3 dep T2).
fn relay_plan() -> SwarmPlan {
    SwarmPlan {
        total_agents: 3,
        phases: vec![
            Phase {
                order: 1,
                role: AgentRole::Architect,
                account: "arch@example.com".into(),
                tasks: vec![planned("t1", &[])],
            },
            Phase {
                order: 2,
                role: AgentRole::DataMaster,
                account: "data@example.com".into(),
                tasks: vec![planned("t2", &["t1"])],
            },
            Phase {
                order: 3,
                role: AgentRole::UiEngine,
                account: "ui@example.com".into(),
                tasks: vec![planned("t3", &["t2"])],
            },
        ],
    }
}

fn test_config() -> SwarmConfig {
    SwarmConfig {
        accounts: HashMap::new(),
        loop_interval: Duration::from_millis(1),
        poll_interval: Duration::from_millis(1),
        session_timeout: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(1),
        ..SwarmConfig::default()
    }
}

fn executor(
    store: Arc<dyn TaskQueueStore>,
    notifier: Arc<RecordingNotifier>,
    registry: Arc<ActiveSwarms>,
) -> PhaseExecutor {
    PhaseExecutor::new(
        store,
        Arc::new(UnreachableRemote),
        notifier,
        registry,
        Arc::new(test_config()),
    )
}

#[tokio::test]
async fn three_phase_dry_run_takes_three_rounds() {
    let store = Arc::new(MemoryTaskStore::new());
    store.load_plan("s1", &relay_plan()).await.unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let exec = executor(store.clone(), notifier.clone(), Arc::new(ActiveSwarms::new()));

    let options = ExecutionOptions {
        dry_run: true,
        channel: Some("chat-1".into()),
    };
    let outcome = exec.run("s1", &options).await.unwrap();

    // One scheduling round per phase, then the terminal iteration.
    assert_eq!(notifier.phase_starts(), 3);
    assert_eq!(
        outcome,
        SwarmOutcome::Done(SwarmProgress {
            total: 3,
            pending: 0,
            running: 0,
            completed: 3,
            failed: 0,
        })
    );
    assert!(notifier.contains("finished: 3/3 completed"));

    // Every task carries the synthetic dry-run result.
    let snapshot = store.tasks("s1").await.unwrap();
    for task in snapshot {
        assert_eq!(task.result.unwrap()["dry_run"], true);
    }
}

#[tokio::test]
async fn second_loop_for_a_live_swarm_is_rejected() {
    let store = Arc::new(MemoryTaskStore::new());
    store.load_plan("s1", &relay_plan()).await.unwrap();
    let registry = Arc::new(ActiveSwarms::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let exec = executor(store, notifier, registry.clone());

    // Simulate a live loop holding the lease.
    let lease = registry.acquire("s1").unwrap();
    let err = exec
        .run("s1", &ExecutionOptions { dry_run: true, channel: None })
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::AlreadyExecuting(_)));
    drop(lease);

    // Released lease unblocks the run.
    exec.run("s1", &ExecutionOptions { dry_run: true, channel: None })
        .await
        .unwrap();
    assert!(!registry.is_active("s1"));
}

/// Store stub that always reports one running task and nothing ready, so
/// the control loop can never converge.
struct LivelockedStore;

#[async_trait]
impl TaskQueueStore for LivelockedStore {
    async fn load_plan(&self, _: &str, _: &SwarmPlan) -> Result<(), SwarmError> {
        Ok(())
    }
    async fn ready_tasks(&self, _: &str) -> Result<Vec<swarm_relay::plan::Task>, SwarmError> {
        Ok(Vec::new())
    }
    async fn update_status(
        &self,
        _: &str,
        _: &str,
        _: swarm_relay::plan::TaskStatus,
        _: swarm_relay::queue::StatusFields,
    ) -> Result<(), SwarmError> {
        Ok(())
    }
    async fn progress(&self, _: &str) -> Result<SwarmProgress, SwarmError> {
        Ok(SwarmProgress {
            total: 1,
            pending: 0,
            running: 1,
            completed: 0,
            failed: 0,
        })
    }
    async fn tasks(&self, _: &str) -> Result<Vec<swarm_relay::plan::Task>, SwarmError> {
        Ok(Vec::new())
    }
    async fn approve_task(&self, _: &str, _: &str) -> Result<(), SwarmError> {
        Ok(())
    }
    async fn update_task(
        &self,
        _: &str,
        _: &str,
        _: Option<String>,
        _: Option<String>,
    ) -> Result<(), SwarmError> {
        Ok(())
    }
    async fn delete_task(&self, _: &str, _: &str) -> Result<(), SwarmError> {
        Ok(())
    }
}

#[tokio::test]
async fn livelock_hits_the_safety_cap() {
    let notifier = Arc::new(RecordingNotifier::new());
    let config = SwarmConfig {
        max_iterations: 5,
        ..test_config()
    };
    let exec = PhaseExecutor::new(
        Arc::new(LivelockedStore),
        Arc::new(UnreachableRemote),
        notifier.clone(),
        Arc::new(ActiveSwarms::new()),
        Arc::new(config),
    );

    let err = exec
        .run("s1", &ExecutionOptions { dry_run: true, channel: Some("chat-1".into()) })
        .await
        .unwrap_err();
    assert!(matches!(err, SwarmError::SafetyCapExceeded { cap: 5, .. }));
    assert!(notifier.contains("safety cap"));
}
