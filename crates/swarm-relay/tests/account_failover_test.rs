//! Account failover: a credential the remote API rejects must not burn the
//! whole retry budget — the next attempt runs under a healthy account.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use swarm_relay::config::SwarmConfig;
use swarm_relay::errors::SwarmError;
use swarm_relay::executor::{ExecutionOptions, PhaseExecutor, SwarmOutcome};
use swarm_relay::notify::ProgressNotifier;
use swarm_relay::plan::{AgentRole, Phase, PlannedTask, SwarmPlan, TaskStatus};
use swarm_relay::queue::{MemoryTaskStore, TaskQueueStore};
use swarm_relay::registry::ActiveSwarms;
use swarm_relay::session::{RemoteSessionState, RemoteSessions, SessionSnapshot};

struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl ProgressNotifier for RecordingNotifier {
    async fn notify(&self, _channel: &str, text: &str) -> Result<(), SwarmError> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Rejects one account's credential on every call; any other account works.
struct RevokedKeyRemote {
    revoked: &'static str,
    create_accounts: Mutex<Vec<String>>,
    sessions: AtomicUsize,
}

#[async_trait]
impl RemoteSessions for RevokedKeyRemote {
    async fn create(&self, account: &str, _prompt: &str) -> Result<String, SwarmError> {
        self.create_accounts.lock().unwrap().push(account.to_string());
        if account == self.revoked {
            return Err(SwarmError::Unauthorized(account.to_string()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("sessions/alt-{n}"))
    }

    async fn get(&self, _account: &str, _handle: &str) -> Result<SessionSnapshot, SwarmError> {
        Ok(SessionSnapshot {
            state: RemoteSessionState::Completed,
            result: Some(json!("done under the alternate account")),
            pr_url: None,
        })
    }

    async fn validate(&self, account: &str) -> Result<(), SwarmError> {
        if account == self.revoked {
            return Err(SwarmError::Unauthorized(account.to_string()));
        }
        Ok(())
    }
}

fn single_task_plan(account: &str) -> SwarmPlan {
    SwarmPlan {
        total_agents: 1,
        phases: vec![Phase {
            order: 1,
            role: AgentRole::Architect,
            account: account.into(),
            tasks: vec![PlannedTask {
                id: "arch-1".into(),
                title: "design".into(),
                prompt: "design everything".into(),
                depends_on: vec![],
                requires_approval: false,
            }],
        }],
    }
}

fn test_config() -> SwarmConfig {
    SwarmConfig {
        accounts: HashMap::from([
            ("bad@example.com".into(), "AQ.revoked".into()),
            ("good@example.com".into(), "AQ.healthy".into()),
        ]),
        max_retries: 2,
        loop_interval: Duration::from_millis(1),
        poll_interval: Duration::from_millis(1),
        session_timeout: Duration::from_millis(100),
        retry_backoff: Duration::from_millis(1),
        ..SwarmConfig::default()
    }
}

#[tokio::test]
async fn rejected_credential_fails_over_to_a_healthy_account() {
    let store = Arc::new(MemoryTaskStore::new());
    store
        .load_plan("s1", &single_task_plan("bad@example.com"))
        .await
        .unwrap();
    let remote = Arc::new(RevokedKeyRemote {
        revoked: "bad@example.com",
        create_accounts: Mutex::new(Vec::new()),
        sessions: AtomicUsize::new(0),
    });
    let notifier = Arc::new(RecordingNotifier {
        messages: Mutex::new(Vec::new()),
    });
    let exec = PhaseExecutor::new(
        store.clone(),
        remote.clone(),
        notifier.clone(),
        Arc::new(ActiveSwarms::new()),
        Arc::new(test_config()),
    );

    let outcome = exec
        .run(
            "s1",
            &ExecutionOptions {
                dry_run: false,
                channel: Some("chat-1".into()),
            },
        )
        .await
        .unwrap();

    match outcome {
        SwarmOutcome::Done(progress) => {
            assert_eq!(progress.completed, 1);
            assert_eq!(progress.failed, 0);
        }
        other => panic!("expected DONE, got {other:?}"),
    }

    // First attempt under the assigned account, second under the alternate.
    let accounts = remote.create_accounts.lock().unwrap();
    assert_eq!(*accounts, vec!["bad@example.com", "good@example.com"]);

    let snapshot = store.tasks("s1").await.unwrap();
    assert_eq!(snapshot[0].status, TaskStatus::Completed);

    let messages = notifier.messages.lock().unwrap();
    assert!(
        messages
            .iter()
            .any(|m| m.contains("failover: bad@example.com -> good@example.com")),
        "missing failover notification: {messages:?}"
    );
    assert!(
        messages.iter().any(|m| m.contains("credential warning")),
        "missing preflight warning: {messages:?}"
    );
}

#[tokio::test]
async fn healthy_account_never_fails_over() {
    let store = Arc::new(MemoryTaskStore::new());
    store
        .load_plan("s1", &single_task_plan("good@example.com"))
        .await
        .unwrap();
    let remote = Arc::new(RevokedKeyRemote {
        revoked: "bad@example.com",
        create_accounts: Mutex::new(Vec::new()),
        sessions: AtomicUsize::new(0),
    });
    let notifier = Arc::new(RecordingNotifier {
        messages: Mutex::new(Vec::new()),
    });
    let exec = PhaseExecutor::new(
        store.clone(),
        remote.clone(),
        notifier.clone(),
        Arc::new(ActiveSwarms::new()),
        Arc::new(test_config()),
    );

    exec.run("s1", &ExecutionOptions { dry_run: false, channel: None })
        .await
        .unwrap();

    let accounts = remote.create_accounts.lock().unwrap();
    assert_eq!(*accounts, vec!["good@example.com"]);
}
