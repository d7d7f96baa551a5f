//! Remote coding-agent sessions: the HTTP client and the per-task runner
//! that drives one task's create → poll → retry lifecycle.
//!
//! A task's terminal failure is recorded in the store but never propagated
//! out of [`TaskRunner::run`] — one bad task must not take its phase
//! siblings down with it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::{SessionApiConfig, SwarmConfig};
use crate::errors::{RetryCategory, SwarmError};
use crate::health::AccountHealth;
use crate::notify::{self, ProgressNotifier};
use crate::plan::{Task, TaskStatus};
use crate::queue::{StatusFields, TaskQueueStore};
use crate::relay;
use crate::state_machine::{AttemptMachine, AttemptState, RetryPolicy};

/// Terminal and non-terminal states a remote session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSessionState {
    Completed,
    Failed,
    Cancelled,
    /// Anything else (QUEUED, PLANNING, IN_PROGRESS, …) — keep polling.
    Pending(String),
}

impl RemoteSessionState {
    pub fn parse(s: &str) -> Self {
        match s {
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            other => Self::Pending(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }
}

impl fmt::Display for RemoteSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Pending(s) => write!(f, "{s}"),
        }
    }
}

/// One observation of a remote session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: RemoteSessionState,
    pub result: Option<Value>,
    pub pr_url: Option<String>,
}

/// Remote session API surface the scheduler depends on.
#[async_trait]
pub trait RemoteSessions: Send + Sync {
    /// Create a session for `account` and return its handle.
    async fn create(&self, account: &str, prompt: &str) -> Result<String, SwarmError>;

    /// Fetch the current state of a session.
    async fn get(&self, account: &str, handle: &str) -> Result<SessionSnapshot, SwarmError>;

    /// Preflight credential check for an account.
    async fn validate(&self, account: &str) -> Result<(), SwarmError>;
}

/// Pick the header scheme by credential prefix: OAuth-style tokens go in a
/// bearer Authorization header, everything else in the raw API-key header.
fn auth_headers(credential: &str) -> Result<HeaderMap, SwarmError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let bad_header =
        |e: reqwest::header::InvalidHeaderValue| SwarmError::Internal(format!("credential: {e}"));
    if credential.starts_with("ya29.") {
        let value = HeaderValue::from_str(&format!("Bearer {credential}")).map_err(bad_header)?;
        headers.insert(AUTHORIZATION, value);
    } else {
        headers.insert(
            "X-Goog-Api-Key",
            HeaderValue::from_str(credential).map_err(bad_header)?,
        );
    }
    Ok(headers)
}

#[derive(serde::Deserialize)]
struct SessionResource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    result: Option<Value>,
}

/// Production client against the remote session REST API.
pub struct HttpSessionClient {
    http: reqwest::Client,
    api: SessionApiConfig,
    config: Arc<SwarmConfig>,
}

impl HttpSessionClient {
    pub fn new(config: Arc<SwarmConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api: config.sessions.clone(),
            config,
        }
    }
}

#[async_trait]
impl RemoteSessions for HttpSessionClient {
    async fn create(&self, account: &str, prompt: &str) -> Result<String, SwarmError> {
        let credential = self.config.credential_for(account)?;
        let headers = auth_headers(credential)?;
        let body = json!({
            "prompt": prompt,
            "sourceContext": {
                "source": self.api.source_repo,
                "githubRepoContext": { "startingBranch": self.api.starting_branch }
            },
            "automationMode": "AUTO_CREATE_PR"
        });

        let response = self
            .http
            .post(format!("{}/sessions", self.api.api_base))
            .headers(headers)
            .timeout(Duration::from_secs(30))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SwarmError::Unauthorized(account.to_string()));
        }
        let resource: SessionResource = response
            .error_for_status()
            .map_err(|e| SwarmError::SessionCreateFailed(e.to_string()))?
            .json()
            .await?;

        if resource.name.is_empty() {
            return Err(SwarmError::SessionCreateFailed(
                "create response carried no session name".into(),
            ));
        }
        Ok(resource.name)
    }

    async fn get(&self, account: &str, handle: &str) -> Result<SessionSnapshot, SwarmError> {
        let credential = self.config.credential_for(account)?;
        let headers = auth_headers(credential)?;
        let response = self
            .http
            .get(format!("{}/{handle}", self.api.api_base))
            .headers(headers)
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SwarmError::Unauthorized(account.to_string()));
        }
        let resource: SessionResource = response.error_for_status()?.json().await?;

        let pr_url = resource
            .result
            .as_ref()
            .and_then(|r| r.get("pullRequestUrl"))
            .and_then(Value::as_str)
            .map(String::from);
        Ok(SessionSnapshot {
            state: RemoteSessionState::parse(&resource.state),
            result: resource.result,
            pr_url,
        })
    }

    async fn validate(&self, account: &str) -> Result<(), SwarmError> {
        let credential = self.config.credential_for(account)?;
        let headers = auth_headers(credential)?;
        let response = self
            .http
            .get(format!("{}/sessions?pageSize=1", self.api.api_base))
            .headers(headers)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(SwarmError::Unauthorized(account.to_string()));
        }
        response.error_for_status()?;
        Ok(())
    }
}

/// Drives one dispatched task through its bounded attempt loop.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct TaskRunner {
    remote: Arc<dyn RemoteSessions>,
    store: Arc<dyn TaskQueueStore>,
    notifier: Arc<dyn ProgressNotifier>,
    health: Arc<AccountHealth>,
    config: Arc<SwarmConfig>,
    policy: RetryPolicy,
}

impl TaskRunner {
    pub fn new(
        remote: Arc<dyn RemoteSessions>,
        store: Arc<dyn TaskQueueStore>,
        notifier: Arc<dyn ProgressNotifier>,
        health: Arc<AccountHealth>,
        config: Arc<SwarmConfig>,
    ) -> Self {
        Self {
            remote,
            store,
            notifier,
            health,
            policy: RetryPolicy::new(config.max_attempts(), config.retry_backoff),
            config,
        }
    }

    /// Execute one task to a terminal status. Failures are recorded in the
    /// store; this never returns an error to the dispatching phase.
    pub async fn run(&self, swarm_id: &str, task: &Task, relay_context: &str, channel: Option<&str>) {
        if let Err(e) = self
            .store
            .update_status(swarm_id, &task.id, TaskStatus::Running, StatusFields::default())
            .await
        {
            error!(swarm_id, task_id = %task.id, error = %e, "could not mark task running");
            return;
        }

        // An account with an open circuit is swapped out before the first
        // attempt instead of burning an attempt on it.
        let mut account = task.account.clone();
        if !self.health.is_healthy(&account) {
            if let Some(alt) = self.health.healthy_alternate(&account, &self.config.accounts) {
                info!(task_id = %task.id, from = %account, to = %alt, "pre-dispatch account failover");
                account = alt;
            }
        }

        // Crash resume: a session recorded by a previous process is polled
        // before any new one is created.
        let mut session_id = task.remote_session_id.clone();
        let mut last_error: Option<SwarmError> = None;
        let mut attempts_used = 0;

        for attempt in 1..=self.policy.max_attempts {
            attempts_used = attempt;
            match self
                .attempt_once(swarm_id, task, &account, relay_context, &mut session_id, attempt, channel)
                .await
            {
                Ok(()) => {
                    self.health.record_success(&account);
                    return;
                }
                Err(e) => {
                    warn!(
                        swarm_id,
                        task_id = %task.id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "task attempt failed"
                    );
                    if let SwarmError::Unauthorized(_) = &e {
                        self.health.record_failure(&account, true);
                        if !self.policy.is_last(attempt) {
                            if let Some(alt) =
                                self.health.healthy_alternate(&account, &self.config.accounts)
                            {
                                info!(task_id = %task.id, from = %account, to = %alt, "account failover");
                                notify::best_effort(
                                    self.notifier.as_ref(),
                                    channel,
                                    &format!("[{}] failover: {account} -> {alt}", task.id),
                                )
                                .await;
                                account = alt;
                            }
                        }
                    }
                    let fatal = e.retry_category() == RetryCategory::Fatal;
                    last_error = Some(e);
                    if fatal {
                        break;
                    }
                    if !self.policy.is_last(attempt) {
                        // A dead session is not worth resuming.
                        session_id = None;
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown failure".into());
        if let Err(e) = self
            .store
            .update_status(
                swarm_id,
                &task.id,
                TaskStatus::Failed,
                StatusFields::error(message.clone()),
            )
            .await
        {
            error!(swarm_id, task_id = %task.id, error = %e, "could not mark task failed");
        }
        notify::best_effort(
            self.notifier.as_ref(),
            channel,
            &format!(
                "[{}] failed after {attempts_used} attempt(s): {message}",
                task.id
            ),
        )
        .await;
        self.report_blocked_dependents(swarm_id, &task.id, channel).await;
    }

    #[allow(clippy::too_many_arguments)]
    async fn attempt_once(
        &self,
        swarm_id: &str,
        task: &Task,
        account: &str,
        relay_context: &str,
        session_id: &mut Option<String>,
        attempt: u32,
        channel: Option<&str>,
    ) -> Result<(), SwarmError> {
        let mut machine = AttemptMachine::new(attempt);
        let prompt = relay::compose_prompt(relay_context, &task.prompt);

        let handle = match session_id.as_deref() {
            Some(handle) => {
                info!(task_id = %task.id, session = handle, "resuming existing session");
                machine.advance(AttemptState::Polling, Some("resume existing session"))?;
                handle.to_string()
            }
            None => {
                machine.advance(AttemptState::Creating, None)?;
                let created = match self.remote.create(account, &prompt).await {
                    Ok(handle) => handle,
                    Err(e) => {
                        machine.advance(AttemptState::Failed, Some(&e.to_string()))?;
                        return Err(e);
                    }
                };
                *session_id = Some(created.clone());
                self.store
                    .update_status(
                        swarm_id,
                        &task.id,
                        TaskStatus::Running,
                        StatusFields::session(created.clone()),
                    )
                    .await?;
                notify::best_effort(
                    self.notifier.as_ref(),
                    channel,
                    &format!("[{}] {}: session created", task.id, task.title),
                )
                .await;
                machine.advance(AttemptState::Polling, None)?;
                created
            }
        };

        let deadline = Instant::now() + self.config.session_timeout;
        let snapshot = loop {
            match self.remote.get(account, &handle).await {
                Ok(snap) if snap.state.is_terminal() => break snap,
                // An auth rejection mid-poll ends the attempt so the runner
                // can fail over instead of polling a dead credential.
                Err(e @ SwarmError::Unauthorized(_)) => {
                    machine.advance(AttemptState::Failed, Some(&e.to_string()))?;
                    return Err(e);
                }
                Ok(_) => {}
                // Other poll errors stay inside the attempt; only the
                // timeout ends it.
                Err(e) => warn!(task_id = %task.id, error = %e, "poll error, will retry"),
            }
            if Instant::now() >= deadline {
                machine.advance(AttemptState::TimedOut, None)?;
                return Err(SwarmError::AttemptTimedOut(self.config.session_timeout.as_secs()));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        match snapshot.state {
            RemoteSessionState::Completed => {
                machine.advance(AttemptState::Completed, None)?;
                let result = snapshot
                    .result
                    .unwrap_or_else(|| json!({ "state": "COMPLETED" }));
                self.store
                    .update_status(
                        swarm_id,
                        &task.id,
                        TaskStatus::Completed,
                        StatusFields::outcome(result, snapshot.pr_url.clone()),
                    )
                    .await?;
                let pr_note = snapshot
                    .pr_url
                    .map(|url| format!(" | PR: {url}"))
                    .unwrap_or_default();
                info!(swarm_id, task_id = %task.id, attempt, "task completed");
                notify::best_effort(
                    self.notifier.as_ref(),
                    channel,
                    &format!("[{}] completed{pr_note}", task.id),
                )
                .await;
                Ok(())
            }
            state => {
                machine.advance(AttemptState::Failed, Some(&state.to_string()))?;
                Err(SwarmError::SessionEnded(state.to_string()))
            }
        }
    }

    /// Failures propagate only implicitly, by leaving dependents unready —
    /// surface how many just became permanently blocked.
    async fn report_blocked_dependents(&self, swarm_id: &str, task_id: &str, channel: Option<&str>) {
        let Ok(snapshot) = self.store.tasks(swarm_id).await else {
            return;
        };
        let blocked = snapshot
            .iter()
            .filter(|t| t.status.is_pending() && t.depends_on.iter().any(|d| d == task_id))
            .count();
        if blocked > 0 {
            notify::best_effort(
                self.notifier.as_ref(),
                channel,
                &format!("{blocked} task(s) blocked by dependency on [{task_id}]"),
            )
            .await;
        }
    }
}
