//! Runtime configuration for the swarm engine.
//!
//! Everything is overridable through `SWARM_*` environment variables so the
//! same binary runs against production, a staging proxy, or the mocked
//! endpoints used in tests.

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::SwarmError;

/// Planning backend configuration (decomposition model).
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// REST base, e.g. `https://generativelanguage.googleapis.com/v1beta`.
    pub api_base: String,
    pub api_key: Option<String>,
    /// Ordered fallback chain. The first model is preferred; later entries
    /// are only tried after a rate-limit or model-unavailable error.
    pub model_chain: Vec<String>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let preferred = std::env::var("SWARM_PLANNER_MODEL")
            .unwrap_or_else(|_| "gemini-2.5-flash".into());
        Self {
            api_base: std::env::var("SWARM_PLANNER_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".into()
            }),
            api_key: std::env::var("SWARM_PLANNER_API_KEY")
                .or_else(|_| std::env::var("GEMINI_API_KEY"))
                .ok(),
            model_chain: vec![
                preferred,
                "gemini-2.0-flash-lite".into(),
                "gemini-2.0-flash".into(),
                "gemini-2.0-flash-001".into(),
            ],
        }
    }
}

/// Remote coding-agent session API configuration.
#[derive(Debug, Clone)]
pub struct SessionApiConfig {
    /// REST base for the sessions resource.
    pub api_base: String,
    /// Repository every session works against.
    pub source_repo: String,
    pub starting_branch: String,
}

impl Default for SessionApiConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("SWARM_SESSIONS_URL")
                .unwrap_or_else(|_| "https://jules.googleapis.com/v1alpha".into()),
            source_repo: std::env::var("SWARM_SOURCE_REPO")
                .unwrap_or_else(|_| "sources/github/example/repo".into()),
            starting_branch: std::env::var("SWARM_STARTING_BRANCH")
                .unwrap_or_else(|_| "main".into()),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub planner: PlannerConfig,
    pub sessions: SessionApiConfig,
    /// Account reference → API credential.
    pub accounts: HashMap<String, String>,
    /// Extra attempts after the first per task (total attempts = retries + 1).
    pub max_retries: u32,
    /// Remote session poll cadence within an attempt.
    pub poll_interval: Duration,
    /// Per-attempt wall clock budget for one remote session.
    pub session_timeout: Duration,
    /// Sleep between failed attempts.
    pub retry_backoff: Duration,
    /// Scheduler sleep between control-loop iterations.
    pub loop_interval: Duration,
    /// Control-loop safety valve against livelock.
    pub max_iterations: u32,
    /// Relay context only embeds a task result shorter than this.
    pub result_excerpt_max: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            planner: PlannerConfig::default(),
            sessions: SessionApiConfig::default(),
            accounts: accounts_from_env(),
            max_retries: 2,
            poll_interval: Duration::from_secs(15),
            session_timeout: Duration::from_secs(20 * 60),
            retry_backoff: Duration::from_secs(5),
            loop_interval: Duration::from_secs(3),
            max_iterations: 50,
            result_excerpt_max: 500,
        }
    }
}

impl SwarmConfig {
    /// Total attempts the session runner makes per task.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Resolve an account reference to its credential.
    pub fn credential_for(&self, account: &str) -> Result<&str, SwarmError> {
        self.accounts
            .get(account)
            .map(String::as_str)
            .ok_or_else(|| SwarmError::MissingCredential(account.to_string()))
    }
}

/// Parse `SWARM_ACCOUNTS` as `ref=credential,ref=credential,…`.
fn accounts_from_env() -> HashMap<String, String> {
    let Ok(raw) = std::env::var("SWARM_ACCOUNTS") else {
        return HashMap::new();
    };
    raw.split(',')
        .filter_map(|pair| {
            let (account, credential) = pair.split_once('=')?;
            let account = account.trim();
            let credential = credential.trim();
            if account.is_empty() || credential.is_empty() {
                return None;
            }
            Some((account.to_string(), credential.to_string()))
        })
        .collect()
}
