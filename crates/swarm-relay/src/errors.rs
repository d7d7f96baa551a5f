//! Swarm engine error taxonomy with retry classification.
//!
//! Every error in the orchestration layer is represented here. Callers can
//! query `retry_category()` without string matching.
//!
//! ## Retry categories
//!
//! | Category         | Handled by                                    |
//! |------------------|-----------------------------------------------|
//! | ChainAdvance     | decomposer — try the next model in the chain  |
//! | Attempt          | session runner — backoff, consume one attempt |
//! | Fatal            | nobody — surface immediately, no retry        |

use std::fmt;

use thiserror::Error;

/// Classification used to decide whether and where to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Rate limit or missing model on the planning backend — the fallback
    /// chain advances to the next model.
    ChainAdvance,
    /// A remote session attempt failed or timed out — the session runner
    /// sleeps its backoff and consumes one attempt.
    Attempt,
    /// Configuration or validation problem — no retry at any level.
    Fatal,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChainAdvance => write!(f, "chain_advance"),
            Self::Attempt => write!(f, "attempt"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Unified error type for decomposition, scheduling, and session execution.
#[derive(Debug, Error)]
pub enum SwarmError {
    // ── Configuration ─────────────────────────────────────────────────────
    /// No credential configured for a remote agent account.
    #[error("no credential configured for account `{0}`")]
    MissingCredential(String),

    /// The planning backend itself is not configured (no API key).
    #[error("planning backend not configured: {0}")]
    PlannerNotConfigured(String),

    // ── Decomposition ─────────────────────────────────────────────────────
    /// The planning model returned text that is not valid JSON.
    #[error("planning model returned invalid JSON: {0}")]
    InvalidJson(String),

    /// The parsed plan violates the schema. Always names the offending field.
    #[error("plan validation failed at `{field}`: {message}")]
    SchemaViolation { field: String, message: String },

    /// Planning backend rate limit — advances the model fallback chain.
    #[error("planning model rate limited: {0}")]
    RateLimited(String),

    /// Requested planning model missing or unsupported — advances the chain.
    #[error("planning model unavailable: {0}")]
    ModelUnavailable(String),

    /// Any other planning call failure — aborts the chain immediately.
    #[error("planning call failed: {0}")]
    PlanningFailed(String),

    /// Every model in the fallback chain failed.
    #[error("all planning models exhausted (last error: {0})")]
    AllModelsExhausted(String),

    // ── Remote session execution ──────────────────────────────────────────
    /// The remote session reached a terminal non-success state.
    #[error("remote session ended in state {0}")]
    SessionEnded(String),

    /// Session creation failed at the transport or API level.
    #[error("session create failed: {0}")]
    SessionCreateFailed(String),

    /// One attempt's polling window elapsed without a terminal state.
    #[error("remote session attempt timed out after {0}s")]
    AttemptTimedOut(u64),

    /// The remote API rejected an account's credential (expired or revoked
    /// key). Consumes an attempt and makes the account a failover candidate.
    #[error("credential rejected for account `{0}`")]
    Unauthorized(String),

    // ── Scheduling ────────────────────────────────────────────────────────
    /// A second control loop was started for a swarm that is already live.
    #[error("swarm {0} is already executing")]
    AlreadyExecuting(String),

    /// The control loop hit its iteration safety cap without terminating.
    #[error("swarm {swarm_id} exceeded the scheduler safety cap of {cap} iterations")]
    SafetyCapExceeded { swarm_id: String, cap: u32 },

    // ── Store ─────────────────────────────────────────────────────────────
    #[error("task {0} not found")]
    TaskNotFound(String),

    /// Deleting a task that other tasks still depend on.
    #[error("task {task_id} is a dependency of: {}", dependents.join(", "))]
    HasDependents {
        task_id: String,
        dependents: Vec<String>,
    },

    // ── Transport ─────────────────────────────────────────────────────────
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// An invariant the engine maintains itself was broken (e.g. an illegal
    /// attempt-state transition). Always a bug, never retried.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::state_machine::IllegalTransition> for SwarmError {
    fn from(e: crate::state_machine::IllegalTransition) -> Self {
        Self::Internal(e.to_string())
    }
}

impl SwarmError {
    /// Shorthand constructor for schema violations.
    pub fn schema(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::RateLimited(_) | Self::ModelUnavailable(_) => RetryCategory::ChainAdvance,
            Self::SessionEnded(_)
            | Self::SessionCreateFailed(_)
            | Self::AttemptTimedOut(_)
            | Self::Unauthorized(_)
            | Self::Http(_) => RetryCategory::Attempt,
            _ => RetryCategory::Fatal,
        }
    }
}
