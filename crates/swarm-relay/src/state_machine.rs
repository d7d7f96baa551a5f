//! Per-attempt state machine for one remote session.
//!
//! Each retry attempt of a dispatched task walks an explicit state model so
//! that:
//! 1. Every transition is auditable and logged.
//! 2. Illegal transitions are caught by `advance()` guards.
//! 3. A failed task's transition log reconstructs exactly what happened.
//!
//! The session runner calls `advance()` at each lifecycle step; the
//! supervising [`RetryPolicy`] decides whether a terminal non-success state
//! earns another attempt.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// The states one session attempt can be in.
///
/// Invariant: every attempt starts at `Idle` and ends at `Completed`,
/// `Failed`, or `TimedOut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// Attempt not started yet.
    Idle,
    /// Creating the remote session.
    Creating,
    /// Polling the session toward a terminal remote state.
    Polling,
    /// Remote session completed — terminal success.
    Completed,
    /// Session create failed or the remote state was FAILED/CANCELLED.
    Failed,
    /// The per-attempt polling window elapsed — terminal.
    TimedOut,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Creating => write!(f, "Creating"),
            Self::Polling => write!(f, "Polling"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Legal transitions:
/// ```text
/// Idle → Creating | Polling (resuming an already-created session)
/// Creating → Polling | Failed
/// Polling → Completed | Failed | TimedOut
/// ```
fn is_legal_transition(from: AttemptState, to: AttemptState) -> bool {
    use AttemptState::*;
    matches!(
        (from, to),
        (Idle, Creating)
            | (Idle, Polling)
            | (Creating, Polling)
            | (Creating, Failed)
            | (Polling, Completed)
            | (Polling, Failed)
            | (Polling, TimedOut)
    )
}

/// A single recorded transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: AttemptState,
    pub to: AttemptState,
    /// 1-based attempt number this transition belongs to.
    pub attempt: u32,
    /// Milliseconds since the attempt machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: AttemptState,
    pub to: AttemptState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal attempt transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// State machine for one attempt of one task.
pub struct AttemptMachine {
    current: AttemptState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl AttemptMachine {
    /// Start a new attempt machine at `Idle` for the given 1-based attempt.
    pub fn new(attempt: u32) -> Self {
        Self {
            current: AttemptState::Idle,
            attempt,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> AttemptState {
        self.current
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Advance to `to`, recording the transition.
    pub fn advance(
        &mut self,
        to: AttemptState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "attempt transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }
}

/// Bounded retry supervision for the session runner.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Sleep between failed attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether the given 1-based attempt is the last one allowed.
    pub fn is_last(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
