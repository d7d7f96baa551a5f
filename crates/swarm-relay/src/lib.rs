//! Swarm task orchestration engine.
//!
//! Turns one natural-language engineering request into a dependency-ordered
//! plan of subtasks, assigns them to role-specialized remote coding-agent
//! accounts, and executes them in relay phases: each phase's tasks run in
//! parallel, each later phase receives a digest of the completed work of
//! earlier phases.
//!
//! Component map:
//! - [`decomposer`] — request → validated [`plan::SwarmPlan`] via a planning
//!   model with a bounded fallback chain.
//! - [`queue`] — the task store contract and its in-memory implementation.
//! - [`executor`] — the per-swarm control loop (ready → dispatch → settle).
//! - [`session`] — per-task remote session lifecycle with bounded retries.
//! - [`health`] — per-account credential circuit breaker and failover.
//! - [`relay`] — upstream-work digest injected into downstream prompts.
//! - [`notify`] — milestone notifications, best-effort only.

pub mod config;
pub mod decomposer;
pub mod errors;
pub mod executor;
pub mod health;
pub mod notify;
pub mod plan;
pub mod prompts;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod session;
pub mod state_machine;

pub use config::SwarmConfig;
pub use errors::{RetryCategory, SwarmError};
pub use executor::{ExecutionOptions, PhaseExecutor, SwarmOutcome};
pub use plan::{AgentRole, SwarmPlan, SwarmProgress, Task, TaskStatus};
pub use queue::{MemoryTaskStore, StatusFields, TaskQueueStore};
pub use registry::ActiveSwarms;
