//! Canonical data model: plans produced by the decomposer and task rows
//! held by the queue store.
//!
//! One strict struct per concept, parsed once at the boundary — no loosely
//! typed records or alternate field spellings past this module.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SwarmError;

/// The fixed role catalogue. Each relay phase is assigned to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    /// Architecture, schemas, API contracts, testing strategy.
    #[serde(rename = "Lead Architect")]
    Architect,
    /// Backend, database, migrations, external integrations.
    #[serde(rename = "Data Master")]
    DataMaster,
    /// Frontend components, styling, UX.
    #[serde(rename = "UI Engine")]
    UiEngine,
}

impl AgentRole {
    /// Parse the display name the planning model emits.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Lead Architect" => Some(Self::Architect),
            "Data Master" => Some(Self::DataMaster),
            "UI Engine" => Some(Self::UiEngine),
            _ => None,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Architect => write!(f, "Lead Architect"),
            Self::DataMaster => write!(f, "Data Master"),
            Self::UiEngine => write!(f, "UI Engine"),
        }
    }
}

/// A task as it appears inside a decomposed plan, before it becomes a
/// queue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub title: String,
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub requires_approval: bool,
}

/// One relay phase: an ordered group of tasks for a single role/account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based, strictly increasing, no gaps.
    pub order: u32,
    pub role: AgentRole,
    /// Credential reference resolved against the account map at dispatch.
    pub account: String,
    pub tasks: Vec<PlannedTask>,
}

/// A validated decomposition of one engineering request.
///
/// Only ever constructed by [`SwarmPlan::validate`]-passing data — a plan
/// that fails validation never leaves the decomposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmPlan {
    pub total_agents: u32,
    pub phases: Vec<Phase>,
}

impl SwarmPlan {
    /// Check every structural invariant. Errors name the offending field.
    ///
    /// Enforced rules:
    /// - `total_agents` ≥ 1
    /// - phases non-empty, ordered 1..N with no gaps, each with ≥1 task
    /// - every task has id, title, and prompt
    /// - task ids globally unique
    /// - every `depends_on` entry references a task in a *strictly earlier*
    ///   phase (same-phase dependencies would break the relay invariant)
    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.total_agents < 1 {
            return Err(SwarmError::schema("total_agents", "must be >= 1"));
        }
        if self.phases.is_empty() {
            return Err(SwarmError::schema("phases", "plan has no phases"));
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, phase) in self.phases.iter().enumerate() {
            let expected = (i + 1) as u32;
            if phase.order != expected {
                return Err(SwarmError::schema(
                    format!("phases[{i}].order"),
                    format!("expected {expected}, got {}", phase.order),
                ));
            }
            if phase.tasks.is_empty() {
                return Err(SwarmError::schema(
                    format!("phases[{i}].tasks"),
                    format!("phase {} has no tasks", phase.order),
                ));
            }
            for task in &phase.tasks {
                if task.id.is_empty() || task.title.is_empty() || task.prompt.is_empty() {
                    return Err(SwarmError::schema(
                        format!("phases[{i}].tasks"),
                        format!("task `{}` is missing id, title, or prompt", task.id),
                    ));
                }
                if !seen_ids.insert(task.id.clone()) {
                    return Err(SwarmError::schema(
                        "tasks.id",
                        format!("duplicate task id: {}", task.id),
                    ));
                }
            }
        }

        // Dependency targets must exist and live in a strictly earlier phase.
        // `seen_ids` is rebuilt phase by phase so a same-phase or
        // later-phase reference is indistinguishable from a missing one.
        let mut earlier = std::collections::HashSet::new();
        for phase in &self.phases {
            for task in &phase.tasks {
                for dep in &task.depends_on {
                    if !earlier.contains(dep.as_str()) {
                        let msg = if seen_ids.contains(dep.as_str()) {
                            format!(
                                "task {} depends on {dep}, which is not in an earlier phase",
                                task.id
                            )
                        } else {
                            format!("task {} depends on unknown task: {dep}", task.id)
                        };
                        return Err(SwarmError::schema("tasks.depends_on", msg));
                    }
                }
            }
            for task in &phase.tasks {
                earlier.insert(task.id.as_str());
            }
        }

        Ok(())
    }

    pub fn task_count(&self) -> usize {
        self.phases.iter().map(|p| p.tasks.len()).sum()
    }
}

/// Task lifecycle status.
///
/// `PendingApproval` and `Queued` are the two pre-dispatch states; a task
/// becomes immutable once it reaches `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    PendingApproval,
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Counted as "pending" in progress summaries.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingApproval | Self::Queued)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingApproval => write!(f, "pending_approval"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The canonical queue row for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub swarm_id: String,
    pub phase_order: u32,
    pub role: AgentRole,
    pub account: String,
    pub title: String,
    pub prompt: String,
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    pub requires_approval: bool,
    pub remote_session_id: Option<String>,
    pub result: Option<serde_json::Value>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Build the initial queue row for a planned task.
    pub fn from_planned(swarm_id: &str, phase: &Phase, planned: &PlannedTask) -> Self {
        let status = if planned.requires_approval {
            TaskStatus::PendingApproval
        } else {
            TaskStatus::Queued
        };
        Self {
            id: planned.id.clone(),
            swarm_id: swarm_id.to_string(),
            phase_order: phase.order,
            role: phase.role,
            account: phase.account.clone(),
            title: planned.title.clone(),
            prompt: planned.prompt.clone(),
            depends_on: planned.depends_on.clone(),
            status,
            requires_approval: planned.requires_approval,
            remote_session_id: None,
            result: None,
            pr_url: None,
            error_message: None,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Derived progress counters for one swarm. Never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwarmProgress {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

impl SwarmProgress {
    pub fn tally<'a>(tasks: impl Iterator<Item = &'a Task>) -> Self {
        let mut p = Self::default();
        for t in tasks {
            p.total += 1;
            match t.status {
                TaskStatus::PendingApproval | TaskStatus::Queued => p.pending += 1,
                TaskStatus::Running => p.running += 1,
                TaskStatus::Completed => p.completed += 1,
                TaskStatus::Failed => p.failed += 1,
            }
        }
        p
    }
}
