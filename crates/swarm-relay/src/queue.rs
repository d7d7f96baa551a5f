//! Task queue store: the sole source of truth for a swarm's tasks.
//!
//! The scheduler derives every decision from a fresh read of this store,
//! never from cached task state. Correctness relies on per-task atomic
//! updates only; no cross-task locking is required.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::errors::SwarmError;
use crate::plan::{SwarmPlan, SwarmProgress, Task, TaskStatus};

/// Optional fields written alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    pub remote_session_id: Option<String>,
    pub result: Option<Value>,
    pub pr_url: Option<String>,
    pub error_message: Option<String>,
}

impl StatusFields {
    pub fn session(id: impl Into<String>) -> Self {
        Self {
            remote_session_id: Some(id.into()),
            ..Self::default()
        }
    }

    pub fn outcome(result: Value, pr_url: Option<String>) -> Self {
        Self {
            result: Some(result),
            pr_url,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Durable store contract for a swarm's tasks.
#[async_trait]
pub trait TaskQueueStore: Send + Sync {
    /// Enqueue every task of a validated plan. Existing rows are kept
    /// (re-loading the same plan is a no-op per task).
    async fn load_plan(&self, swarm_id: &str, plan: &SwarmPlan) -> Result<(), SwarmError>;

    /// Tasks with status `Queued` whose every dependency is `Completed`,
    /// ordered by phase order then id. Approval-blocked tasks never appear.
    async fn ready_tasks(&self, swarm_id: &str) -> Result<Vec<Task>, SwarmError>;

    /// Set a task's status plus optional fields. Safe under concurrent calls
    /// for distinct task ids. A task that already reached a terminal status
    /// is immutable: further writes are ignored.
    async fn update_status(
        &self,
        swarm_id: &str,
        task_id: &str,
        status: TaskStatus,
        fields: StatusFields,
    ) -> Result<(), SwarmError>;

    /// Derived progress counters.
    async fn progress(&self, swarm_id: &str) -> Result<SwarmProgress, SwarmError>;

    /// Full snapshot, ordered by phase order then id.
    async fn tasks(&self, swarm_id: &str) -> Result<Vec<Task>, SwarmError>;

    /// Approval gate: `PendingApproval` → `Queued`. Idempotent; approving a
    /// task that already left the gate is a no-op.
    async fn approve_task(&self, swarm_id: &str, task_id: &str) -> Result<(), SwarmError>;

    /// Edit title and/or prompt of a not-yet-terminal task.
    async fn update_task(
        &self,
        swarm_id: &str,
        task_id: &str,
        title: Option<String>,
        prompt: Option<String>,
    ) -> Result<(), SwarmError>;

    /// Remove a task. Rejected with `HasDependents` while other tasks still
    /// list it in `depends_on`; deleting an absent task is a no-op.
    async fn delete_task(&self, swarm_id: &str, task_id: &str) -> Result<(), SwarmError>;
}

/// In-memory store, canonical for tests and single-process runs.
///
/// Rows live in a `BTreeMap` keyed by task id so snapshot ordering falls out
/// of the key order.
#[derive(Default)]
pub struct MemoryTaskStore {
    swarms: RwLock<HashMap<String, BTreeMap<String, Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueueStore for MemoryTaskStore {
    async fn load_plan(&self, swarm_id: &str, plan: &SwarmPlan) -> Result<(), SwarmError> {
        let mut swarms = self.swarms.write().await;
        let rows = swarms.entry(swarm_id.to_string()).or_default();
        for phase in &plan.phases {
            for planned in &phase.tasks {
                rows.entry(planned.id.clone())
                    .or_insert_with(|| Task::from_planned(swarm_id, phase, planned));
            }
        }
        Ok(())
    }

    async fn ready_tasks(&self, swarm_id: &str) -> Result<Vec<Task>, SwarmError> {
        let swarms = self.swarms.read().await;
        let Some(rows) = swarms.get(swarm_id) else {
            return Ok(Vec::new());
        };
        let completed: HashSet<&str> = rows
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();
        let mut ready: Vec<Task> = rows
            .values()
            .filter(|t| t.status == TaskStatus::Queued)
            .filter(|t| t.depends_on.iter().all(|d| completed.contains(d.as_str())))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.phase_order
                .cmp(&b.phase_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(ready)
    }

    async fn update_status(
        &self,
        swarm_id: &str,
        task_id: &str,
        status: TaskStatus,
        fields: StatusFields,
    ) -> Result<(), SwarmError> {
        let mut swarms = self.swarms.write().await;
        let task = swarms
            .get_mut(swarm_id)
            .and_then(|rows| rows.get_mut(task_id))
            .ok_or_else(|| SwarmError::TaskNotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            // Terminal rows are immutable; a repeated identical write is a
            // benign no-op, anything else is a late straggler.
            debug!(
                swarm_id,
                task_id,
                current = %task.status,
                requested = %status,
                "ignoring status write to terminal task"
            );
            return Ok(());
        }

        task.status = status;
        match status {
            TaskStatus::Running => {
                if task.started_at.is_none() {
                    task.started_at = Some(chrono::Utc::now());
                }
            }
            TaskStatus::Completed => task.completed_at = Some(chrono::Utc::now()),
            TaskStatus::Failed => {
                task.completed_at = Some(chrono::Utc::now());
                task.retry_count += 1;
            }
            _ => {}
        }
        if let Some(id) = fields.remote_session_id {
            task.remote_session_id = Some(id);
        }
        if let Some(result) = fields.result {
            task.result = Some(result);
        }
        if let Some(url) = fields.pr_url {
            task.pr_url = Some(url);
        }
        if let Some(message) = fields.error_message {
            task.error_message = Some(message);
        }
        Ok(())
    }

    async fn progress(&self, swarm_id: &str) -> Result<SwarmProgress, SwarmError> {
        let swarms = self.swarms.read().await;
        let progress = swarms
            .get(swarm_id)
            .map(|rows| SwarmProgress::tally(rows.values()))
            .unwrap_or_default();
        Ok(progress)
    }

    async fn tasks(&self, swarm_id: &str) -> Result<Vec<Task>, SwarmError> {
        let swarms = self.swarms.read().await;
        let mut snapshot: Vec<Task> = swarms
            .get(swarm_id)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        snapshot.sort_by(|a, b| {
            a.phase_order
                .cmp(&b.phase_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(snapshot)
    }

    async fn approve_task(&self, swarm_id: &str, task_id: &str) -> Result<(), SwarmError> {
        let mut swarms = self.swarms.write().await;
        let task = swarms
            .get_mut(swarm_id)
            .and_then(|rows| rows.get_mut(task_id))
            .ok_or_else(|| SwarmError::TaskNotFound(task_id.to_string()))?;
        if task.status == TaskStatus::PendingApproval {
            task.status = TaskStatus::Queued;
        }
        Ok(())
    }

    async fn update_task(
        &self,
        swarm_id: &str,
        task_id: &str,
        title: Option<String>,
        prompt: Option<String>,
    ) -> Result<(), SwarmError> {
        let mut swarms = self.swarms.write().await;
        let task = swarms
            .get_mut(swarm_id)
            .and_then(|rows| rows.get_mut(task_id))
            .ok_or_else(|| SwarmError::TaskNotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(());
        }
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(prompt) = prompt {
            task.prompt = prompt;
        }
        Ok(())
    }

    async fn delete_task(&self, swarm_id: &str, task_id: &str) -> Result<(), SwarmError> {
        let mut swarms = self.swarms.write().await;
        let Some(rows) = swarms.get_mut(swarm_id) else {
            return Ok(());
        };
        if !rows.contains_key(task_id) {
            return Ok(());
        }
        let dependents: Vec<String> = rows
            .values()
            .filter(|t| t.depends_on.iter().any(|d| d == task_id))
            .map(|t| t.id.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(SwarmError::HasDependents {
                task_id: task_id.to_string(),
                dependents,
            });
        }
        rows.remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{AgentRole, Phase, PlannedTask};

    fn planned(id: &str, deps: &[&str], approval: bool) -> PlannedTask {
        PlannedTask {
            id: id.into(),
            title: format!("title {id}"),
            prompt: format!("prompt {id}"),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            requires_approval: approval,
        }
    }

    fn plan() -> SwarmPlan {
        SwarmPlan {
            total_agents: 3,
            phases: vec![
                Phase {
                    order: 1,
                    role: AgentRole::Architect,
                    account: "arch@example.com".into(),
                    tasks: vec![planned("arch-1", &[], false), planned("arch-2", &[], true)],
                },
                Phase {
                    order: 2,
                    role: AgentRole::DataMaster,
                    account: "data@example.com".into(),
                    tasks: vec![planned("data-1", &["arch-1"], false)],
                },
            ],
        }
    }

    #[tokio::test]
    async fn ready_tasks_respect_dependencies_and_approval() {
        let store = MemoryTaskStore::new();
        store.load_plan("s1", &plan()).await.unwrap();

        let ready = store.ready_tasks("s1").await.unwrap();
        let ids: Vec<&str> = ready.iter().map(|t| t.id.as_str()).collect();
        // arch-2 is approval-gated, data-1 blocked on arch-1.
        assert_eq!(ids, vec!["arch-1"]);

        store
            .update_status("s1", "arch-1", TaskStatus::Completed, StatusFields::default())
            .await
            .unwrap();
        let ids: Vec<String> = store
            .ready_tasks("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["data-1"]);
    }

    #[tokio::test]
    async fn approval_moves_task_into_the_queue() {
        let store = MemoryTaskStore::new();
        store.load_plan("s1", &plan()).await.unwrap();

        store.approve_task("s1", "arch-2").await.unwrap();
        let ids: Vec<String> = store
            .ready_tasks("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["arch-1", "arch-2"]);

        // Approving again is a no-op.
        store.approve_task("s1", "arch-2").await.unwrap();
        assert_eq!(store.ready_tasks("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn terminal_tasks_are_immutable_and_not_double_counted() {
        let store = MemoryTaskStore::new();
        store.load_plan("s1", &plan()).await.unwrap();

        store
            .update_status(
                "s1",
                "arch-1",
                TaskStatus::Failed,
                StatusFields::error("boom"),
            )
            .await
            .unwrap();
        store
            .update_status(
                "s1",
                "arch-1",
                TaskStatus::Failed,
                StatusFields::error("boom again"),
            )
            .await
            .unwrap();

        let progress = store.progress("s1").await.unwrap();
        assert_eq!(progress.failed, 1);
        let snapshot = store.tasks("s1").await.unwrap();
        let arch1 = snapshot.iter().find(|t| t.id == "arch-1").unwrap();
        assert_eq!(arch1.retry_count, 1);
        assert_eq!(arch1.error_message.as_deref(), Some("boom"));

        // Flipping a terminal task back is also ignored.
        store
            .update_status("s1", "arch-1", TaskStatus::Queued, StatusFields::default())
            .await
            .unwrap();
        assert_eq!(store.progress("s1").await.unwrap().failed, 1);
    }

    #[tokio::test]
    async fn delete_rejects_depended_on_tasks() {
        let store = MemoryTaskStore::new();
        store.load_plan("s1", &plan()).await.unwrap();

        let err = store.delete_task("s1", "arch-1").await.unwrap_err();
        assert!(matches!(err, SwarmError::HasDependents { .. }));

        store.delete_task("s1", "data-1").await.unwrap();
        store.delete_task("s1", "arch-1").await.unwrap();
        // Idempotent on the second call.
        store.delete_task("s1", "arch-1").await.unwrap();
        assert_eq!(store.progress("s1").await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn reloading_a_plan_keeps_existing_rows() {
        let store = MemoryTaskStore::new();
        store.load_plan("s1", &plan()).await.unwrap();
        store
            .update_status("s1", "arch-1", TaskStatus::Completed, StatusFields::default())
            .await
            .unwrap();
        store.load_plan("s1", &plan()).await.unwrap();
        assert_eq!(store.progress("s1").await.unwrap().completed, 1);
    }
}
