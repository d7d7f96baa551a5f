//! The phase executor: one control loop per swarm that reads ready tasks,
//! dispatches them in parallel relay phases, and loops to a terminal state.
//!
//! Every scheduling decision is derived from a fresh store read. The loop
//! itself is single-tasked; parallelism lives entirely inside a phase's
//! dispatch batch.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::json;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::SwarmConfig;
use crate::errors::SwarmError;
use crate::health::AccountHealth;
use crate::notify::{self, ProgressNotifier};
use crate::plan::{SwarmProgress, TaskStatus};
use crate::queue::{StatusFields, TaskQueueStore};
use crate::registry::ActiveSwarms;
use crate::relay::RelayContextBuilder;
use crate::session::{RemoteSessions, TaskRunner};

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Mark ready tasks completed with a synthetic result instead of
    /// dispatching them — validates scheduling independent of the remote.
    pub dry_run: bool,
    /// Notification channel id, if any.
    pub channel: Option<String>,
}

/// Clean terminal states of a swarm run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmOutcome {
    /// Every task reached a terminal status (partial failure allowed).
    Done(SwarmProgress),
    /// Pending tasks remain but none can ever become ready.
    Stuck(SwarmProgress),
}

impl SwarmOutcome {
    pub fn progress(&self) -> &SwarmProgress {
        match self {
            Self::Done(p) | Self::Stuck(p) => p,
        }
    }
}

/// The scheduler.
pub struct PhaseExecutor {
    store: Arc<dyn TaskQueueStore>,
    remote: Arc<dyn RemoteSessions>,
    notifier: Arc<dyn ProgressNotifier>,
    registry: Arc<ActiveSwarms>,
    relay: RelayContextBuilder,
    health: Arc<AccountHealth>,
    config: Arc<SwarmConfig>,
}

impl PhaseExecutor {
    pub fn new(
        store: Arc<dyn TaskQueueStore>,
        remote: Arc<dyn RemoteSessions>,
        notifier: Arc<dyn ProgressNotifier>,
        registry: Arc<ActiveSwarms>,
        config: Arc<SwarmConfig>,
    ) -> Self {
        Self {
            relay: RelayContextBuilder::new(config.result_excerpt_max),
            health: Arc::new(AccountHealth::new()),
            store,
            remote,
            notifier,
            registry,
            config,
        }
    }

    /// Run one swarm to a terminal condition.
    ///
    /// Rejected with `AlreadyExecuting` if a loop for this swarm id is live.
    /// Exceeding the iteration safety cap returns `SafetyCapExceeded`, which
    /// is an abort, not a terminal outcome.
    pub async fn run(
        &self,
        swarm_id: &str,
        options: &ExecutionOptions,
    ) -> Result<SwarmOutcome, SwarmError> {
        let lease = self.registry.acquire(swarm_id)?;
        let channel = options.channel.as_deref();
        info!(swarm_id, dry_run = options.dry_run, "swarm loop starting");

        let runner = TaskRunner::new(
            Arc::clone(&self.remote),
            Arc::clone(&self.store),
            Arc::clone(&self.notifier),
            Arc::clone(&self.health),
            Arc::clone(&self.config),
        );

        if !options.dry_run {
            self.preflight(swarm_id, channel).await;
            self.resume_stalled(swarm_id, &runner, channel).await?;
        }

        for iteration in 1..=self.config.max_iterations {
            let ready = self.store.ready_tasks(swarm_id).await?;
            let progress = self.store.progress(swarm_id).await?;

            if ready.is_empty() && progress.running == 0 {
                if progress.pending == 0 {
                    let minutes = lease.elapsed().as_secs() / 60;
                    info!(
                        swarm_id,
                        iteration,
                        completed = progress.completed,
                        failed = progress.failed,
                        "swarm finished"
                    );
                    let failed_note = if progress.failed > 0 {
                        format!(", {} failed", progress.failed)
                    } else {
                        String::new()
                    };
                    notify::best_effort(
                        self.notifier.as_ref(),
                        channel,
                        &format!(
                            "Swarm #{swarm_id} finished: {}/{} completed{failed_note} ({minutes} min)",
                            progress.completed, progress.total
                        ),
                    )
                    .await;
                    return Ok(SwarmOutcome::Done(progress));
                }

                warn!(
                    swarm_id,
                    pending = progress.pending,
                    "swarm stuck: pending tasks with unsatisfiable dependencies"
                );
                notify::best_effort(
                    self.notifier.as_ref(),
                    channel,
                    &format!(
                        "Swarm #{swarm_id}: {} task(s) blocked on dependencies that will never complete",
                        progress.pending
                    ),
                )
                .await;
                return Ok(SwarmOutcome::Stuck(progress));
            }

            if !ready.is_empty() {
                // The ready set usually shares one phase order, but the
                // approval gate can surface a later-phase task in the same
                // read (approve a phase-1 task after its sibling completed
                // and a phase-2 dependent unblocked). Dispatch only the
                // earliest phase so downstream tasks get a full relay digest.
                let mut ready = ready;
                let current_phase = ready[0].phase_order;
                ready.retain(|t| t.phase_order == current_phase);
                let role = ready[0].role;
                notify::best_effort(
                    self.notifier.as_ref(),
                    channel,
                    &format!(
                        "Phase {current_phase} - {role}: executing {} task(s)",
                        ready.len()
                    ),
                )
                .await;

                let snapshot = self.store.tasks(swarm_id).await?;
                let relay_context = self.relay.build(&snapshot, current_phase);

                if options.dry_run {
                    for task in &ready {
                        info!(swarm_id, task_id = %task.id, title = %task.title, "dry run: would execute");
                        self.store
                            .update_status(
                                swarm_id,
                                &task.id,
                                TaskStatus::Completed,
                                StatusFields::outcome(json!({ "dry_run": true }), None),
                            )
                            .await?;
                    }
                    notify::best_effort(
                        self.notifier.as_ref(),
                        channel,
                        &format!("dry run: {} task(s) simulated", ready.len()),
                    )
                    .await;
                } else {
                    // Settle-all: a failing task never cancels its siblings.
                    let mut batch = JoinSet::new();
                    for task in ready {
                        let runner = runner.clone();
                        let swarm_id = swarm_id.to_string();
                        let relay_context = relay_context.clone();
                        let channel = options.channel.clone();
                        batch.spawn(async move {
                            runner
                                .run(&swarm_id, &task, &relay_context, channel.as_deref())
                                .await;
                        });
                    }
                    while let Some(res) = batch.join_next().await {
                        if let Err(e) = res {
                            warn!(swarm_id, error = %e, "task worker panicked");
                        }
                    }
                }
            }

            if !options.dry_run {
                tokio::time::sleep(self.config.loop_interval).await;
            }
        }

        // Distinct from DONE/STUCK: the loop never converged.
        error!(
            swarm_id,
            cap = self.config.max_iterations,
            "scheduler safety cap exceeded, aborting loop"
        );
        notify::best_effort(
            self.notifier.as_ref(),
            channel,
            &format!(
                "Swarm #{swarm_id} ABORTED: safety cap of {} iterations exceeded",
                self.config.max_iterations
            ),
        )
        .await;
        Err(SwarmError::SafetyCapExceeded {
            swarm_id: swarm_id.to_string(),
            cap: self.config.max_iterations,
        })
    }

    /// Validate each account's credential before dispatching anything and
    /// seed the circuit breaker with the results. An unhealthy account
    /// produces a warning, never an abort — dispatch fails over around it.
    async fn preflight(&self, swarm_id: &str, channel: Option<&str>) {
        let Ok(snapshot) = self.store.tasks(swarm_id).await else {
            return;
        };
        let accounts: BTreeSet<&str> = snapshot.iter().map(|t| t.account.as_str()).collect();
        let mut unhealthy = Vec::new();
        for account in accounts {
            match self.remote.validate(account).await {
                Ok(()) => self.health.record_success(account),
                Err(e) => {
                    warn!(swarm_id, account, error = %e, "preflight credential check failed");
                    self.health
                        .record_failure(account, matches!(e, SwarmError::Unauthorized(_)));
                    unhealthy.push(format!("{account}: {e}"));
                }
            }
        }
        if !unhealthy.is_empty() {
            notify::best_effort(
                self.notifier.as_ref(),
                channel,
                &format!(
                    "Swarm #{swarm_id} credential warning:\n{}\nfailover to healthy accounts will be attempted",
                    unhealthy.join("\n")
                ),
            )
            .await;
        }
    }

    /// Re-adopt tasks a previous process left `Running`: rows that carry a
    /// session handle resume polling, rows without one go back to the queue.
    async fn resume_stalled(
        &self,
        swarm_id: &str,
        runner: &TaskRunner,
        channel: Option<&str>,
    ) -> Result<(), SwarmError> {
        let snapshot = self.store.tasks(swarm_id).await?;
        let mut batch = JoinSet::new();
        for task in snapshot {
            if task.status != TaskStatus::Running {
                continue;
            }
            if task.remote_session_id.is_some() {
                info!(swarm_id, task_id = %task.id, "resuming monitor for stalled task");
                let runner = runner.clone();
                let swarm_id = swarm_id.to_string();
                let channel = channel.map(String::from);
                batch.spawn(async move {
                    runner.run(&swarm_id, &task, "", channel.as_deref()).await;
                });
            } else {
                info!(swarm_id, task_id = %task.id, "requeueing stalled task without a session");
                self.store
                    .update_status(swarm_id, &task.id, TaskStatus::Queued, StatusFields::default())
                    .await?;
            }
        }
        while let Some(res) = batch.join_next().await {
            if let Err(e) = res {
                warn!(swarm_id, error = %e, "resumed task worker panicked");
            }
        }
        Ok(())
    }
}
