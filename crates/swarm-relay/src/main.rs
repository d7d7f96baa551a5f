use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use swarm_relay::config::SwarmConfig;
use swarm_relay::decomposer::TaskDecomposer;
use swarm_relay::executor::{ExecutionOptions, PhaseExecutor, SwarmOutcome};
use swarm_relay::notify::{BotApiNotifier, NullNotifier, ProgressNotifier};
use swarm_relay::queue::{MemoryTaskStore, TaskQueueStore};
use swarm_relay::registry::ActiveSwarms;
use swarm_relay::session::HttpSessionClient;

#[derive(Parser)]
#[command(name = "swarm-relay", about = "Relay-phase orchestrator for remote coding-agent swarms")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decompose a request and print the plan without executing it.
    Plan {
        description: String,
        #[arg(long, default_value_t = 9)]
        max_agents: u32,
    },
    /// Decompose a request, load it, and run the swarm to a terminal state.
    Run {
        description: String,
        #[arg(long, default_value_t = 9)]
        max_agents: u32,
        /// Mark ready tasks completed with a synthetic result instead of
        /// creating remote sessions.
        #[arg(long)]
        dry_run: bool,
        /// Notification channel id.
        #[arg(long)]
        channel: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(SwarmConfig::default());
    let cli = Cli::parse();

    match cli.command {
        Command::Plan {
            description,
            max_agents,
        } => {
            let decomposer = TaskDecomposer::from_config(&config.planner)
                .context("planning backend not configured")?;
            let plan = decomposer.decompose(&description, max_agents).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Run {
            description,
            max_agents,
            dry_run,
            channel,
        } => {
            let decomposer = TaskDecomposer::from_config(&config.planner)
                .context("planning backend not configured")?;
            let plan = decomposer.decompose(&description, max_agents).await?;

            let swarm_id = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
            let store: Arc<dyn TaskQueueStore> = Arc::new(MemoryTaskStore::new());
            store.load_plan(&swarm_id, &plan).await?;
            info!(
                swarm_id,
                phases = plan.phases.len(),
                tasks = plan.task_count(),
                "plan loaded"
            );

            let notifier: Arc<dyn ProgressNotifier> = match BotApiNotifier::from_env() {
                Some(bot) => Arc::new(bot),
                None => Arc::new(NullNotifier),
            };
            let executor = PhaseExecutor::new(
                store,
                Arc::new(HttpSessionClient::new(Arc::clone(&config))),
                notifier,
                Arc::new(ActiveSwarms::new()),
                Arc::clone(&config),
            );

            let options = ExecutionOptions { dry_run, channel };
            match executor.run(&swarm_id, &options).await? {
                SwarmOutcome::Done(progress) => {
                    info!(
                        completed = progress.completed,
                        failed = progress.failed,
                        total = progress.total,
                        "swarm done"
                    );
                }
                SwarmOutcome::Stuck(progress) => {
                    anyhow::bail!(
                        "swarm stuck with {} pending task(s) ({} failed)",
                        progress.pending,
                        progress.failed
                    );
                }
            }
        }
    }

    Ok(())
}
