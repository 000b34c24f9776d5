//! # Operator Commands
//!
//! Command-line surface of the service. `run` drives the periodic sweep until
//! the process is signalled; every other command performs one operation and
//! prints its result as JSON on stdout.

use crate::components::Components;
use crate::config::ServiceConfig;
use crate::scheduler::{shutdown_signal, SweepScheduler};
use clap::{Args, Parser, Subcommand};
use queue_salvage_core::{
    AuditActor, MessageId, QueueName, SalvageError, SearchProperties, StoreError, UserId,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue-Salvage - dead-letter recovery for broker error queues
#[derive(Debug, Parser)]
#[command(name = "queue-salvage")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stage, replay and abort messages from broker error queues")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QS_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Logging level, overriding the configuration
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Operator identity shared by the per-user commands
#[derive(Debug, Clone, Args)]
pub struct OperatorArgs {
    /// User owning the staged messages
    #[arg(short, long, env = "QS_USER")]
    pub user: String,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the session sweep on its configured interval until stopped
    Run,

    /// Run a single sweep pass
    Sweep,

    /// List error queues with depth and staged counts
    Queues,

    /// Show read-only copies of the messages at the head of a queue
    Peek {
        #[command(flatten)]
        operator: OperatorArgs,

        /// Error queue to read
        queue: String,

        /// Maximum number of messages
        #[arg(short = 'n', long, default_value = "10")]
        quantity: u64,
    },

    /// Move messages from an error queue into the user's staging area
    Stage {
        #[command(flatten)]
        operator: OperatorArgs,

        /// Error queue to receive from
        queue: String,

        /// Maximum number of messages
        #[arg(short = 'n', long, default_value = "100")]
        quantity: u64,
    },

    /// List the user's staged messages
    List {
        #[command(flatten)]
        operator: OperatorArgs,

        /// Text to search for in the searchable fields
        #[arg(short, long)]
        search: Option<String>,

        /// Field to sort by
        #[arg(long)]
        sort: Option<String>,

        /// Sort direction (asc or desc)
        #[arg(long)]
        order: Option<String>,

        /// Messages to skip; applied only together with --limit
        #[arg(long)]
        offset: Option<usize>,

        /// Messages to return; applied only together with --offset
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Send staged messages to their processing queue and record an audit event
    Replay {
        #[command(flatten)]
        operator: OperatorArgs,

        /// Email recorded with the audit event
        #[arg(long)]
        email: Option<String>,

        /// Caller address recorded with the audit event
        #[arg(long)]
        origin_ip: Option<String>,

        /// Staged message ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Send staged messages back to the error queue they came from
    Abort {
        #[command(flatten)]
        operator: OperatorArgs,

        /// Staged message ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Abort everything the user has staged and end their session
    Release {
        #[command(flatten)]
        operator: OperatorArgs,
    },

    /// Delete staged messages without sending them anywhere
    Discard {
        #[command(flatten)]
        operator: OperatorArgs,

        /// Staged message ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show the user's session
    Session {
        #[command(flatten)]
        operator: OperatorArgs,

        /// End the session instead of showing it; refused while messages are staged
        #[arg(long)]
        end: bool,
    },
}

// ============================================================================
// Errors
// ============================================================================

/// Command failures
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error(transparent)]
    Salvage(#[from] SalvageError),

    #[error("Output could not be serialized: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self::Salvage(e.into())
    }
}

fn invalid(arg: &str, message: impl ToString) -> CommandError {
    CommandError::InvalidArgument {
        arg: arg.to_string(),
        message: message.to_string(),
    }
}

fn parse_user(operator: &OperatorArgs) -> Result<UserId, CommandError> {
    UserId::new(operator.user.clone()).map_err(|e| invalid("user", e))
}

fn parse_queue(queue: &str) -> Result<QueueName, CommandError> {
    QueueName::new(queue.to_string()).map_err(|e| invalid("queue", e))
}

fn parse_ids(ids: &[String]) -> Result<Vec<MessageId>, CommandError> {
    ids.iter()
        .map(|id| id.parse::<MessageId>().map_err(|e| invalid("ids", e)))
        .collect()
}

// ============================================================================
// Execution
// ============================================================================

/// Execute `command` and return its JSON result
pub async fn execute(
    command: Commands,
    config: &ServiceConfig,
    components: &Components,
) -> Result<Value, CommandError> {
    match command {
        Commands::Run => {
            let scheduler = SweepScheduler::new(
                components.sweep.clone(),
                Duration::from_secs(config.sweep.interval_seconds),
            );
            let passes = scheduler.run_until(shutdown_signal()).await;
            Ok(json!({ "passes": passes }))
        }

        Commands::Sweep => {
            let report = components.sweep.run_once().await?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::Queues => {
            let overview = components.triage.queue_overview().await?;
            Ok(serde_json::to_value(overview)?)
        }

        Commands::Peek {
            operator,
            queue,
            quantity,
        } => {
            let owner = parse_user(&operator)?;
            let copies = components
                .triage
                .peek_queue(&owner, &parse_queue(&queue)?, quantity)
                .await?;
            Ok(serde_json::to_value(copies)?)
        }

        Commands::Stage {
            operator,
            queue,
            quantity,
        } => {
            let owner = parse_user(&operator)?;
            let report = components
                .messages
                .stage_messages(&owner, &parse_queue(&queue)?, quantity)
                .await?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::List {
            operator,
            search,
            sort,
            order,
            offset,
            limit,
        } => {
            let owner = parse_user(&operator)?;
            components.sessions.record_activity(&owner).await?;

            let search = SearchProperties {
                search,
                sort,
                order,
                offset,
                limit,
            };
            let listing = components.triage.list_messages(&owner, &search).await?;
            Ok(serde_json::to_value(listing)?)
        }

        Commands::Replay {
            operator,
            email,
            origin_ip,
            ids,
        } => {
            let owner = parse_user(&operator)?;
            let ids = parse_ids(&ids)?;
            components.sessions.record_activity(&owner).await?;

            let mut actor = AuditActor::new(owner.clone());
            if let Some(email) = email {
                actor = actor.with_email(email);
            }
            if let Some(origin_ip) = origin_ip {
                actor = actor.with_origin_ip(origin_ip);
            }

            let report = components.messages.replay_by_ids(&owner, &ids, &actor).await?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::Abort { operator, ids } => {
            let owner = parse_user(&operator)?;
            let ids = parse_ids(&ids)?;
            components.sessions.record_activity(&owner).await?;

            let report = components.messages.abort_by_ids(&owner, &ids).await?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::Release { operator } => {
            let owner = parse_user(&operator)?;
            let report = components.messages.release_all(&owner).await?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::Discard { operator, ids } => {
            let owner = parse_user(&operator)?;
            let ids = parse_ids(&ids)?;
            components.sessions.record_activity(&owner).await?;

            let report = components.messages.discard_by_ids(&owner, &ids).await?;
            Ok(serde_json::to_value(report)?)
        }

        Commands::Session { operator, end } => {
            let owner = parse_user(&operator)?;
            if end {
                let deleted = components.messages.end_session(&owner).await?;
                info!(user_id = %owner, deleted, "Session end requested");
                return Ok(json!({ "deleted": deleted }));
            }

            let session = components.sessions.get_user_session(&owner).await?;
            Ok(serde_json::to_value(session)?)
        }
    }
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
