//! # Queue-Salvage Service
//!
//! Operator binary for the dead-letter recovery pipeline.
//!
//! - Loads configuration from files and environment ([`config`])
//! - Initializes structured logging ([`logging`])
//! - Composes broker, staging store, sessions and audit ([`components`])
//! - Schedules the expired session sweep ([`scheduler`])
//! - Exposes staging, triage, replay and abort as commands ([`commands`])

pub mod commands;
pub mod components;
pub mod config;
pub mod logging;
pub mod scheduler;

pub use commands::{execute, Cli, CommandError, Commands};
pub use components::{ComponentError, Components};
pub use config::{ConfigError, ServiceConfig};
pub use scheduler::SweepScheduler;
