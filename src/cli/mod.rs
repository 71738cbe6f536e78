//! Command-line interface definitions for the `quickserver` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `quickserver` binary.
#[derive(Debug, Parser)]
#[command(
    name = "quickserver",
    about = "Operator tools for an ephemeral game-server fleet",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Query a game server's status over its remote console.
    #[command(name = "status", about = "Query a game server's status")]
    Status(StatusCommand),
    /// Broadcast a chat message on a game server.
    #[command(name = "say", about = "Broadcast a chat message on a game server")]
    Say(SayCommand),
    /// Validate the fleet configuration and catalog.
    #[command(name = "check-config", about = "Validate the fleet configuration and catalog")]
    CheckConfig,
}

/// Connection flags shared by the console subcommands.
#[derive(Debug, Args)]
pub(crate) struct ConsoleTarget {
    /// Address of the game server.
    #[arg(long)]
    pub(crate) host: String,
    /// Remote-console port.
    #[arg(long, default_value_t = 27_015)]
    pub(crate) port: u16,
    /// Remote-console password.
    #[arg(long, env = "QUICKSERVER_RCON_PASSWORD", hide_env_values = true)]
    pub(crate) password: String,
    /// Per-query timeout in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 5_000)]
    pub(crate) timeout_ms: u64,
}

/// Arguments for the `quickserver status` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StatusCommand {
    #[command(flatten)]
    pub(crate) target: ConsoleTarget,
}

/// Arguments for the `quickserver say` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct SayCommand {
    #[command(flatten)]
    pub(crate) target: ConsoleTarget,
    /// Message to broadcast.
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) message: Vec<String>,
}
