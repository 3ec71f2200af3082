//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use waiting_room::context::ExternalType;

/// Operate the download waiting room control plane.
///
/// Resolves download targets, runs edge purges, keeps the download-queue
/// drain job scheduled and prunes expired token state.
#[derive(Parser, Debug)]
#[command(name = "waiting-room")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to $XDG_CONFIG_HOME/waiting-room/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Public site origin used for canonical URLs
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Token rate-limit strictness
    #[arg(long, global = true, value_enum)]
    pub security_mode: Option<ModeArg>,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve a slug into a download context and print it as JSON
    Resolve {
        /// Content slug
        slug: String,

        /// Specific version id
        #[arg(long, conflicts_with = "external")]
        version: Option<i64>,

        /// External-link marker
        #[arg(long, value_enum)]
        external: Option<ExternalArg>,

        /// External target id: the version id for `version` links (required),
        /// the content id for `mod` links (optional)
        #[arg(long, requires = "external", required_if_eq("external", "version"))]
        target: Option<i64>,
    },

    /// Purge every cached page affected by a content change
    Purge {
        /// Changed content item
        #[arg(long, conflicts_with = "thread", required_unless_present = "thread")]
        content: Option<i64>,

        /// Changed version of the content item
        #[arg(long, requires = "content")]
        version: Option<i64>,

        /// Changed discussion thread
        #[arg(long)]
        thread: Option<i64>,
    },

    /// Ensure the drain job is scheduled and run the scheduler until Ctrl+C
    Schedule {
        /// Register the job and exit without running it
        #[arg(long)]
        once: bool,
    },

    /// Remove expired tokens, permissions, rate-limit entries and cached pages
    Prune,
}

/// `--security-mode` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Strict,
    Reduced,
}

impl From<ModeArg> for waiting_room::SecurityMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Strict => Self::Strict,
            ModeArg::Reduced => Self::Reduced,
        }
    }
}

/// `--external` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExternalArg {
    /// Link attached to a version
    Version,
    /// Item-level link
    Mod,
}

impl From<ExternalArg> for ExternalType {
    fn from(value: ExternalArg) -> Self {
        match value {
            ExternalArg::Version => Self::Version,
            ExternalArg::Mod => Self::Mod,
        }
    }
}
