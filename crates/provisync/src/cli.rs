//! Clap derive structures for the `provisync` CLI.
//!
//! Defines the command tree, global flags, and shared types. Only depends
//! on clap + clap_complete so `build.rs` can include it for man pages.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// provisync -- live views of dashboard resources from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "provisync",
    version,
    about = "Watch live dashboard resources from the command line",
    long_about = "Keeps a local view of a backend resource current from its push stream,\n\
        falling back to periodic REST snapshots while the stream is down.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "PROVISYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend base URL (overrides profile)
    #[arg(long, short = 'u', env = "PROVISYNC_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Bearer token (overrides profile credentials)
    #[arg(long, env = "PROVISYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "PROVISYNC_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "PROVISYNC_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides profile)
    #[arg(long, env = "PROVISYNC_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON (one line per update when watching)
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one child key per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Subscribe to a resource and print its view on every change
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Fetch one REST snapshot and print the decoded envelope
    #[command(alias = "get")]
    Fetch(FetchArgs),

    /// Decode a response envelope from a file or stdin
    Decode(DecodeArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH / FETCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stale handling override for `watch`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StalePolicyArg {
    /// Only report staleness
    Passive,
    /// Poll once when the view goes stale
    Resnapshot,
    /// Reopen a connected but silent stream
    Reconnect,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Resource type (a [resources.<type>] table in the config)
    pub resource_type: String,

    /// Resource identifier
    pub id: String,

    /// Poll interval while the stream is down, in seconds
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Freshness window in seconds
    #[arg(long)]
    pub stale_after: Option<u64>,

    /// What to do when the view goes stale
    #[arg(long)]
    pub stale_policy: Option<StalePolicyArg>,

    /// Skip the REST snapshot normally fetched on subscribe
    #[arg(long)]
    pub no_initial_snapshot: bool,

    /// Exit after this many rendered updates
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Resource type (a [resources.<type>] table in the config)
    pub resource_type: String,

    /// Resource identifier
    pub id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DECODE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// File holding the envelope body (reads stdin when omitted or "-")
    pub file: Option<PathBuf>,

    /// Treat the body as a push frame and decode the stream event inside
    #[arg(long)]
    pub event: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Display current configuration (secrets masked)
    Show,

    /// Write a starter config file
    Init {
        /// Backend base URL for the default profile
        #[arg(long, default_value = "https://localhost:8443/api/v1")]
        base_url: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Store a bearer token in the system keyring
    SetToken {
        /// Profile name (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,

        /// Token value
        token: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
