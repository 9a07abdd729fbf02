//! Command-line interface for Pathwatch.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Pathwatch - dual-path network monitor
#[derive(Parser, Debug)]
#[command(
    name = "pathwatch",
    author,
    version,
    about = "Dual-path network manager with per-path endpoint probing",
    long_about = r#"
Pathwatch holds two network paths at once and watches the far ends of both:

  - A local Wi-Fi link, identified by SSID, carrying two on-site devices
  - An internet-capable wide-area path carrying the controller

Each endpoint gets one conflated status cell; probes are pinned to their
path's interface, so an answer can only arrive over the path being measured.

QUICK START:
  Run:     pathwatch run --ssid site-ap
  Check:   pathwatch check --json
  Config:  pathwatch config --init
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, global = true, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Hold both paths and probe continuously
    Run(RunArgs),

    /// Acquire, run one probe round, report, exit
    Check(CheckArgs),

    /// List network interfaces as the path provider sees them
    Interfaces(InterfacesArgs),

    /// Show or write the example configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Probe interval in milliseconds (overrides config)
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// SSID of the local link (overrides config)
    #[arg(long)]
    pub ssid: Option<String>,

    /// Interface for the local link (skips SSID resolution)
    #[arg(long)]
    pub link_interface: Option<String>,

    /// Interface for the wide-area path (otherwise the default route)
    #[arg(long)]
    pub wan_interface: Option<String>,

    /// Do not request the local link
    #[arg(long)]
    pub no_local_link: bool,

    /// Do not request the wide-area path
    #[arg(long)]
    pub no_wide_area: bool,

    /// Redraw a live status table instead of logging changes
    #[arg(short, long)]
    pub watch: bool,

    /// Emit one JSON line per status change
    #[arg(long)]
    pub json: bool,
}

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Seconds to wait for path acquisition before probing anyway
    #[arg(long, default_value = "10")]
    pub timeout: u64,

    /// SSID of the local link (overrides config)
    #[arg(long)]
    pub ssid: Option<String>,

    /// Interface for the local link (skips SSID resolution)
    #[arg(long)]
    pub link_interface: Option<String>,

    /// Interface for the wide-area path (otherwise the default route)
    #[arg(long)]
    pub wan_interface: Option<String>,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

/// Interfaces command arguments
#[derive(Args, Debug)]
pub struct InterfacesArgs {
    /// Include loopback and down interfaces
    #[arg(short, long)]
    pub all: bool,

    /// JSON output
    #[arg(long)]
    pub json: bool,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write the example config to the default location
    #[arg(long)]
    pub init: bool,

    /// Output path (with --init)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the default config path and exit
    #[arg(long)]
    pub path: bool,
}

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

/// Shell for completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}
