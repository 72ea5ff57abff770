//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use cgmlink_types::GlucoseUnit;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Glucose unit for display and export
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnitArg {
    /// Milligrams per decilitre
    #[value(name = "mg/dl", alias = "mgdl")]
    MgDl,
    /// Millimoles per litre
    #[value(name = "mmol/l", alias = "mmol")]
    Mmol,
}

impl From<UnitArg> for GlucoseUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::MgDl => GlucoseUnit::MgPerDl,
            UnitArg::Mmol => GlucoseUnit::MmolPerL,
        }
    }
}

/// Time range and unit arguments shared by the readings commands
#[derive(Debug, Clone, Default, Args)]
pub struct RangeArgs {
    /// Only readings at or after this time (RFC3339 or YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<String>,

    /// Only readings at or before this time (RFC3339 or YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<String>,

    /// Display unit (defaults to the configured unit, then mg/dL)
    #[arg(long, value_enum)]
    pub unit: Option<UnitArg>,
}

#[derive(Parser)]
#[command(name = "cgmlink")]
#[command(author, version, about = "Connection manager for CGM transmitters", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// User scope readings are stored under
    #[arg(short, long, global = true, env = "CGMLINK_USER")]
    pub user: Option<String>,

    /// Database path (defaults to the platform data directory)
    #[arg(long, global = true, env = "CGMLINK_DATABASE")]
    pub database: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby transmitters
    Scan {
        /// Scan timeout in seconds
        #[arg(short, long, env = "CGMLINK_SCAN_TIMEOUT")]
        timeout: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a simulated transmitter session end to end
    Demo(DemoArgs),

    /// Query stored readings
    Readings {
        #[command(subcommand)]
        action: ReadingsAction,
    },

    /// Show or forget the paired transmitter
    Pairing {
        #[command(subcommand)]
        action: PairingAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Arguments for the simulated session
#[derive(Debug, Clone, Args)]
pub struct DemoArgs {
    /// Serial number printed on the simulated transmitter
    #[arg(short, long, default_value = "8G1234")]
    pub serial: String,

    /// Live readings to stream before disconnecting
    #[arg(short = 'n', long, default_value = "12")]
    pub readings: u32,

    /// Delay between live readings in milliseconds
    #[arg(long, default_value = "250")]
    pub interval_ms: u64,

    /// Drop the radio link after every N readings (0 to never drop)
    #[arg(long, default_value = "4")]
    pub drop_every: u32,

    /// Readings the transmitter backfills after connecting
    #[arg(long, default_value = "6")]
    pub backfill: usize,

    /// Consecutive link drops tolerated before an error is reported
    #[arg(long, env = "CGMLINK_MAX_ATTEMPTS")]
    pub max_attempts: Option<u32>,

    /// Ignore the stored pairing and scan for the transmitter
    #[arg(long)]
    pub fresh: bool,
}

/// Readings subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ReadingsAction {
    /// List stored readings, newest first
    List {
        #[command(flatten)]
        range: RangeArgs,

        /// Maximum number of readings (0 for all)
        #[arg(short = 'n', long, default_value = "20")]
        count: u32,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Summary statistics and time in range
    Stats {
        #[command(flatten)]
        range: RangeArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete readings older than the given number of hours
    Prune {
        /// Age in hours
        #[arg(long, default_value = "720")]
        older_than_hours: u64,
    },
}

/// Pairing subcommands
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum PairingAction {
    /// Show the stored pairing
    Show,
    /// Forget the stored pairing
    Clear,
}

/// Configuration keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// User scope for stored readings
    User,
    /// Comma-separated advertised-name filters
    NameFilters,
    /// Consecutive link drops tolerated before an error is reported
    MaxAttempts,
    /// Database path
    Database,
    /// Default scan timeout in seconds
    ScanTimeout,
    /// Display unit (mg/dL or mmol/L)
    Unit,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show config file path
    Path,

    /// Initialize config file with defaults
    Init,

    /// Get a configuration value
    Get {
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Set a configuration value
    Set {
        #[arg(value_enum)]
        key: ConfigKey,
        value: String,
    },

    /// Remove a configuration value
    Unset {
        #[arg(value_enum)]
        key: ConfigKey,
    },
}
