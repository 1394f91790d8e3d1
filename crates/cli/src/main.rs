mod commands;
mod config;
mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use commands::convert::cmd_convert;
use commands::inspect::cmd_inspect;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Chart of accounts migration toolchain.
#[derive(Parser)]
#[command(name = "chartmig", version, about = "Chart of accounts migration toolchain")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log every decoded source and rewrite pass
    #[arg(long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every chart template below the addons root
    Convert {
        /// Path to the configuration file (default: ./chartmig.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Addons directory, overriding the configured root
        #[arg(long)]
        root: Option<PathBuf>,
        /// Report what would change without touching any file
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the merged record graph as JSON
    Inspect {
        /// Path to the configuration file (default: ./chartmig.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Addons directory, overriding the configured root
        #[arg(long)]
        root: Option<PathBuf>,
        /// Only show the groups of this namespace
        #[arg(long)]
        namespace: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Convert {
            config,
            root,
            dry_run,
        } => {
            cmd_convert(
                config.as_deref(),
                root.as_deref(),
                dry_run,
                cli.output,
                cli.quiet,
            );
        }
        Commands::Inspect {
            config,
            root,
            namespace,
        } => {
            cmd_inspect(
                config.as_deref(),
                root.as_deref(),
                namespace.as_deref(),
                cli.output,
                cli.quiet,
            );
        }
    }
}

/// Log to stderr. `RUST_LOG` wins over the flags.
fn init_logging(quiet: bool, verbose: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
