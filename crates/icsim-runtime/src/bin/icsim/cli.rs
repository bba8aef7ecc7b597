//! CLI definitions for icsim.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "icsim",
    version,
    about = "Industrial-control testbed device runtime",
    after_help = "Examples:\n  icsim check --config testbed.toml\n  icsim run --config testbed.toml --device process\n  icsim run --config testbed.toml --device controller:1\n  icsim run --config testbed.toml --device all --run-for 30"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate a testbed configuration and exit.
    Check {
        /// Testbed TOML file.
        #[arg(long)]
        config: PathBuf,
    },
    /// Launch one or all devices of a testbed in this process.
    Run {
        /// Testbed TOML file.
        #[arg(long)]
        config: PathBuf,
        /// `process`, `controller:<id>`, `panel:<name>` or `all`.
        #[arg(long, default_value = "all")]
        device: String,
        /// Stop after this many seconds instead of waiting for stdin.
        #[arg(long)]
        run_for: Option<u64>,
    },
}
