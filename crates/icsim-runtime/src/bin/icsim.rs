//! CLI entrypoint for the testbed device runtime.

#[path = "icsim/cli.rs"]
mod cli;
#[path = "icsim/conveyor.rs"]
mod conveyor;
#[path = "icsim/run.rs"]
mod run;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { config } => run::run_check(&config),
        Command::Run {
            config,
            device,
            run_for,
        } => {
            let selector = run::DeviceSelector::parse(&device)?;
            run::run_devices(&config, &selector, run_for)
        }
    }
}
