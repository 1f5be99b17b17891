//! VM Telemetry CLI
//!
//! A command-line tool for inspecting libvirt VMs with the same hypervisor
//! access and CPU estimator the telemetry agent uses.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{cpu, vms};
use std::path::PathBuf;
use telemetry_lib::hypervisor::{ProcessRunner, VirshHypervisor};

/// VM Telemetry CLI
#[derive(Parser)]
#[command(name = "vmt")]
#[command(author, version, about = "CLI for VM Telemetry", long_about = None)]
pub struct Cli {
    /// Hypervisor URI (overrides the configuration files)
    #[arg(long, env = "VMT_URI")]
    pub uri: Option<String>,

    /// INI configuration file shared with the agent; may be repeated
    #[arg(long = "config", short = 'c', env = "VMT_CONFIG", value_delimiter = ',')]
    pub config_files: Vec<PathBuf>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all VMs with their run state
    List,

    /// Show details for a VM
    Info {
        /// VM name
        vm: String,
    },

    /// Measure CPU utilization of a VM over one interval
    Cpu {
        /// VM name
        vm: String,

        /// Seconds between the two counter reads
        #[arg(long, short, default_value_t = 1)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = config::Settings::resolve(&cli.config_files, cli.uri.as_deref())?;
    if cli.verbose {
        output::print_info(&format!("Connecting to {} via {}", settings.uri, settings.virsh));
    }

    let hypervisor = VirshHypervisor::open(&settings.uri, &settings.virsh, ProcessRunner)
        .await
        .with_context(|| format!("Failed to connect to {}", settings.uri))?;

    match cli.command {
        Commands::List => {
            vms::list_vms(&hypervisor, cli.format).await?;
        }
        Commands::Info { vm } => {
            vms::show_info(&hypervisor, &vm, cli.format).await?;
        }
        Commands::Cpu { vm, interval } => {
            cpu::measure_cpu(&hypervisor, &vm, interval, cli.format).await?;
        }
    }

    Ok(())
}
