//! Agent command line and configuration resolution

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use telemetry_lib::config::AgentConfig;

/// Samples telemetry for one libvirt VM until it stops running
#[derive(Debug, Parser)]
#[command(name = "vm-telemetry-agent")]
#[command(author, version, about = "VM telemetry agent", long_about = None)]
pub struct AgentArgs {
    /// Name of the VM to sample
    #[arg(long, env = "VMT_VM")]
    pub vm: String,

    /// INI configuration file; may be repeated, later files win
    #[arg(long = "config", short = 'c', env = "VMT_CONFIG", value_delimiter = ',')]
    pub config_files: Vec<PathBuf>,

    /// Override the hypervisor URI from the configuration
    #[arg(long)]
    pub uri: Option<String>,

    /// Override the dataset directory from the configuration
    #[arg(long)]
    pub dataset_path: Option<PathBuf>,
}

impl AgentArgs {
    /// Load configuration files and apply command line overrides
    pub fn resolve_config(&self) -> Result<AgentConfig> {
        let mut config = AgentConfig::load(&self.config_files)
            .context("Failed to load agent configuration")?;

        if let Some(uri) = &self.uri {
            config.uri = uri.clone();
        }
        if let Some(path) = &self.dataset_path {
            config.dataset_path = path.clone();
        }

        Ok(config)
    }
}
