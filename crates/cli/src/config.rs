//! Connection settings for the CLI
//!
//! The CLI reads the same INI files as the agent so both talk to the same
//! hypervisor. Only the connection keys are used here.

use anyhow::{Context, Result};
use std::path::PathBuf;
use telemetry_lib::config::AgentConfig;

/// How to reach the hypervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub uri: String,
    pub virsh: String,
}

impl Settings {
    /// Load the configuration files, then apply a URI override
    pub fn resolve(config_files: &[PathBuf], uri: Option<&str>) -> Result<Self> {
        let config = AgentConfig::load(config_files).context("Failed to load configuration")?;

        Ok(Self {
            uri: uri.map(str::to_string).unwrap_or(config.uri),
            virsh: config.virsh,
        })
    }
}
