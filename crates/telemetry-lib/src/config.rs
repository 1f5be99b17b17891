//! Configuration loading
//!
//! Operational parameters live in INI files (`[QEMU] uri`,
//! `[DATA_COLLECTION] delay`, `[DEFAULT] debug`, ...). They are read once at
//! startup into an [`AgentConfig`] that is passed explicitly to the code
//! that needs it.

use crate::record::RecordFormat;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_URI: &str = "qemu:///system";
pub const DEFAULT_DELAY_SECS: u64 = 5;
pub const DEFAULT_DATASET_PATH: &str = "dataset";
pub const DEFAULT_VIRSH: &str = "virsh";

/// Environment variable prefix, e.g. `VMT_QEMU__URI`
pub const ENV_PREFIX: &str = "VMT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid value '{value}' for [{section}] {key}: {reason}")]
    Invalid {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(section: &str, key: &str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Resolves `(section, key)` pairs to raw string values
pub trait ConfigSource {
    fn read_value(&self, section: &str, key: &str) -> Option<String>;
}

/// INI files layered under `VMT_*` environment variables
pub struct IniConfigSource {
    inner: config::Config,
}

impl IniConfigSource {
    /// Load the given INI files in order; later files override earlier ones
    pub fn load<P: AsRef<Path>>(files: &[P]) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        for path in files {
            builder = builder.add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Ini)
                    .required(true),
            );
        }

        let inner = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        Ok(Self { inner })
    }
}

impl ConfigSource for IniConfigSource {
    fn read_value(&self, section: &str, key: &str) -> Option<String> {
        let exact = format!("{}.{}", section, key);
        let lower = exact.to_ascii_lowercase();

        // Environment keys arrive lowercased and must win over file keys
        self.inner
            .get_string(&lower)
            .or_else(|_| self.inner.get_string(&exact))
            .ok()
    }
}

/// In-memory source, keyed by `(section, key)`
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    values: HashMap<(String, String), String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, section: &str, key: &str, value: &str) -> Self {
        self.values
            .insert((section.to_string(), key.to_string()), value.to_string());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn read_value(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }
}

/// Agent configuration, resolved once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// Hypervisor connection URI
    pub uri: String,
    /// Sleep between the two CPU counter reads of an iteration
    pub delay: Duration,
    /// Log every record and raw memory statistics
    pub debug: bool,
    /// Directory receiving `<vm>.dat` files
    pub dataset_path: PathBuf,
    pub record_format: RecordFormat,
    /// Port for `/healthz` and `/metrics`; disabled when unset
    pub metrics_port: Option<u16>,
    /// `virsh` binary to execute
    pub virsh: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            debug: false,
            dataset_path: PathBuf::from(DEFAULT_DATASET_PATH),
            record_format: RecordFormat::default(),
            metrics_port: None,
            virsh: DEFAULT_VIRSH.to_string(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl AgentConfig {
    /// Build the configuration from a source, falling back to defaults
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let uri = source
            .read_value("QEMU", "uri")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.uri);

        let delay = match source.read_value("DATA_COLLECTION", "delay") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    ConfigError::invalid("DATA_COLLECTION", "delay", &raw, "expected whole seconds")
                })?;
                if secs == 0 {
                    return Err(ConfigError::invalid(
                        "DATA_COLLECTION",
                        "delay",
                        &raw,
                        "must be at least 1 second",
                    ));
                }
                Duration::from_secs(secs)
            }
            None => defaults.delay,
        };

        let debug = match source.read_value("DEFAULT", "debug") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| ConfigError::invalid("DEFAULT", "debug", &raw, "expected a boolean"))?,
            None => defaults.debug,
        };

        let dataset_path = source
            .read_value("DEFAULT", "dataset_path")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.dataset_path);

        let record_format = match source.read_value("DEFAULT", "record_format") {
            Some(raw) => raw
                .parse::<RecordFormat>()
                .map_err(|reason: String| ConfigError::invalid("DEFAULT", "record_format", &raw, reason))?,
            None => defaults.record_format,
        };

        let metrics_port = match source.read_value("DEFAULT", "metrics_port") {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(raw.trim().parse::<u16>().map_err(|_| {
                ConfigError::invalid("DEFAULT", "metrics_port", &raw, "expected a port number")
            })?),
            None => defaults.metrics_port,
        };

        let virsh = source
            .read_value("DEFAULT", "virsh")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.virsh);

        Ok(Self {
            uri,
            delay,
            debug,
            dataset_path,
            record_format,
            metrics_port,
            virsh,
        })
    }

    /// Load INI files plus environment overrides
    pub fn load<P: AsRef<Path>>(files: &[P]) -> Result<Self, ConfigError> {
        let source = IniConfigSource::load(files)?;
        Self::from_source(&source)
    }
}
