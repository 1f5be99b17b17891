//! Core data models for VM telemetry

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;

/// Cumulative CPU time of a VM paired with the wall-clock time it was read
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuCounterSample {
    /// Total CPU time consumed since the VM started, in nanoseconds
    pub cumulative_cpu_time_ns: u64,
    /// Wall-clock time of the read, in seconds since the Unix epoch
    pub timestamp_secs: f64,
}

impl CpuCounterSample {
    pub fn new(cumulative_cpu_time_ns: u64, timestamp_secs: f64) -> Self {
        Self {
            cumulative_cpu_time_ns,
            timestamp_secs,
        }
    }

    /// Pair a counter value with the current wall-clock time
    pub fn now(cumulative_cpu_time_ns: u64) -> Self {
        let timestamp_secs = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        Self::new(cumulative_cpu_time_ns, timestamp_secs)
    }
}

/// Number of virtual CPUs assigned to a VM, always at least one
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct CpuCount(NonZeroU32);

impl CpuCount {
    /// Returns `None` for a count of zero
    pub fn new(count: u32) -> Option<Self> {
        NonZeroU32::new(count).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl TryFrom<u32> for CpuCount {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| "vCPU count must be at least 1".to_string())
    }
}

impl From<CpuCount> for u32 {
    fn from(count: CpuCount) -> Self {
        count.get()
    }
}

impl fmt::Display for CpuCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run state of a VM as reported by the hypervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    Suspended,
    Unknown,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Blocked => "blocked",
            RunState::Paused => "paused",
            RunState::Shutdown => "shutdown",
            RunState::Shutoff => "shutoff",
            RunState::Crashed => "crashed",
            RunState::Suspended => "suspended",
            RunState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time memory figures for a VM
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Resident set size of the VM process
    pub resident_bytes: u64,
    /// Current balloon size, i.e. memory the guest actually has
    pub actual_bytes: u64,
}

impl MemorySnapshot {
    /// Resident memory as a percentage of the balloon size
    pub fn percentage_of_actual(&self) -> Option<f64> {
        if self.actual_bytes == 0 {
            return None;
        }
        Some(self.resident_bytes as f64 / self.actual_bytes as f64 * 100.0)
    }
}

/// Network interface counters; `-1` marks a counter the driver does not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStats {
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub rx_errs: i64,
    pub rx_drop: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
    pub tx_errs: i64,
    pub tx_drop: i64,
}

impl Default for InterfaceStats {
    fn default() -> Self {
        Self {
            rx_bytes: -1,
            rx_packets: -1,
            rx_errs: -1,
            rx_drop: -1,
            tx_bytes: -1,
            tx_packets: -1,
            tx_errs: -1,
            tx_drop: -1,
        }
    }
}

impl InterfaceStats {
    /// Counters in libvirt order: rx bytes/packets/errs/drop, tx bytes/packets/errs/drop
    pub fn as_tuple(&self) -> [(&'static str, i64); 8] {
        [
            ("rx_bytes", self.rx_bytes),
            ("rx_packets", self.rx_packets),
            ("rx_errs", self.rx_errs),
            ("rx_drop", self.rx_drop),
            ("tx_bytes", self.tx_bytes),
            ("tx_packets", self.tx_packets),
            ("tx_errs", self.tx_errs),
            ("tx_drop", self.tx_drop),
        ]
    }
}

/// Block device counters; `-1` marks a counter the driver does not support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub rd_req: i64,
    pub rd_bytes: i64,
    pub wr_req: i64,
    pub wr_bytes: i64,
    pub errs: i64,
}

impl Default for BlockStats {
    fn default() -> Self {
        Self {
            rd_req: -1,
            rd_bytes: -1,
            wr_req: -1,
            wr_bytes: -1,
            errs: -1,
        }
    }
}

impl BlockStats {
    pub fn as_tuple(&self) -> [(&'static str, i64); 5] {
        [
            ("rd_req", self.rd_req),
            ("rd_bytes", self.rd_bytes),
            ("wr_req", self.wr_req),
            ("wr_bytes", self.wr_bytes),
            ("errs", self.errs),
        ]
    }
}

/// Fields of interest from a VM's XML descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDescriptor {
    pub os_type: Option<String>,
    pub os_arch: Option<String>,
    pub os_machine: Option<String>,
    pub os_boot: Option<String>,
    /// Image file backing the first disk
    pub disk_image: Option<String>,
    /// Host-side device name of the first network interface
    pub network_device: Option<String>,
}

/// Static and point-in-time information about a VM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmInfo {
    pub name: String,
    pub uuid: String,
    pub state: RunState,
    pub max_memory_bytes: u64,
    pub resident_memory_bytes: u64,
    pub vcpus: CpuCount,
    pub cpu_time_ns: u64,
    #[serde(flatten)]
    pub descriptor: DomainDescriptor,
}

/// One line of the per-VM dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub cpu_usage_percentage: f64,
    pub memory_percentage: Option<f64>,
    pub network: Option<InterfaceStats>,
    pub io: Option<BlockStats>,
}
