//! Access to the hypervisor management interface
//!
//! The sampling loop only talks to the [`Hypervisor`] and [`VmHandle`]
//! traits. The shipped implementation drives libvirt through the `virsh`
//! command line client, one management call per data point.

mod descriptor;
mod runner;
mod virsh;

pub use descriptor::parse_descriptor;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner};
pub use virsh::{VirshHypervisor, VirshVm};

use crate::models::{
    BlockStats, CpuCount, CpuCounterSample, DomainDescriptor, InterfaceStats, MemorySnapshot,
    RunState, VmInfo,
};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while talking to the hypervisor
#[derive(Debug, Error)]
pub enum HypervisorError {
    #[error("failed to connect to hypervisor at {uri}: {message}")]
    Connection { uri: String, message: String },

    #[error("virtual machine '{0}' not found")]
    NotFound(String),

    #[error("management command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("unexpected output from `{command}`: {message}")]
    Parse { command: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HypervisorError {
    pub(crate) fn parse(command: impl Into<String>, message: impl Into<String>) -> Self {
        HypervisorError::Parse {
            command: command.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HypervisorError>;

/// An open connection to a hypervisor
#[async_trait]
pub trait Hypervisor: Send + Sync {
    type Vm: VmHandle;

    /// URI the connection was opened with
    fn uri(&self) -> &str;

    /// Names of all VMs known to the hypervisor, running or not
    async fn list_vm_names(&self) -> Result<Vec<String>>;

    /// Look up a VM by name; fails with [`HypervisorError::NotFound`]
    async fn lookup_vm(&self, name: &str) -> Result<Self::Vm>;
}

/// A single VM on an open connection
#[async_trait]
pub trait VmHandle: Send + Sync {
    fn name(&self) -> &str;

    async fn uuid(&self) -> Result<String>;

    async fn run_state(&self) -> Result<RunState>;

    /// Cumulative CPU time, stamped with the wall clock at the moment of the read
    async fn cpu_counter_sample(&self) -> Result<CpuCounterSample>;

    async fn vcpu_count(&self) -> Result<CpuCount>;

    async fn memory_snapshot(&self) -> Result<MemorySnapshot>;

    async fn max_memory_bytes(&self) -> Result<u64>;

    async fn interface_stats(&self, device: &str) -> Result<InterfaceStats>;

    async fn block_stats(&self, path: &str) -> Result<BlockStats>;

    async fn descriptor(&self) -> Result<DomainDescriptor>;
}

/// Gather a [`VmInfo`] summary for a VM
pub async fn vm_info<V: VmHandle + ?Sized>(vm: &V) -> Result<VmInfo> {
    let uuid = vm.uuid().await?;
    let state = vm.run_state().await?;
    let max_memory_bytes = vm.max_memory_bytes().await?;
    let memory = vm.memory_snapshot().await?;
    let vcpus = vm.vcpu_count().await?;
    let cpu = vm.cpu_counter_sample().await?;
    let descriptor = vm.descriptor().await?;

    Ok(VmInfo {
        name: vm.name().to_string(),
        uuid,
        state,
        max_memory_bytes,
        resident_memory_bytes: memory.resident_bytes,
        vcpus,
        cpu_time_ns: cpu.cumulative_cpu_time_ns,
        descriptor,
    })
}
