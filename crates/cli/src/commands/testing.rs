//! In-memory hypervisor for command tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use telemetry_lib::hypervisor::{Hypervisor, HypervisorError, Result, VmHandle};
use telemetry_lib::{
    BlockStats, CpuCount, CpuCounterSample, DomainDescriptor, InterfaceStats, MemorySnapshot,
    RunState,
};

pub struct MockVm {
    name: String,
    state: RunState,
    vcpus: u32,
    samples: Mutex<VecDeque<CpuCounterSample>>,
}

impl MockVm {
    pub fn new(name: &str, state: RunState, vcpus: u32, samples: &[(u64, f64)]) -> Self {
        Self {
            name: name.to_string(),
            state,
            vcpus,
            samples: Mutex::new(
                samples
                    .iter()
                    .map(|(ns, t)| CpuCounterSample::new(*ns, *t))
                    .collect(),
            ),
        }
    }

    pub fn running(name: &str, vcpus: u32, samples: &[(u64, f64)]) -> Self {
        Self::new(name, RunState::Running, vcpus, samples)
    }
}

#[async_trait]
impl VmHandle for MockVm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn uuid(&self) -> Result<String> {
        Ok(format!("uuid-{}", self.name))
    }

    async fn run_state(&self) -> Result<RunState> {
        Ok(self.state)
    }

    async fn cpu_counter_sample(&self) -> Result<CpuCounterSample> {
        self.samples
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| HypervisorError::Command {
                command: "domstats".to_string(),
                message: "no samples left".to_string(),
            })
    }

    async fn vcpu_count(&self) -> Result<CpuCount> {
        Ok(CpuCount::new(self.vcpus).unwrap())
    }

    async fn memory_snapshot(&self) -> Result<MemorySnapshot> {
        Ok(MemorySnapshot {
            resident_bytes: 256 * 1024 * 1024,
            actual_bytes: 1024 * 1024 * 1024,
        })
    }

    async fn max_memory_bytes(&self) -> Result<u64> {
        Ok(1024 * 1024 * 1024)
    }

    async fn interface_stats(&self, _device: &str) -> Result<InterfaceStats> {
        Ok(InterfaceStats::default())
    }

    async fn block_stats(&self, _path: &str) -> Result<BlockStats> {
        Ok(BlockStats::default())
    }

    async fn descriptor(&self) -> Result<DomainDescriptor> {
        Ok(DomainDescriptor {
            os_type: Some("hvm".to_string()),
            ..DomainDescriptor::default()
        })
    }
}

/// Hands out each VM once, in lookup order
pub struct MockHypervisor {
    names: Vec<String>,
    vms: Mutex<HashMap<String, MockVm>>,
}

impl MockHypervisor {
    pub fn new(vms: Vec<MockVm>) -> Self {
        Self {
            names: vms.iter().map(|vm| vm.name.clone()).collect(),
            vms: Mutex::new(vms.into_iter().map(|vm| (vm.name.clone(), vm)).collect()),
        }
    }
}

#[async_trait]
impl Hypervisor for MockHypervisor {
    type Vm = MockVm;

    fn uri(&self) -> &str {
        "test:///default"
    }

    async fn list_vm_names(&self) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }

    async fn lookup_vm(&self, name: &str) -> Result<MockVm> {
        self.vms
            .lock()
            .unwrap()
            .remove(name)
            .ok_or_else(|| HypervisorError::NotFound(name.to_string()))
    }
}
