//! Sampling loop tests against a scripted VM
//!
//! The mock VM replays run states and CPU counter samples in order, so each
//! test controls exactly what the estimator sees.

use super::*;
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::hypervisor::{HypervisorError, Result as HvResult, VmHandle};
use crate::models::{
    BlockStats, CpuCount, CpuCounterSample, DomainDescriptor, InterfaceStats, MemorySnapshot,
    RunState,
};
use crate::observability::SamplerMetrics;
use crate::record::RecordFormat;
use crate::sink::{FileRecordSink, MemorySink, RecordSink};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const VM: &str = "debian12";

struct MockVm {
    states: Mutex<VecDeque<RunState>>,
    samples: Mutex<VecDeque<CpuCounterSample>>,
    vcpus: u32,
    descriptor: DomainDescriptor,
    fail_block_stats: bool,
    interface_calls: AtomicUsize,
}

impl MockVm {
    /// `running_iterations` running states followed by shut off
    fn new(running_iterations: usize, samples: &[(u64, f64)]) -> Self {
        let mut states: VecDeque<RunState> =
            std::iter::repeat(RunState::Running).take(running_iterations).collect();
        states.push_back(RunState::Shutoff);

        Self {
            states: Mutex::new(states),
            samples: Mutex::new(
                samples
                    .iter()
                    .map(|(ns, t)| CpuCounterSample::new(*ns, *t))
                    .collect(),
            ),
            vcpus: 1,
            descriptor: DomainDescriptor {
                disk_image: Some("/var/lib/libvirt/images/debian12.qcow2".to_string()),
                network_device: Some("vnet3".to_string()),
                ..DomainDescriptor::default()
            },
            fail_block_stats: false,
            interface_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VmHandle for MockVm {
    fn name(&self) -> &str {
        VM
    }

    async fn uuid(&self) -> HvResult<String> {
        Ok("5f0a5b5e".to_string())
    }

    async fn run_state(&self) -> HvResult<RunState> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunState::Shutoff))
    }

    async fn cpu_counter_sample(&self) -> HvResult<CpuCounterSample> {
        self.samples
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| HypervisorError::parse("domstats", "script exhausted"))
    }

    async fn vcpu_count(&self) -> HvResult<CpuCount> {
        Ok(CpuCount::new(self.vcpus).unwrap())
    }

    async fn memory_snapshot(&self) -> HvResult<MemorySnapshot> {
        Ok(MemorySnapshot {
            resident_bytes: 512 * 1024 * 1024,
            actual_bytes: 2048 * 1024 * 1024,
        })
    }

    async fn max_memory_bytes(&self) -> HvResult<u64> {
        Ok(2048 * 1024 * 1024)
    }

    async fn interface_stats(&self, _device: &str) -> HvResult<InterfaceStats> {
        self.interface_calls.fetch_add(1, Ordering::SeqCst);
        Ok(InterfaceStats {
            rx_bytes: 100,
            rx_packets: 2,
            rx_errs: 0,
            rx_drop: 0,
            tx_bytes: 50,
            tx_packets: 1,
            tx_errs: 0,
            tx_drop: 0,
        })
    }

    async fn block_stats(&self, path: &str) -> HvResult<BlockStats> {
        if self.fail_block_stats {
            return Err(HypervisorError::Command {
                command: format!("domblkstat {} {}", VM, path),
                message: "error: Unable to read from monitor".to_string(),
            });
        }
        Ok(BlockStats {
            rd_req: 10,
            rd_bytes: 4096,
            wr_req: 5,
            wr_bytes: 2048,
            errs: -1,
        })
    }

    async fn descriptor(&self) -> HvResult<DomainDescriptor> {
        Ok(self.descriptor.clone())
    }
}

fn build(vm: MockVm, sink: Arc<dyn RecordSink>) -> SamplingLoop<MockVm> {
    SamplingLoopBuilder::new()
        .vm(vm)
        .sink(sink)
        .delay(Duration::from_millis(1))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_records_until_vm_stops() {
    let vm = MockVm::new(2, &[(0, 0.0), (2_000_000_000, 2.0), (2_000_000_000, 2.0), (3_000_000_000, 4.0)]);
    let sink = Arc::new(MemorySink::new());
    let (_tx, rx) = broadcast::channel(1);

    let summary = build(vm, sink.clone()).run(rx).await.unwrap();

    assert_eq!(summary.iterations, 2);
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.stop_reason, StopReason::VmStopped(RunState::Shutoff));

    let records = sink.records(VM).await;
    assert_eq!(records.len(), 2);
    assert!(records[0].starts_with("[{'cpu_usage_percentage': 100.0}, 25.0, {'rx_bytes': 100"));
    assert!(records[1].starts_with("[{'cpu_usage_percentage': 50.0}, 25.0, "));
    assert!(records[1].ends_with("{'rd_req': 10, 'rd_bytes': 4096, 'wr_req': 5, 'wr_bytes': 2048, 'errs': -1}]"));
}

#[tokio::test]
async fn test_stopped_vm_writes_nothing() {
    let vm = MockVm::new(0, &[]);
    let sink = Arc::new(MemorySink::new());
    let (_tx, rx) = broadcast::channel(1);

    let summary = build(vm, sink.clone()).run(rx).await.unwrap();

    assert_eq!(summary.iterations, 0);
    assert_eq!(summary.stop_reason, StopReason::VmStopped(RunState::Shutoff));
    assert!(sink.records(VM).await.is_empty());
}

#[tokio::test]
async fn test_counter_reset_skips_record_and_continues() {
    // Second iteration sees the counter drop after a VM restart
    let vm = MockVm::new(
        3,
        &[
            (5_000_000_000, 10.0),
            (6_000_000_000, 11.0),
            (6_000_000_000, 11.0),
            (1_000_000, 12.0),
            (1_000_000, 12.0),
            (501_000_000, 13.0),
        ],
    );
    let sink = Arc::new(MemorySink::new());
    let metrics = SamplerMetrics::new().unwrap();
    let health = HealthRegistry::new();
    let (_tx, rx) = broadcast::channel(1);

    let sampling_loop = SamplingLoopBuilder::new()
        .vm(vm)
        .sink(sink.clone())
        .delay(Duration::from_millis(1))
        .metrics(metrics.clone())
        .health(health.clone())
        .build()
        .unwrap();

    let summary = sampling_loop.run(rx).await.unwrap();

    assert_eq!(summary.iterations, 3);
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.counter_resets, 1);

    let records = sink.records(VM).await;
    assert!(records[0].starts_with("[{'cpu_usage_percentage': 100.0}"));
    assert!(records[1].starts_with("[{'cpu_usage_percentage': 50.0}"));

    let text = metrics.encode().unwrap();
    assert!(text.contains("vm_telemetry_counter_resets_total{vm=\"debian12\"} 1"));
    assert!(text.contains("vm_telemetry_samples_recorded_total{vm=\"debian12\"} 2"));

    // Recorded after the reset, so the sampler is healthy again
    let health = health.health().await;
    assert_eq!(health.components[components::SAMPLER].status, ComponentStatus::Healthy);
}

#[tokio::test]
async fn test_invalid_interval_is_skipped() {
    let vm = MockVm::new(1, &[(0, 5.0), (1_000_000_000, 5.0)]);
    let sink = Arc::new(MemorySink::new());
    let (_tx, rx) = broadcast::channel(1);

    let summary = build(vm, sink.clone()).run(rx).await.unwrap();

    assert_eq!(summary.invalid_intervals, 1);
    assert_eq!(summary.records_written, 0);
    assert!(sink.records(VM).await.is_empty());
}

#[tokio::test]
async fn test_descriptor_without_devices_renders_none() {
    let mut vm = MockVm::new(1, &[(0, 0.0), (0, 1.0)]);
    vm.descriptor = DomainDescriptor::default();
    let sink = Arc::new(MemorySink::new());
    let (_tx, rx) = broadcast::channel(1);

    let sampling_loop = build(vm, sink.clone());
    sampling_loop.run(rx).await.unwrap();

    assert_eq!(
        sink.records(VM).await,
        vec!["[{'cpu_usage_percentage': 0.0}, 25.0, None, None]"]
    );
}

#[tokio::test]
async fn test_hypervisor_error_ends_run() {
    let mut vm = MockVm::new(5, &[(0, 0.0), (1_000_000_000, 1.0)]);
    vm.fail_block_stats = true;
    let sink = Arc::new(MemorySink::new());
    let health = HealthRegistry::new();
    let (_tx, rx) = broadcast::channel(1);

    let sampling_loop = SamplingLoopBuilder::new()
        .vm(vm)
        .sink(sink.clone())
        .delay(Duration::from_millis(1))
        .health(health.clone())
        .build()
        .unwrap();

    let err = sampling_loop.run(rx).await.unwrap_err();
    assert!(matches!(err, SamplerError::Hypervisor(HypervisorError::Command { .. })));
    assert!(sink.records(VM).await.is_empty());
    assert_eq!(health.health().await.status, ComponentStatus::Unhealthy);
}

#[tokio::test]
async fn test_shutdown_interrupts_sleep() {
    let vm = MockVm::new(100, &[(0, 0.0), (1, 1.0)]);
    let sink = Arc::new(MemorySink::new());
    let (tx, rx) = broadcast::channel(1);

    let sampling_loop = SamplingLoopBuilder::new()
        .vm(vm)
        .sink(sink.clone())
        .delay(Duration::from_secs(3600))
        .build()
        .unwrap();

    let handle = tokio::spawn(sampling_loop.run(rx));
    tx.send(()).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .unwrap()
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Shutdown);
    assert_eq!(summary.iterations, 0);
}

#[tokio::test]
async fn test_json_records_to_file() {
    let temp_dir = TempDir::new().unwrap();
    let vm = MockVm::new(1, &[(0, 0.0), (1_000_000_000, 4.0)]);
    let sink = Arc::new(FileRecordSink::new(temp_dir.path()));
    let (_tx, rx) = broadcast::channel(1);

    let sampling_loop = SamplingLoopBuilder::new()
        .vm(vm)
        .sink(sink)
        .delay(Duration::from_millis(1))
        .record_format(RecordFormat::Json)
        .build()
        .unwrap();
    sampling_loop.run(rx).await.unwrap();

    let content = tokio::fs::read_to_string(temp_dir.path().join("debian12.dat"))
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
    assert_eq!(value[0]["cpu_usage_percentage"], 25.0);
    assert_eq!(value[2]["tx_bytes"], 50);
}

#[tokio::test]
async fn test_builder_missing_vm() {
    let sink: Arc<dyn RecordSink> = Arc::new(MemorySink::new());
    let result = SamplingLoopBuilder::<MockVm>::new().sink(sink).build();

    assert!(matches!(result, Err(SamplerError::MissingComponent(_))));
}

#[tokio::test]
async fn test_builder_missing_sink() {
    let vm = MockVm::new(0, &[]);
    let result = SamplingLoopBuilder::new().vm(vm).build();

    assert!(matches!(result, Err(SamplerError::MissingComponent(_))));
}
