//! Observability infrastructure for the sampler
//!
//! Provides:
//! - Prometheus metrics (records written, counter resets, latest utilization)
//! - Structured event logging with tracing

use crate::models::{MemorySnapshot, SampleRecord};
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use tracing::{debug, error, info, warn};

/// Histogram buckets for one collection pass, excluding the sampling delay (seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

/// Sampler metrics, registered on a private registry
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct SamplerMetrics {
    registry: Registry,
    samples_recorded: IntCounterVec,
    counter_resets: IntCounterVec,
    invalid_intervals: IntCounterVec,
    cpu_usage_percent: GaugeVec,
    memory_usage_percent: GaugeVec,
    collection_latency_seconds: Histogram,
    collection_errors: IntCounter,
}

impl SamplerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let samples_recorded = IntCounterVec::new(
            Opts::new(
                "vm_telemetry_samples_recorded_total",
                "Records appended to the dataset",
            ),
            &["vm"],
        )?;
        let counter_resets = IntCounterVec::new(
            Opts::new(
                "vm_telemetry_counter_resets_total",
                "CPU counter regressions observed, usually VM restarts",
            ),
            &["vm"],
        )?;
        let invalid_intervals = IntCounterVec::new(
            Opts::new(
                "vm_telemetry_invalid_intervals_total",
                "Sample pairs rejected because wall time did not advance",
            ),
            &["vm"],
        )?;
        let cpu_usage_percent = GaugeVec::new(
            Opts::new(
                "vm_telemetry_cpu_usage_percent",
                "Most recent CPU utilization across all vCPUs",
            ),
            &["vm"],
        )?;
        let memory_usage_percent = GaugeVec::new(
            Opts::new(
                "vm_telemetry_memory_usage_percent",
                "Most recent resident memory as a share of balloon size",
            ),
            &["vm"],
        )?;
        let collection_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "vm_telemetry_collection_latency_seconds",
                "Time spent querying the hypervisor per iteration",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        let collection_errors = IntCounter::new(
            "vm_telemetry_collection_errors_total",
            "Iterations aborted by hypervisor or storage errors",
        )?;

        registry.register(Box::new(samples_recorded.clone()))?;
        registry.register(Box::new(counter_resets.clone()))?;
        registry.register(Box::new(invalid_intervals.clone()))?;
        registry.register(Box::new(cpu_usage_percent.clone()))?;
        registry.register(Box::new(memory_usage_percent.clone()))?;
        registry.register(Box::new(collection_latency_seconds.clone()))?;
        registry.register(Box::new(collection_errors.clone()))?;

        Ok(Self {
            registry,
            samples_recorded,
            counter_resets,
            invalid_intervals,
            cpu_usage_percent,
            memory_usage_percent,
            collection_latency_seconds,
            collection_errors,
        })
    }

    pub fn record_sample(&self, vm: &str, record: &SampleRecord) {
        self.samples_recorded.with_label_values(&[vm]).inc();
        self.cpu_usage_percent
            .with_label_values(&[vm])
            .set(record.cpu_usage_percentage);
        if let Some(mem) = record.memory_percentage {
            self.memory_usage_percent.with_label_values(&[vm]).set(mem);
        }
    }

    pub fn inc_counter_resets(&self, vm: &str) {
        self.counter_resets.with_label_values(&[vm]).inc();
    }

    pub fn inc_invalid_intervals(&self, vm: &str) {
        self.invalid_intervals.with_label_values(&[vm]).inc();
    }

    pub fn inc_collection_errors(&self) {
        self.collection_errors.inc();
    }

    pub fn observe_collection_latency(&self, duration_secs: f64) {
        self.collection_latency_seconds.observe(duration_secs);
    }

    /// Prometheus text exposition of all sampler metrics
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Event-tagged logging for one sampled VM
#[derive(Clone)]
pub struct StructuredLogger {
    vm: String,
    debug_records: bool,
}

impl StructuredLogger {
    pub fn new(vm: impl Into<String>) -> Self {
        Self {
            vm: vm.into(),
            debug_records: false,
        }
    }

    /// Also log every record at debug level
    pub fn with_record_logging(mut self, enabled: bool) -> Self {
        self.debug_records = enabled;
        self
    }

    pub fn vm(&self) -> &str {
        &self.vm
    }

    pub fn log_startup(&self, version: &str, uri: &str, delay_secs: u64) {
        info!(
            event = "agent_started",
            vm = %self.vm,
            agent_version = %version,
            uri = %uri,
            delay_secs = delay_secs,
            "VM telemetry agent started"
        );
    }

    pub fn log_sample(&self, record: &SampleRecord, memory: &MemorySnapshot, line: &str) {
        if self.debug_records {
            debug!(
                event = "sample_recorded",
                vm = %self.vm,
                cpu_usage_percentage = record.cpu_usage_percentage,
                memory_percentage = ?record.memory_percentage,
                resident_bytes = memory.resident_bytes,
                actual_bytes = memory.actual_bytes,
                record = %line,
                "Recorded sample"
            );
        }
    }

    pub fn log_counter_reset(&self, previous_ns: u64, current_ns: u64) {
        warn!(
            event = "counter_reset",
            vm = %self.vm,
            previous_ns = previous_ns,
            current_ns = current_ns,
            "CPU counter went backwards, taking a new baseline"
        );
    }

    pub fn log_invalid_interval(&self, elapsed_secs: f64) {
        warn!(
            event = "invalid_interval",
            vm = %self.vm,
            elapsed_secs = elapsed_secs,
            "Wall clock did not advance between samples, skipping"
        );
    }

    pub fn log_vm_stopped(&self, state: &str, iterations: u64) {
        info!(
            event = "vm_stopped",
            vm = %self.vm,
            state = %state,
            iterations = iterations,
            "VM left the running state, sampling finished"
        );
    }

    pub fn log_failure(&self, error: &dyn std::error::Error) {
        error!(
            event = "sampling_failed",
            vm = %self.vm,
            error = %error,
            "Sampling stopped on error"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            vm = %self.vm,
            reason = %reason,
            "VM telemetry agent shutting down"
        );
    }
}
