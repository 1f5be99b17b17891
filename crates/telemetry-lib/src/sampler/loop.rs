//! Sampling loop
//!
//! Iterations run strictly one after another. The delay is fixed when the
//! loop is built and never re-read.

use super::SamplerError;
use crate::config::AgentConfig;
use crate::health::{components, HealthRegistry};
use crate::hypervisor::VmHandle;
use crate::models::{CpuCounterSample, DomainDescriptor, RunState, SampleRecord};
use crate::observability::{SamplerMetrics, StructuredLogger};
use crate::record::RecordFormat;
use crate::sink::RecordSink;
use crate::utilization::{estimate_cpu_utilization, UtilizationError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Sleep between the two CPU counter reads of an iteration (default: 5 seconds)
    pub delay: Duration,
    /// Layout of each dataset line
    pub record_format: RecordFormat,
    /// Log each record at debug level
    pub debug_records: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            record_format: RecordFormat::Tuple,
            debug_records: false,
        }
    }
}

impl From<&AgentConfig> for SamplingConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            delay: config.delay,
            record_format: config.record_format,
            debug_records: config.debug,
        }
    }
}

/// Why a sampling run ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The VM was observed in a state other than running
    VmStopped(RunState),
    /// A shutdown signal was received
    Shutdown,
}

/// Counters describing a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub iterations: u64,
    pub records_written: u64,
    pub counter_resets: u64,
    pub invalid_intervals: u64,
    pub stop_reason: StopReason,
}

enum Iteration {
    Recorded,
    CounterReset,
    InvalidInterval,
}

/// Samples one VM until it stops running
pub struct SamplingLoop<V> {
    vm: V,
    sink: Arc<dyn RecordSink>,
    config: SamplingConfig,
    metrics: Option<SamplerMetrics>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl<V: VmHandle> SamplingLoop<V> {
    pub fn new(vm: V, sink: Arc<dyn RecordSink>, config: SamplingConfig) -> Self {
        let logger = StructuredLogger::new(vm.name()).with_record_logging(config.debug_records);
        Self {
            vm,
            sink,
            config,
            metrics: None,
            health: None,
            logger,
        }
    }

    /// Run until the VM stops, a shutdown arrives, or a collaborator fails
    pub async fn run(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<LoopSummary, SamplerError> {
        info!(
            vm = %self.vm.name(),
            delay_secs = self.config.delay.as_secs_f64(),
            "Starting sampling loop"
        );

        let result = self.sample_until_stopped(&mut shutdown).await;

        match &result {
            Ok(summary) => match summary.stop_reason {
                StopReason::VmStopped(state) => {
                    self.logger.log_vm_stopped(state.as_str(), summary.iterations)
                }
                StopReason::Shutdown => info!(vm = %self.vm.name(), "Sampling loop interrupted"),
            },
            Err(e) => {
                self.logger.log_failure(e);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_collection_errors();
                }
                if let Some(health) = &self.health {
                    let component = match e {
                        SamplerError::Sink(_) => components::SINK,
                        _ => components::HYPERVISOR,
                    };
                    health.set_unhealthy(component, e.to_string()).await;
                }
            }
        }

        result
    }

    async fn sample_until_stopped(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<LoopSummary, SamplerError> {
        // The descriptor names the devices to query and does not change while running
        let descriptor = self.vm.descriptor().await?;
        debug!(vm = %self.vm.name(), ?descriptor, "Loaded domain descriptor");

        let mut summary = LoopSummary {
            iterations: 0,
            records_written: 0,
            counter_resets: 0,
            invalid_intervals: 0,
            stop_reason: StopReason::Shutdown,
        };

        loop {
            let state = self.vm.run_state().await?;
            if !state.is_running() {
                summary.stop_reason = StopReason::VmStopped(state);
                break;
            }

            let previous = self.vm.cpu_counter_sample().await?;

            tokio::select! {
                _ = tokio::time::sleep(self.config.delay) => {}
                _ = shutdown.recv() => {
                    summary.stop_reason = StopReason::Shutdown;
                    break;
                }
            }

            summary.iterations += 1;
            match self.sample_once(&descriptor, &previous).await? {
                Iteration::Recorded => summary.records_written += 1,
                Iteration::CounterReset => summary.counter_resets += 1,
                Iteration::InvalidInterval => summary.invalid_intervals += 1,
            }
        }

        Ok(summary)
    }

    /// Complete one iteration from the `previous` counter read taken before the sleep
    async fn sample_once(
        &self,
        descriptor: &DomainDescriptor,
        previous: &CpuCounterSample,
    ) -> Result<Iteration, SamplerError> {
        let start = Instant::now();
        let vm = self.vm.name();

        let current = self.vm.cpu_counter_sample().await?;
        let memory = self.vm.memory_snapshot().await?;
        let cpu_count = self.vm.vcpu_count().await?;

        let cpu_usage_percentage = match estimate_cpu_utilization(previous, &current, cpu_count) {
            Ok(pct) => pct,
            Err(UtilizationError::CounterRegression {
                previous_ns,
                current_ns,
            }) => {
                self.logger.log_counter_reset(previous_ns, current_ns);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_counter_resets(vm);
                }
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::SAMPLER, "cpu counter reset")
                        .await;
                }
                return Ok(Iteration::CounterReset);
            }
            Err(UtilizationError::InvalidInterval { elapsed_secs }) => {
                self.logger.log_invalid_interval(elapsed_secs);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_invalid_intervals(vm);
                }
                return Ok(Iteration::InvalidInterval);
            }
        };

        let network = match &descriptor.network_device {
            Some(device) => Some(self.vm.interface_stats(device).await?),
            None => None,
        };
        let io = match &descriptor.disk_image {
            Some(path) => Some(self.vm.block_stats(path).await?),
            None => None,
        };

        let record = SampleRecord {
            cpu_usage_percentage,
            memory_percentage: memory.percentage_of_actual(),
            network,
            io,
        };

        if let Some(metrics) = &self.metrics {
            metrics.observe_collection_latency(start.elapsed().as_secs_f64());
        }

        let line = self.config.record_format.render(&record);
        self.logger.log_sample(&record, &memory, &line);
        self.sink.append(vm, &line).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_sample(vm, &record);
        }
        if let Some(health) = &self.health {
            health.set_healthy(components::SAMPLER).await;
        }

        Ok(Iteration::Recorded)
    }
}

/// Builder for creating a sampling loop
pub struct SamplingLoopBuilder<V> {
    vm: Option<V>,
    sink: Option<Arc<dyn RecordSink>>,
    config: SamplingConfig,
    metrics: Option<SamplerMetrics>,
    health: Option<HealthRegistry>,
}

impl<V: VmHandle> SamplingLoopBuilder<V> {
    pub fn new() -> Self {
        Self {
            vm: None,
            sink: None,
            config: SamplingConfig::default(),
            metrics: None,
            health: None,
        }
    }

    /// Set the VM to sample
    pub fn vm(mut self, vm: V) -> Self {
        self.vm = Some(vm);
        self
    }

    /// Set the record destination
    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SamplingConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the sampling delay
    pub fn delay(mut self, delay: Duration) -> Self {
        self.config.delay = delay;
        self
    }

    /// Set the record layout
    pub fn record_format(mut self, format: RecordFormat) -> Self {
        self.config.record_format = format;
        self
    }

    /// Report through Prometheus metrics
    pub fn metrics(mut self, metrics: SamplerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Report component health
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<SamplingLoop<V>, SamplerError> {
        let vm = self.vm.ok_or(SamplerError::MissingComponent("VM handle"))?;
        let sink = self.sink.ok_or(SamplerError::MissingComponent("Record sink"))?;

        let mut sampling_loop = SamplingLoop::new(vm, sink, self.config);
        sampling_loop.metrics = self.metrics;
        sampling_loop.health = self.health;
        Ok(sampling_loop)
    }
}

impl<V: VmHandle> Default for SamplingLoopBuilder<V> {
    fn default() -> Self {
        Self::new()
    }
}
