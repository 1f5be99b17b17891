//! CPU utilization from cumulative counters
//!
//! libvirt exposes a VM's CPU consumption as a monotonically increasing
//! nanosecond counter. Utilization over an interval is the counter delta
//! divided by the wall time elapsed across all vCPUs.
//!
//! Results are not clamped. A stale vCPU count or scheduling skew can push a
//! value slightly above 100; callers that present the number decide whether
//! to clamp it (see [`clamp_percentage`]).

use crate::models::{CpuCount, CpuCounterSample};
use thiserror::Error;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Reasons a pair of samples cannot produce a utilization figure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UtilizationError {
    /// The current sample is not strictly later than the previous one
    #[error("invalid sampling interval: {elapsed_secs}s elapsed between samples")]
    InvalidInterval { elapsed_secs: f64 },

    /// The counter went backwards, typically because the VM restarted.
    /// The current sample should become the new baseline.
    #[error("cpu counter regressed from {previous_ns}ns to {current_ns}ns")]
    CounterRegression { previous_ns: u64, current_ns: u64 },
}

/// Percentage of total vCPU capacity used between `previous` and `current`
pub fn estimate_cpu_utilization(
    previous: &CpuCounterSample,
    current: &CpuCounterSample,
    cpu_count: CpuCount,
) -> Result<f64, UtilizationError> {
    let elapsed_wall_secs = current.timestamp_secs - previous.timestamp_secs;
    // NaN compares false, so test for the valid range instead of <= 0
    if !(elapsed_wall_secs > 0.0 && elapsed_wall_secs.is_finite()) {
        return Err(UtilizationError::InvalidInterval {
            elapsed_secs: elapsed_wall_secs,
        });
    }

    let cpu_delta_ns = current
        .cumulative_cpu_time_ns
        .checked_sub(previous.cumulative_cpu_time_ns)
        .ok_or(UtilizationError::CounterRegression {
            previous_ns: previous.cumulative_cpu_time_ns,
            current_ns: current.cumulative_cpu_time_ns,
        })?;

    let elapsed_cpu_secs = cpu_delta_ns as f64 / NANOS_PER_SEC;
    let available_cpu_secs = elapsed_wall_secs * f64::from(cpu_count.get());

    Ok(elapsed_cpu_secs / available_cpu_secs * 100.0)
}

/// Clamp a raw utilization figure into `[0, 100]` for display
pub fn clamp_percentage(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}
