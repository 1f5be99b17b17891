//! One-shot CPU utilization measurement

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::time::Duration;
use telemetry_lib::hypervisor::{Hypervisor, VmHandle};
use telemetry_lib::utilization::{clamp_percentage, estimate_cpu_utilization, UtilizationError};

use crate::output::{color_percentage, print_title, print_warning, OutputFormat};

#[derive(Debug, Serialize)]
struct CpuMeasurement {
    vm: String,
    vcpus: u32,
    interval_secs: f64,
    cpu_time_delta_ns: u64,
    cpu_usage_percentage: f64,
}

#[derive(Debug)]
enum Measurement {
    Usage(CpuMeasurement),
    /// The counter went backwards between the two reads
    Restarted,
}

async fn take_measurement<V: VmHandle>(vm: &V, interval: Duration) -> Result<Measurement> {
    let state = vm.run_state().await?;
    if !state.is_running() {
        bail!("{} is {}, not running", vm.name(), state);
    }

    let cpu_count = vm.vcpu_count().await?;
    let previous = vm.cpu_counter_sample().await?;
    tokio::time::sleep(interval).await;
    let current = vm.cpu_counter_sample().await?;

    let raw = match estimate_cpu_utilization(&previous, &current, cpu_count) {
        Ok(pct) => pct,
        Err(UtilizationError::CounterRegression { .. }) => return Ok(Measurement::Restarted),
        Err(e) => return Err(e.into()),
    };

    Ok(Measurement::Usage(CpuMeasurement {
        vm: vm.name().to_string(),
        vcpus: cpu_count.get(),
        interval_secs: current.timestamp_secs - previous.timestamp_secs,
        cpu_time_delta_ns: current.cumulative_cpu_time_ns - previous.cumulative_cpu_time_ns,
        cpu_usage_percentage: raw,
    }))
}

/// Read the CPU counter twice `interval` seconds apart and report utilization
pub async fn measure_cpu<H: Hypervisor>(
    hypervisor: &H,
    name: &str,
    interval: u64,
    format: OutputFormat,
) -> Result<()> {
    if interval == 0 {
        bail!("--interval must be at least 1 second");
    }

    let vm = hypervisor
        .lookup_vm(name)
        .await
        .with_context(|| format!("Failed to find the domain {}", name))?;

    let measurement = match take_measurement(&vm, Duration::from_secs(interval)).await? {
        Measurement::Usage(measurement) => measurement,
        Measurement::Restarted => {
            print_warning(&format!("{} restarted during the measurement; try again", name));
            return Ok(());
        }
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&measurement)?);
        }
        OutputFormat::Table => {
            print_title("CPU Utilization", 40);
            println!("VM:        {}", measurement.vm.cyan());
            println!("vCPUs:     {}", measurement.vcpus);
            println!("Interval:  {:.3}s", measurement.interval_secs);
            println!(
                "Usage:     {}",
                color_percentage(clamp_percentage(measurement.cpu_usage_percentage))
            );
        }
    }

    Ok(())
}
