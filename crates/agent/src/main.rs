//! VM Telemetry Agent
//!
//! Samples CPU, memory, network and disk telemetry for one libvirt VM at a
//! fixed delay and appends one record per sample to `<dataset>/<vm>.dat`.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use telemetry_lib::{
    health::{components, HealthRegistry},
    hypervisor::{Hypervisor, ProcessRunner, VirshHypervisor},
    observability::{SamplerMetrics, StructuredLogger},
    sampler::{SamplingConfig, SamplingLoopBuilder, StopReason},
    sink::FileRecordSink,
};
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let args = config::AgentArgs::parse();
    let config = args.resolve_config()?;

    // RUST_LOG wins; otherwise the configured debug flag picks the level
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(fmt::layer().json())
        .init();

    let logger = StructuredLogger::new(&args.vm);
    logger.log_startup(AGENT_VERSION, &config.uri, config.delay.as_secs());

    let health_registry = HealthRegistry::new();
    health_registry.register(components::SAMPLER).await;
    health_registry.register(components::HYPERVISOR).await;
    health_registry.register(components::SINK).await;

    let metrics = SamplerMetrics::new().context("Failed to register metrics")?;

    if let Some(port) = config.metrics_port {
        let app_state = Arc::new(api::AppState::new(
            health_registry.clone(),
            metrics.clone(),
        ));
        api::spawn_server(port, app_state);
    }

    let hypervisor = VirshHypervisor::open(&config.uri, &config.virsh, ProcessRunner)
        .await
        .with_context(|| format!("Failed to open connection to {}", config.uri))?;

    let vm = hypervisor
        .lookup_vm(&args.vm)
        .await
        .with_context(|| format!("Failed to find the domain {}", args.vm))?;

    let sink = Arc::new(FileRecordSink::new(&config.dataset_path));
    info!(
        dataset = %sink.dataset_dir().display(),
        format = ?config.record_format,
        "Writing records"
    );

    let sampling_loop = SamplingLoopBuilder::new()
        .vm(vm)
        .sink(sink)
        .config(SamplingConfig::from(&config))
        .metrics(metrics)
        .health(health_registry)
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_tx.send(());
        }
    });

    let result = sampling_loop.run(shutdown_rx).await;
    drop(shutdown_tx);
    // The loop owned the last VM handle; this releases the connection
    drop(hypervisor);

    match result {
        Ok(summary) => {
            let reason = match summary.stop_reason {
                StopReason::VmStopped(_) => "VM stopped running",
                StopReason::Shutdown => "SIGINT received",
            };
            info!(
                iterations = summary.iterations,
                records_written = summary.records_written,
                counter_resets = summary.counter_resets,
                invalid_intervals = summary.invalid_intervals,
                "Sampling finished"
            );
            logger.log_shutdown(reason);
            Ok(())
        }
        Err(e) => {
            logger.log_shutdown("sampling failed");
            Err(e).with_context(|| format!("Sampling of {} failed", args.vm))
        }
    }
}
