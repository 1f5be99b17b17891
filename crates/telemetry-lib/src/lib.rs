//! Telemetry library for libvirt-managed virtual machines
//!
//! This crate provides the core functionality for:
//! - CPU utilization estimation from cumulative counters
//! - Hypervisor access through the `virsh` management CLI
//! - The fixed-delay sampling loop and its record format
//! - Per-VM record storage
//! - Configuration, health checks and observability

pub mod config;
pub mod health;
pub mod hypervisor;
pub mod models;
pub mod observability;
pub mod record;
pub mod sampler;
pub mod sink;
pub mod utilization;

pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse};
pub use models::*;
pub use observability::{SamplerMetrics, StructuredLogger};
pub use utilization::{estimate_cpu_utilization, UtilizationError};
