//! Fixed-delay sampling of a single VM
//!
//! Every iteration brackets a sleep with two CPU counter reads, derives the
//! utilization over that interval, adds memory, network and block snapshots,
//! and appends one record to the sink. Sampling ends when the VM leaves the
//! running state or a shutdown signal arrives.

mod r#loop;

#[cfg(test)]
mod tests;

pub use r#loop::{
    LoopSummary, SamplingConfig, SamplingLoop, SamplingLoopBuilder, StopReason,
};

use crate::hypervisor::HypervisorError;
use crate::sink::SinkError;
use thiserror::Error;

/// Errors that end a sampling run
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("{0} is required")]
    MissingComponent(&'static str),
}
