//! Subcommand implementations

pub mod cpu;
pub mod vms;

#[cfg(test)]
pub(crate) mod testing;
