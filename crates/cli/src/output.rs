//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use telemetry_lib::RunState;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a table from a list of rows, or their JSON form
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                print_warning("No VMs found");
                return Ok(());
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }
    Ok(())
}

/// Print a bold section title with an underline
pub fn print_title(title: &str, width: usize) {
    println!("{}", title.bold());
    println!("{}", "=".repeat(width));
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a nanosecond CPU counter as seconds
pub fn format_cpu_time(nanos: u64) -> String {
    format!("{:.1}s", nanos as f64 / 1_000_000_000.0)
}

/// Format an optional descriptor field
pub fn or_dash(value: Option<&str>) -> String {
    value.unwrap_or("-").to_string()
}

/// Color a run state for display
pub fn color_state(state: RunState) -> String {
    let label = state.as_str();
    match state {
        RunState::Running => label.green().to_string(),
        RunState::Blocked | RunState::Paused | RunState::Suspended => label.yellow().to_string(),
        RunState::Crashed => label.red().to_string(),
        RunState::Shutdown | RunState::Shutoff | RunState::Unknown => label.dimmed().to_string(),
    }
}

/// Color a utilization percentage by load
pub fn color_percentage(pct: f64) -> String {
    let formatted = format!("{:.1}%", pct);
    if pct >= 90.0 {
        formatted.red().to_string()
    } else if pct >= 60.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}
