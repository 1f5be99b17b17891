//! Dataset record serialization
//!
//! A record is a 4-tuple of CPU percentage, memory percentage, network
//! counters and block I/O counters. The `tuple` format keeps the textual
//! list-of-mappings layout existing datasets use; `json` writes the same
//! four elements as a JSON array.

use crate::models::SampleRecord;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt::Write;
use std::str::FromStr;

/// On-disk layout of a record line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    #[default]
    Tuple,
    Json,
}

impl FromStr for RecordFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tuple" => Ok(RecordFormat::Tuple),
            "json" => Ok(RecordFormat::Json),
            other => Err(format!("unknown record format '{}'", other)),
        }
    }
}

impl RecordFormat {
    pub fn render(&self, record: &SampleRecord) -> String {
        match self {
            RecordFormat::Tuple => render_tuple(record),
            RecordFormat::Json => render_json(record).to_string(),
        }
    }
}

/// Floats always keep a decimal point so `100` reads back as a float
fn format_float(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn write_mapping(out: &mut String, fields: &[(&str, i64)]) {
    out.push('{');
    for (i, (name, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        let _ = write!(out, "'{}': {}", name, value);
    }
    out.push('}');
}

/// Render the list-of-mappings layout, e.g.
/// `[{'cpu_usage_percentage': 12.5}, 40.0, {'rx_bytes': 1, ...}, {'rd_req': 2, ...}]`
pub fn render_tuple(record: &SampleRecord) -> String {
    let mut out = String::with_capacity(256);

    let _ = write!(
        out,
        "[{{'cpu_usage_percentage': {}}}, ",
        format_float(record.cpu_usage_percentage)
    );

    match record.memory_percentage {
        Some(mem) => out.push_str(&format_float(mem)),
        None => out.push_str("None"),
    }
    out.push_str(", ");

    match &record.network {
        Some(net) => write_mapping(&mut out, &net.as_tuple()),
        None => out.push_str("None"),
    }
    out.push_str(", ");

    match &record.io {
        Some(io) => write_mapping(&mut out, &io.as_tuple()),
        None => out.push_str("None"),
    }
    out.push(']');

    out
}

fn counters_to_value(fields: &[(&str, i64)]) -> Value {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| (name.to_string(), Value::from(*value)))
        .collect();
    Value::Object(map)
}

/// Render the same four elements as a JSON array
pub fn render_json(record: &SampleRecord) -> Value {
    json!([
        { "cpu_usage_percentage": record.cpu_usage_percentage },
        record.memory_percentage,
        record.network.as_ref().map(|n| counters_to_value(&n.as_tuple())),
        record.io.as_ref().map(|io| counters_to_value(&io.as_tuple())),
    ])
}
