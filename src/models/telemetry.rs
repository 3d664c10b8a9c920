//! Telemetry records accumulated over the course of one run and persisted
//! verbatim to `telemetry.json`.

use serde::{Deserialize, Serialize};

use super::plan::Speaker;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Turn {
        phase: String,
        speaker: Speaker,
        latency_s: f64,
    },
    Tool {
        name: String,
        caller: Speaker,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        count: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        booked: Option<usize>,
        latency_s: f64,
    },
    MemoryUpdate {
        phase: String,
        claims_added: usize,
    },
}
