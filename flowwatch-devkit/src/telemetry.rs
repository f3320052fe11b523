/*!
Telemetry frames as the flow-sensor firmware emits them

- `WireFormat` encodes a reading in either accepted form
  (`{"sensorId":..,"flowRate":..}` or `ID:VALUE`)
- `flow_from_pulses` reproduces the firmware's pulse-to-flow conversion
- `TelemetryMessageBuilder` produces valid and deliberately broken frames
  for ingestion tests
*/

use serde::Serialize;
use std::time::Duration;

/// Pulses per second per L/min for a YF-S201 hall-effect flow sensor.
pub const YF_S201_PULSE_FACTOR: f64 = 7.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Json,
    Colon,
}

impl WireFormat {
    pub fn encode(&self, sensor_id: &str, flow_rate: f64) -> String {
        match self {
            WireFormat::Json => TelemetryMessageBuilder::json(sensor_id, flow_rate),
            WireFormat::Colon => TelemetryMessageBuilder::colon(sensor_id, flow_rate),
        }
    }
}

impl std::str::FromStr for WireFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "colon" | "text" => Ok(WireFormat::Colon),
            other => anyhow::bail!("unknown wire format: {}", other),
        }
    }
}

/// Flow in L/min from the pulses counted during `window`.
pub fn flow_from_pulses(pulses: u32, window: Duration) -> f64 {
    let secs = window.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    (pulses as f64 / secs) / YF_S201_PULSE_FACTOR
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireReading<'a> {
    sensor_id: &'a str,
    flow_rate: f64,
}

/// Builders for frames sent through the feed stub.
pub struct TelemetryMessageBuilder;

impl TelemetryMessageBuilder {
    pub fn json(sensor_id: &str, flow_rate: f64) -> String {
        serde_json::to_string(&WireReading { sensor_id, flow_rate })
            .unwrap_or_else(|_| format!("{{\"sensorId\":\"{}\",\"flowRate\":0}}", sensor_id))
    }

    pub fn colon(sensor_id: &str, flow_rate: f64) -> String {
        format!("{}:{}", sensor_id, flow_rate)
    }

    pub fn malformed() -> String {
        "garbage".to_string()
    }

    pub fn negative_flow(sensor_id: &str) -> String {
        format!("{{\"sensorId\":\"{}\",\"flowRate\":-4.0}}", sensor_id)
    }

    /// Frame cut off right after the `flowRate` key.
    pub fn truncated_json(sensor_id: &str) -> String {
        format!("{{\"sensorId\":\"{}\",\"flowRate\":", sensor_id)
    }
}
