/**
 * TELEMETRY PARSER - Decodes raw feed messages into sensor readings
 *
 * ROLE: The firmware emits either `{"sensorId": "S001", "flowRate": 12.5}`
 * or the short form `S001:12.5`. Each form is one `ParseStrategy`; the
 * `MessageParser` tries them in order and keeps the first success.
 *
 * UTILITY: Strategies can be tested in isolation from the store, and a new
 * wire form is one more entry in the list.
 */

use crate::models::SensorReading;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("not a JSON reading: {0}")]
    Json(String),
    #[error("expected ID:VALUE")]
    NotColonPair,
    #[error("empty sensor id")]
    EmptySensorId,
    #[error("flow rate must be finite and non-negative, got {0}")]
    InvalidFlowRate(f64),
    #[error("no strategy recognised the message")]
    Unrecognized,
}

pub trait ParseStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, text: &str) -> Result<SensorReading, ParseError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReading {
    sensor_id: String,
    flow_rate: f64,
}

/// `{"sensorId": "<string>", "flowRate": <number>}`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonStrategy;

impl ParseStrategy for JsonStrategy {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, text: &str) -> Result<SensorReading, ParseError> {
        let wire: WireReading =
            serde_json::from_str(text).map_err(|e| ParseError::Json(e.to_string()))?;
        SensorReading::new(wire.sensor_id, wire.flow_rate)
    }
}

/// `<sensorId>:<flowRate>`, both tokens trimmed. A value that does not parse
/// as a number reads as 0; one that parses but is negative or infinite is
/// rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColonPairStrategy;

impl ParseStrategy for ColonPairStrategy {
    fn name(&self) -> &'static str {
        "colon"
    }

    fn parse(&self, text: &str) -> Result<SensorReading, ParseError> {
        let mut parts = text.split(':');
        let (Some(id), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::NotColonPair);
        };
        let flow = value.trim().parse::<f64>().unwrap_or(0.0);
        SensorReading::new(id.trim(), flow)
    }
}

pub struct MessageParser {
    strategies: Vec<Box<dyn ParseStrategy>>,
}

impl MessageParser {
    pub fn new(strategies: Vec<Box<dyn ParseStrategy>>) -> Self {
        Self { strategies }
    }

    /// Tries each strategy in order. Returns the first reading produced, or
    /// `Unrecognized` when every strategy fails.
    pub fn parse(&self, text: &str) -> Result<SensorReading, ParseError> {
        for strategy in &self.strategies {
            match strategy.parse(text) {
                Ok(reading) => return Ok(reading),
                Err(e) => tracing::trace!("[parser] {} rejected message: {e}", strategy.name()),
            }
        }
        Err(ParseError::Unrecognized)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new(vec![Box::new(JsonStrategy), Box::new(ColonPairStrategy)])
    }
}
