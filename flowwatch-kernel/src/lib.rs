//! FlowWatch kernel: water-flow sensor telemetry ingestion.
//!
//! A [`Session`] owns the [`SensorStore`], the live WebSocket
//! [`TelemetryAdapter`] and the simulated [`FallbackGenerator`], and keeps
//! exactly one of the two sources feeding the store at any time.

pub mod adapter;
pub mod config;
pub mod fallback;
pub mod health;
pub mod http;
pub mod models;
pub mod parser;
pub mod session;
pub mod state;
pub mod store;

pub use adapter::{AdapterError, LinkEvent, LinkState, TelemetryAdapter};
pub use config::{load_config, KernelConfig};
pub use fallback::{FallbackGenerator, FallbackSettings};
pub use models::{FeedSource, IngestStats, SensorReading, SensorRecord, StoreSnapshot, ACTIVE_THRESHOLD};
pub use parser::{MessageParser, ParseError, ParseStrategy};
pub use session::{Session, SessionOptions};
pub use store::{ApplyOutcome, SensorStore};
