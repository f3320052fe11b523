/*!
# FlowWatch DevKit - Test tooling for telemetry ingestion

- `FeedStub`: local WebSocket server standing in for the sensor board
- `TelemetryMessageBuilder` / `WireFormat`: frames in both wire forms
- `TestHarness` and `wait_until`: async test helpers
*/

pub mod feed_stub;
pub mod telemetry;
pub mod test_utils;

pub use feed_stub::FeedStub;
pub use telemetry::{flow_from_pulses, TelemetryMessageBuilder, WireFormat, YF_S201_PULSE_FACTOR};
pub use test_utils::{wait_until, TestHarness};
