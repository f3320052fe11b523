//! Full sessions driven by the devkit feed stub.

use flowwatch_devkit::{wait_until, TelemetryMessageBuilder, TestHarness, WireFormat};
use flowwatch_kernel::{FallbackSettings, FeedSource, LinkState, Session, SessionOptions};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(50);

fn options(feed_url: String, reconnect_delay: Option<Duration>) -> SessionOptions {
    SessionOptions {
        sensors: ["S001", "S002", "S003", "S004"].map(String::from).to_vec(),
        feed_url,
        connect_timeout: Duration::from_secs(2),
        reconnect_delay,
        fallback: FallbackSettings { interval: TICK, ..Default::default() },
    }
}

async fn connected_session(harness: &TestHarness, reconnect: Option<Duration>) -> Session {
    let session = Session::new(options(harness.feed_url(), reconnect));
    session.start();
    harness.wait_connected(WAIT).await.unwrap();
    wait_until(WAIT, || {
        session.link_state() == LinkState::Connected && !session.is_simulating()
    })
    .await
    .unwrap();
    session
}

#[tokio::test]
async fn live_readings_replace_simulation() {
    let harness = TestHarness::new().await.unwrap();
    let session = connected_session(&harness, None).await;
    assert_eq!(session.snapshot().source, FeedSource::Live);

    let applied_before = session.store().stats().applied;
    harness.send_reading("S003", 7.5, WireFormat::Json).unwrap();
    wait_until(WAIT, || session.store().record("S003").unwrap().flow_rate() == 7.5)
        .await
        .unwrap();

    // several fallback intervals later only the live reading has been applied
    tokio::time::sleep(TICK * 6).await;
    assert_eq!(session.store().stats().applied, applied_before + 1);
    assert!(session.store().record("S003").unwrap().active());

    session.shutdown().await;
}

#[tokio::test]
async fn end_to_end_toggle_over_the_wire() {
    let harness = TestHarness::new().await.unwrap();
    let session = connected_session(&harness, None).await;
    let before = session.snapshot();

    harness.send_reading("S002", 3.0, WireFormat::Colon).unwrap();
    harness.send_reading("S002", 0.0, WireFormat::Json).unwrap();
    wait_until(WAIT, || session.store().stats().applied >= before.stats.applied + 2)
        .await
        .unwrap();

    let after = session.snapshot();
    let s2 = after.get("S002").unwrap();
    assert!(!s2.active());
    assert_eq!(s2.flow_rate(), 0.0);
    for id in ["S001", "S003", "S004"] {
        assert_eq!(after.get(id), before.get(id));
    }

    session.shutdown().await;
}

#[tokio::test]
async fn bad_frames_do_not_break_the_link() {
    let harness = TestHarness::new().await.unwrap();
    let session = connected_session(&harness, None).await;

    harness.send_malformed().unwrap();
    harness.send_raw(TelemetryMessageBuilder::negative_flow("S001")).unwrap();
    harness.send_raw(TelemetryMessageBuilder::truncated_json("S001")).unwrap();
    harness.send_raw(TelemetryMessageBuilder::json("S999", 5.0)).unwrap();
    harness.send_reading("S001", 2.0, WireFormat::Colon).unwrap();

    wait_until(WAIT, || session.store().record("S001").unwrap().flow_rate() == 2.0)
        .await
        .unwrap();
    let stats = session.store().stats();
    assert_eq!(stats.malformed, 3);
    assert_eq!(stats.unknown_sensor, 1);
    assert_eq!(session.snapshot().len(), 4);
    assert_eq!(session.link_state(), LinkState::Connected);

    session.shutdown().await;
}

#[tokio::test]
async fn disconnect_resumes_simulation() {
    let harness = TestHarness::new().await.unwrap();
    let session = connected_session(&harness, None).await;

    harness.drop_feed();
    wait_until(WAIT, || session.is_simulating()).await.unwrap();
    assert_eq!(session.link_state(), LinkState::Disconnected);
    assert_eq!(session.snapshot().source, FeedSource::Simulated);

    let applied = session.store().stats().applied;
    wait_until(TICK * 4, || session.store().stats().applied > applied)
        .await
        .unwrap();
    assert_eq!(session.health().get_health(session.store()).disconnects, 1);

    session.shutdown().await;
    assert!(!session.is_simulating());
}

#[tokio::test]
async fn reconnects_when_configured() {
    let harness = TestHarness::new().await.unwrap();
    let session = connected_session(&harness, Some(Duration::from_millis(100))).await;

    harness.drop_feed();
    wait_until(WAIT, || harness.feed.accepted() >= 2).await.unwrap();
    wait_until(WAIT, || {
        session.link_state() == LinkState::Connected && !session.is_simulating()
    })
    .await
    .unwrap();
    assert_eq!(session.snapshot().source, FeedSource::Live);

    harness.send_reading("S004", 1.25, WireFormat::Json).unwrap();
    wait_until(WAIT, || session.store().record("S004").unwrap().flow_rate() == 1.25)
        .await
        .unwrap();

    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_the_live_link() {
    let harness = TestHarness::new().await.unwrap();
    let session = connected_session(&harness, None).await;
    harness.send_reading("S001", 9.0, WireFormat::Colon).unwrap();
    wait_until(WAIT, || session.store().record("S001").unwrap().flow_rate() == 9.0)
        .await
        .unwrap();

    session.shutdown().await;
    session.shutdown().await;

    wait_until(WAIT, || harness.feed.connected() == 0).await.unwrap();
    assert_eq!(session.link_state(), LinkState::Disconnected);
    assert!(!session.is_simulating());
    // last values survive teardown
    assert_eq!(session.store().record("S001").unwrap().flow_rate(), 9.0);
}
