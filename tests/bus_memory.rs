//! Integration coverage for `MemoryBus` boundary behavior beyond its own unit tests, and for
//! the heartbeat loop's use of the bus's TTL key-value store (§8, §4.3/§4.4).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use switchboard::bus::memory::MemoryBus;
use switchboard::domain_types::{AgentName, HeartbeatIntervalSecs};
use switchboard::heartbeat::{emit_loop, HeartbeatMonitor};
use switchboard::Bus;
use tokio::sync::watch;

/// A message published to a channel with no subscribers is silently dropped, not buffered for a
/// later subscriber: broadcast fan-out only reaches listeners that were already attached.
#[tokio::test]
async fn publish_before_any_subscriber_is_lost() {
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    bus.publish("worker_a_channel", b"nobody home".to_vec()).await.unwrap();

    let mut stream = bus.subscribe("worker_a_channel").await.unwrap();
    bus.publish("worker_a_channel", b"second message".to_vec()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), stream.next()).await.unwrap().unwrap();
    assert_eq!(received, b"second message");
}

#[tokio::test]
async fn channels_are_isolated_from_one_another() {
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let mut a_stream = bus.subscribe("agent_a").await.unwrap();
    let mut b_stream = bus.subscribe("agent_b").await.unwrap();

    bus.publish("agent_a", b"for a".to_vec()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), a_stream.next()).await.unwrap().unwrap();
    assert_eq!(received, b"for a");

    let nothing_for_b = tokio::time::timeout(Duration::from_millis(100), b_stream.next()).await;
    assert!(nothing_for_b.is_err(), "agent_b's stream should not have received agent_a's message");
}

#[tokio::test]
async fn multiple_subscribers_to_the_same_channel_all_receive_the_message() {
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let mut first = bus.subscribe("frontend_broadcast").await.unwrap();
    let mut second = bus.subscribe("frontend_broadcast").await.unwrap();

    bus.publish("frontend_broadcast", b"announcement".to_vec()).await.unwrap();

    let a = tokio::time::timeout(Duration::from_secs(1), first.next()).await.unwrap().unwrap();
    let b = tokio::time::timeout(Duration::from_secs(1), second.next()).await.unwrap().unwrap();
    assert_eq!(a, b"announcement");
    assert_eq!(b, b"announcement");
}

#[tokio::test]
async fn emit_loop_keeps_the_heartbeat_monitor_reporting_ready_until_cancelled() {
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let agent = AgentName::try_new("worker_a".to_string()).unwrap();
    let interval = HeartbeatIntervalSecs::try_new(1).unwrap();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let emitter = tokio::spawn(emit_loop(bus.clone(), agent.clone(), interval, cancel_rx));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let monitor = HeartbeatMonitor::new(bus.clone(), vec![agent], interval);
    let status = monitor.current_status().await;
    assert!(status.system_ready);

    cancel_tx.send(true).unwrap();
    emitter.await.unwrap();
}
