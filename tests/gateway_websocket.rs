//! Live-server coverage for the gateway's WebSocket handshake, bound to a real ephemeral port
//! and driven with a genuine WebSocket client and HTTP client rather than an in-process `Router`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use switchboard::bus::memory::MemoryBus;
use switchboard::domain_types::{ChannelCapacity, ConsensusThreshold, MaxRounds, PlateauDelta, TaskTimeoutSecs};
use switchboard::router::embedding::HashingEmbeddingProvider;
use switchboard::time_provider::production_time_provider;
use switchboard::{AgentName, Bus, Gateway, Hub, Orchestrator, OutcomeStore};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn spawn_gateway() -> std::net::SocketAddr {
    let orchestrator = Orchestrator::new(
        MaxRounds::default(),
        TaskTimeoutSecs::default(),
        ConsensusThreshold::default(),
        PlateauDelta::default(),
        production_time_provider(),
    );
    let store = OutcomeStore::in_memory(100);
    let embedder = Arc::new(HashingEmbeddingProvider::default());
    let hub = Hub::new(orchestrator, store, embedder, vec![AgentName::try_new("worker_a".to_string()).unwrap()], 1);
    let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
    let gateway = Gateway::new(hub, bus, AgentName::try_new("workflow_generator".to_string()).unwrap(), ChannelCapacity::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, gateway.router()).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn health_check_over_a_real_http_connection_reports_healthy() {
    let addr = spawn_gateway().await;
    let response = reqwest::get(format!("http://{addr}/api/v1/health")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn connecting_over_a_real_websocket_receives_a_connection_established_frame() {
    let addr = spawn_gateway().await;
    let url = format!("ws://{addr}/ws");
    let (mut stream, _response) = tokio_tungstenite::connect_async(url).await.unwrap();

    let first = tokio::time::timeout(std::time::Duration::from_secs(2), stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let WsMessage::Text(text) = first else {
        panic!("expected a text frame, got {first:?}");
    };
    let json: Value = serde_json::from_str(text.as_ref()).unwrap();
    assert_eq!(json["type"], "connection_established");
    assert!(json["client_id"].is_string());

    stream.send(WsMessage::Close(None)).await.unwrap();
}
