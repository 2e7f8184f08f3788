//! `WebSocket` Gateway (C5): per-client sessions over an Axum `/ws` route, plus a small REST
//! surface for operational visibility (§4.5, §4.5.1), grounded in the teacher's `rest_api`
//! router-building idiom.

pub mod session;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::bus::Bus;
use crate::domain_types::{AgentName, ChannelCapacity, ClientId, TaskId};
use crate::hub::Hub;
use crate::messages::{Envelope, Event, Intent, Message};
use session::Session;

const PING_INTERVAL: Duration = Duration::from_secs(30);
/// Channel agents publish streaming and broadcast events to; every session mirrors it (§4.5).
pub const FRONTEND_BROADCAST_CHANNEL: &str = "frontend_broadcast";

/// A raw inbound frame from a client: `{type, payload}` (§4.5).
#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ConnectionEstablished {
    #[serde(rename = "type")]
    kind: &'static str,
    client_id: ClientId,
}

#[derive(Debug, Serialize)]
struct ErrorFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    error: String,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    #[serde(default)]
    task_id: Option<TaskId>,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StartTaskPayload {
    #[serde(default)]
    task_id: Option<TaskId>,
    content: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SubscribePayload {
    channel: String,
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    command: String,
    #[serde(default)]
    task_id: Option<TaskId>,
}

/// Health check response for `/api/v1/health`, mirroring the teacher's `rest_api` shape.
#[derive(Debug, Clone, Serialize)]
struct HealthCheckResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    active_tasks: usize,
    effort_distribution: HashMap<String, u64>,
    exploration_rate: f64,
    last_cluster_rebuild_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DecisionsQuery {
    #[serde(default = "default_decisions_limit")]
    limit: usize,
}

fn default_decisions_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
struct DecisionRecord {
    agent: String,
    method: String,
    confidence: f64,
    cluster_id: usize,
    epsilon: f64,
    recorded_at: chrono::DateTime<Utc>,
}

/// Owns every live session and the collaborators needed to translate client frames into bus
/// traffic: the Hub for task creation, and the bus itself for plain chat/control publication.
pub struct Gateway {
    hub: Arc<Hub>,
    bus: Arc<dyn Bus>,
    sessions: DashMap<ClientId, Arc<Mutex<Session>>>,
    entry_agent: AgentName,
    session_capacity: ChannelCapacity,
}

impl Gateway {
    /// Builds a gateway publishing `start_task`/`chat` traffic toward `entry_agent`'s channel.
    #[must_use]
    pub fn new(hub: Arc<Hub>, bus: Arc<dyn Bus>, entry_agent: AgentName, session_capacity: ChannelCapacity) -> Arc<Self> {
        Arc::new(Self {
            hub,
            bus,
            sessions: DashMap::new(),
            entry_agent,
            session_capacity,
        })
    }

    /// Builds the Axum router: the `/ws` upgrade route plus the REST operational surface.
    #[must_use]
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/v1/health", get(health))
            .route("/api/v1/status", get(status))
            .route("/api/v1/router/decisions", get(router_decisions))
            .with_state(self)
    }

    /// Serves `router()` on `addr` until the process is killed.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "gateway listening");
        axum::serve(listener, self.router()).await
    }

    /// Subscribes to [`FRONTEND_BROADCAST_CHANNEL`] and mirrors every event to subscribed
    /// sessions (§4.5, "streaming fan-out"). Runs until the bus stream ends.
    pub async fn run_broadcast_fanout(self: Arc<Self>) {
        let mut inbound = match self.bus.subscribe(FRONTEND_BROADCAST_CHANNEL).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "failed to subscribe to frontend broadcast channel");
                return;
            }
        };
        while let Some(payload) = inbound.next().await {
            let Ok(frame) = String::from_utf8(payload) else { continue };
            let task_key = serde_json::from_str::<serde_json::Value>(&frame)
                .ok()
                .and_then(|v| v.get("task_id").and_then(|t| t.as_str().map(str::to_string)));
            let sessions: Vec<Arc<Mutex<Session>>> = self.sessions.iter().map(|entry| entry.value().clone()).collect();
            for session in sessions {
                let mut session = session.lock().await;
                let subscribed = task_key.as_deref().is_none_or(|key| session.is_subscribed(key));
                if subscribed {
                    session.try_send(frame.clone());
                }
            }
        }
    }

    async fn publish_chat(&self, task_id: TaskId, sender_client: ClientId, content: String) -> Result<(), crate::error::FabricError> {
        let agent = AgentName::try_new(sender_client.to_string()).map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
        let message = Message {
            task_id,
            agent,
            content,
            intent: Intent::Chat,
            timestamp: Utc::now(),
        };
        let payload = Envelope::Message(message).encode()?;
        self.bus.publish(&self.entry_agent.channel(), payload).await?;
        Ok(())
    }

    async fn publish_start_task(&self, client: ClientId, content: String, confidence: Option<f64>) -> Result<(), crate::error::FabricError> {
        let agent = AgentName::try_new(client.to_string()).map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
        let confidence = confidence
            .map(crate::domain_types::Confidence::try_new)
            .transpose()
            .map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
        let (task, target) = self
            .hub
            .create_and_route_task(content, agent, Intent::StartTask, Event::Plan, confidence)
            .await?;
        let payload = Envelope::Task(task).encode()?;
        self.bus.publish(&target.channel(), payload).await?;
        Ok(())
    }

    async fn publish_cancel(&self, task_id: TaskId, client: ClientId) -> Result<(), crate::error::FabricError> {
        let agent = AgentName::try_new(client.to_string()).map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
        let message = Message {
            task_id,
            agent,
            content: "cancel_task".to_string(),
            intent: Intent::ModifyTask,
            timestamp: Utc::now(),
        };
        let payload = Envelope::Message(message).encode()?;
        self.bus.publish(&self.entry_agent.channel(), payload).await?;
        Ok(())
    }
}

async fn ws_handler(State(gateway): State<Arc<Gateway>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(gateway, socket))
}

#[instrument(skip(gateway, socket))]
async fn handle_socket(gateway: Arc<Gateway>, socket: WebSocket) {
    let client_id = ClientId::generate();
    let (session, mut outbound_rx) = Session::new(client_id, gateway.session_capacity);
    let session = Arc::new(Mutex::new(session));
    gateway.sessions.insert(client_id, session.clone());

    let (mut sink, mut stream) = socket.split();

    let established = serde_json::to_string(&ConnectionEstablished {
        kind: "connection_established",
        client_id,
    })
    .unwrap_or_default();
    if sink.send(WsMessage::Text(established.into())).await.is_err() {
        gateway.sessions.remove(&client_id);
        return;
    }

    let write_session = session.clone();
    let write_gateway = gateway.clone();
    let write_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PING_INTERVAL);
        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    if write_session.lock().await.note_unanswered_ping() {
                        warn!(%client_id, "closing session after unanswered pings");
                        let _ = sink.send(WsMessage::Close(None)).await;
                        write_gateway.sessions.remove(&client_id);
                        break;
                    }
                }
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            WsMessage::Text(text) => {
                session.lock().await.note_activity();
                handle_inbound_frame(&gateway, client_id, &session, &text).await;
            }
            WsMessage::Pong(_) => {
                session.lock().await.note_activity();
            }
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) => {}
            WsMessage::Ping(_) => {}
        }
    }

    write_task.abort();
    gateway.sessions.remove(&client_id);
    info!(%client_id, "session closed");
}

async fn handle_inbound_frame(gateway: &Arc<Gateway>, client_id: ClientId, session: &Arc<Mutex<Session>>, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            send_error(session, format!("malformed frame: {e}")).await;
            return;
        }
    };

    let result = match frame.kind.as_str() {
        "chat_message" => dispatch_chat(gateway, client_id, frame.payload).await,
        "start_task" => dispatch_start_task(gateway, client_id, frame.payload).await,
        "ping" => {
            session.lock().await.note_activity();
            Ok(())
        }
        "subscribe" => {
            if let Ok(p) = serde_json::from_value::<SubscribePayload>(frame.payload) {
                session.lock().await.subscribe(p.channel);
            }
            Ok(())
        }
        "unsubscribe" => {
            if let Ok(p) = serde_json::from_value::<SubscribePayload>(frame.payload) {
                session.lock().await.unsubscribe(&p.channel);
            }
            Ok(())
        }
        "command" => dispatch_command(gateway, client_id, frame.payload).await,
        other => {
            warn!(kind = other, "unrecognized client frame type");
            Ok(())
        }
    };

    if let Err(e) = result {
        send_error(session, e.to_string()).await;
    }
}

async fn dispatch_chat(gateway: &Arc<Gateway>, client_id: ClientId, payload: serde_json::Value) -> Result<(), crate::error::FabricError> {
    let payload: ChatPayload = serde_json::from_value(payload)
        .map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
    let task_id = payload.task_id.unwrap_or_else(TaskId::generate);
    gateway.publish_chat(task_id, client_id, payload.content).await
}

async fn dispatch_start_task(gateway: &Arc<Gateway>, client_id: ClientId, payload: serde_json::Value) -> Result<(), crate::error::FabricError> {
    let payload: StartTaskPayload = serde_json::from_value(payload)
        .map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
    gateway.publish_start_task(client_id, payload.content, payload.confidence).await
}

async fn dispatch_command(gateway: &Arc<Gateway>, client_id: ClientId, payload: serde_json::Value) -> Result<(), crate::error::FabricError> {
    let payload: CommandPayload = serde_json::from_value(payload)
        .map_err(|e| crate::error::FabricError::Configuration(e.to_string()))?;
    if payload.command == "cancel_task" {
        if let Some(task_id) = payload.task_id {
            return gateway.publish_cancel(task_id, client_id).await;
        }
    }
    Ok(())
}

async fn send_error(session: &Arc<Mutex<Session>>, error: String) {
    let frame = serde_json::to_string(&ErrorFrame { kind: "error", error }).unwrap_or_default();
    session.lock().await.try_send(frame);
}

async fn health() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse { status: "healthy" })
}

async fn status(State(gateway): State<Arc<Gateway>>) -> Json<StatusResponse> {
    let status = gateway.hub.get_system_status();
    Json(StatusResponse {
        active_tasks: status.active_tasks,
        effort_distribution: status.effort_distribution,
        exploration_rate: status.exploration_rate,
        last_cluster_rebuild_at: status.last_cluster_rebuild_at,
    })
}

async fn router_decisions(State(gateway): State<Arc<Gateway>>, Query(query): Query<DecisionsQuery>) -> impl IntoResponse {
    let decisions = gateway.hub.api_get_router_decisions(query.limit).await;
    let records: Vec<DecisionRecord> = decisions
        .into_iter()
        .map(|(agent, decision, recorded_at)| DecisionRecord {
            agent,
            method: format!("{:?}", decision.method),
            confidence: decision.confidence,
            cluster_id: decision.cluster_id,
            epsilon: decision.epsilon,
            recorded_at,
        })
        .collect();
    (StatusCode::OK, Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBus;
    use crate::orchestrator::Orchestrator;
    use crate::router::embedding::HashingEmbeddingProvider;
    use crate::storage::OutcomeStore;
    use crate::time_provider::production_time_provider;
    use crate::domain_types::{ConsensusThreshold, MaxRounds, PlateauDelta, TaskTimeoutSecs};

    fn gateway() -> Arc<Gateway> {
        let orchestrator = Orchestrator::new(
            MaxRounds::default(),
            TaskTimeoutSecs::default(),
            ConsensusThreshold::default(),
            PlateauDelta::default(),
            production_time_provider(),
        );
        let store = OutcomeStore::in_memory(100);
        let embedder = Arc::new(HashingEmbeddingProvider::default());
        let hub = Hub::new(
            orchestrator,
            store,
            embedder,
            vec![AgentName::try_new("worker_a".to_string()).unwrap()],
            1,
        );
        let bus: Arc<dyn Bus> = Arc::new(MemoryBus::new());
        Gateway::new(hub, bus, AgentName::try_new("workflow_generator".to_string()).unwrap(), ChannelCapacity::default())
    }

    #[tokio::test]
    async fn health_endpoint_reports_healthy() {
        let response = health().await;
        assert_eq!(response.0.status, "healthy");
    }

    #[tokio::test]
    async fn start_task_publishes_to_routed_worker() {
        let gateway = gateway();
        let bus: Arc<dyn Bus> = gateway.bus.clone();
        let mut inbound = bus.subscribe(&AgentName::try_new("worker_a".to_string()).unwrap().channel()).await.unwrap();
        gateway
            .publish_start_task(ClientId::generate(), "please help".to_string(), None)
            .await
            .unwrap();
        let payload = tokio::time::timeout(Duration::from_secs(1), inbound.next()).await.unwrap().unwrap();
        let envelope = Envelope::decode(&payload).unwrap();
        assert!(matches!(envelope, Envelope::Task(_)));
    }
}
