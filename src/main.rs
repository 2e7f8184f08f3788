//! Binary entry point: wires the bus, outcome store, hub, heartbeat monitor, the six reference
//! agent variants, and the gateway together, then serves until signalled to stop.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use switchboard::agent::variants::{Arbitrator, Coordinator, Moderator, Refiner, ToolExecutor, ToolFacade, WorkflowGenerator};
use switchboard::bus::memory::MemoryBus;
use switchboard::bus::redis::RedisBus;
use switchboard::router::embedding::HashingEmbeddingProvider;
use switchboard::time_provider::production_time_provider;
use switchboard::{AgentName, AgentRuntime, Bus, FabricConfig, Gateway, Hub, Orchestrator, OutcomeStore};
use tokio::sync::watch;
use tracing::{error, info, warn};

const WORKFLOW_GENERATOR: &str = "workflow_generator";
const MODERATOR: &str = "moderator";
const ARBITRATOR: &str = "arbitrator";
const REFINER: &str = "refiner";
const TOOL_EXECUTOR: &str = "tool_executor";
const COORDINATOR: &str = "coordinator";

/// Rejects every invocation; a deployment wires in a real backend (§4.4.1 Non-goals).
struct UnconfiguredToolFacade;

#[async_trait::async_trait]
impl ToolFacade for UnconfiguredToolFacade {
    async fn execute(&self, _content: &str) -> Result<String, String> {
        Err("no tool facade configured for this deployment".to_string())
    }
}

/// The multi-agent orchestration fabric server.
#[derive(Debug, Parser)]
#[command(name = "switchboard", version, about)]
struct Args {
    /// Path to a TOML configuration file; falls back to --profile defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named preset used when `--config` is not given.
    #[arg(long, value_enum, default_value_t = Profile::Development)]
    profile: Profile,

    /// Address the gateway's HTTP/WebSocket server binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Profile {
    Development,
    Production,
    Testing,
}

fn agent_name(name: &str) -> AgentName {
    AgentName::try_new(name.to_string()).expect("constant agent names are always valid")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FabricConfig::load_from_file(path)?,
        None => match args.profile {
            Profile::Development => FabricConfig::development(),
            Profile::Production => FabricConfig::production(),
            Profile::Testing => FabricConfig::testing(),
        },
    };
    config.validate()?;

    switchboard::observability::init_logging(config.json_logs);
    info!(bind = %args.bind, "starting switchboard");

    let bus: Arc<dyn Bus> = match &config.redis_url {
        Some(url) => Arc::new(RedisBus::connect(url).await?),
        None => {
            warn!("no redis_url configured, using the in-memory bus");
            Arc::new(MemoryBus::new())
        }
    };

    let store = match &config.sqlite_path {
        Some(path) => OutcomeStore::sqlite(&path.to_string_lossy(), 10_000).await?,
        None => {
            warn!("no sqlite_path configured, outcome history will not persist across restarts");
            OutcomeStore::in_memory(10_000)
        }
    };

    let orchestrator = Orchestrator::new(
        config.max_rounds,
        config.task_timeout_secs,
        config.consensus_threshold,
        config.plateau_delta,
        production_time_provider(),
    );

    let embedder = Arc::new(HashingEmbeddingProvider::default());
    let candidates = vec![agent_name(WORKFLOW_GENERATOR)];
    let hub = Hub::new(orchestrator.clone(), store, embedder, candidates, config.min_cluster_samples);
    hub.spawn_periodic_rebuild(std::time::Duration::from_secs(60));

    let expected_agents = vec![
        agent_name(WORKFLOW_GENERATOR),
        agent_name(MODERATOR),
        agent_name(ARBITRATOR),
        agent_name(REFINER),
        agent_name(TOOL_EXECUTOR),
        agent_name(COORDINATOR),
    ];
    let monitor = Arc::new(switchboard::heartbeat::HeartbeatMonitor::new(
        bus.clone(),
        expected_agents,
        config.heartbeat_interval_secs,
    ));
    tokio::spawn(monitor.run());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut agent_tasks = Vec::new();

    agent_tasks.push(spawn_agent(
        bus.clone(),
        agent_name(WORKFLOW_GENERATOR),
        Arc::new(WorkflowGenerator::new(agent_name(MODERATOR))),
        &config,
        shutdown_rx.clone(),
    ));
    agent_tasks.push(spawn_agent(
        bus.clone(),
        agent_name(MODERATOR),
        Arc::new(Moderator::new(orchestrator.clone(), agent_name(ARBITRATOR))),
        &config,
        shutdown_rx.clone(),
    ));
    agent_tasks.push(spawn_agent(
        bus.clone(),
        agent_name(ARBITRATOR),
        Arc::new(Arbitrator::new(orchestrator.clone(), agent_name(REFINER), agent_name(MODERATOR))),
        &config,
        shutdown_rx.clone(),
    ));
    agent_tasks.push(spawn_agent(
        bus.clone(),
        agent_name(REFINER),
        Arc::new(Refiner::new(orchestrator.clone(), agent_name(ARBITRATOR), agent_name(MODERATOR))),
        &config,
        shutdown_rx.clone(),
    ));
    agent_tasks.push(spawn_agent(
        bus.clone(),
        agent_name(TOOL_EXECUTOR),
        Arc::new(ToolExecutor::new(Arc::new(UnconfiguredToolFacade))),
        &config,
        shutdown_rx.clone(),
    ));
    agent_tasks.push(spawn_agent(
        bus.clone(),
        agent_name(COORDINATOR),
        Arc::new(Coordinator::new(orchestrator.clone())),
        &config,
        shutdown_rx.clone(),
    ));

    let gateway = Gateway::new(hub, bus, agent_name(WORKFLOW_GENERATOR), config.gateway_session_capacity);
    tokio::spawn(gateway.clone().run_broadcast_fanout());

    let serve_handle = tokio::spawn(async move {
        if let Err(e) = gateway.serve(args.bind).await {
            error!(error = %e, "gateway server exited with an error");
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        }
        _ = serve_handle => {
            warn!("gateway server task exited before a shutdown signal was received");
        }
    }

    let _ = shutdown_tx.send(true);
    for task in agent_tasks {
        let _ = task.await;
    }

    Ok(())
}

fn spawn_agent<H: switchboard::AgentHandler + 'static>(
    bus: Arc<dyn Bus>,
    name: AgentName,
    handler: Arc<H>,
    config: &FabricConfig,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let runtime = Arc::new(AgentRuntime::new(
        bus,
        name,
        handler,
        config.heartbeat_interval_secs,
        config.dispatch_worker_count,
        config.dedup_cache_size,
        config.history_buffer_size,
    ));
    let drain_timeout = std::time::Duration::from_secs(5);
    tokio::spawn(async move {
        if let Err(e) = runtime.run(drain_timeout, shutdown).await {
            error!(error = %e, "agent runtime exited with an error");
        }
    })
}
