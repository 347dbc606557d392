use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use synapse::{
    api,
    config::{self, Config},
    embedding,
    jobs::{InMemoryJobStore, JobQueue, JobStore, WorkerContext, WorkerPool, WorkerSettings},
    llm::{LanguageModel, OllamaLanguageModel},
    logging,
    metrics::JobMetrics,
    orchestrator::{Orchestrator, OrchestratorSettings},
    pii::PiiGate,
    qdrant::QdrantService,
    retrieval::QdrantRetriever,
    service::{ServiceParts, SynapseService},
    trace::{HttpTraceSink, LogTraceSink, TraceSink},
};
use tokio::net::TcpListener;

/// Synapse HTTP server and agent worker pool.
#[derive(Debug, Parser)]
#[command(name = "synapse", version, about)]
struct Cli {
    /// Port to listen on (overrides SERVER_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// Number of job workers (overrides WORKER_COUNT).
    #[arg(long)]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::init_config(|config| {
        if let Some(port) = cli.port {
            config.server_port = Some(port);
        }
        if let Some(workers) = cli.workers {
            config.worker_count = workers;
        }
    })
    .context("Failed to load config from environment")?;
    logging::init_tracing();
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        llm_model = %config.llm_model,
        workers = config.worker_count,
        max_rounds = config.agent_max_rounds,
        retrieval_mode = ?config.retrieval_mode,
        pii_restore_allowed = config.pii_restore_allowed,
        "Loaded configuration"
    );

    let llm: Arc<dyn LanguageModel> = Arc::new(
        OllamaLanguageModel::new(config.ollama_url.clone(), config.llm_model.clone())
            .context("Failed to build model client")?,
    );

    let qdrant = QdrantService::from_config().context("Failed to build Qdrant client")?;
    match qdrant.collection_exists(&config.qdrant_collection_name).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            collection = %config.qdrant_collection_name,
            "Collection missing; retrieval will return no context until it is populated"
        ),
        Err(error) => tracing::warn!(error = %error, "Qdrant not reachable at startup"),
    }
    let embedder =
        embedding::get_embedding_client(config).context("Failed to build embedding client")?;
    let retriever = Arc::new(QdrantRetriever::new(
        qdrant,
        embedder,
        config.qdrant_collection_name.clone(),
    ));

    let trace: Arc<dyn TraceSink> = match &config.trace_sink_url {
        Some(url) => Arc::new(HttpTraceSink::new(url.clone()).context("Failed to build trace sink")?),
        None => Arc::new(LogTraceSink),
    };

    let gate = PiiGate::new(config.pii_categories.clone());
    let settings = OrchestratorSettings::from_config(config);
    let retry = settings.retry;
    let orchestrator = Arc::new(Orchestrator::new(
        llm.clone(),
        retriever,
        trace,
        gate.clone(),
        settings,
    ));

    let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
    let metrics = Arc::new(JobMetrics::new());
    let queue = Arc::new(JobQueue::new(store.clone(), metrics.clone()));
    let pool = WorkerPool::spawn(
        WorkerContext {
            queue: queue.clone(),
            store: store.clone(),
            orchestrator,
            metrics: metrics.clone(),
        },
        WorkerSettings {
            workers: config.worker_count,
            job_deadline: config.job_deadline(),
            sweep_interval: Duration::from_secs(30),
            visibility_timeout: config.visibility_timeout(),
            retention: config.job_retention(),
            lease_check_interval: Duration::from_secs(1),
        },
    );

    let service = SynapseService::new(ServiceParts {
        llm,
        retry,
        gate,
        queue,
        store,
        metrics,
        restore_allowed: config.pii_restore_allowed,
        workers: pool.size(),
    });
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener(config).await.context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    pool.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn bind_listener(config: &Config) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8000..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8000-8099",
    ))
}
