//! 'main' for the Quarry indexer process

use anyhow::{Context as _, Result};
use caryatid_process::Process;
use caryatid_sdk::ModuleRegistry;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment, File};
use quarry_common::{messages::Message, CounterRegistry, IndexerConfig, MetricsSink};
use quarry_module_chain_producer::ChainProducerModule;
use quarry_module_queue_consumer::QueueConsumerModule;
use quarry_store::{CheckpointStore, QueueStore, StoreConfig};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, fmt, EnvFilter, Registry};

mod decoders;

const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";
const CONFIG_KEY_STORE: &str = "store";
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "quarry-indexer", about = "Ledger to queue to decoder indexer")]
struct Args {
    #[arg(long, value_name = "PATH", default_values_t = vec!["indexer.toml".to_string()])]
    config: Vec<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Command {
    /// Run every producer and consumer until interrupted
    Run,
    /// Print checkpoints and queue depths
    Status,
    /// Print the effective configuration as JSON
    Env,
}

fn init_tracing() -> Result<()> {
    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let fmt_layer = fmt::layer().with_filter(env_filter());

    // Only turn on span export if some OTEL environment variables exist
    if std::env::vars().any(|(name, _)| name.starts_with("OTEL_")) {
        let otel_exporter = SpanExporter::builder().with_tonic().build()?;
        let otel_tracer = SdkTracerProvider::builder()
            .with_batch_exporter(otel_exporter)
            .build()
            .tracer("quarry-indexer");
        let otel_layer = OpenTelemetryLayer::new(otel_tracer)
            .with_filter(env_filter().add_directive(filter::LevelFilter::INFO.into()))
            .with_filter(filter::filter_fn(|meta| meta.is_span()));
        Registry::default().with(fmt_layer).with(otel_layer).init();
    } else {
        Registry::default().with(fmt_layer).init();
    }
    Ok(())
}

fn load_config(files: &[String]) -> Result<Config> {
    let mut builder = Config::builder();
    for file in files {
        builder = builder.add_source(File::with_name(file));
    }
    builder
        .add_source(Environment::with_prefix("QUARRY"))
        .build()
        .context("Reading configuration")
}

fn store_config(config: &Config) -> Result<StoreConfig> {
    match config.get::<StoreConfig>(CONFIG_KEY_STORE) {
        Ok(store) => Ok(store),
        Err(ConfigError::NotFound(_)) => Ok(StoreConfig::default()),
        Err(e) => Err(e).context("Reading [store] configuration"),
    }
}

/// Log every counter at a fixed interval until shutdown
async fn log_metrics(metrics: Arc<CounterRegistry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_LOG_INTERVAL);
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        let snapshot = metrics.snapshot();
        if !snapshot.is_empty() {
            info!(counters = ?snapshot, "Metrics");
        }
    }
}

/// Register the producer and consumer modules with their shared state
async fn register_modules(
    process: &mut dyn ModuleRegistry<Message>,
    indexer: IndexerConfig,
    pool: &SqlitePool,
    metrics: Arc<dyn MetricsSink>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
) {
    process.register(Arc::new(ChainProducerModule::new(
        indexer.clone(),
        pool.clone(),
        metrics.clone(),
        shutdown.clone(),
        tracker.clone(),
    )));

    let consumer =
        QueueConsumerModule::new(indexer, pool.clone(), metrics, shutdown.clone(), tracker.clone());
    decoders::register(&consumer).await;
    process.register(Arc::new(consumer));
}

async fn run(config: Config) -> Result<()> {
    info!("Quarry indexer process");

    let indexer = IndexerConfig::from_config(&config)?;
    let pool = quarry_store::open(&store_config(&config)?).await.context("Opening store")?;
    decoders::ContainerArchive::ensure_schema(&pool).await?;

    let counters = Arc::new(CounterRegistry::new());
    let metrics: Arc<dyn MetricsSink> = counters.clone();
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    let mut process = Process::<Message>::create(Arc::new(config)).await;
    register_modules(&mut process, indexer, &pool, metrics, &shutdown, &tracker).await;

    tracker.spawn(log_metrics(counters.clone(), shutdown.clone()));

    // Returns on interrupt
    process.run().await?;

    info!("Stopping workers");
    shutdown.cancel();
    tracker.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, tracker.wait()).await.is_err() {
        warn!("Workers still running after {}s, exiting anyway", SHUTDOWN_GRACE.as_secs());
    }
    pool.close().await;

    info!(counters = ?counters.snapshot(), "Exiting");
    Ok(())
}

async fn status(config: Config) -> Result<()> {
    let pool = quarry_store::open(&store_config(&config)?).await.context("Opening store")?;

    println!("Checkpoints:");
    for checkpoint in CheckpointStore::new(pool.clone()).list().await? {
        println!("  {} {} -> {}", checkpoint.instance, checkpoint.topic, checkpoint.index);
    }

    println!("Queue depth:");
    let depths = QueueStore::new(pool.clone()).depths().await?;
    if depths.is_empty() {
        println!("  (empty)");
    }
    for (topic, depth) in depths {
        println!("  {topic} {depth}");
    }

    pool.close().await;
    Ok(())
}

fn env(config: Config) -> Result<()> {
    let effective: serde_json::Value = config.try_deserialize()?;
    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;
    let config = load_config(&args.config)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Status => status(config).await,
        Command::Env => env(config),
    }
}
