use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use retrovue_runtime::{
    clock::SystemClock,
    config::Config,
    database::Database,
    director::StaticDirector,
    metrics::RuntimeMetrics,
    orchestrator::TimerMode,
    registry::SessionRegistry,
    schedule::SqlGridProvider,
    web::{ProducerBackend, WebServer},
};

#[derive(Parser)]
#[command(name = "retrovue-runtime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-channel MPEG-TS playout orchestrator")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Path to the ffmpeg binary; omit to run with the in-memory mock producer
    #[arg(long, value_name = "PATH")]
    ffmpeg_path: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = format!("retrovue_runtime={}", cli.log_level);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting retrovue-runtime v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    let database = Arc::new(Database::new(&config.database).await?);
    database.migrate().await?;
    info!(url = %config.database.url, "database connection established and migrations applied");

    let clock = Arc::new(SystemClock::new());
    let schedule_provider = Arc::new(SqlGridProvider::new((*database).clone()));
    let director = Arc::new(StaticDirector::new());
    let metrics = Arc::new(RuntimeMetrics::new());

    let registry = Arc::new(SessionRegistry::new(
        clock,
        schedule_provider,
        director,
        config.scheduling.clone(),
        config.router.queue_depth,
        TimerMode::Spawned,
        Arc::clone(&metrics),
    ));

    let producer_backend = match cli.ffmpeg_path {
        Some(binary_path) => ProducerBackend::Ffmpeg { binary_path },
        None => {
            tracing::warn!("no --ffmpeg-path given; channels will run against the in-memory mock producer");
            ProducerBackend::Mock
        }
    };

    let tick_registry = Arc::clone(&registry);
    let tick_interval = Duration::from_millis(1000 / config.scheduling.tick_hz.max(1) as u64);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            tick_registry.tick_all().await;
        }
    });

    let web_server = WebServer::new(&config, database, registry, metrics, producer_backend)?;

    info!(addr = %web_server.addr(), "web server starting");
    web_server.serve().await?;

    Ok(())
}
