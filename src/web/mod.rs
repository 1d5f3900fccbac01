//! Web layer: a thin axum front end over the session registry. Handlers
//! delegate everything to [`crate::registry::SessionRegistry`] and
//! [`crate::orchestrator::ChannelOrchestrator`]; this module only maps
//! HTTP concerns (routing, status codes, headers) onto that API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::database::Database;
use crate::director::ChannelMode;
use crate::metrics::RuntimeMetrics;
use crate::orchestrator::ProducerFactory;
use crate::producer::{FfmpegProducer, MockProducer, Producer};
use crate::registry::SessionRegistry;

pub mod handlers;

/// Which producer backend new channel sessions are built with. Chosen once
/// at startup; a live deployment uses `Ffmpeg`, tests and demos use `Mock`.
#[derive(Debug, Clone)]
pub enum ProducerBackend {
    Mock,
    Ffmpeg { binary_path: String },
}

impl ProducerBackend {
    fn factory(&self) -> ProducerFactory {
        match self.clone() {
            ProducerBackend::Mock => {
                Box::new(|_mode: ChannelMode| -> Arc<dyn Producer> { Arc::new(MockProducer::new()) })
            }
            ProducerBackend::Ffmpeg { binary_path } => Box::new(move |_mode: ChannelMode| -> Arc<dyn Producer> {
                Arc::new(FfmpegProducer::new(binary_path.clone()))
            }),
        }
    }
}

/// Shared handler state. Cheap to clone: everything behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<RuntimeMetrics>,
    pub producer_backend: ProducerBackend,
    pub base_url: String,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(
        config: &Config,
        database: Arc<Database>,
        registry: Arc<SessionRegistry>,
        metrics: Arc<RuntimeMetrics>,
        producer_backend: ProducerBackend,
    ) -> Result<Self> {
        let state = AppState {
            database,
            registry,
            metrics,
            producer_backend,
            base_url: config.web.base_url.clone(),
        };

        let app = Self::create_router(state);
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;
        Ok(Self { app, addr })
    }

    fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/live", get(handlers::liveness_check))
            .route("/channellist.m3u", get(handlers::channel_list_m3u))
            .route("/channel/:channel_file", get(handlers::stream_channel))
            .route("/api/v1/channels", get(handlers::list_channels_json))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        tracing::info!(addr = %self.addr, "web server listening");
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

/// Exposed for integration tests that want the router without binding a
/// real listener.
pub fn router_for_test(state: AppState) -> Router {
    WebServer::create_router(state)
}
