mod handlers;

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use autofix_core::config::Config;
use autofix_db::{Database, InstallationStore};
use autofix_github::GitHub;
use autofix_jobs::{JobContext, PullRequestHandler};
use axum::{
    Router,
    extract::FromRef,
    http::{Request, StatusCode, header},
};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    ServiceBuilderExt,
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, MakeSpan, TraceLayer},
};
use tracing::{Level, Span};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

use crate::handlers::build_router;

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<dyn InstallationStore>,
    jobs: JobContext,
    pull_requests: Arc<PullRequestHandler>,
}

impl AppState {
    pub fn new(jobs: JobContext) -> Self {
        Self {
            config: jobs.config.clone(),
            store: jobs.store.clone(),
            pull_requests: Arc::new(PullRequestHandler::new(jobs.clone())),
            jobs,
        }
    }
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yml".to_string());
    let config = Arc::new(Config::load(&config_path).expect("Failed to load config"));
    let db = Database::new(&config.db).await.expect("Failed to open database");
    let github = GitHub::new(&config.github).expect("Failed to create GitHub client");
    tracing::info!("Execution mode: {:?}", config.pipeline.mode);

    let jobs = JobContext::new(config.clone(), Arc::new(db.clone()), github);
    let state = AppState::new(jobs);

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    let listener = TcpListener::bind(addr).await.expect("bind error");
    tracing::info!("Web server: Listening on {}", addr);

    let result = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error");
    if let Err(e) = result {
        tracing::error!("{e:?}");
    }

    db.close().await;
    tracing::info!("Shut down gracefully");
}

fn app(state: AppState) -> Router {
    let sensitive_headers: Arc<[_]> = vec![header::AUTHORIZATION].into();
    let middleware = ServiceBuilder::new()
        .sensitive_request_headers(sensitive_headers)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DeliverySpan { level: Level::INFO })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
        .layer(NormalizePathLayer::trim_trailing_slash());
    build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let Ok(mut sigterm) = signal::unix::signal(signal::unix::SignalKind::terminate()) else {
            let _ = signal::ctrl_c().await;
            return;
        };
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

/// Request span carrying the GitHub delivery id when present.
#[derive(Debug, Clone)]
pub struct DeliverySpan {
    level: Level,
}

impl<B> MakeSpan<B> for DeliverySpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let delivery = request
            .headers()
            .get("X-GitHub-Delivery")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        macro_rules! make_span {
            ($level:expr) => {
                tracing::span!(
                    $level,
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    delivery = %delivery,
                )
            }
        }
        match self.level {
            Level::ERROR => make_span!(Level::ERROR),
            Level::WARN => make_span!(Level::WARN),
            Level::INFO => make_span!(Level::INFO),
            Level::DEBUG => make_span!(Level::DEBUG),
            Level::TRACE => make_span!(Level::TRACE),
        }
    }
}
