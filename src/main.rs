//! Shipwright backend server
//!
//! Marketplace backend for buying and selling partially-completed software
//! projects: escrow-held payments, GitHub collaborator handover, buyer
//! review period and repository ownership transfer.

use axum::http::{header, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::CorsLayer;

use shipwright_backend::admin::AdminService;
use shipwright_backend::config::Config;
use shipwright_backend::db;
use shipwright_backend::github::GithubClient;
use shipwright_backend::middleware::{self, AuthConfig};
use shipwright_backend::notify::Notifier;
use shipwright_backend::payments::HttpPaymentProcessor;
use shipwright_backend::routes::api_router;
use shipwright_backend::state::AppState;
use shipwright_backend::sweep::{spawn_sweep, SweepConfig};
use shipwright_backend::transaction::TransactionService;
use shipwright_backend::transfer::{CollaboratorAccessPoller, TransferService};

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(true)
        .init();

    tracing::info!(
        environment = config.environment.as_str(),
        "Starting Shipwright backend"
    );

    let db_pool = match db::create_pool(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create database pool");
            std::process::exit(1);
        }
    };

    if let Err(e) = db::run_migrations(&db_pool).await {
        tracing::error!(error = %e, "Failed to run migrations");
        std::process::exit(1);
    }

    let provider_timeout = Duration::from_secs(config.provider_timeout_secs);

    let code_host = Arc::new(GithubClient::new(
        config.github_api_url.clone(),
        provider_timeout,
    ));
    let payment_processor = Arc::new(HttpPaymentProcessor::new(
        config.payment_api_url.clone(),
        config.payment_api_key.clone(),
        provider_timeout,
    ));
    let notifier = Notifier::new(db_pool.clone());

    let transaction_service = Arc::new(TransactionService::new(
        db_pool.clone(),
        config.review_period_days,
    ));
    let transfer_service = Arc::new(TransferService::new(
        db_pool.clone(),
        code_host.clone(),
        notifier.clone(),
    ));
    let access_poller = Arc::new(CollaboratorAccessPoller::new(
        db_pool.clone(),
        code_host.clone(),
    ));
    let admin_service = Arc::new(AdminService::new(
        db_pool.clone(),
        payment_processor,
        notifier,
    ));

    spawn_sweep(
        transaction_service.as_ref().clone(),
        SweepConfig {
            interval: Duration::from_secs(config.sweep_interval_secs),
            reconciliation_grace_hours: config.reconciliation_grace_hours,
        },
    );

    let app_state = AppState {
        db_pool,
        transaction_service,
        transfer_service,
        access_poller,
        admin_service,
        auth_config: AuthConfig {
            jwt_secret: config.jwt_secret.clone(),
        },
    };

    let app = api_router()
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
        .layer(configure_cors(config.cors_allowed_origins.as_deref()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind {}", addr);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    tracing::info!("Server shutdown complete");
}

fn configure_cors(allowed_origins: Option<&str>) -> CorsLayer {
    let allowed_origins = allowed_origins.unwrap_or_default();

    if allowed_origins.is_empty() {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (permissive)");
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
