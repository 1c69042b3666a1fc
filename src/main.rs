use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use tuition_payments::api::{self, PaymentsState};
use tuition_payments::config::AppConfig;
use tuition_payments::database::{init_pool_from_config, run_migrations};
use tuition_payments::health::HealthChecker;
use tuition_payments::logging::init_tracing;
use tuition_payments::middleware::logging::{request_logging_middleware, UuidRequestId};
use tuition_payments::payments::factory::GatewayRegistry;
use tuition_payments::services::payment_orchestrator::{
    OrchestratorConfig, PaymentOrchestrator, PaymentStores,
};
use tuition_payments::workers::reconciliation::{ReconciliationConfig, ReconciliationWorker};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting tuition payments service"
    );

    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    run_migrations(&db_pool).await?;
    info!(
        max_connections = db_pool.options().get_max_connections(),
        "✅ Database ready"
    );

    let gateways = GatewayRegistry::from_env()?;
    info!(gateways = ?gateways.list_available(), "Payment gateways registered");

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        gateways,
        PaymentStores::postgres(db_pool.clone()),
        OrchestratorConfig::from(&config.payments),
    ));

    // Reconciliation sweep
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(orchestrator.clone(), ReconciliationConfig::from_env());
    let worker_handle = tokio::spawn(worker.run(worker_shutdown_rx));

    let mut state = PaymentsState::new(orchestrator, HealthChecker::new(db_pool));
    if config.payments.enable_simulation {
        state = state.with_simulation();
    }

    let app: Router = api::router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(TraceLayer::new_for_http())
            .layer(axum::middleware::from_fn(request_logging_middleware))
            .layer(PropagateRequestIdLayer::x_request_id()),
    );

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(std::time::Duration::from_secs(5), worker_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for reconciliation worker shutdown");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
