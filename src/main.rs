use std::sync::Arc;
use std::time::Duration;

use omarapay_backend::api::{self, ApiServices};
use omarapay_backend::config::AppConfig;
use omarapay_backend::logging::init_tracing;
use omarapay_backend::payments::factory::PaymentProviderFactory;
use omarapay_backend::services::onchain::OnchainVerifier;
use omarapay_backend::services::payment_orchestrator::PaymentOrchestrator;
use omarapay_backend::services::registry::ChargeRegistry;
use omarapay_backend::services::webhook_processor::WebhookProcessor;
use omarapay_backend::workers::webhook_queue::{WebhookQueue, WebhookWorker};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

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

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind_address(),
        require_signatures = config.webhooks.require_signatures,
        "Starting payment orchestration service"
    );

    let factory = PaymentProviderFactory::from_env()?;
    let providers = factory.build_all();
    for (method, provider) in providers.enabled() {
        info!(method = %method, provider = %provider, "Payment method enabled");
    }
    for (method, reason) in providers.disabled() {
        warn!(method = %method, reason = %reason, "Payment method disabled");
    }

    let registry = Arc::new(ChargeRegistry::new());
    let mut orchestrator = PaymentOrchestrator::new(
        providers.clone(),
        registry.clone(),
        config.orchestrator.clone(),
    );
    match OnchainVerifier::from_env() {
        Ok(verifier) => orchestrator = orchestrator.with_onchain_verifier(Arc::new(verifier)),
        Err(e) => warn!(error = %e, "On-chain verification disabled"),
    }
    let orchestrator = Arc::new(orchestrator);
    let processor = Arc::new(WebhookProcessor::new(
        providers,
        registry,
        config.webhooks.require_signatures,
    ));

    let (queue, queue_rx) = WebhookQueue::channel(config.webhooks.queue_capacity);
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(WebhookWorker::new(processor.clone(), queue_rx).run(worker_shutdown_rx));

    let app = api::router(ApiServices {
        orchestrator: orchestrator.clone(),
        webhook_processor: processor,
        webhook_queue: queue,
    });

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(address = %addr, "Server listening");

    // The worker keeps accepting until in-flight webhook requests have been
    // answered, then drains what they queued.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = worker_shutdown_tx.send(true);
    orchestrator.shutdown().await;

    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => info!("Webhook worker stopped"),
        Ok(Err(e)) => error!(error = %e, "Webhook worker panicked"),
        Err(_) => warn!("Webhook worker did not drain in time, queued webhooks dropped"),
    }

    info!("Server stopped");
    Ok(())
}
