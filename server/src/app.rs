//! Application lifecycle management and graceful shutdown.
//!
//! [`Application`] owns every long-running part of the service:
//!
//! 1. **Startup**: connect the stores and broker, install the metrics
//!    recorder, bind the listeners
//! 2. **Runtime**: window evaluator, ingestion worker, HTTP server and
//!    Prometheus endpoint run side by side, sharing one gate
//! 3. **Shutdown**: on Ctrl+C or SIGTERM the HTTP server drains, the
//!    shutdown signal is broadcast, and background tasks are awaited for
//!    up to `SHUTDOWN_TIMEOUT` seconds each

use crate::config::Config;
use crate::email::SmtpNotifier;
use axum::{Router, routing::get};
use ketuk_core::environment::SystemClock;
use ketuk_core::gate::GateState;
use ketuk_postgres::PostgresBookingStore;
use ketuk_redpanda::RedpandaQueue;
use ketuk_runtime::metrics::MetricsServer;
use ketuk_runtime::{IngestionWorker, WindowEvaluator};
use ketuk_web::{AppState, routes};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Fully wired service, ready to run.
pub struct Application {
    config: Config,
    listener: TcpListener,
    metrics_listener: TcpListener,
    app: Router,
    metrics_app: Router,
    evaluator: WindowEvaluator,
    worker: IngestionWorker,
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Connect collaborators and bind listeners.
    ///
    /// # Errors
    ///
    /// Returns error if the database, broker client, metrics recorder or a
    /// listener cannot be set up.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        info!("Connecting to booking database...");
        let store = Arc::new(
            PostgresBookingStore::connect(&config.database.url, config.database.max_connections)
                .await?,
        );
        store.migrate().await?;
        info!("Booking database ready");

        let queue = Arc::new(
            RedpandaQueue::builder()
                .brokers(&config.redpanda.brokers)
                .consumer_group(&config.redpanda.consumer_group)
                .delivery_timeout(Duration::from_secs(config.redpanda.delivery_timeout))
                .redelivery_delay(Duration::from_secs(config.redpanda.redelivery_delay))
                .build()?,
        );

        let mut metrics = MetricsServer::new(config.server.metrics_addr());
        metrics.start()?;
        let metrics = Arc::new(metrics);
        let metrics_app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics);
                async move { metrics.render().unwrap_or_default() }
            }),
        );

        let gate = GateState::new();
        let timezone = config.gate.timezone;

        let evaluator = WindowEvaluator::new(
            gate.clone(),
            store.clone(),
            Arc::new(SystemClock),
            timezone,
        )
        .with_tick_interval(Duration::from_secs(config.gate.tick_secs))
        .with_query_timeout(Duration::from_secs(config.gate.query_timeout_secs));

        let worker = IngestionWorker::new(
            config.redpanda.queue.clone(),
            queue,
            store,
            Arc::new(SmtpNotifier::new(&config.smtp)),
            gate.clone(),
        )
        .with_timezone(timezone);

        let listener = TcpListener::bind(config.server.http_addr()).await?;
        let metrics_listener = TcpListener::bind(config.server.metrics_addr()).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            app: routes(AppState::new(gate)),
            config,
            listener,
            metrics_listener,
            metrics_app,
            evaluator,
            worker,
            shutdown_tx,
        })
    }

    /// Run until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            http = %self.config.server.http_addr(),
            metrics = %self.config.server.metrics_addr(),
            queue = %self.config.redpanda.queue,
            timezone = %self.config.gate.timezone,
            "Starting booking gate service"
        );

        let mut handles = vec![
            ("window_evaluator", self.evaluator.spawn(self.shutdown_tx.subscribe())),
            ("ingestion_worker", self.worker.spawn(self.shutdown_tx.subscribe())),
        ];

        let mut metrics_shutdown = self.shutdown_tx.subscribe();
        let metrics_listener = self.metrics_listener;
        let metrics_app = self.metrics_app;
        handles.push((
            "metrics_endpoint",
            tokio::spawn(async move {
                let serve = axum::serve(metrics_listener, metrics_app).with_graceful_shutdown(
                    async move {
                        let _ = metrics_shutdown.recv().await;
                    },
                );
                if let Err(e) = serve.await {
                    error!(error = %e, "Metrics endpoint failed");
                }
            }),
        ));

        info!("HTTP server listening for requests");
        let served = axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());
        await_shutdown(handles, self.config.server.shutdown_timeout()).await;
        info!("Graceful shutdown complete");

        served?;
        Ok(())
    }
}

/// Wait for each background task, giving up on it after `timeout`.
async fn await_shutdown(handles: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
    for (task, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task, error = %e, "Task failed"),
            Err(_) => warn!(task, "Task shutdown timed out"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
