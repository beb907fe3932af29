//! Server lifecycle management
//!
//! Starts the HTTP signaling server and the background session tasks
//! (liveness monitor, retention sweeper), and tears everything down on
//! SIGINT/SIGTERM.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fanout_api::{create_router, AppState};
use fanout_core::Config;
use fanout_sfu::{LivenessMonitor, RetentionSweeper, SessionRegistry, SignalingOrchestrator};

/// Fanout server - owns the session layer and every background task
pub struct FanoutServer {
    config: Config,
    registry: Arc<dyn SessionRegistry>,
    orchestrator: Arc<SignalingOrchestrator>,
    shutdown: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl FanoutServer {
    pub fn new(
        config: Config,
        registry: Arc<dyn SessionRegistry>,
        orchestrator: Arc<SignalingOrchestrator>,
    ) -> Self {
        Self {
            config,
            registry,
            orchestrator,
            shutdown: CancellationToken::new(),
            background: Vec::new(),
        }
    }

    /// Serve until a shutdown signal, then shut down gracefully
    pub async fn start(mut self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        self.spawn_background_tasks();

        let state = AppState::new(self.orchestrator.clone(), self.config.server.clone());
        let router = create_router(state);

        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("HTTP server error: {}", e);
        }
        info!("HTTP server shut down gracefully");

        self.shutdown().await;
        Ok(())
    }

    fn spawn_background_tasks(&mut self) {
        let sfu = &self.config.sfu;

        match sfu.liveness_interval() {
            Some(interval) => {
                let monitor = LivenessMonitor::new(self.registry.clone(), interval);
                self.background
                    .push(tokio::spawn(monitor.run(self.shutdown.child_token())));
            }
            None => info!("Liveness monitor disabled"),
        }

        if sfu.retention.sweep_interval_secs > 0 {
            let sweeper = RetentionSweeper::new(self.registry.clone(), sfu.retention.clone());
            self.background
                .push(tokio::spawn(sweeper.run(self.shutdown.child_token())));
        } else {
            warn!("Retention sweeper disabled; terminal sessions are kept until shutdown");
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down Fanout server...");

        // 1. Stop background tasks
        self.shutdown.cancel();
        for handle in self.background.drain(..) {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        // 2. Close every session's transport
        self.orchestrator.shutdown().await;

        info!("Shutdown complete");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
    info!("Shutdown signal received, starting graceful shutdown...");
}
