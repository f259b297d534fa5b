// clasper-server/src/server.rs
// ============================================================================
// Module: HTTP Server
// Description: Binds the `/v1` API router to a socket, terminating TLS (and
// optional mTLS) when configured, and shuts down gracefully on SIGINT/SIGTERM
// (C14).
// Purpose: The one binary-facing entry point: load configuration, build
// AppState, serve.
// Dependencies: clasper-core, clasper-config, axum, axum-server, tokio
// ============================================================================

//! ## Overview
//! [`ClasperServer::serve`] dispatches on [`clasper_config::TlsConfig::tls_enabled`]:
//! plaintext over a bare `tokio::net::TcpListener` when unset, `axum-server`'s
//! rustls listener (built via [`crate::tls::build_tls_config`]) when set. Both
//! paths share one `axum::serve`-style call and the same graceful-shutdown
//! future, so there is exactly one place SIGINT/SIGTERM is handled.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use thiserror::Error;

use crate::api;
use crate::state::AppState;
use crate::state::AppStateError;
use crate::tls::TlsConfigError;
use crate::tls::TlsMaterial;
use crate::tls::build_tls_config;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Application state could not be assembled from the loaded configuration.
    #[error("application state initialization failed: {0}")]
    State(#[from] AppStateError),
    /// TLS material could not be loaded or rustls rejected it.
    #[error("tls configuration failed: {0}")]
    Tls(#[from] TlsConfigError),
    /// The configured bind address could not be bound.
    #[error("bind failed: {0}")]
    Bind(std::io::Error),
    /// The server's accept loop returned an error.
    #[error("server failed: {0}")]
    Serve(std::io::Error),
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// The Clasper HTTP server.
pub struct ClasperServer {
    state: AppState,
    bind_addr: SocketAddr,
    max_payload_bytes: usize,
}

impl ClasperServer {
    /// Builds a server from a loaded configuration.
    ///
    /// # Errors
    /// Returns [`ServerError::State`] if [`AppState::new`] fails.
    pub fn new(config: clasper_config::ClasperConfig) -> Result<Self, ServerError> {
        let bind_addr = config.bind_addr;
        let max_payload_bytes = config.max_payload_bytes;
        let state = AppState::new(config)?;
        Ok(Self { state, bind_addr, max_payload_bytes })
    }

    /// Replaces the diagnostics sink the server was built with.
    #[must_use]
    pub fn with_diagnostics(mut self, sink: std::sync::Arc<dyn crate::diagnostics::DiagnosticSink>) -> Self {
        self.state = self.state.with_diagnostics(sink);
        self
    }

    /// Serves the `/v1` API until a shutdown signal arrives.
    ///
    /// # Errors
    /// Returns [`ServerError`] if TLS material is configured but invalid, the
    /// bind address cannot be bound, or the accept loop itself fails.
    pub async fn serve(self) -> Result<(), ServerError> {
        let tls = &self.state.config.tls;
        let app = api::router(self.state.clone()).layer(DefaultBodyLimit::max(self.max_payload_bytes));

        match (&tls.cert_path, &tls.key_path) {
            (Some(cert_path), Some(key_path)) => {
                let material = TlsMaterial {
                    cert_path: cert_path.as_path(),
                    key_path: key_path.as_path(),
                    mtls_client_ca_path: tls.mtls_client_ca_path.as_deref(),
                };
                let tls_config = build_tls_config(&material)?;

                let handle = axum_server::Handle::new();
                tokio::spawn({
                    let handle = handle.clone();
                    async move {
                        shutdown_signal().await;
                        handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
                    }
                });

                axum_server::bind_rustls(self.bind_addr, tls_config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                    .map_err(ServerError::Serve)
            }
            _ => {
                let listener = tokio::net::TcpListener::bind(self.bind_addr).await.map_err(ServerError::Bind)?;
                axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.map_err(ServerError::Serve)
            }
        }
    }
}

/// Resolves once SIGINT (ctrl-c) or, on unix, SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
