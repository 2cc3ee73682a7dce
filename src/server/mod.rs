//! Driver HTTP server
//!
//! Serves the WebDriver wire endpoints over axum until Ctrl+C, then ends
//! every open session.

pub mod api;

use anyhow::{Context, Result};
use axum::Router;
use colored::Colorize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::session::SessionManager;
use crate::utils::config::ServerConfig;
use api::AppState;

/// Router with all endpoints and permissive CORS
pub fn router(manager: Arc<SessionManager>) -> Router {
    let state = Arc::new(AppState { manager });
    api::api_router()
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub struct DriverServer {
    config: ServerConfig,
    manager: Arc<SessionManager>,
    /// Shown in the startup banner
    backend: String,
}

impl DriverServer {
    pub fn new(config: ServerConfig, manager: Arc<SessionManager>, backend: impl Into<String>) -> Self {
        Self {
            config,
            manager,
            backend: backend.into(),
        }
    }

    /// Bind and serve until interrupted
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        println!("\n{} lumi-driver started!", "🚀".to_string().green());
        println!("   Listening: {}", format!("http://{}", addr).cyan());
        println!("   Backend: {}", self.backend.cyan());
        println!(
            "   Platform: {}",
            self.manager.settings().platform_name.cyan()
        );
        println!("\n   Press Ctrl+C to stop.\n");

        axum::serve(listener, router(self.manager.clone()).into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        println!("\n{} Shutting down, ending open sessions...", "⏹".yellow());
        self.manager.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", err);
        std::future::pending::<()>().await;
    }
}
