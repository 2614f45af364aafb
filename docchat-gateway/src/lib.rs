//! docchat gateway - authentication, session identity, and conversation history.
//!
//! This crate provides:
//! - Dual-path bearer-token verification (introspection, then signed identity token)
//! - Email → durable session handle resolution
//! - A write-back conversation cache with a background reconciler
//! - Token-budgeted context windows for the model
//!
//! ## Architecture
//!
//! ```text
//! Client → auth middleware (verify → resolve session) → handler
//!                                                          ↓
//!                     ConversationCache ◄── record_turn / get_context_window
//!                            │
//!                  Reconciler (interval + shutdown)
//!                            ↓
//!                      HistoryStore
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod assembler;
pub mod auth;
pub mod cache;
pub mod reconciler;
pub mod routes;
pub mod service;
pub mod session;
pub mod tokenizer;

pub use assembler::ConversationAssembler;
pub use auth::{AuthError, IdentityVerifier, PathFailure, Principal, TokenVerifier, VerificationPath};
pub use cache::{ConversationCache, ConversationEntry, FlushReport};
pub use reconciler::Reconciler;
pub use routes::{build_router, AppState, AuthUser};
pub use service::ConversationService;
pub use session::SessionResolver;
pub use tokenizer::{EstimateCounter, TiktokenCounter, TokenCounter};

use docchat_common::config::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Start the gateway server and run until Ctrl-C.
///
/// On shutdown the reconciler is stopped, which performs a final flush.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let service = Arc::new(ConversationService::from_config(config)?);
    service.start().await;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let router = build_router(AppState::new(Arc::clone(&service))).layer(cors);

    tracing::info!("Starting docchat gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    service.stop().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
