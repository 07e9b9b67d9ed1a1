// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Child role: serve the application and apply admitted patches.
//!
//! The child does not re-verify patches; the shell is the sole gatekeeper.
//! After `git am` succeeds it answers 200 and exits, and the supervisor
//! rebuilds it from the mutated tree.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::Router;
use ouro_repo::GitRepo;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::error::ChildError;

/// Served on `GET /`; the canonical target for demonstration patches.
const GREETING: &str = "ouroboros child reporting\n";

/// How long the response gets to reach the wire before shutdown begins,
/// and how long draining may take before the child exits anyway.
const EXIT_DELAY: Duration = Duration::from_millis(100);
const DRAIN_BUDGET: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct ChildState {
    source_dir: PathBuf,
    shutdown: Arc<watch::Sender<bool>>,
}

/// Build the child's router. `shutdown` is signalled after a patch has been
/// applied and answered.
pub fn router(source_dir: PathBuf, shutdown: watch::Sender<bool>) -> Router {
    let state = ChildState {
        source_dir: source_dir.clone(),
        shutdown: Arc::new(shutdown),
    };
    Router::new()
        .route("/", get(root))
        .route("/patch", post(handle_patch))
        .fallback_service(ServeDir::new(source_dir))
        .with_state(state)
}

async fn root() -> &'static str {
    GREETING
}

async fn handle_patch(
    State(state): State<ChildState>,
    body: Bytes,
) -> Result<&'static str, ChildError> {
    let output = GitRepo::open(&state.source_dir).apply_mailbox(&body).await?;
    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        info!("git am: {line}");
    }

    // Exit only after the 200 is on the wire; the supervisor rebuilds us
    // from the tree this patch just changed.
    let shutdown = Arc::clone(&state.shutdown);
    tokio::spawn(async move {
        sleep(EXIT_DELAY).await;
        let _ = shutdown.send(true);
    });
    Ok("OK\n")
}

pub async fn run(config: crate::config::ChildConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = router(config.source_dir.clone(), shutdown_tx);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding child listener on {addr}"))?;
    info!("child serving {} on {addr}", config.source_dir.display());

    let mut drain_signal = shutdown_rx.clone();
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = drain_signal.changed().await;
            })
            .await
    };

    let mut force_signal = shutdown_rx;
    tokio::select! {
        result = server => result.context("serving child listener")?,
        () = async {
            let _ = force_signal.changed().await;
            sleep(DRAIN_BUDGET).await;
            warn!("graceful drain timed out; exiting anyway");
        } => {}
    }

    info!("child exiting for rebuild");
    Ok(())
}
