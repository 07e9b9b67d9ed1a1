// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! The durable front process: public listener, patch gate, child supervisor.
//!
//! The shell's lifetime spans many children. It binds the public port once,
//! proxies application traffic to whatever child is currently alive, and
//! gates `/patch` so that exactly one verification runs at a time. The
//! forward to the real child only happens after verification has fully
//! succeeded, including sandbox teardown, so the test port is free before
//! the child is disturbed.

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ShellConfig;
use crate::error::ShellError;
use crate::patch_client;
use crate::ports;
use crate::proxy;
use crate::supervisor::Supervisor;
use crate::verifier::Verifier;

#[derive(Clone)]
pub struct AppState {
    pub child_port: u16,
    pub client: reqwest::Client,
    pub verifier: Arc<Verifier>,
    pub patch_gate: Arc<Mutex<()>>,
    pub busy_wait: Duration,
}

impl AppState {
    pub fn new(config: &ShellConfig, child_port: u16, test_port: u16) -> Self {
        let client = reqwest::Client::new();
        Self {
            child_port,
            client: client.clone(),
            verifier: Arc::new(Verifier::new(config.source_dir.clone(), test_port, client)),
            patch_gate: Arc::new(Mutex::new(())),
            busy_wait: config.busy_wait,
        }
    }
}

/// Build the shell's router: `POST /patch` handled locally, every other
/// path *and method* proxied to the child.
pub fn app(state: AppState) -> Router {
    Router::new()
        // the method fallback keeps e.g. GET /patch on the proxy path
        .route("/patch", post(handle_patch).fallback(proxy::forward))
        .fallback(proxy::forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn run(config: ShellConfig) -> Result<()> {
    let test_port = ports::free_port_after(config.shell_port).context("finding free test port")?;
    let child_port = ports::free_port_after(test_port).context("finding free child port")?;
    info!(
        "port triple: shell {} / test {test_port} / child {child_port}",
        config.shell_port
    );

    let (supervisor, _state) = Supervisor::new(config.source_dir.clone(), child_port, "child");
    tokio::spawn(async move {
        // A source tree that stops building is unrecoverable here: new
        // source only arrives through verified patches.
        if let Err(err) = supervisor.run().await {
            error!("FATAL: child supervisor stopped: {err:#}");
            std::process::exit(1);
        }
    });

    let state = AppState::new(&config, child_port, test_port);
    let router = app(state);

    // Bind before the child is ready; early proxied requests fail upstream,
    // but the public port never refuses a connection once we are up.
    let addr = SocketAddr::from(([0, 0, 0, 0], config.shell_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding public listener on {addr}"))?;
    info!("shell listening on {addr}");
    axum::serve(listener, router).await.context("serving public listener")
}

async fn handle_patch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<&'static str, ShellError> {
    let gate = Arc::clone(&state.patch_gate);
    let busy_wait = state.busy_wait;
    serialized(gate, busy_wait, admit(state, body)).await.map(|()| "OK\n")
}

/// Run `work` holding the patch gate, in a task of its own: a client hanging
/// up must not abort a verification mid-flight.
pub async fn serialized<F, T>(
    gate: Arc<Mutex<()>>,
    busy_wait: Duration,
    work: F,
) -> Result<T, ShellError>
where
    F: Future<Output = Result<T, ShellError>> + Send + 'static,
    T: Send + 'static,
{
    let guard: OwnedMutexGuard<()> = timeout(busy_wait, gate.lock_owned())
        .await
        .map_err(|_| ShellError::Busy)?;

    let task = tokio::spawn(async move {
        let _guard = guard;
        work.await
    });
    match task.await {
        Ok(result) => result,
        Err(err) => Err(ShellError::Internal(format!("patch task failed: {err}"))),
    }
}

async fn admit(state: AppState, patch: Bytes) -> Result<(), ShellError> {
    state
        .verifier
        .verify(&patch)
        .await
        .map_err(ShellError::Verification)?;
    // Teardown is complete: the test port is free before the child is touched.
    patch_client::post_patch(&state.client, state.child_port, &patch)
        .await
        .map_err(ShellError::Forward)?;
    info!("patch admitted and forwarded; child will rebuild");
    Ok(())
}
