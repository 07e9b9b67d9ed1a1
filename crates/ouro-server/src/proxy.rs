// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Single-host reverse proxy to the child server.
//!
//! Everything that is not a patch submission is forwarded verbatim to
//! `http://localhost:<child_port>`. During the window when the child is
//! exiting and rebuilding after a patch, upstream errors surface to the
//! client as 502; no queueing or retrying.

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::shell::AppState;

pub async fn forward(State(state): State<AppState>, request: Request) -> Response {
    match forward_inner(&state, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!("proxying to child failed: {err:#}");
            (
                StatusCode::BAD_GATEWAY,
                format!("ERROR: child unavailable: {err:#}\n"),
            )
                .into_response()
        }
    }
}

async fn forward_inner(state: &AppState, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://localhost:{}{}", state.child_port, path_and_query);

    let mut headers = parts.headers;
    headers.remove(header::HOST);

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .context("reading request body")?;

    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(bytes)
        .send()
        .await
        .context("reaching child server")?;

    let status = upstream.status();
    let response_headers = upstream.headers().clone();
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
