//! Error types surfaced over HTTP.
//!
//! Internals propagate `anyhow` errors whose context chain names the failing
//! stage (cloning, building, hashing, applying, reverting); only these types
//! translate them into status codes and plain-text bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors the shell's `/patch` handler reports to clients.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    /// Another submission holds the verification gate.
    #[error("another patch is already being verified")]
    Busy,

    /// The candidate failed sandbox verification, or the verification
    /// infrastructure itself failed.
    #[error("verifying patch: {0:#}")]
    Verification(anyhow::Error),

    /// The patch was admitted but could not be handed to the child.
    #[error("forwarding patch to child: {0:#}")]
    Forward(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ShellError {
    pub fn status(&self) -> StatusCode {
        match self {
            ShellError::Busy | ShellError::Verification(_) => StatusCode::BAD_REQUEST,
            ShellError::Forward(_) | ShellError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ShellError {
    fn into_response(self) -> Response {
        (self.status(), format!("ERROR: {self}\n")).into_response()
    }
}

/// Errors the child's `/patch` handler reports to its caller (the shell).
#[derive(Debug, thiserror::Error)]
pub enum ChildError {
    #[error("applying patch: {0}")]
    Apply(#[from] ouro_repo::VcsError),
}

impl IntoResponse for ChildError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, format!("ERROR: {self}\n")).into_response()
    }
}
