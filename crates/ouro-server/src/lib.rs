// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ouroboros — a self-modifying HTTP server.
//!
//! One binary, two roles. The durable *shell* owns the public port: it
//! reverse-proxies application traffic to a *child* subprocess and admits
//! source patches through `POST /patch`, but only after round-tripping each
//! candidate (apply, rebuild, revert, rebuild) in an isolated sandbox. The
//! child serves the application from the source tree and, on receiving an
//! admitted patch, writes it into the tree and exits so the shell's
//! supervisor rebuilds and relaunches it. The public listener never drops
//! across child restarts.

pub mod child;
pub mod config;
pub mod error;
pub mod patch_client;
pub mod ports;
pub mod proxy;
pub mod shell;
pub mod supervisor;
pub mod verifier;

pub use config::{ChildConfig, Role, ShellConfig};
pub use error::{ChildError, ShellError};
