// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! ouroboros binary: role dispatch.
//!
//! The same executable serves both halves of the architecture. `OURO_CHILD`
//! set to a truthy value selects the child role; otherwise this process is
//! the shell.

use anyhow::Result;
use clap::Parser;
use ouro_logging::{LogFormat, LogLevel};
use ouro_server::config::{ChildConfig, Role, ShellConfig};

#[derive(Parser, Debug)]
#[command(name = "ouroboros", about = "A self-modifying HTTP server", version)]
struct Args {
    /// Port to bind (overrides the PORT environment variable)
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level
    #[arg(short, long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value = "plaintext")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match Role::from_env() {
        Role::Child => {
            ouro_logging::init("ouroboros-child", args.log_level.into(), args.log_format)?;
            ouro_server::child::run(ChildConfig::from_env(args.port)?).await
        }
        Role::Shell => {
            ouro_logging::init("ouroboros", args.log_level.into(), args.log_format)?;
            tracing::info!("starting shell");
            ouro_server::shell::run(ShellConfig::from_env(args.port)?).await
        }
    }
}
