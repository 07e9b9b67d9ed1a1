// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Child supervision: build the source tree, run the binary, relaunch on exit.
//!
//! The same component supervises both the real child (for the shell, on the
//! child port) and the sandbox child (for the verifier, on the test port).
//! A child exiting is not an error — it is the signal that a patch landed in
//! its source tree and a rebuild is due. Only a failed build stops the loop:
//! new source can only arrive through a verified patch, so a tree that does
//! not build is unrecoverable here.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::info;

use crate::config::{PORT_VAR, ROLE_VAR};

/// Name of the binary the build step produces.
pub const BIN_NAME: &str = "ouroboros";

/// What the supervisor publishes about the process it currently runs.
#[derive(Debug, Clone, Default)]
pub struct SupervisorState {
    /// Incremented every time a freshly built binary is launched. The
    /// verifier keys its hash checks on this: generation N and N+1 are
    /// different processes, possibly backed by different binaries.
    pub generation: u64,
    /// Pid of the instance currently (or most recently) serving.
    pub pid: Option<u32>,
    /// Set once if the loop stopped on a build failure.
    pub failed: Option<String>,
}

pub struct Supervisor {
    source_dir: PathBuf,
    port: u16,
    label: &'static str,
    state: watch::Sender<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        source_dir: PathBuf,
        port: u16,
        label: &'static str,
    ) -> (Self, watch::Receiver<SupervisorState>) {
        let (state, rx) = watch::channel(SupervisorState::default());
        (
            Self {
                source_dir,
                port,
                label,
                state,
            },
            rx,
        )
    }

    /// Build/launch/wait loop. Returns only on error; the error is also
    /// published on the state channel so watchers need not hold the handle.
    pub async fn run(self) -> Result<()> {
        let result = self.supervise().await;
        if let Err(err) = &result {
            let message = format!("{err:#}");
            self.state.send_modify(|s| s.failed = Some(message));
        }
        result
    }

    async fn supervise(&self) -> Result<()> {
        loop {
            let build_dir = tempfile::tempdir().context("creating build directory")?;
            let binary = self.build(build_dir.path()).await?;
            let status = self.launch_and_wait(&binary).await?;
            info!("{} server exited: {status}", self.label);
            // build_dir (and the binary in it) is dropped here; the next
            // iteration builds into a fresh one.
        }
    }

    async fn build(&self, target_dir: &Path) -> Result<PathBuf> {
        info!("{}: building {}", self.label, self.source_dir.display());
        let mut cmd = Command::new("cargo");
        cmd.args(["build", "--release", "--bin", BIN_NAME])
            .arg("--target-dir")
            .arg(target_dir)
            .current_dir(&self.source_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // a cancelled verification must not leave the compiler running
            .kill_on_drop(true);
        let child = cmd.spawn().context("running cargo build")?;
        let output = child
            .wait_with_output()
            .await
            .context("waiting for cargo build")?;
        if !output.status.success() {
            bail!(
                "cargo build failed ({}):\n{}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(target_dir.join("release").join(BIN_NAME))
    }

    async fn launch_and_wait(&self, binary: &Path) -> Result<ExitStatus> {
        let mut cmd = Command::new(binary);
        cmd.current_dir(&self.source_dir)
            .env(ROLE_VAR, "1")
            .env(PORT_VAR, self.port.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own session and process group, so teardown can signal the group.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("launching {}", binary.display()))?;
        let pid = child.id().context("launched child has no pid")?;
        info!("{} server running (pid {pid}, port {})", self.label, self.port);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pipe_lines(self.label, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pipe_lines(self.label, stderr));
        }

        // Published only after a successful spawn: by the time anything
        // answers on the port at this generation, it is this process.
        self.state.send_modify(|s| {
            s.generation += 1;
            s.pid = Some(pid);
        });

        child.wait().await.context("waiting for child process")
    }
}

async fn pipe_lines(label: &'static str, stream: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!("{label}: {line}");
    }
}
