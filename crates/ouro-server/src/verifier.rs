// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Patch admission: round-trip a candidate through an isolated sandbox.
//!
//! A patch is admissible only if a fresh clone of the source tree accepts it,
//! the patched tree builds and serves, the compiled binary actually changed,
//! and the generated revert restores the original binary bit for bit. The
//! sandbox gets its own supervisor on the test port, so a patched child that
//! applies-and-exits comes back rebuilt exactly as it would in production.
//!
//! Binary identity is read through the pid of whatever instance is live:
//! the executable the kernel loaded, not the path the builder wrote.

use anyhow::{anyhow, bail, Context, Result};
use ouro_proc::ExeDigest;
use ouro_repo::GitRepo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error};

use crate::config::{REBUILD_BUDGET, WARMUP_INTERVAL, WARMUP_POLLS};
use crate::patch_client;
use crate::supervisor::{Supervisor, SupervisorState};

const TEARDOWN_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Verifier {
    source_dir: PathBuf,
    test_port: u16,
    client: reqwest::Client,
}

impl Verifier {
    pub fn new(source_dir: PathBuf, test_port: u16, client: reqwest::Client) -> Self {
        Self {
            source_dir,
            test_port,
            client,
        }
    }

    /// Run the full round trip for one candidate patch.
    ///
    /// The sandbox is torn down on every exit path. A sandbox that survives
    /// teardown would contaminate every later verification, so that case is
    /// fatal for the whole process.
    pub async fn verify(&self, patch: &[u8]) -> Result<()> {
        let sandbox = tempfile::tempdir().context("creating sandbox directory")?;
        let tree = sandbox.path().join("tree");
        GitRepo::clone_local(&self.source_dir.join(".git"), &tree)
            .await
            .context("cloning source tree into sandbox")?;

        let (supervisor, state) = Supervisor::new(tree.clone(), self.test_port, "test");
        let task = tokio::spawn(supervisor.run());

        let verdict = self.round_trip(&tree, state.clone(), patch).await;
        self.teardown(task, state).await;
        // sandbox and its tree are removed on drop
        verdict
    }

    async fn round_trip(
        &self,
        tree: &Path,
        mut state: watch::Receiver<SupervisorState>,
        patch: &[u8],
    ) -> Result<()> {
        let first = wait_for_generation(&mut state, 1)
            .await
            .context("building sandbox server")?;
        self.wait_for_server().await.context("waiting for initial test server")?;
        let initial = hash_instance(&first).context("hashing initial test server")?;

        patch_client::post_patch(&self.client, self.test_port, patch)
            .await
            .context("applying patch to test server")?;
        let patched = wait_for_generation(&mut state, 2)
            .await
            .context("rebuilding patched test server")?;
        self.wait_for_server().await.context("waiting for patched test server")?;
        let after_patch = hash_instance(&patched).context("hashing patched test server")?;
        if after_patch.digest == initial.digest {
            bail!("test server did not change after the patch was applied");
        }

        let revert = self.generate_revert(tree).await.context("generating revert")?;
        patch_client::post_patch(&self.client, self.test_port, &revert)
            .await
            .context("applying revert patch to test server")?;
        let reverted = wait_for_generation(&mut state, 3)
            .await
            .context("rebuilding reverted test server")?;
        self.wait_for_server().await.context("waiting for reverted test server")?;
        let after_revert = hash_instance(&reverted).context("hashing reverted test server")?;
        if after_revert.digest != initial.digest {
            bail!(
                "test server differs after patch and revert: {} vs {}",
                initial.digest,
                after_revert.digest
            );
        }

        Ok(())
    }

    /// Generate the inverse of the sandbox's HEAD commit from a scratch
    /// clone, so a failed revert cannot contaminate the sandbox itself
    /// before the final hash is taken.
    async fn generate_revert(&self, tree: &Path) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir().context("creating scratch directory")?;
        let copy_dir = scratch.path().join("copy");
        let copy = GitRepo::open(tree)
            .clone_to(&copy_dir)
            .await
            .context("copying sandbox tree")?;
        copy.revert_head().await.context("reverting HEAD")?;
        copy.format_patch_head().await.context("rendering revert as a patch")
    }

    async fn wait_for_server(&self) -> Result<()> {
        wait_for_http_ok(&self.client, self.test_port).await
    }

    /// Kill the whole sandbox process group and confirm the test port went
    /// silent. In-flight builds and children die with the aborted task
    /// (`kill_on_drop`); the group kill catches the running instance and
    /// anything it spawned.
    async fn teardown(&self, task: JoinHandle<Result<()>>, state: watch::Receiver<SupervisorState>) {
        task.abort();
        let _ = task.await;

        if let Some(pid) = state.borrow().pid {
            if let Err(err) = ouro_proc::kill_process_group(pid) {
                debug!("sandbox group {pid} already gone: {err}");
            }
        }

        let url = format!("http://localhost:{}/", self.test_port);
        if self
            .client
            .get(url)
            .timeout(TEARDOWN_PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
        {
            error!(
                "FATAL: sandbox on port {} survived teardown; refusing to continue",
                self.test_port
            );
            std::process::exit(1);
        }
    }
}

/// Wait until the supervisor has launched at least `target` instances.
/// Surfaces build failures and supervisor death as rejections.
pub async fn wait_for_generation(
    state: &mut watch::Receiver<SupervisorState>,
    target: u64,
) -> Result<SupervisorState> {
    let wait = async {
        loop {
            {
                let snapshot = state.borrow_and_update().clone();
                if let Some(failure) = snapshot.failed {
                    bail!("sandbox stopped: {failure}");
                }
                if snapshot.generation >= target {
                    return Ok(snapshot);
                }
            }
            state
                .changed()
                .await
                .map_err(|_| anyhow!("sandbox supervisor stopped"))?;
        }
    };
    timeout(REBUILD_BUDGET, wait)
        .await
        .map_err(|_| anyhow!("timed out waiting for sandbox rebuild"))?
}

/// Poll `GET /` until a 200 arrives or the warm-up budget runs out.
pub async fn wait_for_http_ok(client: &reqwest::Client, port: u16) -> Result<()> {
    let url = format!("http://localhost:{port}/");
    let mut last = String::from("no response");
    for _ in 0..WARMUP_POLLS {
        sleep(WARMUP_INTERVAL).await;
        match client.get(url.as_str()).timeout(Duration::from_secs(1)).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => return Ok(()),
            Ok(response) => last = format!("status {}", response.status()),
            Err(err) => last = err.to_string(),
        }
    }
    bail!("server on port {port} did not answer 200 within the warm-up budget: {last}")
}

fn hash_instance(state: &SupervisorState) -> Result<ExeDigest> {
    let pid = state.pid.ok_or_else(|| anyhow!("no running instance"))?;
    let exe = ouro_proc::hash_exe_for_pid(pid)
        .with_context(|| format!("hashing executable of pid {pid}"))?;
    debug!("{} {}", exe.digest, exe.path.display());
    Ok(exe)
}
