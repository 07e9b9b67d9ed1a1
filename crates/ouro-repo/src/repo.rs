// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! A git repository rooted at a working tree, driven through subprocesses.

use crate::error::{VcsError, VcsResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Identity for commits created by automated operations (`git am`,
/// `git revert`), so fresh clones work without global git configuration.
/// Commit metadata never feeds into the binary-hash admission criterion.
const COMMIT_IDENTITY: [&str; 4] = [
    "-c",
    "user.name=ouroboros",
    "-c",
    "user.email=ouroboros@localhost",
];

#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Wrap an existing repository working tree.
    pub fn open(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Clone a local repository (a working tree or a bare `.git` directory)
    /// into `dest`, which must not exist yet.
    pub async fn clone_local(source: &Path, dest: &Path) -> VcsResult<GitRepo> {
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg(source).arg(dest);
        run("clone", &mut cmd, None).await?;
        debug!("cloned {} into {}", source.display(), dest.display());
        Ok(GitRepo::open(dest))
    }

    /// Clone this repository into `dest`.
    pub async fn clone_to(&self, dest: &Path) -> VcsResult<GitRepo> {
        Self::clone_local(&self.root, dest).await
    }

    /// Apply a mailbox-format patch to the working tree, recording a commit.
    /// On failure the tree is left unchanged (`git am` aborts atomically per
    /// patch). Returns git's combined output for logging.
    pub async fn apply_mailbox(&self, patch: &[u8]) -> VcsResult<String> {
        let mut cmd = Command::new("git");
        cmd.args(COMMIT_IDENTITY).arg("am").current_dir(&self.root);
        let output = run("am", &mut cmd, Some(patch)).await?;
        Ok(combined_output(&output))
    }

    /// Revert the HEAD commit, committing the inverse on top.
    pub async fn revert_head(&self) -> VcsResult<()> {
        let mut cmd = Command::new("git");
        cmd.args(COMMIT_IDENTITY)
            .args(["revert", "--no-edit", "HEAD"])
            .current_dir(&self.root);
        run("revert", &mut cmd, None).await?;
        Ok(())
    }

    /// Render the HEAD commit as a mailbox patch — the payload
    /// [`apply_mailbox`](Self::apply_mailbox) consumes.
    pub async fn format_patch_head(&self) -> VcsResult<Vec<u8>> {
        let mut cmd = Command::new("git");
        cmd.args(["format-patch", "--stdout", "HEAD~1"]).current_dir(&self.root);
        let output = run("format-patch", &mut cmd, None).await?;
        Ok(output.stdout)
    }
}

async fn run(
    op: &'static str,
    cmd: &mut Command,
    input: Option<&[u8]>,
) -> VcsResult<std::process::Output> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| VcsError::Spawn { op, source })?;
    if let Some(bytes) = input {
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(bytes)
                .await
                .map_err(|source| VcsError::Spawn { op, source })?;
            // dropped here so git sees EOF
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|source| VcsError::Spawn { op, source })?;
    if !output.status.success() {
        return Err(VcsError::CommandFailed {
            op,
            output: combined_output(&output),
        });
    }
    Ok(output)
}

fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text
}
