#![allow(dead_code)]

use axum::Router;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub fn check_git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn git(dir: &Path, args: &[&str]) {
    let output = std::process::Command::new("git")
        .args(["-c", "user.name=Test User", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("running git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// Repository with `notes.txt` containing "before\n" committed on main.
pub fn setup_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("repo");
    fs::create_dir(&root).unwrap();
    git(&root, &["init", "-b", "main"]);
    fs::write(root.join("notes.txt"), "before\n").unwrap();
    git(&root, &["add", "notes.txt"]);
    git(&root, &["commit", "-m", "initial"]);
    (dir, root)
}

/// Build a mailbox patch by committing `content` into a clone of `repo`.
pub fn make_patch(repo: &Path, file: &str, content: &str, message: &str) -> Vec<u8> {
    let scratch = TempDir::new().unwrap();
    let clone = scratch.path().join("clone");
    git(repo, &["clone", ".", clone.to_str().unwrap()]);
    fs::write(clone.join(file), content).unwrap();
    git(&clone, &["add", file]);
    git(&clone, &["commit", "-m", message]);
    let output = std::process::Command::new("git")
        .args(["format-patch", "--stdout", "HEAD~1"])
        .current_dir(&clone)
        .output()
        .expect("running git format-patch");
    assert!(output.status.success());
    output.stdout
}

/// Serve a router on an ephemeral loopback port.
pub async fn serve(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}
