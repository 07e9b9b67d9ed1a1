use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;

use ouro_repo::{GitRepo, VcsError};

fn check_git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
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
fn setup_repo() -> (TempDir, PathBuf) {
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
fn make_patch(repo: &Path, file: &str, content: &str, message: &str) -> Vec<u8> {
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

#[tokio::test]
async fn clone_local_clones_the_git_dir() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, repo) = setup_repo();
    let dest_holder = TempDir::new().unwrap();
    let dest = dest_holder.path().join("clone");

    let cloned = GitRepo::clone_local(&repo.join(".git"), &dest).await.unwrap();
    assert_eq!(cloned.root(), dest.as_path());
    assert_eq!(fs::read_to_string(dest.join("notes.txt")).unwrap(), "before\n");
}

#[tokio::test]
async fn apply_mailbox_applies_and_commits() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, repo) = setup_repo();
    let patch = make_patch(&repo, "notes.txt", "after\n", "update notes");

    let output = GitRepo::open(&repo).apply_mailbox(&patch).await.unwrap();
    assert!(output.contains("update notes"), "unexpected output: {output}");
    assert_eq!(fs::read_to_string(repo.join("notes.txt")).unwrap(), "after\n");
}

#[tokio::test]
async fn apply_mailbox_rejects_garbage() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, repo) = setup_repo();
    let err = GitRepo::open(&repo).apply_mailbox(b"this is not a patch").await.unwrap_err();
    assert!(matches!(err, VcsError::CommandFailed { op: "am", .. }));
    assert_eq!(fs::read_to_string(repo.join("notes.txt")).unwrap(), "before\n");
}

#[tokio::test]
async fn apply_mailbox_rejects_conflicting_patch() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, repo) = setup_repo();
    let patch = make_patch(&repo, "notes.txt", "after\n", "update notes");

    // Move the target file away from the patch's base before applying.
    fs::write(repo.join("notes.txt"), "diverged\n").unwrap();
    git(&repo, &["commit", "-am", "diverge"]);

    let err = GitRepo::open(&repo).apply_mailbox(&patch).await.unwrap_err();
    assert!(matches!(err, VcsError::CommandFailed { op: "am", .. }));
}

#[tokio::test]
async fn revert_round_trip_restores_content() {
    if !check_git_available() {
        eprintln!("Git not available, skipping test");
        return;
    }

    let (_dir, repo) = setup_repo();
    let patch = make_patch(&repo, "notes.txt", "after\n", "update notes");
    GitRepo::open(&repo).apply_mailbox(&patch).await.unwrap();

    // Revert from a copy, the way the verifier does, so a failed revert
    // cannot touch the tree the revert is generated for.
    let scratch = TempDir::new().unwrap();
    let copy_dir = scratch.path().join("copy");
    let copy = GitRepo::open(&repo).clone_to(&copy_dir).await.unwrap();
    copy.revert_head().await.unwrap();
    assert_eq!(fs::read_to_string(copy_dir.join("notes.txt")).unwrap(), "before\n");

    let revert = copy.format_patch_head().await.unwrap();
    let text = String::from_utf8_lossy(&revert);
    assert!(text.contains("Revert"), "revert patch should carry the revert subject");

    GitRepo::open(&repo).apply_mailbox(&revert).await.unwrap();
    assert_eq!(fs::read_to_string(repo.join("notes.txt")).unwrap(), "before\n");
}
