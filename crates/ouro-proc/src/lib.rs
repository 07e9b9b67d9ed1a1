// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operating-system process facilities for ouroboros.
//!
//! The verifier decides whether a patch "took effect" by digesting the
//! executable file that actually backs a running process, resolved from its
//! pid. Build pipelines may relocate or rewrite binaries between what the
//! builder wrote and what the kernel loaded, so the pid is the only honest
//! starting point. This crate also owns process-group teardown, because a
//! sandbox spawns subprocesses of its own and killing just the direct child
//! would leak them.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

pub type ProcResult<T> = Result<T, ProcError>;

#[derive(Debug, thiserror::Error)]
pub enum ProcError {
    #[error("resolving executable path for pid {pid}: {source}")]
    ExePath {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("executable path lookup is not supported on this platform")]
    UnsupportedPlatform,

    #[error("reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("signalling process group {pgid}: {source}")]
    Kill {
        pgid: u32,
        #[source]
        source: io::Error,
    },
}

/// The executable backing a live process, with its content digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExeDigest {
    pub path: PathBuf,
    pub digest: String,
}

/// Resolve the on-disk executable path backing `pid`.
#[cfg(target_os = "linux")]
pub fn exe_path_for_pid(pid: u32) -> ProcResult<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/exe"))
        .map_err(|source| ProcError::ExePath { pid, source })
}

/// Resolve the on-disk executable path backing `pid`.
#[cfg(target_os = "macos")]
pub fn exe_path_for_pid(pid: u32) -> ProcResult<PathBuf> {
    let mut buf = vec![0u8; libc::PROC_PIDPATHINFO_MAXSIZE as usize];
    let len = unsafe {
        libc::proc_pidpath(
            pid as libc::c_int,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len() as u32,
        )
    };
    if len <= 0 {
        return Err(ProcError::ExePath {
            pid,
            source: io::Error::last_os_error(),
        });
    }
    buf.truncate(len as usize);
    let path = String::from_utf8(buf).map_err(|err| ProcError::ExePath {
        pid,
        source: io::Error::new(io::ErrorKind::InvalidData, err),
    })?;
    Ok(PathBuf::from(path))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn exe_path_for_pid(_pid: u32) -> ProcResult<PathBuf> {
    Err(ProcError::UnsupportedPlatform)
}

/// SHA-256 digest of a file's contents, hex-encoded.
pub fn hash_file(path: &Path) -> ProcResult<String> {
    let io_err = |source| ProcError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Digest the executable backing `pid`.
pub fn hash_exe_for_pid(pid: u32) -> ProcResult<ExeDigest> {
    let path = exe_path_for_pid(pid)?;
    let digest = hash_file(&path)?;
    Ok(ExeDigest { path, digest })
}

/// SIGKILL the entire process group led by `pid`.
///
/// The target must have been launched as a group leader (setsid). Errors
/// include ESRCH when the group is already gone; callers that only want
/// best-effort teardown can ignore that case.
#[cfg(unix)]
pub fn kill_process_group(pid: u32) -> ProcResult<()> {
    let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
    if rc == 0 {
        Ok(())
    } else {
        Err(ProcError::Kill {
            pgid: pid,
            source: io::Error::last_os_error(),
        })
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(pid: u32) -> ProcResult<()> {
    let _ = pid;
    Err(ProcError::UnsupportedPlatform)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"identical bytes").unwrap();
        std::fs::write(&b, b"identical bytes").unwrap();
        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());

        let mut f = std::fs::OpenOptions::new().append(true).open(&b).unwrap();
        f.write_all(b"!").unwrap();
        drop(f);
        assert_ne!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
    }

    #[test]
    fn hash_missing_file_reports_path() {
        let err = hash_file(Path::new("/nonexistent/ouro-proc-test")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ouro-proc-test"));
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn resolves_own_executable() {
        let path = exe_path_for_pid(std::process::id()).unwrap();
        assert!(path.is_file(), "{} should exist", path.display());
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    #[test]
    fn exe_digest_matches_direct_hash() {
        let pid = std::process::id();
        let exe = hash_exe_for_pid(pid).unwrap();
        assert_eq!(exe.digest, hash_file(&exe.path).unwrap());
        assert_eq!(exe.digest.len(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn killing_a_dead_group_errors() {
        // Pid far above any plausible live process group.
        let err = kill_process_group(u32::MAX / 2).unwrap_err();
        assert!(matches!(err, ProcError::Kill { .. }));
    }
}
