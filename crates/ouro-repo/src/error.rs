//! Error types for git subprocess operations.

pub type VcsResult<T> = Result<T, VcsError>;

#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    #[error("spawning git {op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("git {op} failed: {output}")]
    CommandFailed { op: &'static str, output: String },
}
