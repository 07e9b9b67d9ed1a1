//! Runtime configuration for both roles.

use anyhow::Context;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable that flips the binary into child mode.
pub const ROLE_VAR: &str = "OURO_CHILD";
/// Environment variable carrying the port to bind.
pub const PORT_VAR: &str = "PORT";

/// Warm-up poll budget for a freshly launched server, per wait.
pub const WARMUP_POLLS: u32 = 30;
pub const WARMUP_INTERVAL: Duration = Duration::from_millis(100);
/// How long a second `/patch` waits for the verification gate before the
/// shell reports busy.
pub const BUSY_WAIT: Duration = Duration::from_secs(60);
/// Upper bound on one sandbox build-and-launch cycle. Builds are not part of
/// the warm-up budget, but a wedged build must not hold the gate forever.
pub const REBUILD_BUDGET: Duration = Duration::from_secs(600);

/// Which half of the two-process architecture this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Shell,
    Child,
}

impl Role {
    pub fn from_env() -> Role {
        Self::from_value(env::var(ROLE_VAR).ok().as_deref())
    }

    /// Truthy values enable child mode; anything else means shell.
    pub fn from_value(value: Option<&str>) -> Role {
        match value {
            Some(v) if matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes") => {
                Role::Child
            }
            _ => Role::Shell,
        }
    }
}

/// Shell-side configuration. The test and child ports are probed at startup,
/// not configured.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// The only public port.
    pub shell_port: u16,
    /// Root of the version-controlled source tree (the working directory).
    pub source_dir: PathBuf,
    pub busy_wait: Duration,
}

impl ShellConfig {
    pub fn from_env(port_override: Option<u16>) -> anyhow::Result<Self> {
        Ok(Self {
            shell_port: resolve_port(port_override)?,
            source_dir: env::current_dir().context("resolving working directory")?,
            busy_wait: BUSY_WAIT,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChildConfig {
    pub port: u16,
    pub source_dir: PathBuf,
}

impl ChildConfig {
    pub fn from_env(port_override: Option<u16>) -> anyhow::Result<Self> {
        Ok(Self {
            port: resolve_port(port_override)?,
            source_dir: env::current_dir().context("resolving working directory")?,
        })
    }
}

fn resolve_port(port_override: Option<u16>) -> anyhow::Result<u16> {
    if let Some(port) = port_override {
        return Ok(port);
    }
    let raw = env::var(PORT_VAR).with_context(|| format!("{PORT_VAR} is not set"))?;
    raw.parse().with_context(|| format!("parsing {PORT_VAR}='{raw}' as a port"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_select_child() {
        for v in ["1", "true", "TRUE", "yes", " Yes "] {
            assert_eq!(Role::from_value(Some(v)), Role::Child, "{v:?}");
        }
    }

    #[test]
    fn everything_else_selects_shell() {
        for v in ["0", "false", "no", "", "child", "2"] {
            assert_eq!(Role::from_value(Some(v)), Role::Shell, "{v:?}");
        }
        assert_eq!(Role::from_value(None), Role::Shell);
    }

    #[test]
    fn port_override_wins() {
        assert_eq!(resolve_port(Some(8080)).unwrap(), 8080);
    }
}
