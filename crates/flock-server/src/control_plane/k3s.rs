//! k3s Adapter
//!
//! Controller: `k3s.service` is managed by the host's systemd and started on
//! demand. Agent: a transient `k3s-agent.service` unit is created with
//! `systemd-run` so the agent is supervised and restarted by systemd.

use super::{ControlPlane, ControlPlaneError, JoinCredential, TokenIssuer};
use async_trait::async_trait;
use flock_core::Role;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const SERVER_UNIT: &str = "k3s.service";
const AGENT_UNIT: &str = "k3s-agent.service";
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const AGENT_SETTLE: Duration = Duration::from_secs(1);
const JOURNAL_LINES: &str = "10";

/// State reported by `systemctl is-active`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Active,
    Activating,
    Failed,
    Inactive,
    Other(String),
}

impl UnitState {
    pub fn parse(output: &str) -> Self {
        match output.trim() {
            "active" => UnitState::Active,
            "activating" | "reloading" => UnitState::Activating,
            "failed" => UnitState::Failed,
            "inactive" | "deactivating" => UnitState::Inactive,
            other => UnitState::Other(other.to_string()),
        }
    }
}

/// `https://<address>:<port>`, bracketing IPv6 literals.
pub fn control_plane_url(address: &str, port: u16) -> String {
    if address.contains(':') && !address.starts_with('[') {
        format!("https://[{address}]:{port}")
    } else {
        format!("https://{address}:{port}")
    }
}

/// `k3s token create` accepts Go duration strings.
fn format_ttl(ttl: Duration) -> String {
    format!("{}s", ttl.as_secs().max(1))
}

/// Locate `binary` on PATH, or accept it as-is when it is a path.
fn find_executable(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(binary))
        .find(|path| path.is_file())
}

/// Effective uid from /proc; None when it cannot be read.
fn effective_uid() -> Option<u32> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    status
        .lines()
        .find_map(|line| line.strip_prefix("Uid:"))
        .and_then(|ids| ids.split_whitespace().nth(1))
        .and_then(|euid| euid.parse().ok())
}

async fn run(program: &str, args: &[&str]) -> Result<Output, ControlPlaneError> {
    let command = format!("{program} {}", args.first().copied().unwrap_or_default());
    debug!(program = %program, args = ?args, "Running command");
    Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ControlPlaneError::Spawn { command, source })
}

/// Run a command and fail with its stderr when it exits non-zero.
async fn run_checked(program: &str, args: &[&str]) -> Result<String, ControlPlaneError> {
    let output = run(program, args).await?;
    if !output.status.success() {
        return Err(ControlPlaneError::CommandFailed {
            command: format!("{program} {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn unit_state(unit: &str) -> Result<UnitState, ControlPlaneError> {
    // is-active exits non-zero for anything but active; only stdout matters
    let output = run("systemctl", &["is-active", unit]).await?;
    Ok(UnitState::parse(&String::from_utf8_lossy(&output.stdout)))
}

async fn journal_tail(unit: &str) -> String {
    match run("journalctl", &["-u", unit, "-n", JOURNAL_LINES, "--no-pager"]).await {
        Ok(output) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        Err(e) => format!("journal unavailable: {e}"),
    }
}

/// `systemctl start` then wait for the unit to report active.
async fn start_unit(unit: &str) -> Result<(), ControlPlaneError> {
    run_checked("systemctl", &["start", unit]).await?;
    wait_until_active(unit).await
}

/// Poll `unit` until it is active; a failed unit ends the wait with its journal.
async fn wait_until_active(unit: &str) -> Result<(), ControlPlaneError> {
    loop {
        match unit_state(unit).await? {
            UnitState::Active => return Ok(()),
            UnitState::Failed => {
                return Err(ControlPlaneError::ServiceFailed {
                    unit: unit.to_string(),
                    detail: journal_tail(unit).await,
                })
            }
            state => debug!(unit = %unit, state = ?state, "Waiting for unit"),
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// k3s managed through systemd.
#[derive(Debug, Clone)]
pub struct K3s {
    binary: String,
}

impl K3s {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn resolve_binary(&self) -> Result<PathBuf, ControlPlaneError> {
        find_executable(&self.binary).ok_or_else(|| ControlPlaneError::NotInstalled(self.binary.clone()))
    }

    fn agent_unit_args(binary: &Path, controller_url: &str, token: &str) -> Vec<String> {
        vec![
            format!("--unit={AGENT_UNIT}"),
            "--description=compute-flock k3s agent".to_string(),
            "-p".to_string(),
            "Restart=always".to_string(),
            "-p".to_string(),
            "RestartSec=10".to_string(),
            binary.display().to_string(),
            "agent".to_string(),
            "--server".to_string(),
            controller_url.to_string(),
            "--token".to_string(),
            token.to_string(),
        ]
    }
}

#[async_trait]
impl ControlPlane for K3s {
    async fn verify_prerequisites(&self, role: Role) -> Result<(), ControlPlaneError> {
        match effective_uid() {
            Some(0) => {}
            Some(uid) => warn!(uid = uid, "Not running as root; systemd operations may fail"),
            None => debug!("Could not determine effective uid"),
        }

        let binary = self.resolve_binary()?;
        for tool in ["systemctl", "journalctl"] {
            find_executable(tool).ok_or_else(|| ControlPlaneError::NotInstalled(tool.to_string()))?;
        }

        match role {
            Role::Controller => {
                run_checked("systemctl", &["cat", SERVER_UNIT])
                    .await
                    .map_err(|e| {
                        ControlPlaneError::Prerequisite(format!("{SERVER_UNIT} is not installed: {e}"))
                    })?;
            }
            Role::Agent => {
                find_executable("systemd-run")
                    .ok_or_else(|| ControlPlaneError::NotInstalled("systemd-run".to_string()))?;
            }
        }

        info!(binary = %binary.display(), role = %role, "Control plane prerequisites satisfied");
        Ok(())
    }

    async fn start_as_controller(&self, timeout: Duration) -> Result<(), ControlPlaneError> {
        info!(unit = SERVER_UNIT, "Starting control plane");
        match tokio::time::timeout(timeout, start_unit(SERVER_UNIT)).await {
            Ok(result) => {
                result?;
                info!(unit = SERVER_UNIT, "Control plane active");
                Ok(())
            }
            Err(_) => Err(ControlPlaneError::Timeout(timeout)),
        }
    }

    async fn join_as_agent(&self, controller_url: &str, token: &str) -> Result<(), ControlPlaneError> {
        let binary = self.resolve_binary()?;

        // A previous attempt may have left the transient unit behind
        let _ = run("systemctl", &["stop", AGENT_UNIT]).await;
        let _ = run("systemctl", &["reset-failed", AGENT_UNIT]).await;

        let args = Self::agent_unit_args(&binary, controller_url, token);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_checked("systemd-run", &args).await?;

        tokio::time::sleep(AGENT_SETTLE).await;

        match unit_state(AGENT_UNIT).await? {
            UnitState::Active | UnitState::Activating => {
                info!(unit = AGENT_UNIT, controller_url = %controller_url, "k3s agent started");
                Ok(())
            }
            state => Err(ControlPlaneError::ServiceFailed {
                unit: AGENT_UNIT.to_string(),
                detail: format!("state {state:?}; {}", journal_tail(AGENT_UNIT).await),
            }),
        }
    }
}

/// Mints join tokens with `k3s token create`.
#[derive(Debug, Clone)]
pub struct K3sTokenIssuer {
    binary: String,
}

impl K3sTokenIssuer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for K3sTokenIssuer {
    async fn issue(&self, purpose: &str, ttl: Duration) -> Result<JoinCredential, ControlPlaneError> {
        let ttl_arg = format_ttl(ttl);
        let stdout = run_checked(
            &self.binary,
            &["token", "create", "--description", purpose, "--ttl", ttl_arg.as_str()],
        )
        .await?;

        let token = stdout.trim();
        if token.is_empty() {
            return Err(ControlPlaneError::EmptyToken);
        }

        debug!(purpose = %purpose, ttl = %ttl_arg, "Join token issued");
        Ok(JoinCredential {
            token: token.to_string(),
            ttl,
        })
    }
}
