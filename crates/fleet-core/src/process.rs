//! Operating-system capabilities used by the lifecycle orchestrator.
//!
//! Each capability is a trait so the orchestrator can be driven by in-memory
//! fakes in tests. The `System*` types use `lsof`, signals and child
//! processes the same way an operator would from a terminal.

use crate::config::DependencyConfig;
use crate::error::{FleetError, Result};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

pub trait ProcessTable {
    /// PID of the process listening on `port`, if any.
    fn find_process_owning_port(&self, port: u16) -> Result<Option<u32>>;

    /// Unconditional kill. No grace period.
    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Everything needed to launch one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub name: String,
    pub launcher: PathBuf,
    pub script: PathBuf,
    pub cwd: PathBuf,
    /// Complete environment of the child. Nothing is inherited.
    pub env: BTreeMap<OsString, OsString>,
}

pub trait ServiceSpawner {
    /// Launch detached and return the child's PID without waiting on it.
    fn spawn(&self, request: &SpawnRequest) -> Result<u32>;
}

pub trait DependencyManager {
    fn up(&self, manifest: &Path) -> Result<()>;
    fn down(&self, manifest: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Command helpers
// ---------------------------------------------------------------------------

fn command(program: &str, args: &[String], sudo: bool) -> Command {
    if sudo {
        let mut cmd = Command::new("sudo");
        cmd.arg(program).args(args);
        cmd
    } else {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    }
}

fn run(mut cmd: Command, program: &str) -> Result<()> {
    let status = cmd.status().map_err(|source| FleetError::CommandSpawn {
        program: program.to_string(),
        source,
    })?;
    if !status.success() {
        return Err(FleetError::CommandFailed {
            program: program.to_string(),
            status: status.to_string(),
        });
    }
    Ok(())
}

/// First PID in `lsof -t` output.
pub fn parse_lsof_pid(stdout: &str) -> Option<u32> {
    stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}

// ---------------------------------------------------------------------------
// SystemProcessTable
// ---------------------------------------------------------------------------

/// `lsof` for discovery, `SIGKILL` for termination. With `sudo` the kill
/// goes through `sudo kill -9` so it can reach processes of other users.
#[derive(Debug, Clone, Default)]
pub struct SystemProcessTable {
    pub sudo: bool,
}

impl ProcessTable for SystemProcessTable {
    fn find_process_owning_port(&self, port: u16) -> Result<Option<u32>> {
        let output = Command::new("lsof")
            .args(["-nP", "-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| FleetError::CommandSpawn {
                program: "lsof".to_string(),
                source,
            })?;
        // lsof exits 1 when nothing matches.
        Ok(parse_lsof_pid(&String::from_utf8_lossy(&output.stdout)))
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        if self.sudo {
            debug!(pid, "sudo kill -9");
            return run(
                command("kill", &["-9".to_string(), pid.to_string()], true),
                "kill",
            );
        }
        debug!(pid, "SIGKILL");
        send_sigkill(pid)
    }
}

#[cfg(unix)]
fn send_sigkill(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // 0 and anything past i32::MAX would address a process group.
    let raw = i32::try_from(pid).ok().filter(|raw| *raw > 0).ok_or_else(|| {
        FleetError::Signal {
            pid,
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        }
    })?;
    kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|errno| FleetError::Signal {
        pid,
        source: errno.into(),
    })
}

#[cfg(not(unix))]
fn send_sigkill(pid: u32) -> Result<()> {
    run(
        command("kill", &["-9".to_string(), pid.to_string()], false),
        "kill",
    )
}

// ---------------------------------------------------------------------------
// DetachedSpawner
// ---------------------------------------------------------------------------

/// Spawns services in their own process group with null stdio so they
/// outlive the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct DetachedSpawner;

impl ServiceSpawner for DetachedSpawner {
    fn spawn(&self, request: &SpawnRequest) -> Result<u32> {
        let mut cmd = Command::new(&request.launcher);
        cmd.arg(&request.script)
            .current_dir(&request.cwd)
            .env_clear()
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn().map_err(|source| FleetError::CommandSpawn {
            program: request.launcher.display().to_string(),
            source,
        })?;
        Ok(child.id())
    }
}

// ---------------------------------------------------------------------------
// ComposeDependencies
// ---------------------------------------------------------------------------

/// Runs the configured dependency program (docker-compose by default) in
/// the manifest's directory.
#[derive(Debug, Clone)]
pub struct ComposeDependencies {
    pub config: DependencyConfig,
    pub sudo: bool,
}

impl ComposeDependencies {
    pub fn new(config: DependencyConfig, sudo: bool) -> Self {
        Self { config, sudo }
    }

    fn invoke(&self, manifest: &Path, args: &[String]) -> Result<()> {
        let mut cmd = command(&self.config.program, args, self.sudo);
        if let Some(dir) = manifest.parent() {
            cmd.current_dir(dir);
        }
        debug!(program = %self.config.program, ?args, "dependency command");
        run(cmd, &self.config.program)
    }
}

impl DependencyManager for ComposeDependencies {
    fn up(&self, manifest: &Path) -> Result<()> {
        self.invoke(manifest, &self.config.up_args)
    }

    fn down(&self, manifest: &Path) -> Result<()> {
        self.invoke(manifest, &self.config.down_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lsof_first_pid_wins() {
        assert_eq!(parse_lsof_pid("4242\n4243\n"), Some(4242));
        assert_eq!(parse_lsof_pid("\n  77 \n"), Some(77));
        assert_eq!(parse_lsof_pid(""), None);
        assert_eq!(parse_lsof_pid("garbage\n"), None);
    }

    #[test]
    fn sudo_prefixes_program() {
        let cmd = command("docker-compose", &["up".into(), "-d".into()], true);
        assert_eq!(cmd.get_program(), "sudo");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["docker-compose", "up", "-d"]);

        let cmd = command("kill", &["-9".into(), "1".into()], false);
        assert_eq!(cmd.get_program(), "kill");
    }

    #[cfg(unix)]
    #[test]
    fn terminate_sends_sigkill() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        SystemProcessTable { sudo: false }
            .terminate(child.id())
            .unwrap();
        let status = child.wait().unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[cfg(unix)]
    #[test]
    fn terminate_rejects_group_pids() {
        let table = SystemProcessTable { sudo: false };
        for pid in [0, u32::MAX] {
            assert!(matches!(
                table.terminate(pid),
                Err(FleetError::Signal { pid: p, .. }) if p == pid
            ));
        }
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_failure_and_missing_program() {
        assert!(run(Command::new("true"), "true").is_ok());
        assert!(matches!(
            run(Command::new("false"), "false"),
            Err(FleetError::CommandFailed { .. })
        ));
        assert!(matches!(
            run(Command::new("fleet-no-such-program"), "fleet-no-such-program"),
            Err(FleetError::CommandSpawn { .. })
        ));
    }
}
