//! Start, stop and restart of the whole fleet.
//!
//! Nothing here holds process handles. Services are spawned detached and
//! rediscovered by port when it is time to stop them.

use crate::config::{Config, RuntimeConfig};
use crate::descriptor::ServiceDescriptor;
use crate::env::{self, EnvFile, EnvWarning};
use crate::error::Result;
use crate::paths;
use crate::process::{DependencyManager, ProcessTable, ServiceSpawner, SpawnRequest};
use crate::registry::DescriptorLog;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DependencyOutcome {
    /// No manifest at the fleet root.
    Skipped,
    Done { manifest: PathBuf },
    Failed { manifest: PathBuf, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LogStatus {
    Missing,
    Corrupt { error: String },
    Loaded { entries: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpawnOutcome {
    Started { name: String, pid: u32 },
    Skipped { name: String, reason: String },
    Failed { name: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PortOutcome {
    Killed { port: u16, pid: u32 },
    NotFound { port: u16 },
    Failed { port: u16, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartReport {
    pub dependencies: DependencyOutcome,
    pub log: LogStatus,
    pub env_warnings: Vec<EnvWarningReport>,
    pub services: Vec<SpawnOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvWarningReport {
    pub line: usize,
    pub content: String,
}

impl From<&EnvWarning> for EnvWarningReport {
    fn from(w: &EnvWarning) -> Self {
        Self {
            line: w.line,
            content: w.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub dependencies: DependencyOutcome,
    pub log: LogStatus,
    pub ports: Vec<PortOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartReport {
    pub stop: StopReport,
    pub start: StartReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortStatus {
    pub port: u16,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub ports: Vec<PortStatus>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    root: PathBuf,
    runtime: RuntimeConfig,
    processes: &'a dyn ProcessTable,
    spawner: &'a dyn ServiceSpawner,
    dependencies: &'a dyn DependencyManager,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        config: &Config,
        processes: &'a dyn ProcessTable,
        spawner: &'a dyn ServiceSpawner,
        dependencies: &'a dyn DependencyManager,
    ) -> Self {
        Self {
            root: root.into(),
            runtime: config.runtime.clone(),
            processes,
            spawner,
            dependencies,
        }
    }

    /// Bring dependencies up, then spawn every registered service.
    ///
    /// Only the latest registration of each name is launched, at the
    /// position of that registration in the log. Every registration of a
    /// name points at the same service file.
    ///
    /// A missing descriptor log is reported and spawns nothing. A malformed
    /// one aborts before any service is spawned.
    pub fn start(&self) -> Result<StartReport> {
        let dependencies = self.dependencies_up();

        let log_path = paths::descriptor_log_path(&self.root);
        let Some(log) = DescriptorLog::load(&log_path)? else {
            warn!(path = %log_path.display(), "descriptor log not found; nothing to start");
            return Ok(StartReport {
                dependencies,
                log: LogStatus::Missing,
                env_warnings: Vec::new(),
                services: Vec::new(),
            });
        };

        let env_file = env::load(&self.root).unwrap_or_else(|e| {
            warn!("starting without environment file: {e}");
            EnvFile::default()
        });
        let merged = env::merged_environment(&env_file);

        let services = log
            .latest()
            .into_iter()
            .map(|d| self.spawn_one(d, &merged))
            .collect();

        Ok(StartReport {
            dependencies,
            log: LogStatus::Loaded { entries: log.len() },
            env_warnings: env_file.warnings.iter().map(Into::into).collect(),
            services,
        })
    }

    /// Tear dependencies down, then kill whatever listens on each registered
    /// port. Every port of every record is visited, duplicates included, so
    /// a port registered twice reports once per registration.
    pub fn stop(&self) -> StopReport {
        let dependencies = self.dependencies_down();

        let log_path = paths::descriptor_log_path(&self.root);
        let (log, status) = match DescriptorLog::load(&log_path) {
            Ok(Some(log)) => {
                let entries = log.len();
                (log, LogStatus::Loaded { entries })
            }
            Ok(None) => {
                warn!(path = %log_path.display(), "descriptor log not found; no ports to stop");
                (DescriptorLog::default(), LogStatus::Missing)
            }
            Err(e) => {
                warn!(path = %log_path.display(), "descriptor log unreadable; no ports to stop: {e}");
                (
                    DescriptorLog::default(),
                    LogStatus::Corrupt {
                        error: e.to_string(),
                    },
                )
            }
        };

        StopReport {
            dependencies,
            log: status,
            ports: log.ports().into_iter().map(|p| self.stop_port(p)).collect(),
        }
    }

    /// Full stop followed by a full start. Dependencies go down before they
    /// come back up.
    pub fn restart(&self) -> Result<RestartReport> {
        let stop = self.stop();
        let start = self.start()?;
        Ok(RestartReport { stop, start })
    }

    /// Owning PID for every port of every service, latest registration per
    /// name.
    pub fn status(&self) -> Vec<ServiceStatus> {
        let log = DescriptorLog::load_or_empty(&paths::descriptor_log_path(&self.root));
        log.latest_by_name()
            .into_values()
            .map(|d| ServiceStatus {
                name: d.name.clone(),
                ports: d
                    .ports()
                    .map(|port| PortStatus {
                        port,
                        pid: self.owner_of(port),
                    })
                    .collect(),
            })
            .collect()
    }

    // -- internals ----------------------------------------------------------

    fn owner_of(&self, port: u16) -> Option<u32> {
        self.processes
            .find_process_owning_port(port)
            .unwrap_or_else(|e| {
                warn!(port, "port lookup failed: {e}");
                None
            })
    }

    fn dependencies_up(&self) -> DependencyOutcome {
        let Some(manifest) = paths::dependency_manifest(&self.root) else {
            info!("no dependency manifest; skipping bring-up");
            return DependencyOutcome::Skipped;
        };
        match self.dependencies.up(&manifest) {
            Ok(()) => DependencyOutcome::Done { manifest },
            Err(e) => {
                warn!(manifest = %manifest.display(), "dependency bring-up failed: {e}");
                DependencyOutcome::Failed {
                    manifest,
                    error: e.to_string(),
                }
            }
        }
    }

    fn dependencies_down(&self) -> DependencyOutcome {
        let Some(manifest) = paths::dependency_manifest(&self.root) else {
            info!("no dependency manifest; skipping teardown");
            return DependencyOutcome::Skipped;
        };
        match self.dependencies.down(&manifest) {
            Ok(()) => DependencyOutcome::Done { manifest },
            Err(e) => {
                warn!(manifest = %manifest.display(), "dependency teardown failed: {e}");
                DependencyOutcome::Failed {
                    manifest,
                    error: e.to_string(),
                }
            }
        }
    }

    fn spawn_one(
        &self,
        descriptor: &ServiceDescriptor,
        env: &BTreeMap<OsString, OsString>,
    ) -> SpawnOutcome {
        let name = descriptor.name.clone();
        let Some(relative) = descriptor.relative_path() else {
            warn!(service = %name, "no folder/file recorded; skipping");
            return SpawnOutcome::Skipped {
                name,
                reason: "no folder/file recorded".to_string(),
            };
        };
        let script = self.root.join(&relative);
        if !script.is_file() {
            warn!(service = %name, path = %script.display(), "service file not found; skipping");
            return SpawnOutcome::Skipped {
                name,
                reason: format!("service file not found: {}", script.display()),
            };
        }
        let Some(launcher) = self.runtime.resolve_launcher(descriptor.language, &self.root) else {
            let launcher = self.runtime.launcher_for(descriptor.language);
            warn!(service = %name, launcher, "launcher not found; skipping");
            return SpawnOutcome::Skipped {
                name,
                reason: format!("launcher not found: {launcher}"),
            };
        };

        let request = SpawnRequest {
            name: name.clone(),
            launcher,
            script,
            cwd: self.root.clone(),
            env: env.clone(),
        };
        match self.spawner.spawn(&request) {
            Ok(pid) => {
                info!(service = %name, pid, "started");
                SpawnOutcome::Started { name, pid }
            }
            Err(e) => {
                warn!(service = %name, "spawn failed: {e}");
                SpawnOutcome::Failed {
                    name,
                    error: e.to_string(),
                }
            }
        }
    }

    fn stop_port(&self, port: u16) -> PortOutcome {
        let pid = match self.processes.find_process_owning_port(port) {
            Ok(Some(pid)) => pid,
            Ok(None) => {
                info!(port, "no service found");
                return PortOutcome::NotFound { port };
            }
            Err(e) => {
                warn!(port, "port lookup failed: {e}");
                return PortOutcome::Failed {
                    port,
                    error: e.to_string(),
                };
            }
        };
        match self.processes.terminate(pid) {
            Ok(()) => {
                info!(port, pid, "killed");
                PortOutcome::Killed { port, pid }
            }
            Err(e) => {
                warn!(port, pid, "kill failed: {e}");
                PortOutcome::Failed {
                    port,
                    error: e.to_string(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
