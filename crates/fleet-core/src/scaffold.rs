use crate::config::Config;
use crate::descriptor::{ResolvedService, ServiceConfig, ServiceDescriptor};
use crate::error::Result;
use crate::io;
use crate::paths;
use crate::registry::Registry;
use crate::template;
use rand::Rng;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Registry updates made after the service file is written, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaffoldStep {
    UpsertAddress,
    AppendDescriptor,
    RegisterStartScript,
    RegisterRestartScript,
    DeclareEnvironment,
}

impl fmt::Display for ScaffoldStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaffoldStep::UpsertAddress => "address table",
            ScaffoldStep::AppendDescriptor => "descriptor log",
            ScaffoldStep::RegisterStartScript => "start script",
            ScaffoldStep::RegisterRestartScript => "restart script",
            ScaffoldStep::DeclareEnvironment => "environment file",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub step: ScaffoldStep,
    pub path: PathBuf,
    /// `None` on success.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaffoldReport {
    pub descriptor: ServiceDescriptor,
    pub service_file: PathBuf,
    pub steps: Vec<StepOutcome>,
}

impl ScaffoldReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.error.is_some())
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

// ---------------------------------------------------------------------------
// ScaffoldGenerator
// ---------------------------------------------------------------------------

pub struct ScaffoldGenerator {
    root: PathBuf,
    registry: Registry,
}

impl ScaffoldGenerator {
    pub fn new(root: impl Into<PathBuf>, config: &Config) -> Self {
        let root = root.into();
        let registry = Registry::new(root.clone(), config.runtime.clone());
        Self { root, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn generate(&self, config: &ServiceConfig) -> Result<ScaffoldReport> {
        self.generate_with(config, &mut rand::thread_rng())
    }

    /// Validate, write the service file, then update the registry.
    ///
    /// Validation failures, unsupported capability sets and a missing
    /// template return `Err` before anything touches disk. Once the service
    /// file exists each registry step runs regardless of earlier failures and
    /// its outcome lands in the report.
    pub fn generate_with<R: Rng + ?Sized>(
        &self,
        config: &ServiceConfig,
        rng: &mut R,
    ) -> Result<ScaffoldReport> {
        let service = config.resolve_with(rng)?;
        let template =
            template::load_template(&self.root, service.language, service.service_type)?;

        let folder = self.root.join(service.folder_name());
        io::ensure_dir(&folder).map_err(|e| e.at("create service folder", &folder))?;
        let service_file = folder.join(service.file_name());
        let rendered = template::render_service(&template, &service);
        io::atomic_write(&service_file, rendered.as_bytes())
            .map_err(|e| e.at("write service file", &service_file))?;
        info!(
            service = %service.name,
            service_type = %service.service_type,
            path = %service_file.display(),
            "service file written"
        );

        let descriptor = service.descriptor();
        let steps = self.register(&service, &descriptor);
        Ok(ScaffoldReport {
            descriptor,
            service_file,
            steps,
        })
    }

    fn register(&self, service: &ResolvedService, descriptor: &ServiceDescriptor) -> Vec<StepOutcome> {
        let root = &self.root;
        let folder = service.folder_name();
        let file = service.file_name();
        let mut steps = Vec::with_capacity(5);

        if let Some(binding) = service.primary_binding() {
            steps.push(outcome(
                ScaffoldStep::UpsertAddress,
                paths::address_table_path(root),
                self.registry
                    .upsert_address(&service.name, &binding.host, binding.port),
            ));
        }
        steps.push(outcome(
            ScaffoldStep::AppendDescriptor,
            paths::descriptor_log_path(root),
            self.registry.append_descriptor(descriptor),
        ));

        let [start, restart] = paths::control_scripts(root);
        for (step, script) in [
            (ScaffoldStep::RegisterStartScript, start),
            (ScaffoldStep::RegisterRestartScript, restart),
        ] {
            let result = self
                .registry
                .register_invocation(&script, &folder, &file, service.language);
            steps.push(outcome(step, script, result));
        }

        if let Some(binding) = service.primary_binding() {
            steps.push(outcome(
                ScaffoldStep::DeclareEnvironment,
                paths::env_path(root),
                self.registry
                    .declare_environment(&service.name, &binding.host, binding.port),
            ));
        }
        steps
    }
}

fn outcome(step: ScaffoldStep, path: PathBuf, result: Result<()>) -> StepOutcome {
    let error = result.err().map(|e| {
        warn!(%step, path = %path.display(), "registry update failed: {e}");
        e.to_string()
    });
    StepOutcome { step, path, error }
}

/// Skeleton artifacts for a fresh fleet root.
pub fn start_script_skeleton() -> String {
    format!(
        "#!/bin/sh\ncd \"$(dirname \"$0\")/..\" || exit 1\n\n{}\n\nwait\n",
        template::SERVICE_ANCHOR
    )
}

pub fn restart_script_skeleton() -> String {
    format!(
        "#!/bin/sh\ncd \"$(dirname \"$0\")/..\" || exit 1\n\nfleet stop\n\n{}\n\nwait\n",
        template::SERVICE_ANCHOR
    )
}

pub fn env_skeleton() -> String {
    format!(
        "# Development\n{}\n\n# Production\n{}\n",
        template::DEVELOPMENT_ENV_ANCHOR,
        template::PRODUCTION_ENV_ANCHOR
    )
}

/// Create any missing fleet artifacts. Returns each path with `true` when it
/// was created and `false` when it already existed.
pub fn init_fleet(root: &Path, config: &Config) -> Result<Vec<(PathBuf, bool)>> {
    let config_yaml = serde_yaml::to_string(config)?;
    let artifacts: [(PathBuf, String); 5] = [
        (paths::config_path(root), config_yaml),
        (paths::descriptor_log_path(root), "[]\n".to_string()),
        (paths::env_path(root), env_skeleton()),
        (paths::start_script_path(root), start_script_skeleton()),
        (paths::restart_script_path(root), restart_script_skeleton()),
    ];
    let mut out = Vec::with_capacity(artifacts.len());
    for (path, data) in artifacts {
        let created = io::write_if_missing(&path, data.as_bytes()).map_err(|e| e.at("create", &path))?;
        if created && path.extension().is_some_and(|e| e == "sh") {
            io::make_executable(&path).map_err(|e| e.at("chmod", &path))?;
        }
        out.push((path, created));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
