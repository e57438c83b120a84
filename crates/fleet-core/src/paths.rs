use crate::error::{FleetError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Artifact locations (relative to the fleet root)
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "fleet.yaml";
pub const DESCRIPTOR_LOG: &str = "services.json";
pub const ADDRESS_TABLE: &str = "service-addresses.json";
pub const ENV_FILE: &str = ".env";

pub const START_SCRIPT: &str = "ServerScripts/start-server.sh";
pub const RESTART_SCRIPT: &str = "ServerScripts/restart-server.sh";

pub const TEMPLATES_DIR: &str = "ServiceTemplates";

pub const DEPENDENCY_MANIFESTS: [&str; 2] = ["docker-compose.yml", "docker-compose.yaml"];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn descriptor_log_path(root: &Path) -> PathBuf {
    root.join(DESCRIPTOR_LOG)
}

pub fn address_table_path(root: &Path) -> PathBuf {
    root.join(ADDRESS_TABLE)
}

pub fn env_path(root: &Path) -> PathBuf {
    root.join(ENV_FILE)
}

pub fn start_script_path(root: &Path) -> PathBuf {
    root.join(START_SCRIPT)
}

pub fn restart_script_path(root: &Path) -> PathBuf {
    root.join(RESTART_SCRIPT)
}

/// Both control scripts, in the order invocation lines are registered.
pub fn control_scripts(root: &Path) -> [PathBuf; 2] {
    [start_script_path(root), restart_script_path(root)]
}

/// Template override location: `ServiceTemplates/<language>/<SERVICE_TYPE>.txt`.
pub fn template_override_path(root: &Path, language: &str, service_type: &str) -> PathBuf {
    root.join(TEMPLATES_DIR)
        .join(language)
        .join(format!("{service_type}.txt"))
}

/// First dependency manifest present at the fleet root, if any.
pub fn dependency_manifest(root: &Path) -> Option<PathBuf> {
    DEPENDENCY_MANIFESTS
        .iter()
        .map(|name| root.join(name))
        .find(|p| p.is_file())
}

// ---------------------------------------------------------------------------
// Service naming
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[^\s\-/,]+$").unwrap())
}

pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() || !name_re().is_match(name) {
        return Err(FleetError::InvalidServiceName(name.to_string()));
    }
    Ok(())
}

/// `Main` -> `service_MainService`
pub fn service_folder_name(name: &str) -> String {
    format!("service_{name}Service")
}

/// `Main` + `py` -> `main-service.py`
pub fn service_file_name(name: &str, extension: &str) -> String {
    format!("{}-service.{extension}", name.to_lowercase())
}

/// `Main` -> `MAIN_SERVICE`
pub fn service_env_key(name: &str) -> String {
    format!("{}_SERVICE", name.to_uppercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
