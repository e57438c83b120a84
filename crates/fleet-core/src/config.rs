use crate::descriptor::Language;
use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// RuntimeConfig
// ---------------------------------------------------------------------------

/// Launcher per language, used both in control-script invocation lines and
/// when spawning services at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_javascript")]
    pub javascript: String,
}

fn default_python() -> String {
    ".venv/bin/python3.12".to_string()
}

fn default_javascript() -> String {
    "node".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            javascript: default_javascript(),
        }
    }
}

impl RuntimeConfig {
    pub fn launcher_for(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python,
            Language::JavaScript => &self.javascript,
        }
    }

    /// Resolve a launcher to an executable path. Launchers with a path
    /// separator are relative to the fleet root; bare names go through `PATH`.
    pub fn resolve_launcher(&self, language: Language, root: &Path) -> Option<PathBuf> {
        let launcher = self.launcher_for(language);
        if launcher.is_empty() {
            return None;
        }
        if launcher.contains('/') || launcher.contains(std::path::MAIN_SEPARATOR) {
            let path = root.join(launcher);
            return path.is_file().then_some(path);
        }
        which::which(launcher).ok()
    }
}

// ---------------------------------------------------------------------------
// DependencyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_up_args")]
    pub up_args: Vec<String>,
    #[serde(default = "default_down_args")]
    pub down_args: Vec<String>,
}

fn default_program() -> String {
    "docker-compose".to_string()
}

fn default_up_args() -> Vec<String> {
    vec!["up".to_string(), "-d".to_string()]
}

fn default_down_args() -> Vec<String> {
    vec!["down".to_string()]
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            up_args: default_up_args(),
            down_args: default_down_args(),
        }
    }
}

// ---------------------------------------------------------------------------
// PrivilegeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivilegeConfig {
    /// Run dependency commands and `kill` under `sudo`.
    #[serde(default)]
    pub sudo: bool,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub dependencies: DependencyConfig,
    #[serde(default)]
    pub privileged: PrivilegeConfig,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            runtime: RuntimeConfig::default(),
            dependencies: DependencyConfig::default(),
            privileged: PrivilegeConfig::default(),
        }
    }
}

impl Config {
    /// Load `fleet.yaml`; a missing file yields the defaults.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (field, launcher) in [
            ("runtime.python", &self.runtime.python),
            ("runtime.javascript", &self.runtime.javascript),
        ] {
            if launcher.trim().is_empty() {
                warnings.push(ConfigWarning {
                    field: field.to_string(),
                    message: "launcher is empty; services of this language cannot start"
                        .to_string(),
                });
            }
        }

        if self.dependencies.program.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "dependencies.program".to_string(),
                message: "dependency program is empty; bring-up and teardown will fail"
                    .to_string(),
            });
        }
        if self.dependencies.up_args.is_empty() {
            warnings.push(ConfigWarning {
                field: "dependencies.up_args".to_string(),
                message: "no arguments for dependency bring-up".to_string(),
            });
        }
        if self.dependencies.down_args.is_empty() {
            warnings.push(ConfigWarning {
                field: "dependencies.down_args".to_string(),
                message: "no arguments for dependency teardown".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
