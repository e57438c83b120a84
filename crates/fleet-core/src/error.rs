use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("invalid service name '{0}': must be non-empty and contain no whitespace, '-', '/' or ','")]
    InvalidServiceName(String),

    #[error("invalid host '{0}': expected an IP address or 'localhost'")]
    InvalidHost(String),

    #[error("invalid port '{0}': expected a number between 1024 and 65535")]
    InvalidPort(String),

    #[error("invalid privileged IP address '{0}'")]
    InvalidPrivilegedIp(String),

    #[error("invalid language '{0}': expected python or javascript")]
    InvalidLanguage(String),

    #[error("invalid service type: {0}")]
    InvalidServiceType(String),

    #[error(
        "unsupported capability combination for '{service}' ({capabilities}): no template is generated"
    )]
    UnsupportedCombination {
        service: String,
        capabilities: String,
    },

    #[error("no {language} template for service type {service_type}")]
    TemplateNotFound {
        language: String,
        service_type: String,
    },

    #[error("descriptor log {path} is malformed: {source}")]
    DescriptorLogCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("anchor '{anchor}' not found in {path}")]
    AnchorNotFound { anchor: String, path: PathBuf },

    #[error("{action} failed for {path}: {source}")]
    Artifact {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: Box<FleetError>,
    },

    #[error("'{program}' exited with {status}")]
    CommandFailed { program: String, status: String },

    #[error("failed to run '{program}': {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to kill pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Attach the artifact path and the action being performed to an error.
    pub fn at(self, action: &'static str, path: impl Into<PathBuf>) -> Self {
        FleetError::Artifact {
            action,
            path: path.into(),
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;
