//! File-backed registry of scaffolded services.
//!
//! Four artifacts live under the fleet root and are each read, modified and
//! written independently:
//!
//! - `service-addresses.json`: `<NAME>_SERVICE` -> `host:port`, keyed
//! - `services.json`: append-only log of [`ServiceDescriptor`] records
//! - `.env`: live and commented declarations next to two anchors
//! - `ServerScripts/*.sh`: one background launch line per service
//!
//! There is no transaction across artifacts. A failed step leaves the others
//! as they were and the caller decides whether to carry on.

use crate::config::RuntimeConfig;
use crate::descriptor::{Language, ServiceDescriptor, LOOPBACK};
use crate::error::{FleetError, Result};
use crate::io;
use crate::paths;
use crate::template::{
    insert_after_anchor, insert_before_anchor, DEVELOPMENT_ENV_ANCHOR, PRODUCTION_ENV_ANCHOR,
    SERVICE_ANCHOR,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// `<NAME>_SERVICE` -> `host:port`.
pub type AddressTable = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// DescriptorLog
// ---------------------------------------------------------------------------

/// Ordered descriptor records, duplicates included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorLog {
    entries: Vec<ServiceDescriptor>,
}

impl DescriptorLog {
    pub fn new(entries: Vec<ServiceDescriptor>) -> Self {
        Self { entries }
    }

    /// Strict load: `Ok(None)` when the file is absent, an error when it
    /// exists but does not parse.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let Some(data) = io::read_if_exists(path).map_err(|e| e.at("read", path))? else {
            return Ok(None);
        };
        if data.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        let entries: Vec<ServiceDescriptor> =
            serde_json::from_str(&data).map_err(|source| FleetError::DescriptorLogCorrupt {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Some(Self { entries }))
    }

    /// Lenient load: missing, unreadable or malformed files read as empty.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(Some(log)) => log,
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), "treating descriptor log as empty: {e}");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut data = serde_json::to_string_pretty(&self.entries)?;
        data.push('\n');
        io::atomic_write(path, data.as_bytes())
    }

    pub fn push(&mut self, descriptor: ServiceDescriptor) {
        self.entries.push(descriptor);
    }

    pub fn entries(&self) -> &[ServiceDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest registration per service name.
    pub fn latest_by_name(&self) -> BTreeMap<&str, &ServiceDescriptor> {
        let mut index = BTreeMap::new();
        for d in &self.entries {
            index.insert(d.name.as_str(), d);
        }
        index
    }

    /// Latest registration per name, ordered by where that registration sits
    /// in the log.
    pub fn latest(&self) -> Vec<&ServiceDescriptor> {
        let index = self.latest_by_name();
        self.entries
            .iter()
            .filter(|d| index.get(d.name.as_str()).is_some_and(|l| std::ptr::eq(*l, *d)))
            .collect()
    }

    /// Every HTTP and WS port across all records, in log order.
    pub fn ports(&self) -> Vec<u16> {
        self.entries.iter().flat_map(|d| d.ports()).collect()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    runtime: RuntimeConfig,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>, runtime: RuntimeConfig) -> Self {
        Self {
            root: root.into(),
            runtime,
        }
    }

    // -- address table ------------------------------------------------------

    /// Missing or malformed tables read as empty.
    pub fn load_addresses(&self) -> AddressTable {
        let path = paths::address_table_path(&self.root);
        let data = match io::read_if_exists(&path) {
            Ok(Some(data)) => data,
            Ok(None) => return AddressTable::new(),
            Err(e) => {
                warn!(path = %path.display(), "treating address table as empty: {e}");
                return AddressTable::new();
            }
        };
        if data.trim().is_empty() {
            return AddressTable::new();
        }
        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!(path = %path.display(), "treating address table as empty: {e}");
            AddressTable::new()
        })
    }

    /// Record `host:port` under `<NAME>_SERVICE`, replacing any earlier entry.
    pub fn upsert_address(&self, name: &str, host: &str, port: u16) -> Result<()> {
        let path = paths::address_table_path(&self.root);
        let host = if host.eq_ignore_ascii_case("localhost") {
            LOOPBACK
        } else {
            host
        };
        let mut table = self.load_addresses();
        table.insert(paths::service_env_key(name), format!("{host}:{port}"));

        let mut data = serde_json::to_string_pretty(&table)?;
        data.push('\n');
        io::atomic_write(&path, data.as_bytes()).map_err(|e| e.at("write address table", &path))?;
        debug!(name, host, port, "address recorded");
        Ok(())
    }

    // -- descriptor log -----------------------------------------------------

    pub fn descriptor_log_path(&self) -> PathBuf {
        paths::descriptor_log_path(&self.root)
    }

    pub fn load_descriptors(&self) -> DescriptorLog {
        DescriptorLog::load_or_empty(&self.descriptor_log_path())
    }

    /// Append a record. Same-name records accumulate; nothing is replaced.
    pub fn append_descriptor(&self, descriptor: &ServiceDescriptor) -> Result<()> {
        let path = self.descriptor_log_path();
        let mut log = self.load_descriptors();
        log.push(descriptor.clone());
        log.save(&path).map_err(|e| e.at("write descriptor log", &path))?;
        debug!(name = %descriptor.name, entries = log.len(), "descriptor appended");
        Ok(())
    }

    // -- environment file ---------------------------------------------------

    /// `NAME_SERVICE = "host:port"` after the development anchor and its
    /// commented twin after the production anchor. Nothing is written unless
    /// both anchors are present.
    pub fn declare_environment(&self, name: &str, host: &str, port: u16) -> Result<()> {
        let path = paths::env_path(&self.root);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| FleetError::from(e).at("read environment file", &path))?;

        let line = format!("{} = \"{host}:{port}\"", paths::service_env_key(name));
        let content = insert_after_anchor(&content, DEVELOPMENT_ENV_ANCHOR, &line)
            .ok_or_else(|| anchor_missing(DEVELOPMENT_ENV_ANCHOR, &path))?;
        let content = insert_after_anchor(&content, PRODUCTION_ENV_ANCHOR, &format!("# {line}"))
            .ok_or_else(|| anchor_missing(PRODUCTION_ENV_ANCHOR, &path))?;

        io::atomic_write(&path, content.as_bytes())
            .map_err(|e| e.at("write environment file", &path))?;
        debug!(name, "environment declared");
        Ok(())
    }

    // -- control scripts ----------------------------------------------------

    /// `<launcher> <folder>/<file> &`
    pub fn invocation_line(&self, folder: &str, file: &str, language: Language) -> String {
        format!(
            "{} {folder}/{file} &",
            self.runtime.launcher_for(language)
        )
    }

    /// Add a launch line directly above the placeholder of `script`. The
    /// placeholder stays, so lines accumulate in registration order.
    pub fn register_invocation(
        &self,
        script: &Path,
        folder: &str,
        file: &str,
        language: Language,
    ) -> Result<()> {
        let content = std::fs::read_to_string(script)
            .map_err(|e| FleetError::from(e).at("read control script", script))?;
        let line = self.invocation_line(folder, file, language);
        let content = insert_before_anchor(&content, SERVICE_ANCHOR, &line)
            .ok_or_else(|| anchor_missing(SERVICE_ANCHOR, script))?;
        io::atomic_write(script, content.as_bytes())
            .and_then(|()| io::make_executable(script))
            .map_err(|e| e.at("write control script", script))?;
        debug!(script = %script.display(), %line, "invocation registered");
        Ok(())
    }
}

fn anchor_missing(anchor: &str, path: &Path) -> FleetError {
    FleetError::AnchorNotFound {
        anchor: anchor.to_string(),
        path: path.to_path_buf(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ServiceType;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> Registry {
        Registry::new(dir.path(), RuntimeConfig::default())
    }

    fn record(name: &str, http: Option<u16>, ws: Option<u16>) -> ServiceDescriptor {
        ServiceDescriptor {
            language: Language::Python,
            name: name.to_string(),
            folder_name: Some(paths::service_folder_name(name)),
            file_name: Some(paths::service_file_name(name, "py")),
            http_host: http.map(|_| LOOPBACK.to_string()),
            http_port: http,
            ws_host: ws.map(|_| LOOPBACK.to_string()),
            ws_port: ws,
            privileged_ips: vec![LOOPBACK.to_string()],
            message_queue: false,
            cors: true,
            service_type: ServiceType::HttpServer,
        }
    }

    #[test]
    fn upsert_overwrites_same_name() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.upsert_address("Main", "localhost", 8000).unwrap();
        reg.upsert_address("Auth", "0.0.0.0", 8100).unwrap();
        reg.upsert_address("Main", "127.0.0.1", 9000).unwrap();

        let table = reg.load_addresses();
        assert_eq!(table.len(), 2);
        assert_eq!(table["MAIN_SERVICE"], "127.0.0.1:9000");
        assert_eq!(table["AUTH_SERVICE"], "0.0.0.0:8100");
    }

    #[test]
    fn upsert_normalizes_localhost() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.upsert_address("Main", "LocalHost", 8000).unwrap();
        assert_eq!(reg.load_addresses()["MAIN_SERVICE"], "127.0.0.1:8000");
    }

    #[test]
    fn corrupt_address_table_is_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(paths::address_table_path(dir.path()), "{not json").unwrap();
        let reg = registry(&dir);
        assert!(reg.load_addresses().is_empty());
        reg.upsert_address("Main", "127.0.0.1", 8000).unwrap();
        assert_eq!(reg.load_addresses().len(), 1);
    }

    #[test]
    fn append_keeps_duplicates() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        reg.append_descriptor(&record("Main", Some(8000), None)).unwrap();
        reg.append_descriptor(&record("Main", Some(9000), None)).unwrap();

        let log = reg.load_descriptors();
        assert_eq!(log.len(), 2);
        let index = log.latest_by_name();
        assert_eq!(index.len(), 1);
        assert_eq!(index["Main"].http_port, Some(9000));
    }

    #[test]
    fn append_preserves_javascript_tooling_records() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(paths::DESCRIPTOR_LOG),
            r#"[{"ServiceLanguage": "JavaScript", "ServiceName": "Gateway",
                 "ServiceHttpPort": 8000, "ServiceWsPort": null,
                 "ServiceType": "HTTP_SERVICE"}]"#,
        )
        .unwrap();
        let reg = registry(&dir);
        reg.append_descriptor(&record("Main", Some(9000), None)).unwrap();

        let log = reg.load_descriptors();
        let names: Vec<_> = log.entries().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Gateway", "Main"]);
        assert_eq!(log.entries()[0].service_type, ServiceType::HttpServer);
    }

    #[test]
    fn latest_keeps_last_position() {
        let log = DescriptorLog::new(vec![
            record("Main", Some(8000), None),
            record("Auth", Some(8100), None),
            record("Main", Some(9000), None),
        ]);
        let latest: Vec<_> = log
            .latest()
            .into_iter()
            .map(|d| (d.name.as_str(), d.http_port))
            .collect();
        assert_eq!(latest, vec![("Auth", Some(8100)), ("Main", Some(9000))]);
    }

    #[test]
    fn corrupt_log_is_lenient_for_registry_but_strict_on_load() {
        let dir = TempDir::new().unwrap();
        let path = paths::descriptor_log_path(dir.path());
        std::fs::write(&path, "[{\"ServiceName\": ").unwrap();

        assert!(registry(&dir).load_descriptors().is_empty());
        assert!(matches!(
            DescriptorLog::load(&path),
            Err(FleetError::DescriptorLogCorrupt { .. })
        ));
    }

    #[test]
    fn strict_load_distinguishes_missing_from_empty() {
        let dir = TempDir::new().unwrap();
        let path = paths::descriptor_log_path(dir.path());
        assert!(DescriptorLog::load(&path).unwrap().is_none());
        std::fs::write(&path, "[]").unwrap();
        assert!(DescriptorLog::load(&path).unwrap().unwrap().is_empty());
    }

    #[test]
    fn ports_span_all_records() {
        let log = DescriptorLog::new(vec![
            record("Main", Some(8000), Some(6000)),
            record("Auth", None, Some(6100)),
            record("Main", Some(8001), None),
        ]);
        assert_eq!(log.ports(), vec![8000, 6000, 6100, 8001]);
    }

    fn write_env(dir: &TempDir) {
        std::fs::write(
            paths::env_path(dir.path()),
            format!("DEBUG=1\n{DEVELOPMENT_ENV_ANCHOR}\n\n{PRODUCTION_ENV_ANCHOR}\n"),
        )
        .unwrap();
    }

    #[test]
    fn declare_environment_writes_live_and_commented_lines() {
        let dir = TempDir::new().unwrap();
        write_env(&dir);
        let reg = registry(&dir);
        reg.declare_environment("Main", "127.0.0.1", 8000).unwrap();
        reg.declare_environment("Auth", "127.0.0.1", 8100).unwrap();

        let env = std::fs::read_to_string(paths::env_path(dir.path())).unwrap();
        assert_eq!(
            env,
            format!(
                "DEBUG=1\n{DEVELOPMENT_ENV_ANCHOR}\nAUTH_SERVICE = \"127.0.0.1:8100\"\nMAIN_SERVICE = \"127.0.0.1:8000\"\n\n{PRODUCTION_ENV_ANCHOR}\n# AUTH_SERVICE = \"127.0.0.1:8100\"\n# MAIN_SERVICE = \"127.0.0.1:8000\"\n"
            )
        );
    }

    #[test]
    fn declare_environment_without_anchor_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = paths::env_path(dir.path());
        std::fs::write(&path, format!("{DEVELOPMENT_ENV_ANCHOR}\n")).unwrap();
        let err = registry(&dir)
            .declare_environment("Main", "127.0.0.1", 8000)
            .unwrap_err();
        assert!(matches!(err, FleetError::AnchorNotFound { .. }));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            format!("{DEVELOPMENT_ENV_ANCHOR}\n")
        );
    }

    #[test]
    fn declare_environment_missing_file_names_path() {
        let dir = TempDir::new().unwrap();
        let err = registry(&dir)
            .declare_environment("Main", "127.0.0.1", 8000)
            .unwrap_err();
        assert!(err.to_string().contains(".env"));
    }

    #[test]
    fn register_invocation_accumulates_above_placeholder() {
        let dir = TempDir::new().unwrap();
        let script = paths::start_script_path(dir.path());
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(&script, format!("#!/bin/sh\ncd \"$(dirname \"$0\")/..\"\n{SERVICE_ANCHOR}\nwait\n")).unwrap();

        let reg = registry(&dir);
        reg.register_invocation(&script, "service_MainService", "main-service.py", Language::Python)
            .unwrap();
        reg.register_invocation(&script, "service_AuthService", "auth-service.js", Language::JavaScript)
            .unwrap();

        let content = std::fs::read_to_string(&script).unwrap();
        assert_eq!(
            content,
            format!(
                "#!/bin/sh\ncd \"$(dirname \"$0\")/..\"\n.venv/bin/python3.12 service_MainService/main-service.py &\nnode service_AuthService/auth-service.js &\n{SERVICE_ANCHOR}\nwait\n"
            )
        );
        assert_eq!(content.matches(SERVICE_ANCHOR).count(), 1);
    }

    #[test]
    fn register_invocation_without_placeholder_fails() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("start.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        let err = registry(&dir)
            .register_invocation(&script, "f", "f.py", Language::Python)
            .unwrap_err();
        assert!(matches!(err, FleetError::AnchorNotFound { .. }));
    }
}
