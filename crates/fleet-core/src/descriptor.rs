//! The service record and the wizard-facing configuration it is built from.
//!
//! A [`ServiceConfig`] is what the operator asked for (raw host/port strings,
//! capability flags). [`ServiceConfig::resolve`] validates and normalises it
//! into a [`ResolvedService`], from which the scaffold generator derives the
//! persisted [`ServiceDescriptor`].

use crate::error::{FleetError, Result};
use crate::paths;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub const LOOPBACK: &str = "127.0.0.1";
pub const PORT_MIN: u16 = 1024;
pub const PORT_MAX: u16 = 65535;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    Python,
    JavaScript,
}

impl Language {
    pub fn all() -> &'static [Language] {
        &[Language::Python, Language::JavaScript]
    }

    /// Lowercase key used in template directories and `fleet.yaml`.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
        }
    }

    /// Line-comment prefix the template markers are written with.
    pub fn comment_prefix(self) -> &'static str {
        match self {
            Language::Python => "#",
            Language::JavaScript => "//",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            _ => Err(FleetError::InvalidLanguage(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    /// `HTTP_SERVICE` is what the JavaScript tooling writes.
    #[serde(alias = "HTTP_SERVICE")]
    HttpServer,
    WsServer,
    HttpQueueMerge,
    WsHttpQueueMerge,
    /// Also any type name this version does not know.
    #[default]
    #[serde(other)]
    None,
}

impl ServiceType {
    /// Classify a capability set. First match wins:
    ///
    /// | HTTP | WS | Queue | type                  |
    /// |------|----|-------|-----------------------|
    /// | yes  | yes| yes   | `WS_HTTP_QUEUE_MERGE` |
    /// | yes  | yes| no    | `NONE`                |
    /// | yes  | no | yes   | `HTTP_QUEUE_MERGE`    |
    /// | no   | yes| yes   | `NONE`                |
    /// | yes  | no | no    | `HTTP_SERVER`         |
    /// | no   | yes| no    | `WS_SERVER`           |
    /// | no   | no | any   | `NONE`                |
    pub fn classify(http: bool, ws: bool, queue: bool) -> ServiceType {
        match (http, ws, queue) {
            (true, true, true) => ServiceType::WsHttpQueueMerge,
            (true, true, false) => ServiceType::None,
            (true, false, true) => ServiceType::HttpQueueMerge,
            (false, true, true) => ServiceType::None,
            (true, false, false) => ServiceType::HttpServer,
            (false, true, false) => ServiceType::WsServer,
            (false, false, _) => ServiceType::None,
        }
    }

    /// Types a template exists for.
    pub fn generated() -> &'static [ServiceType] {
        &[
            ServiceType::HttpServer,
            ServiceType::WsServer,
            ServiceType::HttpQueueMerge,
            ServiceType::WsHttpQueueMerge,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::HttpServer => "HTTP_SERVER",
            ServiceType::WsServer => "WS_SERVER",
            ServiceType::HttpQueueMerge => "HTTP_QUEUE_MERGE",
            ServiceType::WsHttpQueueMerge => "WS_HTTP_QUEUE_MERGE",
            ServiceType::None => "NONE",
        }
    }

    pub fn has_http(self) -> bool {
        matches!(
            self,
            ServiceType::HttpServer | ServiceType::HttpQueueMerge | ServiceType::WsHttpQueueMerge
        )
    }

    pub fn has_ws(self) -> bool {
        matches!(self, ServiceType::WsServer | ServiceType::WsHttpQueueMerge)
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ServiceType {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HTTP_SERVER" | "HTTP_SERVICE" => Ok(ServiceType::HttpServer),
            "WS_SERVER" => Ok(ServiceType::WsServer),
            "HTTP_QUEUE_MERGE" => Ok(ServiceType::HttpQueueMerge),
            "WS_HTTP_QUEUE_MERGE" => Ok(ServiceType::WsHttpQueueMerge),
            "NONE" => Ok(ServiceType::None),
            _ => Err(FleetError::InvalidServiceType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Host and port as typed by the operator. Empty strings mean "default".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingRequest {
    pub host: String,
    pub port: String,
}

impl BindingRequest {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub host: String,
    pub port: u16,
}

impl Binding {
    /// `host:port`, the value stored in the address table and `.env`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Empty -> loopback; `localhost` -> loopback; anything else must be an IP literal.
pub fn normalize_host(host: &str) -> Result<String> {
    let host = host.trim();
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return Ok(LOOPBACK.to_string());
    }
    host.parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| FleetError::InvalidHost(host.to_string()))
}

pub fn parse_port(port: &str) -> Result<u16> {
    let trimmed = port.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FleetError::InvalidPort(port.to_string()));
    }
    match trimmed.parse::<u32>() {
        Ok(p) if (PORT_MIN as u32..=PORT_MAX as u32).contains(&p) => Ok(p as u16),
        _ => Err(FleetError::InvalidPort(port.to_string())),
    }
}

/// Resolve a binding request. An empty port is drawn uniformly from
/// `[PORT_MIN, PORT_MAX]`, avoiding `taken`.
pub fn resolve_binding<R: Rng + ?Sized>(
    request: &BindingRequest,
    taken: Option<u16>,
    rng: &mut R,
) -> Result<Binding> {
    let host = normalize_host(&request.host)?;
    let port = if request.port.trim().is_empty() {
        loop {
            let candidate = rng.gen_range(PORT_MIN..=PORT_MAX);
            if Some(candidate) != taken {
                break candidate;
            }
        }
    } else {
        parse_port(&request.port)?
    };
    Ok(Binding { host, port })
}

/// Validated, deduplicated privileged IPs, always led by the loopback address.
pub fn resolve_privileged_ips(requested: &[String]) -> Result<Vec<String>> {
    let mut ips = vec![LOOPBACK.to_string()];
    for raw in requested {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let ip = raw
            .parse::<IpAddr>()
            .map_err(|_| FleetError::InvalidPrivilegedIp(raw.to_string()))?
            .to_string();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    Ok(ips)
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Output of the operator wizard: what the new service should look like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub language: Language,
    pub http: Option<BindingRequest>,
    pub ws: Option<BindingRequest>,
    pub message_queue: bool,
    pub cors: bool,
    pub privileged_ips: Vec<String>,
}

impl ServiceConfig {
    pub fn service_type(&self) -> ServiceType {
        ServiceType::classify(self.http.is_some(), self.ws.is_some(), self.message_queue)
    }

    /// Human-readable capability set, e.g. `HTTP+WS`.
    pub fn capabilities(&self) -> String {
        let mut parts = Vec::new();
        if self.http.is_some() {
            parts.push("HTTP");
        }
        if self.ws.is_some() {
            parts.push("WS");
        }
        if self.message_queue {
            parts.push("QUEUE");
        }
        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join("+")
        }
    }

    pub fn resolve(&self) -> Result<ResolvedService> {
        self.resolve_with(&mut rand::thread_rng())
    }

    pub fn resolve_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ResolvedService> {
        let name = self.name.trim().to_string();
        paths::validate_service_name(&name)?;

        let service_type = self.service_type();
        if service_type == ServiceType::None {
            return Err(FleetError::UnsupportedCombination {
                service: name,
                capabilities: self.capabilities(),
            });
        }

        let http = self
            .http
            .as_ref()
            .map(|req| resolve_binding(req, None, rng))
            .transpose()?;
        let taken = http.as_ref().map(|b| b.port);
        let ws = self
            .ws
            .as_ref()
            .map(|req| resolve_binding(req, taken, rng))
            .transpose()?;

        Ok(ResolvedService {
            name,
            language: self.language,
            service_type,
            http,
            ws,
            message_queue: self.message_queue,
            cors: self.cors,
            privileged_ips: resolve_privileged_ips(&self.privileged_ips)?,
        })
    }
}

/// A validated [`ServiceConfig`] with concrete bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub name: String,
    pub language: Language,
    pub service_type: ServiceType,
    pub http: Option<Binding>,
    pub ws: Option<Binding>,
    pub message_queue: bool,
    pub cors: bool,
    pub privileged_ips: Vec<String>,
}

impl ResolvedService {
    pub fn folder_name(&self) -> String {
        paths::service_folder_name(&self.name)
    }

    pub fn file_name(&self) -> String {
        paths::service_file_name(&self.name, self.language.extension())
    }

    /// The binding recorded in the address table and `.env`: HTTP when
    /// present, otherwise WS.
    pub fn primary_binding(&self) -> Option<&Binding> {
        self.http.as_ref().or(self.ws.as_ref())
    }

    pub fn descriptor(&self) -> ServiceDescriptor {
        ServiceDescriptor {
            language: self.language,
            name: self.name.clone(),
            folder_name: Some(self.folder_name()),
            file_name: Some(self.file_name()),
            http_host: self.http.as_ref().map(|b| b.host.clone()),
            http_port: self.http.as_ref().map(|b| b.port),
            ws_host: self.ws.as_ref().map(|b| b.host.clone()),
            ws_port: self.ws.as_ref().map(|b| b.port),
            privileged_ips: self.privileged_ips.clone(),
            message_queue: self.message_queue,
            cors: self.cors,
            service_type: self.service_type,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceDescriptor
// ---------------------------------------------------------------------------

/// One record of the descriptor log (`services.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "ServiceLanguage", default)]
    pub language: Language,
    #[serde(rename = "ServiceName")]
    pub name: String,
    #[serde(rename = "ServiceFolderName", default)]
    pub folder_name: Option<String>,
    #[serde(rename = "ServiceFileName", default)]
    pub file_name: Option<String>,
    #[serde(rename = "ServiceHttpHost", default)]
    pub http_host: Option<String>,
    #[serde(rename = "ServiceHttpPort", default)]
    pub http_port: Option<u16>,
    #[serde(rename = "ServiceWsHost", default)]
    pub ws_host: Option<String>,
    #[serde(rename = "ServiceWsPort", default)]
    pub ws_port: Option<u16>,
    #[serde(rename = "ServiceHttpPrivilegedIpAddress", default)]
    pub privileged_ips: Vec<String>,
    #[serde(rename = "ServiceMessageQueue", default)]
    pub message_queue: bool,
    #[serde(rename = "ServiceCors", default)]
    pub cors: bool,
    #[serde(rename = "ServiceType", default)]
    pub service_type: ServiceType,
}

impl ServiceDescriptor {
    /// HTTP port then WS port, skipping the absent ones.
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.http_port.into_iter().chain(self.ws_port)
    }

    /// `folder/file` relative to the fleet root, when both are known.
    pub fn relative_path(&self) -> Option<String> {
        match (self.folder_name.as_deref(), self.file_name.as_deref()) {
            (Some(folder), Some(file)) if !folder.is_empty() && !file.is_empty() => {
                Some(format!("{folder}/{file}"))
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn http() -> Option<BindingRequest> {
        Some(BindingRequest::default())
    }

    #[test]
    fn classify_follows_precedence() {
        use ServiceType::*;
        assert_eq!(ServiceType::classify(true, true, true), WsHttpQueueMerge);
        assert_eq!(ServiceType::classify(true, true, false), None);
        assert_eq!(ServiceType::classify(true, false, true), HttpQueueMerge);
        assert_eq!(ServiceType::classify(false, true, true), None);
        assert_eq!(ServiceType::classify(true, false, false), HttpServer);
        assert_eq!(ServiceType::classify(false, true, false), WsServer);
        assert_eq!(ServiceType::classify(false, false, false), None);
        assert_eq!(ServiceType::classify(false, false, true), None);
    }

    #[test]
    fn service_type_str_roundtrip() {
        for t in ServiceType::generated()
            .iter()
            .copied()
            .chain([ServiceType::None])
        {
            assert_eq!(t.as_str().parse::<ServiceType>().unwrap(), t);
        }
        assert_eq!(
            "HTTP_SERVICE".parse::<ServiceType>().unwrap(),
            ServiceType::HttpServer
        );
        assert!("HTTP".parse::<ServiceType>().is_err());
    }

    #[test]
    fn empty_host_and_port_default() {
        let mut rng = StdRng::seed_from_u64(7);
        let b = resolve_binding(&BindingRequest::default(), None, &mut rng).unwrap();
        assert_eq!(b.host, LOOPBACK);
        assert!(b.port >= PORT_MIN);
    }

    #[test]
    fn localhost_normalizes_to_loopback() {
        assert_eq!(normalize_host("localhost").unwrap(), LOOPBACK);
        assert_eq!(normalize_host(" 10.0.0.5 ").unwrap(), "10.0.0.5");
        assert_eq!(normalize_host("::1").unwrap(), "::1");
        assert!(normalize_host("example.com").is_err());
    }

    #[test]
    fn port_bounds() {
        assert_eq!(parse_port("1024").unwrap(), 1024);
        assert_eq!(parse_port("65535").unwrap(), 65535);
        for bad in ["1023", "65536", "abc", "-5", "80", "99999999999"] {
            assert!(parse_port(bad).is_err(), "expected invalid: {bad}");
        }
    }

    #[test]
    fn random_port_avoids_taken() {
        // Same seed: the first draw of `b` equals `first.port` and must be skipped.
        let mut a = StdRng::seed_from_u64(42);
        let first = resolve_binding(&BindingRequest::default(), None, &mut a).unwrap();
        let mut b = StdRng::seed_from_u64(42);
        let second = resolve_binding(&BindingRequest::default(), Some(first.port), &mut b).unwrap();
        assert_ne!(first.port, second.port);
    }

    #[test]
    fn privileged_ips_lead_with_loopback_and_dedupe() {
        let ips = resolve_privileged_ips(&[
            "10.0.0.1".to_string(),
            "127.0.0.1".to_string(),
            "10.0.0.1".to_string(),
        ])
        .unwrap();
        assert_eq!(ips, vec!["127.0.0.1", "10.0.0.1"]);
        assert!(resolve_privileged_ips(&["nope".to_string()]).is_err());
    }

    #[test]
    fn unsupported_combinations_are_rejected() {
        let cfg = ServiceConfig {
            name: "Gateway".into(),
            http: http(),
            ws: http(),
            ..Default::default()
        };
        match cfg.resolve() {
            Err(FleetError::UnsupportedCombination { capabilities, .. }) => {
                assert_eq!(capabilities, "HTTP+WS")
            }
            other => panic!("expected UnsupportedCombination, got {other:?}"),
        }

        let cfg = ServiceConfig {
            name: "Relay".into(),
            ws: http(),
            message_queue: true,
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve(),
            Err(FleetError::UnsupportedCombination { .. })
        ));
    }

    #[test]
    fn resolve_builds_descriptor() {
        let cfg = ServiceConfig {
            name: "Main".into(),
            http: Some(BindingRequest::new("localhost", "8000")),
            ws: Some(BindingRequest::new("", "6000")),
            message_queue: true,
            cors: true,
            ..Default::default()
        };
        let resolved = cfg.resolve().unwrap();
        assert_eq!(resolved.service_type, ServiceType::WsHttpQueueMerge);
        let d = resolved.descriptor();
        assert_eq!(d.folder_name.as_deref(), Some("service_MainService"));
        assert_eq!(d.file_name.as_deref(), Some("main-service.py"));
        assert_eq!(d.http_host.as_deref(), Some(LOOPBACK));
        assert_eq!(d.ports().collect::<Vec<_>>(), vec![8000, 6000]);
        assert_eq!(d.privileged_ips, vec![LOOPBACK]);
    }

    #[test]
    fn descriptor_json_uses_record_keys() {
        let d = ServiceDescriptor {
            language: Language::JavaScript,
            name: "Main".into(),
            folder_name: Some("service_MainService".into()),
            file_name: Some("main-service.js".into()),
            http_host: Some(LOOPBACK.into()),
            http_port: Some(8080),
            ws_host: None,
            ws_port: None,
            privileged_ips: vec![LOOPBACK.into()],
            message_queue: false,
            cors: true,
            service_type: ServiceType::HttpServer,
        };
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["ServiceName"], "Main");
        assert_eq!(json["ServiceLanguage"], "JavaScript");
        assert_eq!(json["ServiceType"], "HTTP_SERVER");
        assert!(json["ServiceWsPort"].is_null());
    }

    #[test]
    fn sparse_record_still_loads() {
        let json = r#"{"ServiceName": "Old", "ServiceHttpPort": 8000, "ServiceWsPort": null}"#;
        let d: ServiceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.language, Language::Python);
        assert_eq!(d.service_type, ServiceType::None);
        assert!(d.relative_path().is_none());
        assert_eq!(d.ports().collect::<Vec<_>>(), vec![8000]);
    }

    #[test]
    fn javascript_tooling_record_loads() {
        let json = r#"{
            "ServiceLanguage": "JavaScript",
            "ServiceName": "Gateway",
            "ServiceFolderName": "service_GatewayService",
            "ServiceFileName": "gateway-service.js",
            "ServiceHttpHost": "127.0.0.1",
            "ServiceHttpPrivilegedIpAddress": ["127.0.0.1"],
            "ServiceHttpPort": 8000,
            "ServiceWsPort": null,
            "ServiceType": "HTTP_SERVICE"
        }"#;
        let d: ServiceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.service_type, ServiceType::HttpServer);
        assert_eq!(d.language, Language::JavaScript);
        assert_eq!(d.ports().collect::<Vec<_>>(), vec![8000]);

        // Re-serialized under the canonical name.
        let back = serde_json::to_value(&d).unwrap();
        assert_eq!(back["ServiceType"], "HTTP_SERVER");
    }

    #[test]
    fn unknown_service_type_loads_as_none() {
        let json = r#"{"ServiceName": "Odd", "ServiceType": "GRPC_SERVER"}"#;
        let d: ServiceDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(d.service_type, ServiceType::None);
    }
}
