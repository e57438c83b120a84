//! Marker-based rewriting of service templates and control files.
//!
//! A template carries marker pairs such as
//!
//! ```text
//!     #<HTTP_SERVER_PORT_START>
//!     httpServerPort = 8080
//!     #<HTTP_SERVER_PORT_END>
//! ```
//!
//! [`replace_section`] swaps what lies between a pair and keeps both markers,
//! so the same template can be rewritten again later. Only the first pair is
//! ever matched: a template that repeats a marker name gets its first section
//! rewritten and the rest left alone. That is a limitation of the format, not
//! something callers should work around.
//!
//! Anchors (`#<ADD_SERVICE_START_HERE>` and friends) are single-line
//! placeholders that new lines accumulate next to; see [`insert_before_anchor`]
//! and [`insert_after_anchor`].

use crate::descriptor::{Binding, Language, ResolvedService, ServiceType};
use crate::error::{FleetError, Result};
use crate::paths;
use std::path::Path;

/// Placeholder in both control scripts. Invocation lines accumulate above it.
pub const SERVICE_ANCHOR: &str = "#<ADD_SERVICE_START_HERE>";
/// Placeholder in `.env` for live declarations.
pub const DEVELOPMENT_ENV_ANCHOR: &str = "#<ADD_DEVELOPMENT_SERVICES_ENVIRONMENT_VARIABLES>";
/// Placeholder in `.env` for commented production declarations.
pub const PRODUCTION_ENV_ANCHOR: &str = "#<ADD_PRODUCTION_SERVICES_ENVIRONMENT_VARIABLES>";

// ---------------------------------------------------------------------------
// Marker vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    HttpServerHost,
    HttpServerPort,
    HttpServerPrivilegedIpAddress,
    HttpServerCorsAddition,
    WsServerHost,
    WsServerPort,
}

impl Marker {
    pub fn all() -> &'static [Marker] {
        &[
            Marker::HttpServerHost,
            Marker::HttpServerPort,
            Marker::HttpServerPrivilegedIpAddress,
            Marker::HttpServerCorsAddition,
            Marker::WsServerHost,
            Marker::WsServerPort,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Marker::HttpServerHost => "HTTP_SERVER_HOST",
            Marker::HttpServerPort => "HTTP_SERVER_PORT",
            Marker::HttpServerPrivilegedIpAddress => "HTTP_SERVER_PRIVILEGED_IP_ADDRESS",
            Marker::HttpServerCorsAddition => "HTTP_SERVER_CORS_ADDITION",
            Marker::WsServerHost => "WS_SERVER_HOST",
            Marker::WsServerPort => "WS_SERVER_PORT",
        }
    }

    pub fn start(self, language: Language) -> String {
        format!("{}<{}_START>", language.comment_prefix(), self.name())
    }

    pub fn end(self, language: Language) -> String {
        format!("{}<{}_END>", language.comment_prefix(), self.name())
    }
}

// ---------------------------------------------------------------------------
// Core rewriting primitives
// ---------------------------------------------------------------------------

/// Leading spaces/tabs of the line containing byte offset `at`.
fn line_indent(content: &str, at: usize) -> &str {
    let line_begin = content[..at].rfind('\n').map_or(0, |i| i + 1);
    let line = &content[line_begin..at];
    let width = line.len() - line.trim_start_matches([' ', '\t']).len();
    &line[..width]
}

/// Replace the content between the first `start_marker` and the first
/// `end_marker` after it.
///
/// Output is `start_marker`, a newline, `new_content`, a newline, then the
/// end marker re-indented to the indentation of its original line. Anything
/// after the end marker on its line is dropped. When either marker is missing
/// the input is returned unchanged.
pub fn replace_section(
    content: &str,
    start_marker: &str,
    end_marker: &str,
    new_content: &str,
) -> String {
    let Some(start_idx) = content.find(start_marker) else {
        return content.to_string();
    };
    let search_from = start_idx + start_marker.len();
    let Some(end_offset) = content[search_from..].find(end_marker) else {
        return content.to_string();
    };
    let end_idx = search_from + end_offset;
    let end_indent = line_indent(content, end_idx);

    let end_line_end = match content[end_idx..].find('\n') {
        Some(i) => end_idx + i + 1,
        None => content.len(),
    };

    let mut out = String::with_capacity(content.len() + new_content.len());
    out.push_str(&content[..start_idx]);
    out.push_str(start_marker);
    out.push('\n');
    if !new_content.is_empty() {
        out.push_str(new_content);
        out.push('\n');
    }
    out.push_str(end_indent);
    out.push_str(end_marker);
    out.push('\n');
    out.push_str(&content[end_line_end..]);
    out
}

/// Insert `line` on its own line directly above the first `anchor`, with the
/// anchor line's indentation. The anchor itself is kept. Returns `None` when
/// the anchor is absent.
pub fn insert_before_anchor(content: &str, anchor: &str, line: &str) -> Option<String> {
    let idx = content.find(anchor)?;
    let line_begin = content[..idx].rfind('\n').map_or(0, |i| i + 1);
    let indent = line_indent(content, idx);

    let mut out = String::with_capacity(content.len() + line.len() + indent.len() + 1);
    out.push_str(&content[..line_begin]);
    out.push_str(indent);
    out.push_str(line);
    out.push('\n');
    out.push_str(&content[line_begin..]);
    Some(out)
}

/// Insert `line` on its own line directly below the first `anchor`, with the
/// anchor line's indentation. Later insertions land above earlier ones.
/// Returns `None` when the anchor is absent.
pub fn insert_after_anchor(content: &str, anchor: &str, line: &str) -> Option<String> {
    let idx = content.find(anchor)?;
    let indent = line_indent(content, idx);
    let split = idx + anchor.len();

    let mut out = String::with_capacity(content.len() + line.len() + indent.len() + 1);
    out.push_str(&content[..split]);
    out.push('\n');
    out.push_str(indent);
    out.push_str(line);
    out.push_str(&content[split..]);
    Some(out)
}

// ---------------------------------------------------------------------------
// Service rendering
// ---------------------------------------------------------------------------

fn indent_lines(text: &str, indent: &str) -> String {
    text.lines()
        .map(|l| {
            if l.is_empty() {
                String::new()
            } else {
                format!("{indent}{l}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn quoted_list(items: &[String]) -> String {
    items
        .iter()
        .map(|ip| format!("\"{ip}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn host_line(language: Language, var: &str, binding: &Binding) -> String {
    match language {
        Language::Python => format!("{var} = \"{}\"", binding.host),
        Language::JavaScript => format!("const {var} = \"{}\";", binding.host),
    }
}

fn port_line(language: Language, var: &str, binding: &Binding) -> String {
    match language {
        Language::Python => format!("{var} = {}", binding.port),
        Language::JavaScript => format!("const {var} = {};", binding.port),
    }
}

fn privileged_block(language: Language, ips: &[String]) -> String {
    match language {
        Language::Python => format!("self.privilegedIpAddress = {{{}}}", quoted_list(ips)),
        Language::JavaScript => {
            format!("this.privilegedIpAddress = new Set([{}]);", quoted_list(ips))
        }
    }
}

fn cors_block(language: Language, enabled: bool) -> String {
    match (language, enabled) {
        (Language::Python, true) => "self.app.add_middleware(\n    CORSMiddleware,\n    allow_origins=[\"*\"],\n    allow_credentials=True,\n    allow_methods=[\"*\"],\n    allow_headers=[\"*\"],\n)".to_string(),
        (Language::Python, false) => "# CORS disabled for this service".to_string(),
        (Language::JavaScript, true) => "this.app.use(cors({ origin: \"*\", credentials: true, methods: \"*\", allowedHeaders: \"*\" }));".to_string(),
        (Language::JavaScript, false) => "// CORS disabled for this service".to_string(),
    }
}

/// Generated content for every marker this service has a value for.
pub fn sections(service: &ResolvedService) -> Vec<(Marker, String)> {
    let lang = service.language;
    let mut out = Vec::new();
    if let Some(http) = &service.http {
        out.push((Marker::HttpServerHost, host_line(lang, "httpServerHost", http)));
        out.push((Marker::HttpServerPort, port_line(lang, "httpServerPort", http)));
        out.push((
            Marker::HttpServerPrivilegedIpAddress,
            privileged_block(lang, &service.privileged_ips),
        ));
        out.push((Marker::HttpServerCorsAddition, cors_block(lang, service.cors)));
    }
    if let Some(ws) = &service.ws {
        out.push((Marker::WsServerHost, host_line(lang, "wsServerHost", ws)));
        out.push((Marker::WsServerPort, port_line(lang, "wsServerPort", ws)));
    }
    out
}

/// Stamp a service's bindings, privileged IPs and CORS choice into a template.
///
/// Generated lines are indented to match their start marker.
pub fn render_service(template: &str, service: &ResolvedService) -> String {
    let mut content = template.to_string();
    for (marker, body) in sections(service) {
        let start = marker.start(service.language);
        let end = marker.end(service.language);
        let Some(start_idx) = content.find(&start) else {
            continue;
        };
        let indent = line_indent(&content, start_idx).to_string();
        content = replace_section(&content, &start, &end, &indent_lines(&body, &indent));
    }
    content
}

// ---------------------------------------------------------------------------
// Template lookup
// ---------------------------------------------------------------------------

const PY_HTTP_SERVER: &str = include_str!("../templates/python/HTTP_SERVER.txt");
const PY_WS_SERVER: &str = include_str!("../templates/python/WS_SERVER.txt");
const PY_HTTP_QUEUE_MERGE: &str = include_str!("../templates/python/HTTP_QUEUE_MERGE.txt");
const PY_WS_HTTP_QUEUE_MERGE: &str = include_str!("../templates/python/WS_HTTP_QUEUE_MERGE.txt");
const JS_HTTP_SERVER: &str = include_str!("../templates/javascript/HTTP_SERVER.txt");
const JS_WS_SERVER: &str = include_str!("../templates/javascript/WS_SERVER.txt");
const JS_HTTP_QUEUE_MERGE: &str = include_str!("../templates/javascript/HTTP_QUEUE_MERGE.txt");
const JS_WS_HTTP_QUEUE_MERGE: &str =
    include_str!("../templates/javascript/WS_HTTP_QUEUE_MERGE.txt");

/// Built-in template for a language and service type. `NONE` has none.
pub fn embedded_template(language: Language, service_type: ServiceType) -> Option<&'static str> {
    match (language, service_type) {
        (Language::Python, ServiceType::HttpServer) => Some(PY_HTTP_SERVER),
        (Language::Python, ServiceType::WsServer) => Some(PY_WS_SERVER),
        (Language::Python, ServiceType::HttpQueueMerge) => Some(PY_HTTP_QUEUE_MERGE),
        (Language::Python, ServiceType::WsHttpQueueMerge) => Some(PY_WS_HTTP_QUEUE_MERGE),
        (Language::JavaScript, ServiceType::HttpServer) => Some(JS_HTTP_SERVER),
        (Language::JavaScript, ServiceType::WsServer) => Some(JS_WS_SERVER),
        (Language::JavaScript, ServiceType::HttpQueueMerge) => Some(JS_HTTP_QUEUE_MERGE),
        (Language::JavaScript, ServiceType::WsHttpQueueMerge) => Some(JS_WS_HTTP_QUEUE_MERGE),
        (_, ServiceType::None) => None,
    }
}

/// Template for a service: `ServiceTemplates/<language>/<TYPE>.txt` under the
/// fleet root if present, otherwise the built-in one.
pub fn load_template(root: &Path, language: Language, service_type: ServiceType) -> Result<String> {
    let override_path =
        paths::template_override_path(root, language.as_str(), service_type.as_str());
    if override_path.is_file() {
        return std::fs::read_to_string(&override_path)
            .map_err(|e| FleetError::from(e).at("read template", override_path));
    }
    embedded_template(language, service_type)
        .map(str::to_string)
        .ok_or_else(|| FleetError::TemplateNotFound {
            language: language.to_string(),
            service_type: service_type.to_string(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{BindingRequest, ServiceConfig};
    use tempfile::TempDir;

    const SAMPLE: &str = "class Service:\n    def run(self):\n        #<HTTP_SERVER_PORT_START>\n        httpServerPort = 8080\n        #<HTTP_SERVER_PORT_END>\n        return httpServerPort\n";

    #[test]
    fn replaces_between_markers_and_keeps_them() {
        let out = replace_section(
            SAMPLE,
            "#<HTTP_SERVER_PORT_START>",
            "#<HTTP_SERVER_PORT_END>",
            "        httpServerPort = 9000",
        );
        assert_eq!(
            out,
            "class Service:\n    def run(self):\n        #<HTTP_SERVER_PORT_START>\n        httpServerPort = 9000\n        #<HTTP_SERVER_PORT_END>\n        return httpServerPort\n"
        );
    }

    #[test]
    fn end_marker_realigns_to_its_original_indent() {
        let content = "  #<A_START>\n  old\n      #<A_END>\nrest\n";
        let out = replace_section(content, "#<A_START>", "#<A_END>", "x = [\n1,\n        2]");
        assert_eq!(out, "  #<A_START>\nx = [\n1,\n        2]\n      #<A_END>\nrest\n");
    }

    #[test]
    fn missing_marker_leaves_content_unchanged() {
        assert_eq!(replace_section(SAMPLE, "#<NOPE_START>", "#<HTTP_SERVER_PORT_END>", "x"), SAMPLE);
        assert_eq!(replace_section(SAMPLE, "#<HTTP_SERVER_PORT_START>", "#<NOPE_END>", "x"), SAMPLE);
    }

    #[test]
    fn end_marker_before_start_is_treated_as_missing() {
        let content = "#<A_END>\n#<A_START>\nbody\n";
        assert_eq!(replace_section(content, "#<A_START>", "#<A_END>", "x"), content);
    }

    #[test]
    fn second_application_is_a_no_op() {
        let start = "#<HTTP_SERVER_PORT_START>";
        let end = "#<HTTP_SERVER_PORT_END>";
        let once = replace_section(SAMPLE, start, end, "        httpServerPort = 9000");
        let twice = replace_section(&once, start, end, "        httpServerPort = 9000");
        assert_eq!(once, twice);
    }

    #[test]
    fn end_marker_at_eof_without_newline() {
        let content = "#<A_START>\nold\n#<A_END>";
        let once = replace_section(content, "#<A_START>", "#<A_END>", "new");
        assert_eq!(once, "#<A_START>\nnew\n#<A_END>\n");
        assert_eq!(replace_section(&once, "#<A_START>", "#<A_END>", "new"), once);
    }

    #[test]
    fn empty_replacement_collapses_section() {
        let out = replace_section(SAMPLE, "#<HTTP_SERVER_PORT_START>", "#<HTTP_SERVER_PORT_END>", "");
        assert!(out.contains("#<HTTP_SERVER_PORT_START>\n        #<HTTP_SERVER_PORT_END>\n"));
    }

    #[test]
    fn only_first_repeated_section_is_rewritten() {
        let content = "#<A_START>\none\n#<A_END>\n#<A_START>\ntwo\n#<A_END>\n";
        let out = replace_section(content, "#<A_START>", "#<A_END>", "new");
        assert_eq!(out, "#<A_START>\nnew\n#<A_END>\n#<A_START>\ntwo\n#<A_END>\n");
    }

    #[test]
    fn insert_before_anchor_accumulates_with_newest_nearest() {
        let mut script = format!("#!/bin/sh\n    {SERVICE_ANCHOR}\nwait\n");
        for line in ["a &", "b &", "c &"] {
            script = insert_before_anchor(&script, SERVICE_ANCHOR, line).unwrap();
        }
        assert_eq!(
            script,
            format!("#!/bin/sh\n    a &\n    b &\n    c &\n    {SERVICE_ANCHOR}\nwait\n")
        );
    }

    #[test]
    fn insert_after_anchor_puts_newest_first() {
        let mut env = format!("{DEVELOPMENT_ENV_ANCHOR}\nTAIL=1\n");
        env = insert_after_anchor(&env, DEVELOPMENT_ENV_ANCHOR, "A=1").unwrap();
        env = insert_after_anchor(&env, DEVELOPMENT_ENV_ANCHOR, "B=2").unwrap();
        assert_eq!(env, format!("{DEVELOPMENT_ENV_ANCHOR}\nB=2\nA=1\nTAIL=1\n"));
    }

    #[test]
    fn missing_anchor_is_none() {
        assert!(insert_before_anchor("nothing here", SERVICE_ANCHOR, "x").is_none());
        assert!(insert_after_anchor("nothing here", PRODUCTION_ENV_ANCHOR, "x").is_none());
    }

    fn resolved(language: Language, cors: bool, ws: bool, queue: bool) -> ResolvedService {
        ServiceConfig {
            name: "Main".into(),
            language,
            http: Some(BindingRequest::new("", "8000")),
            ws: ws.then(|| BindingRequest::new("0.0.0.0", "6000")),
            message_queue: queue,
            cors,
            privileged_ips: vec!["10.1.1.1".into()],
        }
        .resolve()
        .unwrap()
    }

    #[test]
    fn every_embedded_template_has_balanced_markers() {
        for &language in Language::all() {
            for &service_type in ServiceType::generated() {
                let t = embedded_template(language, service_type).unwrap();
                for &m in Marker::all() {
                    assert_eq!(
                        t.matches(&m.start(language)).count(),
                        t.matches(&m.end(language)).count(),
                        "{language} {service_type} {}",
                        m.name()
                    );
                }
                if service_type.has_http() {
                    assert!(t.contains(&Marker::HttpServerPort.start(language)));
                }
                if service_type.has_ws() {
                    assert!(t.contains(&Marker::WsServerPort.start(language)));
                }
            }
        }
        assert!(embedded_template(Language::Python, ServiceType::None).is_none());
    }

    #[test]
    fn render_python_http_server() {
        let service = resolved(Language::Python, true, false, false);
        let template = embedded_template(Language::Python, ServiceType::HttpServer).unwrap();
        let out = render_service(template, &service);
        assert!(out.contains("httpServerHost = \"127.0.0.1\""));
        assert!(out.contains("httpServerPort = 8000"));
        assert!(out.contains("self.privilegedIpAddress = {\"127.0.0.1\", \"10.1.1.1\"}"));
        assert!(out.contains("allow_origins=[\"*\"]"));
        assert_eq!(render_service(&out, &service), out);
    }

    #[test]
    fn render_without_cors_comments_it_out() {
        let service = resolved(Language::JavaScript, false, false, false);
        let template = embedded_template(Language::JavaScript, ServiceType::HttpServer).unwrap();
        let out = render_service(template, &service);
        assert!(out.contains("// CORS disabled for this service"));
        assert!(!out.contains("this.app.use(cors("));
        assert!(out.contains("const httpServerPort = 8000;"));
    }

    #[test]
    fn render_merge_template_fills_ws_sections() {
        let service = resolved(Language::Python, true, true, true);
        let template =
            embedded_template(Language::Python, ServiceType::WsHttpQueueMerge).unwrap();
        let out = render_service(template, &service);
        assert!(out.contains("wsServerHost = \"0.0.0.0\""));
        assert!(out.contains("wsServerPort = 6000"));
        assert!(out.contains("httpServerPort = 8000"));
    }

    #[test]
    fn generated_lines_follow_start_marker_indent() {
        let service = resolved(Language::Python, true, false, false);
        let template = "class S:\n    def __init__(self):\n        #<HTTP_SERVER_CORS_ADDITION_START>\n        #<HTTP_SERVER_CORS_ADDITION_END>\n";
        let out = render_service(template, &service);
        assert!(out.contains("\n        self.app.add_middleware(\n            CORSMiddleware,\n"));
        assert!(out.contains("\n        )\n        #<HTTP_SERVER_CORS_ADDITION_END>\n"));
    }

    #[test]
    fn fleet_override_wins_over_embedded() {
        let dir = TempDir::new().unwrap();
        let path = paths::template_override_path(dir.path(), "python", "HTTP_SERVER");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "custom #<HTTP_SERVER_PORT_START>\n#<HTTP_SERVER_PORT_END>\n").unwrap();
        let t = load_template(dir.path(), Language::Python, ServiceType::HttpServer).unwrap();
        assert!(t.starts_with("custom"));

        let t = load_template(dir.path(), Language::Python, ServiceType::WsServer).unwrap();
        assert_eq!(t, PY_WS_SERVER);

        assert!(matches!(
            load_template(dir.path(), Language::Python, ServiceType::None),
            Err(FleetError::TemplateNotFound { .. })
        ));
    }
}
