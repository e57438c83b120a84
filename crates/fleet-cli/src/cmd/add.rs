use crate::output::{print_json, report_line};
use anyhow::Context;
use clap::Args;
use fleet_core::{
    config::Config,
    descriptor::{BindingRequest, Language, ServiceConfig},
    scaffold::ScaffoldGenerator,
};
use std::path::Path;

#[derive(Args)]
pub struct AddArgs {
    /// Service name (no whitespace, '-', '/' or ',')
    pub name: String,

    /// Language of the generated service: python or javascript
    #[arg(long, short = 'l', default_value = "python")]
    pub language: Language,

    /// Give the service an HTTP server
    #[arg(long)]
    pub http: bool,

    /// HTTP host (default 127.0.0.1; implies --http)
    #[arg(long, value_name = "HOST")]
    pub http_host: Option<String>,

    /// HTTP port (default: random in 1024-65535; implies --http)
    #[arg(long, value_name = "PORT")]
    pub http_port: Option<String>,

    /// Give the service a WebSocket server
    #[arg(long)]
    pub ws: bool,

    /// WebSocket host (default 127.0.0.1; implies --ws)
    #[arg(long, value_name = "HOST")]
    pub ws_host: Option<String>,

    /// WebSocket port (default: random in 1024-65535; implies --ws)
    #[arg(long, value_name = "PORT")]
    pub ws_port: Option<String>,

    /// Connect the service to the message queue
    #[arg(long)]
    pub queue: bool,

    /// Leave the permissive CORS block out of the generated service
    #[arg(long)]
    pub no_cors: bool,

    /// Additional address allowed on privileged routes (repeatable)
    #[arg(long = "privileged-ip", value_name = "IP")]
    pub privileged_ips: Vec<String>,
}

fn binding(enabled: bool, host: Option<String>, port: Option<String>) -> Option<BindingRequest> {
    (enabled || host.is_some() || port.is_some())
        .then(|| BindingRequest::new(host.unwrap_or_default(), port.unwrap_or_default()))
}

impl AddArgs {
    fn into_config(self) -> ServiceConfig {
        ServiceConfig {
            name: self.name,
            language: self.language,
            http: binding(self.http, self.http_host, self.http_port),
            ws: binding(self.ws, self.ws_host, self.ws_port),
            message_queue: self.queue,
            cors: !self.no_cors,
            privileged_ips: self.privileged_ips,
        }
    }
}

pub fn run(root: &Path, args: AddArgs, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load fleet.yaml")?;
    let service = args.into_config();
    let generator = ScaffoldGenerator::new(root, &config);
    let report = generator
        .generate(&service)
        .with_context(|| format!("cannot scaffold service '{}'", service.name))?;

    if json {
        return print_json(&report);
    }

    let d = &report.descriptor;
    println!(
        "Scaffolded {} ({}, {})",
        d.name, d.service_type, d.language
    );
    report_line("file", report.service_file.strip_prefix(root).unwrap_or(&report.service_file).display());
    if let (Some(host), Some(port)) = (&d.http_host, d.http_port) {
        report_line("http", format!("{host}:{port}"));
    }
    if let (Some(host), Some(port)) = (&d.ws_host, d.ws_port) {
        report_line("ws", format!("{host}:{port}"));
    }
    for step in &report.steps {
        match &step.error {
            None => report_line("updated", &step.step),
            Some(e) => report_line("failed", format!("{}: {e}", step.step)),
        }
    }

    if !report.is_complete() {
        anyhow::bail!("service file written but some registry updates failed");
    }
    Ok(())
}
