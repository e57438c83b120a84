use crate::output::{print_json, report_line};
use anyhow::Context;
use fleet_core::{
    config::Config,
    lifecycle::{
        DependencyOutcome, LogStatus, Orchestrator, PortOutcome, SpawnOutcome, StartReport,
        StopReport,
    },
    process::{ComposeDependencies, DetachedSpawner, SystemProcessTable},
};
use std::path::Path;

/// Build an orchestrator backed by the real OS capabilities and hand it to `f`.
pub fn with_orchestrator<T>(
    root: &Path,
    f: impl FnOnce(&Orchestrator<'_>) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let config = Config::load(root).context("failed to load fleet.yaml")?;
    let processes = SystemProcessTable {
        sudo: config.privileged.sudo,
    };
    let spawner = DetachedSpawner;
    let dependencies =
        ComposeDependencies::new(config.dependencies.clone(), config.privileged.sudo);
    let orchestrator = Orchestrator::new(root, &config, &processes, &spawner, &dependencies);
    f(&orchestrator)
}

pub fn start(root: &Path, json: bool) -> anyhow::Result<()> {
    let report = with_orchestrator(root, |o| {
        o.start().context("start aborted; no services were launched")
    })?;
    if json {
        return print_json(&report);
    }
    print_start(&report);
    Ok(())
}

pub fn stop(root: &Path, json: bool) -> anyhow::Result<()> {
    let report = with_orchestrator(root, |o| Ok(o.stop()))?;
    if json {
        return print_json(&report);
    }
    print_stop(&report);
    Ok(())
}

pub fn restart(root: &Path, json: bool) -> anyhow::Result<()> {
    let report = with_orchestrator(root, |o| {
        o.restart().context("restart aborted after stop; no services were launched")
    })?;
    if json {
        return print_json(&report);
    }
    print_stop(&report.stop);
    print_start(&report.start);
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn print_dependencies(outcome: &DependencyOutcome, action: &str) {
    match outcome {
        DependencyOutcome::Skipped => report_line("skipped", "no dependency manifest found"),
        DependencyOutcome::Done { manifest } => {
            report_line(action, manifest.display());
        }
        DependencyOutcome::Failed { manifest, error } => {
            report_line("failed", format!("{}: {error}", manifest.display()));
        }
    }
}

fn print_log_status(log: &LogStatus) {
    match log {
        LogStatus::Missing => report_line("missing", "services.json not found"),
        LogStatus::Corrupt { error } => report_line("corrupt", error),
        LogStatus::Loaded { .. } => {}
    }
}

fn print_start(report: &StartReport) {
    println!("Starting fleet");
    print_dependencies(&report.dependencies, "up");
    print_log_status(&report.log);
    for w in &report.env_warnings {
        report_line("warning", format!(".env line {} has no '=': {}", w.line, w.content));
    }
    for s in &report.services {
        match s {
            SpawnOutcome::Started { name, pid } => report_line("started", format!("{name} (pid {pid})")),
            SpawnOutcome::Skipped { name, reason } => report_line("skipped", format!("{name}: {reason}")),
            SpawnOutcome::Failed { name, error } => report_line("failed", format!("{name}: {error}")),
        }
    }
}

fn print_stop(report: &StopReport) {
    println!("Stopping fleet");
    print_dependencies(&report.dependencies, "down");
    print_log_status(&report.log);
    for p in &report.ports {
        match p {
            PortOutcome::Killed { port, pid } => report_line("killed", format!("port {port} (pid {pid})")),
            PortOutcome::NotFound { port } => report_line("none", format!("no service found on port {port}")),
            PortOutcome::Failed { port, error } => report_line("failed", format!("port {port}: {error}")),
        }
    }
}
