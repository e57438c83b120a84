use crate::output::{print_json, print_table};
use fleet_core::registry::DescriptorLog;
use fleet_core::paths;
use std::path::Path;

fn binding(host: &Option<String>, port: Option<u16>) -> String {
    match (host, port) {
        (Some(h), Some(p)) => format!("{h}:{p}"),
        (None, Some(p)) => p.to_string(),
        _ => "-".to_string(),
    }
}

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let log = DescriptorLog::load_or_empty(&paths::descriptor_log_path(root));

    if json {
        return print_json(&log.entries());
    }
    if log.is_empty() {
        println!("No services registered.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = log
        .entries()
        .iter()
        .map(|d| {
            vec![
                d.name.clone(),
                d.service_type.to_string(),
                d.language.to_string(),
                binding(&d.http_host, d.http_port),
                binding(&d.ws_host, d.ws_port),
                d.relative_path().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(&["NAME", "TYPE", "LANGUAGE", "HTTP", "WS", "PATH"], &rows);
    Ok(())
}
