use crate::cmd::lifecycle::with_orchestrator;
use crate::output::{print_json, print_table};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let services = with_orchestrator(root, |o| Ok(o.status()))?;

    if json {
        return print_json(&services);
    }
    if services.is_empty() {
        println!("No services registered.");
        return Ok(());
    }

    let rows: Vec<Vec<String>> = services
        .iter()
        .flat_map(|s| {
            s.ports.iter().map(|p| {
                vec![
                    s.name.clone(),
                    p.port.to_string(),
                    p.pid.map_or_else(|| "-".to_string(), |pid| pid.to_string()),
                ]
            })
        })
        .collect();
    print_table(&["SERVICE", "PORT", "PID"], &rows);
    Ok(())
}
