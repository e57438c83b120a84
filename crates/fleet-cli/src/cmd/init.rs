use crate::output::print_json;
use anyhow::Context;
use fleet_core::{config::Config, scaffold};
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load fleet.yaml")?;
    let artifacts = scaffold::init_fleet(root, &config)
        .with_context(|| format!("failed to initialize fleet at {}", root.display()))?;

    if json {
        let entries: Vec<_> = artifacts
            .iter()
            .map(|(path, created)| {
                serde_json::json!({
                    "path": path.strip_prefix(root).unwrap_or(path),
                    "created": created,
                })
            })
            .collect();
        return print_json(&entries);
    }

    println!("Initializing fleet in: {}", root.display());
    for (path, created) in &artifacts {
        let rel = path.strip_prefix(root).unwrap_or(path);
        if *created {
            println!("  created: {}", rel.display());
        } else {
            println!("  exists:  {}", rel.display());
        }
    }
    Ok(())
}
