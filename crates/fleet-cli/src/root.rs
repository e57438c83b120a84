use fleet_core::paths;
use std::path::{Path, PathBuf};

/// Resolve the fleet root directory.
///
/// Priority:
/// 1. `--root` flag / `FLEET_ROOT` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `fleet.yaml` or `services.json`
/// 3. Fall back to `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_fleet_root(&cwd).unwrap_or(cwd)
}

fn find_fleet_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            paths::config_path(dir).is_file() || paths::descriptor_log_path(dir).is_file()
        })
        .map(Path::to_path_buf)
}
