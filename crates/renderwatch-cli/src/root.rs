use renderwatch_core::config::{ACTIONS_FILE, CONFIG_FILE};
use std::path::{Path, PathBuf};

/// Where the config and actions files live.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub config: PathBuf,
    pub actions: PathBuf,
    /// The actions path came from `--actions` / `RENDERWATCH_ACTIONS`.
    pub actions_explicit: bool,
}

/// Resolve the config and actions files.
///
/// Config priority:
/// 1. `--config` flag / `RENDERWATCH_CONFIG` env var (passed in as `config`)
/// 2. Walk upward from `cwd` looking for `config.yml`
/// 3. Fall back to `cwd/config.yml`
///
/// Actions default to `actions.yml` in the config's directory.
pub fn resolve_paths(config: Option<&Path>, actions: Option<&Path>) -> Paths {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = match config {
        Some(p) => p.to_path_buf(),
        None => find_config(&cwd),
    };
    match actions {
        Some(p) => Paths {
            config,
            actions: p.to_path_buf(),
            actions_explicit: true,
        },
        None => {
            let dir = config.parent().unwrap_or(Path::new("."));
            Paths {
                actions: dir.join(ACTIONS_FILE),
                config,
                actions_explicit: false,
            }
        }
    }
}

fn find_config(start: &Path) -> PathBuf {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return candidate;
        }
        match dir.parent() {
            Some(p) => dir = p.to_path_buf(),
            None => break,
        }
    }
    start.join(CONFIG_FILE)
}
