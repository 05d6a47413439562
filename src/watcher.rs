use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwap;
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{error, info, warn};

use crate::config::{self, FileConfig};

const RELOAD_ATTEMPTS: u32 = 3;
const RELOAD_RETRY_DELAY: Duration = Duration::from_millis(50);

pub fn spawn(path: PathBuf, current: Arc<ArcSwap<FileConfig>>) {
    // The notify watcher lives on a plain thread; it is blocking and not tied
    // to the tokio runtime.
    thread::spawn(move || {
        if let Err(err) = run_watcher(path, current) {
            error!(target = "watcher", error = %err, "config watcher exited with error");
        }
    });
}

fn run_watcher(path: PathBuf, current: Arc<ArcSwap<FileConfig>>) -> notify::Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher: RecommendedWatcher = Watcher::new(tx, Config::default())?;
    watcher.watch(&path, RecursiveMode::NonRecursive)?;

    info!(target = "watcher", path = %path.display(), "config watcher started");

    for res in rx {
        match res {
            Ok(_event) => {
                reload(&path, &current);
            }
            Err(err) => {
                warn!(target = "watcher", error = %err, "watcher event error");
            }
        }
    }
    Ok(())
}

/// Reloads `path` into `current`, retrying to ride out truncate-then-write
/// saves. Returns whether the config was replaced.
pub(crate) fn reload(path: &Path, current: &ArcSwap<FileConfig>) -> bool {
    for attempt in 1..=RELOAD_ATTEMPTS {
        match config::load_config(path) {
            Ok(new_cfg) => {
                info!(
                    target = "watcher",
                    path = %path.display(),
                    warm_hosts = new_cfg.warm_hosts.len(),
                    "config reloaded"
                );
                current.store(Arc::new(new_cfg));
                return true;
            }
            Err(err) if attempt == RELOAD_ATTEMPTS => {
                warn!(target = "watcher", path = %path.display(), error = %err, "config reload failed, keeping old config");
            }
            Err(_) => thread::sleep(RELOAD_RETRY_DELAY),
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_config(name: &str, body: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("dnscache-{name}-{}.json", std::process::id()));
        fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn reload_swaps_in_new_config() {
        let path = temp_config("reload-ok", r#"{ "warm_hosts": ["a.example", "b.example"] }"#);
        let current = ArcSwap::from_pointee(FileConfig::default());

        assert!(reload(&path, &current));
        assert_eq!(current.load().warm_hosts, vec!["a.example", "b.example"]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn reload_keeps_old_config_on_parse_error() {
        let path = temp_config("reload-bad", "{ not json");
        let old = FileConfig {
            warm_hosts: vec!["kept.example".to_string()],
            ..FileConfig::default()
        };
        let current = ArcSwap::from_pointee(old.clone());

        assert!(!reload(&path, &current));
        assert_eq!(**current.load(), old);
        let _ = fs::remove_file(&path);
    }
}
