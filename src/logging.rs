use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "ktvplay.log";

/// Sends tracing output to `ktvplay.log` under `dir`; the terminal belongs to
/// the UI. Only the first call installs a subscriber.
pub fn init_tracing(dir: &Path) -> Result<PathBuf> {
    static INIT: OnceLock<PathBuf> = OnceLock::new();
    if let Some(path) = INIT.get() {
        return Ok(path.clone());
    }

    let path = dir.join(LOG_FILE);
    let file = open_log_file(&path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .ok();

    Ok(INIT.get_or_init(|| path).clone())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}
