//! Logging setup: console plus a timestamped log file under `<exe_dir>/logs/`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::paths;

const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Console filter: `RUST_LOG` if set, else info (debug when verbose).
fn console_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "yys_clicker=debug"
        } else {
            "yys_clicker=info"
        })
    })
}

/// Log file name for a run started now.
fn log_file_name() -> String {
    format!("yys_clicker_{}.log", Local::now().format("%Y%m%d_%H%M%S"))
}

fn open_log_file(dir: &Path) -> std::io::Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name());
    let file = File::create(&path)?;
    Ok((file, path))
}

/// Installs the global subscriber. Returns the log file path, if one was opened.
///
/// A log file that cannot be created degrades to console-only logging.
pub fn init(verbose: bool) -> Option<PathBuf> {
    let console = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(false)
        .with_filter(console_filter(verbose));

    let (file_layer, log_path, file_error) = match open_log_file(&paths::logs_dir()) {
        Ok((file, path)) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("yys_clicker=debug"));
            (Some(layer), Some(path), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    install_panic_hook();

    if let Some(e) = file_error {
        tracing::warn!("Log file unavailable, logging to console only: {}", e);
    }
    if let Some(path) = &log_path {
        tracing::debug!("Logging to {}", path.display());
    }
    log_path
}

/// Routes panics through tracing so they reach the log file too.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        tracing::error!("[PANIC]{} {}", location, msg);
    }));
}
