//! Terminal and per-session file logging for processes hosting bridge sessions.
//!
//! Each session logs to a file named after its model. Starting another session
//! in the same process moves file output over to the new model's log.

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock, PoisonError},
};

use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{
    EnvFilter, Registry, fmt, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use crate::config::BridgeConfig;
use crate::error::BridgeError;

/// Log file stem when the model has no usable name
pub const FALLBACK_LOG_NAME: &str = "fdm_bridge";

type SessionLogLayer = fmt::Layer<
    Registry,
    fmt::format::DefaultFields,
    fmt::format::Format<fmt::format::Full, fmt::time::ChronoUtc>,
    NonBlocking,
>;

static LOG_HANDLES: OnceLock<LogHandles> = OnceLock::new();

/// Writer threads and the reload handle of the installed subscriber
struct LogHandles {
    _terminal: Mutex<WorkerGuard>,
    session: Mutex<SessionLog>,
    reload: reload::Handle<SessionLogLayer, Registry>,
}

/// The file currently receiving session output
struct SessionLog {
    path: PathBuf,
    _guard: WorkerGuard,
}

impl LogHandles {
    /// Point file output at another session's log; the old writer flushes as it drops
    fn switch_session(&self, path: PathBuf, file: File) -> Result<(), BridgeError> {
        let (writer, guard) = tracing_appender::non_blocking(file);
        let layer = session_log_layer(writer);

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.path == path {
            return Ok(());
        }
        self.reload
            .modify(|current| *current = layer)
            .map_err(|e| BridgeError::Logging(format!("Failed to switch session log: {e}")))?;
        *session = SessionLog {
            path,
            _guard: guard,
        };
        Ok(())
    }
}

fn session_log_layer(writer: NonBlocking) -> SessionLogLayer {
    fmt::layer::<Registry>()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(writer)
        .with_ansi(false)
}

/// File name for a model's log, with path separators and colons replaced
pub fn log_file_name(model: &str) -> String {
    let stem: String = model
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let stem = match stem.as_str() {
        "" | "." | ".." => FALLBACK_LOG_NAME,
        s => s,
    };
    format!("{stem}.log")
}

fn open_session_log(log_dir: &Path, model: &str) -> Result<(PathBuf, File), BridgeError> {
    fs::create_dir_all(log_dir)
        .map_err(|e| BridgeError::Logging(format!("Failed to create log directory: {e}")))?;
    let path = log_dir.join(log_file_name(model));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| BridgeError::Logging(format!("Failed to open {}: {e}", path.display())))?;
    Ok((path, file))
}

/// Log to the terminal and to `<log_dir>/<model name>.log` for the session
/// described by `config`.
///
/// The level comes from `RUST_LOG`, defaulting to `info`. The terminal logger
/// is installed once per process; later calls only move file output to the
/// new model's log. Returns the log file path.
pub fn init_logging(log_dir: &Path, config: &BridgeConfig) -> Result<PathBuf, BridgeError> {
    let (path, file) = open_session_log(log_dir, &config.name)?;

    if let Some(handles) = LOG_HANDLES.get() {
        handles.switch_session(path.clone(), file)?;
        info!("Model [{}] logging to {}", config.name, path.display());
        return Ok(path);
    }

    let (terminal_writer, terminal_guard) = tracing_appender::non_blocking(std::io::stdout());
    let (file_writer, file_guard) = tracing_appender::non_blocking(file);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| BridgeError::Logging(format!("Failed to set up env filter: {e}")))?;

    let terminal_layer = fmt::layer()
        .with_timer(fmt::time::ChronoUtc::rfc_3339())
        .with_writer(terminal_writer)
        .with_target(false);

    let (file_layer, reload) =
        reload::Layer::<SessionLogLayer, Registry>::new(session_log_layer(file_writer));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(env_filter)
        .with(terminal_layer)
        .try_init()
        .map_err(|e| BridgeError::Logging(format!("Failed to initialize logging: {e}")))?;

    LOG_HANDLES.get_or_init(|| LogHandles {
        _terminal: Mutex::new(terminal_guard),
        session: Mutex::new(SessionLog {
            path: path.clone(),
            _guard: file_guard,
        }),
        reload,
    });

    info!("Model [{}] logging to {}", config.name, path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> BridgeConfig {
        BridgeConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    #[test]
    fn model_names_become_safe_file_names() {
        assert_eq!(log_file_name("iris"), "iris.log");
        assert_eq!(log_file_name("2026-10-18T12_00_00"), "2026-10-18T12_00_00.log");
        assert_eq!(log_file_name("fleet/iris:1"), "fleet_iris_1.log");
        assert_eq!(log_file_name(r"..\up"), ".._up.log");
        assert_eq!(log_file_name("  "), "fdm_bridge.log");
        assert_eq!(log_file_name(".."), "fdm_bridge.log");
    }

    #[test]
    fn each_model_gets_its_own_log() {
        let dir = std::env::temp_dir().join(format!("fdm_bridge_logs_{}", std::process::id()));

        let iris = init_logging(&dir, &config("iris")).unwrap();
        assert_eq!(iris, dir.join("iris.log"));
        assert!(iris.exists());

        let rover = init_logging(&dir, &config("fleet/rover")).unwrap();
        assert_eq!(rover, dir.join("fleet_rover.log"));
        assert!(rover.exists());

        // Returning to a model reuses its file
        assert_eq!(init_logging(&dir, &config("iris")).unwrap(), iris);

        let _ = fs::remove_dir_all(&dir);
    }
}
