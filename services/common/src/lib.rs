use std::{
    env, fs, io,
    net::SocketAddr,
    panic,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::{Duration, SystemTime},
};
use tokio::net::TcpListener;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Keeps the non-blocking file writer alive for the lifetime of the process.
pub struct TracingGuards {
    _file_guard: Option<WorkerGuard>,
}

/// Where and how long log files are kept.
#[derive(Clone, Debug)]
pub struct LogSettings {
    pub root: PathBuf,
    pub retention_days: u64,
    pub cleanup_interval_minutes: u64,
}

impl LogSettings {
    pub fn from_env(service_name: &str) -> Self {
        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| format!("/var/log/{service_name}"));
        Self {
            root: PathBuf::from(log_dir),
            retention_days: env_or("LOG_RETENTION_DAYS", 14u64),
            cleanup_interval_minutes: env_or("LOG_CLEANUP_INTERVAL_MINUTES", 360u64),
        }
    }
}

pub fn init_tracing(service_name: &str) -> TracingGuards {
    init_tracing_with(service_name, LogSettings::from_env(service_name))
}

pub fn init_tracing_with(service_name: &str, settings: LogSettings) -> TracingGuards {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    // A read-only or missing log dir degrades to stdout only.
    let file_writer = fs::create_dir_all(&settings.root)
        .ok()
        .and_then(|_| {
            panic::catch_unwind(|| {
                tracing_appender::rolling::daily(&settings.root, format!("{service_name}.log"))
            })
            .ok()
        })
        .map(tracing_appender::non_blocking);

    let file_guard = match file_writer {
        Some((writer, guard)) => {
            let subscriber = Registry::default()
                .with(filter)
                .with(stdout_layer)
                .with(fmt::layer().with_ansi(false).with_writer(writer));
            let _ = tracing::subscriber::set_global_default(subscriber);
            Some(guard)
        }
        None => {
            let subscriber = Registry::default().with(filter).with(stdout_layer);
            let _ = tracing::subscriber::set_global_default(subscriber);
            None
        }
    };

    if file_guard.is_some() {
        spawn_log_cleanup(
            settings.root,
            settings.retention_days,
            settings.cleanup_interval_minutes,
        );
    }

    TracingGuards {
        _file_guard: file_guard,
    }
}

/// Parse a typed environment value, falling back to `default` when unset or invalid.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Like [`env_or`] but treats unset and empty values as `None`.
pub fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn spawn_log_cleanup(log_root: PathBuf, retention_days: u64, cleanup_interval_minutes: u64) {
    if retention_days == 0 || cleanup_interval_minutes == 0 {
        return;
    }

    let retention = Duration::from_secs(retention_days * 24 * 60 * 60);
    let interval = Duration::from_secs(cleanup_interval_minutes * 60);

    thread::spawn(move || loop {
        if let Some(cutoff) = SystemTime::now().checked_sub(retention) {
            cleanup_old_logs(&log_root, cutoff);
        }
        thread::sleep(interval);
    });
}

fn cleanup_old_logs(root: &Path, cutoff: SystemTime) -> usize {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            removed += cleanup_old_logs(&path, cutoff);
            continue;
        }
        let modified = match fs::metadata(&path).and_then(|metadata| metadata.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if modified < cutoff && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }
    removed
}

pub async fn bind_listener(port: u16) -> io::Result<TcpListener> {
    // All interfaces, devices connect from outside the host.
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr).await
}

pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "sigterm handler unavailable");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
