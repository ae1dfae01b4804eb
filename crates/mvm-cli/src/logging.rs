//! Tracing initialization. One-shot, called once from `main` before
//! anything else touches `tracing`.

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Installs a global `tracing` subscriber. Honors `RUST_LOG` via
/// `EnvFilter`, defaulting to `info` when unset.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Json => subscriber.json().try_init(),
        LogFormat::Pretty => subscriber.try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing subscriber already initialized: {e}");
    }
}
