//! Tracing setup for processes embedding the build engine.
//!
//! The engine itself only emits `tracing` events. Hosts call
//! [`init_tracing`] once at startup to get them printed.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Shape of emitted log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// Newline-delimited JSON, one object per event
    Json,
}

const ENGINE_TARGETS: [&str; 2] = ["depbundle_core", "depbundle_state"];

/// `level` for the engine crates, warnings for everything else.
fn default_filter(level: Level) -> EnvFilter {
    let level = level.as_str().to_ascii_lowercase();
    let directives: Vec<String> = std::iter::once("warn".to_string())
        .chain(ENGINE_TARGETS.iter().map(|target| format!("{target}={level}")))
        .collect();
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter when set. Later calls are
/// ignored; a process has only one global subscriber.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));
    let lines = fmt::layer().with_target(false);
    let lines = match format {
        LogFormat::Json => lines.json().boxed(),
        LogFormat::Pretty => lines.boxed(),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(lines)
        .try_init()
        .ok();
}
