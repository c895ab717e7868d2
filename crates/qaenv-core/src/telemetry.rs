//! Tracing initialisation for services embedding the environment manager.
//!
//! Call [`init_tracing`] once at program start. Later calls are ignored:
//! the global subscriber can only be set once per process.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Environment variable selecting the log output format. Set to `json`
/// for newline-delimited JSON suitable for log aggregation pipelines;
/// anything else keeps the human-readable format.
pub const LOG_FORMAT_VAR: &str = "QAENV_LOG_FORMAT";

/// Initialise the global tracing subscriber.
///
/// `level` is the default verbosity when `RUST_LOG` is not set; `RUST_LOG`
/// always wins when present. Output format is chosen by
/// [`LOG_FORMAT_VAR`].
pub fn init_tracing(level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let json = std::env::var(LOG_FORMAT_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().try_init().ok();
    } else {
        builder.try_init().ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        init_tracing(Level::INFO);
        init_tracing(Level::DEBUG);
    }
}
