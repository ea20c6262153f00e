//! logging
//!
//! Tracing initialization for the `vgc` binary.
//!
//! Library code only emits events through the `tracing` macros; installing
//! a subscriber is the binary's job.

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogConfig {
    /// Debug level by default instead of info.
    pub verbose: bool,
    /// One JSON object per event.
    pub json: bool,
}

impl LogConfig {
    /// The filter used when `RUST_LOG` is unset.
    pub fn default_directive(&self) -> String {
        let level = if self.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        format!("vgcache={}", level.as_str().to_lowercase())
    }
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the level chosen by `verbose`. Events go to stderr
/// so command output on stdout stays parseable. Calling this twice is an
/// error reported by `tracing-subscriber`; the second call is ignored.
pub fn init(config: LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directive()));

    let result = if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("logging already initialised: {}", e);
    }
}
