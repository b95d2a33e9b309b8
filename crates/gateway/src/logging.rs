//! Tracing subscriber initialization.
//!
//! Grounded on the teacher's `turbomcp-server::logging` (`EnvFilter` +
//! `tracing_subscriber::registry().with(...)`, JSON output behind a config
//! flag), trimmed to this process's single output target: stderr. File
//! rotation is out of scope — the gateway's durable record is the
//! `EventStore`, not its log stream.

use std::io::IsTerminal;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` if set, falling back to `info`.
/// `json` selects structured output (`GatewayConfig::log_json`); `NO_COLOR`
/// (checked regardless of `json`) disables ANSI color codes only — it never
/// changes what gets logged, only how it's styled.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been installed.
pub fn init(json: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = std::env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_ansi(ansi).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_ansi(ansi).with_writer(std::io::stderr))
            .try_init()
    }
}
