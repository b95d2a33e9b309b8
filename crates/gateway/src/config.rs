//! Gateway configuration: a plain, serde-deserializable snapshot plus an
//! atomically swappable handle for explicit reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::limits::{GatewayLimits, MAX_BODY_SIZE_CAP};
use crate::target::TargetKind;

fn default_port() -> u16 {
    3456
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_max_inflight() -> usize {
    1
}

fn default_max_queue() -> usize {
    64
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_body_size() -> String {
    "1mb".to_string()
}

fn default_drain_deadline_ms() -> u64 {
    30_000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_json() -> bool {
    false
}

/// One configured upstream target, built from the `target.<id>.*` keys in
/// the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub id: String,
    pub kind: TargetKind,
    /// `Mcp` targets: the command to spawn.
    pub mcp_command: Option<String>,
    /// `Mcp` targets: arguments passed to `mcp_command`.
    pub mcp_args: Vec<String>,
    /// `A2a` targets: the JSON-RPC endpoint to POST to.
    pub a2a_url: Option<String>,
}

/// Resolved, immutable gateway configuration.
///
/// Loaded once at startup from an optional TOML file plus CLI flag /
/// environment variable overrides, and held behind an atomic pointer
/// ([`ConfigHandle`]) for explicit reload. The configuration file format
/// itself is out of scope; this struct is the resolved result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host/address to bind the listener to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Per-target concurrent-execution cap.
    #[serde(default = "default_max_inflight")]
    pub max_inflight_per_target: usize,
    /// Per-target FIFO wait-list cap.
    #[serde(default = "default_max_queue")]
    pub max_queue_per_target: usize,
    /// Per-request timeout in milliseconds, measured from enqueue.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum body size, written as `NN{kb|mb|gb}`. Parsed and hard-capped
    /// at [`MAX_BODY_SIZE_CAP`] bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: String,
    /// Deadline for graceful shutdown draining, in milliseconds.
    #[serde(default = "default_drain_deadline_ms")]
    pub drain_deadline_ms: u64,
    /// Directory holding the event store file. Internal layout is opaque.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Emit structured JSON log lines instead of the human-readable format.
    #[serde(default = "default_log_json")]
    pub log_json: bool,
    /// Upstream targets this gateway fronts, keyed by target id.
    ///
    /// Never produced through `serde` directly — [`toml_like::parse`]
    /// assembles these from the file's `target.<id>.*` keys, since the
    /// flat-key format this parser covers has no native notion of a list of
    /// records.
    #[serde(skip)]
    pub targets: Vec<TargetSpec>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_inflight_per_target: default_max_inflight(),
            max_queue_per_target: default_max_queue(),
            timeout_ms: default_timeout_ms(),
            max_body_size: default_max_body_size(),
            drain_deadline_ms: default_drain_deadline_ms(),
            data_dir: default_data_dir(),
            log_json: default_log_json(),
            targets: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from an optional TOML file, falling back to
    /// defaults for any field the file omits.
    pub fn load(path: Option<&Path>) -> GatewayResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::configuration(format!("reading {}: {e}", path.display()))
        })?;
        toml_like::parse(&text)
    }

    /// Derives the [`GatewayLimits`] caps from this configuration, parsing
    /// and capping `max_body_size`.
    pub fn limits(&self) -> GatewayResult<GatewayLimits> {
        Ok(GatewayLimits {
            max_inflight_per_target: self.max_inflight_per_target,
            max_queue_per_target: self.max_queue_per_target,
            timeout_ms: self.timeout_ms,
            max_body_bytes: parse_body_size(&self.max_body_size)?,
        })
    }

    /// Path to the event store file inside `data_dir`.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("gateway_events.db")
    }
}

/// Parses `NN{kb|mb|gb}` into bytes, hard-capped at [`MAX_BODY_SIZE_CAP`].
pub fn parse_body_size(s: &str) -> GatewayResult<u64> {
    let s = s.trim().to_lowercase();
    let (digits, multiplier) = if let Some(d) = s.strip_suffix("gb") {
        (d, 1024 * 1024 * 1024)
    } else if let Some(d) = s.strip_suffix("mb") {
        (d, 1024 * 1024)
    } else if let Some(d) = s.strip_suffix("kb") {
        (d, 1024)
    } else if let Some(d) = s.strip_suffix('b') {
        (d, 1)
    } else {
        (s.as_str(), 1)
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| GatewayError::configuration(format!("invalid body size: {s}")))?;
    let bytes = n.saturating_mul(multiplier);
    Ok(bytes.min(MAX_BODY_SIZE_CAP))
}

/// A minimal TOML-subset parser covering exactly the flat fields
/// [`GatewayConfig`] declares. The configuration file format is explicitly
/// out of scope beyond "enough to get a `GatewayConfig` value at startup."
mod toml_like {
    use std::collections::BTreeMap;

    use super::{GatewayConfig, GatewayError, GatewayResult, TargetKind, TargetSpec};

    pub(super) fn parse(text: &str) -> GatewayResult<GatewayConfig> {
        let mut cfg = GatewayConfig::default();
        let mut target_fields: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim().trim_matches('"');

            if let Some(rest) = key.strip_prefix("target.") {
                let Some((id, field)) = rest.split_once('.') else {
                    continue;
                };
                target_fields
                    .entry(id.to_string())
                    .or_default()
                    .insert(field.to_string(), value.to_string());
                continue;
            }

            match key {
                "port" => cfg.port = parse_field(key, value)?,
                "host" => cfg.host = value.to_string(),
                "max_inflight_per_target" => cfg.max_inflight_per_target = parse_field(key, value)?,
                "max_queue_per_target" => cfg.max_queue_per_target = parse_field(key, value)?,
                "timeout_ms" => cfg.timeout_ms = parse_field(key, value)?,
                "max_body_size" => cfg.max_body_size = value.to_string(),
                "drain_deadline_ms" => cfg.drain_deadline_ms = parse_field(key, value)?,
                "data_dir" => cfg.data_dir = value.into(),
                "log_json" => cfg.log_json = parse_field(key, value)?,
                _ => {}
            }
        }

        cfg.targets = target_fields
            .into_iter()
            .map(|(id, fields)| build_target(&id, &fields))
            .collect::<GatewayResult<_>>()?;

        Ok(cfg)
    }

    fn build_target(id: &str, fields: &BTreeMap<String, String>) -> GatewayResult<TargetSpec> {
        let kind = match fields.get("kind").map(String::as_str) {
            Some("mcp") => TargetKind::Mcp,
            Some("a2a") => TargetKind::A2a,
            Some(other) => {
                return Err(GatewayError::configuration(format!(
                    "target.{id}.kind: unknown kind {other:?}, expected \"mcp\" or \"a2a\""
                )));
            }
            None => {
                return Err(GatewayError::configuration(format!(
                    "target.{id}.kind is required"
                )));
            }
        };
        Ok(TargetSpec {
            id: id.to_string(),
            kind,
            mcp_command: fields.get("command").cloned(),
            mcp_args: fields
                .get("args")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            a2a_url: fields.get("url").cloned(),
        })
    }

    fn parse_field<T: std::str::FromStr>(key: &str, value: &str) -> GatewayResult<T> {
        value
            .parse()
            .map_err(|_| GatewayError::configuration(format!("invalid value for {key}: {value}")))
    }
}

/// An atomically swappable handle to the current [`GatewayConfig`], per
/// spec.md's "reload swaps a pointer atomically." Built on
/// `parking_lot::RwLock<Arc<_>>` rather than pulling in `arc_swap`, since
/// reload is rare and reads only need a short-lived guard to clone the `Arc`.
#[derive(Debug, Clone)]
pub struct ConfigHandle(Arc<RwLock<Arc<GatewayConfig>>>);

impl ConfigHandle {
    /// Wraps an initial configuration value.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(config))))
    }

    /// Returns the currently active configuration.
    #[must_use]
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.0.read().clone()
    }

    /// Atomically swaps in a new configuration, returning the previous one.
    pub fn reload(&self, config: GatewayConfig) -> Arc<GatewayConfig> {
        let mut guard = self.0.write();
        std::mem::replace(&mut *guard, Arc::new(config))
    }
}
