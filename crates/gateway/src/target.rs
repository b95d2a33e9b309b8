//! Target registry.
//!
//! A target is an opaque-string-identified upstream endpoint. Membership and
//! transport kind come from configuration; this module only needs to answer
//! "is this a known target" and "which transport family does it speak."

use std::collections::HashMap;

/// Which upstream transport family a target speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// Tool-call JSON-RPC over a local child process.
    Mcp,
    /// Agent-to-agent JSON-RPC over outbound HTTP.
    A2a,
}

impl TargetKind {
    /// The event-kind prefix this target family uses for audit records
    /// (`gateway_mcp_*` or `gateway_a2a_*`).
    #[must_use]
    pub fn event_prefix(self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::A2a => "a2a",
        }
    }
}

/// Read-only registry mapping target ids to their transport kind.
///
/// Built once at startup from `GatewayConfig` and shared read-only for the
/// life of the process; the core never needs to mutate it.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, TargetKind>,
}

impl TargetRegistry {
    /// Builds a registry from `(target_id, kind)` pairs.
    pub fn new(targets: impl IntoIterator<Item = (String, TargetKind)>) -> Self {
        Self {
            targets: targets.into_iter().collect(),
        }
    }

    /// Whether `id` names a known target.
    #[must_use]
    pub fn is_known(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    /// The transport kind for `id`, if known.
    #[must_use]
    pub fn kind(&self, id: &str) -> Option<TargetKind> {
        self.targets.get(id).copied()
    }
}
