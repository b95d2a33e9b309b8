//! A file-backed [`CredentialResolver`] mapping bearer tokens directly to
//! client identities.
//!
//! The real credential store (secret encryption, rotation, revocation) is
//! the external collaborator spec.md leaves out of scope; this is the
//! bootstrap implementation that makes `protocol-gateway` runnable without
//! one, in the same flat `key = value` idiom [`crate::config`] uses for its
//! own file. Production deployments swap it for a [`CredentialResolver`]
//! backed by their actual identity provider.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{GatewayError, GatewayResult};

use super::{ClientIdentity, CredentialResolver, ResolveOutcome};

/// `token = client_id:permission,permission,...` records, loaded once at
/// startup and held read-only for the process lifetime.
pub struct StaticTokenResolver {
    tokens: HashMap<String, ClientIdentity>,
}

impl StaticTokenResolver {
    /// An empty resolver that denies every token. Useful as a safe default
    /// when no tokens file is configured.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            tokens: HashMap::new(),
        }
    }

    /// Loads token records from `path`. Each non-comment, non-blank line is
    /// `token = client_id:perm1,perm2`; a missing `:permissions` segment
    /// grants no permissions.
    pub fn load(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::configuration(format!("reading {}: {e}", path.display())))?;

        let mut tokens = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((token, identity)) = line.split_once('=') else {
                return Err(GatewayError::configuration(format!(
                    "malformed token line (expected `token = client_id:perms`): {line}"
                )));
            };
            let token = token.trim().to_string();
            let identity = identity.trim();
            let (client_id, permissions) = match identity.split_once(':') {
                Some((client_id, perms)) => (
                    client_id.to_string(),
                    perms.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect(),
                ),
                None => (identity.to_string(), std::collections::HashSet::new()),
            };
            tokens.insert(token, ClientIdentity { client_id, permissions });
        }

        Ok(Self { tokens })
    }
}

#[async_trait::async_trait]
impl CredentialResolver for StaticTokenResolver {
    async fn resolve(&self, token_presented: &str) -> ResolveOutcome {
        match self.tokens.get(token_presented) {
            Some(identity) => ResolveOutcome::Allow(identity.clone()),
            None => ResolveOutcome::Deny,
        }
    }
}
