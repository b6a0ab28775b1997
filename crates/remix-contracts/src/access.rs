use std::sync::Arc;

use anyhow::Result;

use crate::quota::KvStore;

pub const ACCESS_GRANT_KEY: &str = "arena_friend_code";
pub const DEFAULT_ACCESS_CODE: &str = "arena";

/// Shared-passphrase gate in front of the workflow.
#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn KvStore>,
    code: String,
}

impl AccessGate {
    pub fn new(store: Arc<dyn KvStore>, code: impl Into<String>) -> Self {
        Self {
            store,
            code: code.into(),
        }
    }

    /// True when a grant matching the current code was persisted earlier.
    /// Unreadable storage counts as no grant.
    pub fn has_grant(&self) -> bool {
        matches!(self.store.get(ACCESS_GRANT_KEY), Ok(Some(saved)) if saved == self.code)
    }

    /// Checks `attempt` and persists the grant on success.
    pub fn unlock(&self, attempt: &str) -> Result<bool> {
        if attempt.trim() != self.code {
            return Ok(false);
        }
        self.store.set(ACCESS_GRANT_KEY, &self.code)?;
        Ok(true)
    }

    pub fn revoke(&self) -> Result<()> {
        self.store.remove(ACCESS_GRANT_KEY)
    }
}
