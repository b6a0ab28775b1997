use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::store::KvStore;
use crate::events::{payload, EventLevel, EventWriter};

pub const USAGE_KEY: &str = "arena_synth_usage_history";
pub const TOKEN_KEY: &str = "arena_synth_token_usage";
pub const DAILY_REQUEST_LIMIT: i64 = 10;
pub const DAILY_TOKEN_LIMIT: i64 = 50_000;
pub const WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

const FALLBACK_REMAINING_REQUESTS: i64 = 1;
const FALLBACK_REMAINING_TOKENS: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub timestamp: i64,
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub remaining_requests: i64,
    pub remaining_tokens: i64,
    pub reason: Option<String>,
}

impl QuotaCheck {
    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot {
            remaining_requests: self.remaining_requests,
            remaining_tokens: self.remaining_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub remaining_requests: i64,
    pub remaining_tokens: i64,
}

impl Default for QuotaSnapshot {
    fn default() -> Self {
        Self {
            remaining_requests: DAILY_REQUEST_LIMIT,
            remaining_tokens: DAILY_TOKEN_LIMIT,
        }
    }
}

/// Daily admission control over two append-only usage logs.
///
/// The request log is a JSON array of millisecond timestamps and the token
/// log a JSON array of [`TokenUsage`] rows. Both are pruned to the trailing
/// 24 hours whenever they are read. Storage failures never block the user:
/// checks fail open and recording becomes a logged no-op.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    events: EventWriter,
}

struct UsageLogs {
    requests: Vec<i64>,
    tokens: Vec<TokenUsage>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KvStore>, events: EventWriter) -> Self {
        Self { store, events }
    }

    pub fn check_limit(&self) -> QuotaCheck {
        self.check_limit_at(now_ms())
    }

    pub fn check_limit_at(&self, now: i64) -> QuotaCheck {
        match self.evaluate(now) {
            Ok(check) => check,
            Err(err) => {
                self.events.emit_quiet(
                    EventLevel::Warn,
                    "quota_check_failed",
                    payload(json!({ "error": format!("{err:#}") })),
                );
                QuotaCheck {
                    allowed: true,
                    remaining_requests: FALLBACK_REMAINING_REQUESTS,
                    remaining_tokens: FALLBACK_REMAINING_TOKENS,
                    reason: None,
                }
            }
        }
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        self.check_limit().snapshot()
    }

    /// Records usage once per generation attempt. Returns `false` when the
    /// attempt was already recorded or storage failed.
    pub fn record_usage_for(&self, attempt: &str, tokens: u64) -> bool {
        self.record_usage_at(now_ms(), Some(attempt), tokens)
    }

    pub fn record_usage_at(&self, now: i64, attempt: Option<&str>, tokens: u64) -> bool {
        match self.append(now, attempt, tokens) {
            Ok(recorded) => recorded,
            Err(err) => {
                self.events.emit_quiet(
                    EventLevel::Warn,
                    "quota_record_failed",
                    payload(json!({ "error": format!("{err:#}"), "tokens": tokens })),
                );
                false
            }
        }
    }

    fn evaluate(&self, now: i64) -> Result<QuotaCheck> {
        let logs = self.load()?;
        let requests = prune_requests(&logs.requests, now);
        let tokens = prune_tokens(&logs.tokens, now);

        if requests.len() != logs.requests.len() {
            self.store
                .set(USAGE_KEY, &serde_json::to_string(&requests)?)
                .context("failed compacting request log")?;
        }
        if tokens.len() != logs.tokens.len() {
            self.store
                .set(TOKEN_KEY, &serde_json::to_string(&tokens)?)
                .context("failed compacting token log")?;
        }

        let tokens_used = tokens
            .iter()
            .try_fold(0u64, |total, row| total.checked_add(row.tokens))
            .ok_or_else(|| anyhow!("token log total overflows"))?;
        let tokens_used =
            i64::try_from(tokens_used).context("token log total exceeds the counter range")?;
        let remaining_requests = DAILY_REQUEST_LIMIT - requests.len() as i64;
        let remaining_tokens = DAILY_TOKEN_LIMIT - tokens_used;

        let reason = if remaining_requests <= 0 {
            Some(format!("Daily request limit reached ({DAILY_REQUEST_LIMIT}/day)."))
        } else if remaining_tokens <= 0 {
            Some(format!(
                "Daily token quota exceeded ({}k tokens/day).",
                DAILY_TOKEN_LIMIT / 1000
            ))
        } else {
            None
        };

        Ok(QuotaCheck {
            allowed: remaining_requests > 0 && remaining_tokens > 0,
            remaining_requests,
            remaining_tokens,
            reason,
        })
    }

    fn append(&self, now: i64, attempt: Option<&str>, tokens: u64) -> Result<bool> {
        let mut logs = self.load()?;
        if let Some(attempt) = attempt {
            if logs
                .tokens
                .iter()
                .any(|row| row.attempt.as_deref() == Some(attempt))
            {
                return Ok(false);
            }
        }

        logs.requests.push(now);
        logs.tokens.push(TokenUsage {
            timestamp: now,
            tokens,
            attempt: attempt.map(str::to_string),
        });
        self.store.set(
            USAGE_KEY,
            &serde_json::to_string(&prune_requests(&logs.requests, now))?,
        )?;
        self.store.set(
            TOKEN_KEY,
            &serde_json::to_string(&prune_tokens(&logs.tokens, now))?,
        )?;
        Ok(true)
    }

    fn load(&self) -> Result<UsageLogs> {
        let requests = match self.store.get(USAGE_KEY)? {
            Some(raw) => serde_json::from_str(&raw).context("request log is not valid")?,
            None => Vec::new(),
        };
        let tokens = match self.store.get(TOKEN_KEY)? {
            Some(raw) => serde_json::from_str(&raw).context("token log is not valid")?,
            None => Vec::new(),
        };
        Ok(UsageLogs { requests, tokens })
    }
}

fn prune_requests(requests: &[i64], now: i64) -> Vec<i64> {
    requests
        .iter()
        .copied()
        .filter(|timestamp| now.saturating_sub(*timestamp) < WINDOW_MS)
        .collect()
}

fn prune_tokens(tokens: &[TokenUsage], now: i64) -> Vec<TokenUsage> {
    tokens
        .iter()
        .filter(|row| now.saturating_sub(row.timestamp) < WINDOW_MS)
        .cloned()
        .collect()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
