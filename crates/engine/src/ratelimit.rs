//! Sliding-window rate limiter.
//!
//! Counts events within a trailing window per (action, subject) key. This
//! is a correctness/security control, not an approximation: counting is
//! exact under concurrency because all windows sit behind one async mutex,
//! and every recorded event carries a monotonic sequence number so
//! simultaneous events never collapse into one.
//!
//! Policy: an attempt is recorded even when it exceeds the limit, so
//! rejected callers keep consuming quota and retry storms stay expensive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Extra lifetime granted to an idle window beyond its duration before it
/// is reaped, so abandoned keys self-clean without a sweep process.
const IDLE_TTL_BUFFER: Duration = Duration::from_secs(60);

/// What kind of caller a rate-limit subject identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    ApiKey,
    Ip,
    User,
}

impl SubjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SubjectKind::ApiKey => "api_key",
            SubjectKind::Ip => "ip",
            SubjectKind::User => "user",
        }
    }
}

/// Key identifying one rate-limit window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub action: String,
    pub subject_kind: SubjectKind,
    pub subject_id: String,
}

impl RateLimitKey {
    pub fn new(action: impl Into<String>, subject_kind: SubjectKind, subject_id: impl Into<String>) -> Self {
        Self { action: action.into(), subject_kind, subject_id: subject_id.into() }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.action, self.subject_kind.as_str(), self.subject_id)
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    /// Rolling deadline: `window_start + window`, where `window_start` is
    /// `now - window` at call time.
    pub reset_at: DateTime<Utc>,
}

struct Window {
    /// Events as (timestamp, sequence). The sequence disambiguates events
    /// recorded in the same instant.
    events: Vec<(DateTime<Utc>, u64)>,
    /// Reap deadline; refreshed on every touch.
    expires_at: DateTime<Utc>,
}

/// Exact sliding-window counter over in-process state.
#[derive(Default)]
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<RateLimitKey, Window>>,
    seq: AtomicU64,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event and report whether the caller is within the limit.
    ///
    /// The event is recorded even when it pushes `used` past `limit`
    /// (the attempt is charged either way).
    pub async fn check_and_increment(&self, key: &RateLimitKey, limit: u32, window: Duration) -> RateLimitStatus {
        self.check_at(key, limit, window, Utc::now(), true).await
    }

    /// Report the current window state without recording an event.
    ///
    /// `allowed` reflects whether a new request at this instant would pass.
    pub async fn peek_status(&self, key: &RateLimitKey, limit: u32, window: Duration) -> RateLimitStatus {
        self.check_at(key, limit, window, Utc::now(), false).await
    }

    async fn check_at(
        &self, key: &RateLimitKey, limit: u32, window: Duration, now: DateTime<Utc>, record: bool,
    ) -> RateLimitStatus {
        // windows are config-validated to at most an hour; cap anything larger
        let window_chrono =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(86_400));
        let window_start = now - window_chrono;
        let expires_at = now + window_chrono + chrono::Duration::seconds(IDLE_TTL_BUFFER.as_secs() as i64);

        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| w.expires_at > now);

        let entry = windows
            .entry(key.clone())
            .or_insert_with(|| Window { events: Vec::new(), expires_at });
        entry.expires_at = expires_at;

        if record {
            entry.events.push((now, self.seq.fetch_add(1, Ordering::Relaxed)));
        }
        entry.events.retain(|(t, _)| *t > window_start);

        let used = entry.events.len() as u32;
        let allowed = if record { used <= limit } else { used < limit };

        RateLimitStatus {
            allowed,
            limit,
            used,
            remaining: limit.saturating_sub(used),
            reset_at: window_start + window_chrono,
        }
    }
}
