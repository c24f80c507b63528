//! Rate-limit aware delay strategy.
//!
//! # Responsibilities
//! - Read the server's wait hint (`Retry-After` by default) on throttled responses
//! - Accept both delta-seconds and HTTP-date forms
//! - Bound the wait by a configurable maximum
//!
//! # Design Decisions
//! - Declines (returns `None`) for anything it does not understand, so the
//!   next strategy in the retry engine's list decides instead
//! - Dates in the past mean "retry now", never a negative wait

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::inspect::{self, Kind, PolicyOptions};
use crate::resilience::retries::{Outcome, RetryDelayStrategy};

/// What to do when the server asks for more than `max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverLimit {
    /// Wait `max_wait` instead.
    #[default]
    Clamp,
    /// Decline and let the next strategy decide.
    Decline,
}

/// Settings for [`RetryAfter`].
#[derive(Debug, Clone)]
pub struct RetryAfterOptions {
    /// Header carrying the hint. Matched case-insensitively.
    pub header: String,
    /// Statuses the hint is honored for.
    pub statuses: Vec<u16>,
    /// Upper bound on the wait; `None` disables the bound.
    pub max_wait: Option<Duration>,
    pub over_limit: OverLimit,
}

impl Default for RetryAfterOptions {
    fn default() -> Self {
        Self {
            header: "retry-after".to_string(),
            statuses: vec![429, 503],
            max_wait: Some(Duration::from_secs(60)),
            over_limit: OverLimit::Clamp,
        }
    }
}

/// Delay strategy that honors a server-supplied wait hint.
#[derive(Debug, Clone)]
pub struct RetryAfter {
    options: RetryAfterOptions,
}

impl RetryAfter {
    pub fn new(options: RetryAfterOptions) -> Self {
        Self { options }
    }

    /// Share and tag the strategy for introspection.
    pub fn shared(self) -> Arc<Self> {
        let meta = PolicyOptions::RetryAfter {
            header: self.options.header.clone(),
            statuses: self.options.statuses.clone(),
            max_wait_ms: self.options.max_wait.map(|d| d.as_millis() as u64),
        };
        let arc = Arc::new(self);
        inspect::tag(&arc, "retry_after", Kind::Strategy, meta);
        arc
    }

    /// Wait derived from `value`, bounded per the options.
    pub fn delay_for_value(&self, value: &str, now: DateTime<Utc>) -> Option<Duration> {
        let wait = parse_retry_after(value, now)?;
        match self.options.max_wait {
            Some(max) if wait > max => match self.options.over_limit {
                OverLimit::Clamp => Some(max),
                OverLimit::Decline => None,
            },
            _ => Some(wait),
        }
    }
}

impl Default for RetryAfter {
    fn default() -> Self {
        Self::new(RetryAfterOptions::default())
    }
}

#[async_trait]
impl RetryDelayStrategy for RetryAfter {
    async fn delay(&self, outcome: Outcome<'_>, _attempt: u32) -> Option<Duration> {
        let resp = outcome.response()?;
        if !self.options.statuses.contains(&resp.status()) {
            return None;
        }
        let value = resp.header(&self.options.header)?;
        let delay = self.delay_for_value(value, Utc::now());
        tracing::debug!(status = resp.status(), hint = %value, delay = ?delay, "Server wait hint");
        delay
    }
}

/// Obsolete HTTP date forms, read as UTC: RFC 850 and asctime.
const OBSOLETE_DATE_FORMATS: [&str; 2] = ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"];

/// Parse a wait hint relative to `now`.
///
/// An integer is a number of seconds (negative counts as zero). Anything else
/// is tried as an HTTP date, preferred form first. Unparseable values yield
/// `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<i64>() {
        return Some(Duration::from_secs(secs.max(0) as u64));
    }

    let date = match DateTime::parse_from_rfc2822(value) {
        Ok(date) => date.with_timezone(&Utc),
        Err(_) => OBSOLETE_DATE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())?
            .and_utc(),
    };
    let wait = date - now;
    Some(wait.to_std().unwrap_or(Duration::ZERO))
}
