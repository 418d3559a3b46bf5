//! Request-weight and order-rate accounting for the REST executor.

use crate::core::errors::ExchangeError;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use std::collections::VecDeque;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Headers carrying the server's view of consumed weight, most specific first.
pub const USED_WEIGHT_HEADERS: [&str; 2] = ["x-mbx-used-weight-1m", "x-mbx-used-weight"];

const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);
const DEFAULT_BAN: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct RateGovernorConfig {
    /// Request weight allowed per window.
    pub weight_limit: u32,
    pub window: Duration,
    /// Orders allowed per minute.
    pub orders_per_minute: NonZeroU32,
}

impl Default for RateGovernorConfig {
    fn default() -> Self {
        Self {
            weight_limit: 2400,
            window: Duration::from_secs(60),
            orders_per_minute: nonzero!(1200u32),
        }
    }
}

impl RateGovernorConfig {
    pub fn with_weight_limit(mut self, weight_limit: u32) -> Self {
        self.weight_limit = weight_limit;
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_orders_per_minute(mut self, orders_per_minute: NonZeroU32) -> Self {
        self.orders_per_minute = orders_per_minute;
        self
    }
}

#[derive(Debug, Default)]
struct WindowState {
    entries: VecDeque<(Instant, u32)>,
    used: u32,
    throttled_until: Option<Instant>,
    banned_until: Option<(Instant, DateTime<Utc>)>,
}

impl WindowState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, weight)) = self.entries.front() {
            if now.duration_since(at) >= window {
                self.entries.pop_front();
                self.used = self.used.saturating_sub(weight);
            } else {
                break;
            }
        }
    }

    /// Make the local total equal the server's figure.
    fn reconcile(&mut self, now: Instant, server_used: u32) {
        if server_used > self.used {
            self.entries.push_back((now, server_used - self.used));
            self.used = server_used;
            return;
        }
        let mut excess = self.used - server_used;
        while excess > 0 {
            let Some(front) = self.entries.front_mut() else {
                break;
            };
            if front.1 <= excess {
                excess -= front.1;
                self.used -= front.1;
                self.entries.pop_front();
            } else {
                front.1 -= excess;
                self.used -= excess;
                excess = 0;
            }
        }
    }
}

/// Per-client rate budget shared by every REST call.
///
/// Weight is tracked in a rolling window and reconciled against the
/// `X-MBX-USED-WEIGHT-1M` header; the server's figure always wins. Order
/// placement is additionally capped by a `governor` quota.
#[derive(Debug)]
pub struct RateGovernor {
    config: RateGovernorConfig,
    state: Mutex<WindowState>,
    orders: DefaultDirectRateLimiter,
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(RateGovernorConfig::default())
    }
}

impl RateGovernor {
    pub fn new(config: RateGovernorConfig) -> Self {
        let orders = RateLimiter::direct(Quota::per_minute(config.orders_per_minute));
        Self {
            config,
            state: Mutex::new(WindowState::default()),
            orders,
        }
    }

    pub fn config(&self) -> &RateGovernorConfig {
        &self.config
    }

    /// Try to book `weight`.
    ///
    /// Returns `Duration::ZERO` once the weight is booked, or how long to wait
    /// before asking again (nothing is booked in that case). Fails while banned.
    pub fn reserve(&self, weight: u32) -> Result<Duration, ExchangeError> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some((deadline, until)) = state.banned_until {
            if now < deadline {
                return Err(ExchangeError::Banned { until });
            }
            state.banned_until = None;
        }

        if let Some(deadline) = state.throttled_until {
            if now < deadline {
                return Ok(deadline - now);
            }
            state.throttled_until = None;
        }

        state.prune(now, self.config.window);

        // A single request heavier than the whole budget runs on an empty window.
        let weight = weight.min(self.config.weight_limit);
        if state.used + weight <= self.config.weight_limit {
            state.entries.push_back((now, weight));
            state.used += weight;
            return Ok(Duration::ZERO);
        }

        let mut freed = 0;
        let needed = state.used + weight - self.config.weight_limit;
        for &(at, entry_weight) in &state.entries {
            freed += entry_weight;
            if freed >= needed {
                let expires = at + self.config.window;
                return Ok(expires.saturating_duration_since(now).max(Duration::from_millis(1)));
            }
        }
        Ok(self.config.window)
    }

    /// Wait until `weight` fits (and an order slot is free when `counts_as_order`).
    pub async fn acquire(&self, weight: u32, counts_as_order: bool) -> Result<(), ExchangeError> {
        loop {
            let wait = self.reserve(weight)?;
            if wait.is_zero() {
                break;
            }
            debug!(weight, wait_ms = wait.as_millis() as u64, "rate budget exhausted, waiting");
            tokio::time::sleep(wait).await;
        }
        if counts_as_order {
            self.orders.until_ready().await;
        }
        Ok(())
    }

    /// Fold a response into the budget.
    ///
    /// Returns the error the caller should see for 429 / 418 responses.
    pub fn record_response(
        &self,
        status_code: u16,
        headers: &HeaderMap,
        body: &str,
    ) -> Option<ExchangeError> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(server_used) = used_weight_from_headers(headers) {
            state.prune(now, self.config.window);
            if server_used != state.used {
                debug!(local = state.used, server = server_used, "reconciling used weight");
            }
            state.reconcile(now, server_used);
        }

        match status_code {
            429 => {
                let retry_after = retry_after(headers).unwrap_or(DEFAULT_THROTTLE);
                warn!(retry_after_ms = retry_after.as_millis() as u64, "request rate limited (429)");
                state.throttled_until = Some(now + retry_after);
                Some(ExchangeError::RateLimitExceeded { retry_after })
            }
            418 => {
                let until = ban_deadline(headers, body);
                let remaining = (until - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                warn!(%until, "IP banned by exchange (418)");
                state.banned_until = Some((now + remaining, until));
                Some(ExchangeError::Banned { until })
            }
            _ => None,
        }
    }

    /// Weight consumed in the current window.
    pub fn used_weight(&self) -> u32 {
        let mut state = self.state.lock();
        state.prune(Instant::now(), self.config.window);
        state.used
    }

    pub fn is_banned(&self) -> bool {
        self.state
            .lock()
            .banned_until
            .is_some_and(|(deadline, _)| Instant::now() < deadline)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn used_weight_from_headers(headers: &HeaderMap) -> Option<u32> {
    USED_WEIGHT_HEADERS
        .iter()
        .find_map(|name| header_str(headers, name).and_then(|v| v.parse().ok()))
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, "retry-after")
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Unban instant from `Retry-After`, else from "banned until <epoch ms>" in the body.
fn ban_deadline(headers: &HeaderMap, body: &str) -> DateTime<Utc> {
    if let Some(wait) = retry_after(headers) {
        if let Ok(wait) = chrono::Duration::from_std(wait) {
            return Utc::now() + wait;
        }
    }
    if let Some(until) = parse_banned_until(body) {
        return until;
    }
    Utc::now() + chrono::Duration::seconds(DEFAULT_BAN.as_secs() as i64)
}

pub(crate) fn parse_banned_until(body: &str) -> Option<DateTime<Utc>> {
    let start = body.find("banned until")? + "banned until".len();
    let digits: String = body[start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    DateTime::from_timestamp_millis(digits.parse().ok()?)
}
