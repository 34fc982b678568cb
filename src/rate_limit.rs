// Per-user sliding-window limits on the write endpoints (pull imports and API
// key creation). Per process only.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitType {
    PullImports,
    ApiKeys,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub max: usize,
    pub window: Duration,
}

impl RateLimitType {
    pub fn default_rule(self) -> RateLimitRule {
        let hour = Duration::from_secs(3600);
        match self {
            RateLimitType::PullImports => RateLimitRule {
                max: 60,
                window: hour,
            },
            RateLimitType::ApiKeys => RateLimitRule {
                max: 10,
                window: hour,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RateLimitType::PullImports => "pull imports",
            RateLimitType::ApiKeys => "API keys created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Too many {}: limit is {max} per {window_secs}s, retry in {retry_after_secs}s",
    .limit_type.label()
)]
pub struct RateLimitError {
    pub limit_type: RateLimitType,
    pub max: usize,
    pub window_secs: u64,
    /// Seconds until the oldest event in the window expires; at least 1.
    pub retry_after_secs: u64,
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

type LimitKey = (i64, RateLimitType);

#[derive(Debug, Clone)]
pub struct RateLimiter {
    events: Arc<Mutex<HashMap<LimitKey, VecDeque<Instant>>>>,
    rules: HashMap<RateLimitType, RateLimitRule>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(HashMap::new())),
            rules: HashMap::new(),
            enabled: true,
        }
    }

    /// A limiter that lets everything through.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Override the default rule for one action.
    pub fn with_rule(mut self, limit_type: RateLimitType, rule: RateLimitRule) -> Self {
        self.rules.insert(limit_type, rule);
        self
    }

    fn rule(&self, limit_type: RateLimitType) -> RateLimitRule {
        self.rules
            .get(&limit_type)
            .copied()
            .unwrap_or_else(|| limit_type.default_rule())
    }

    /// Record one event for `user_id`, or report how long to wait if the
    /// window is full.
    pub fn check_limit(
        &self,
        user_id: i64,
        limit_type: RateLimitType,
    ) -> Result<(), RateLimitError> {
        if !self.enabled {
            return Ok(());
        }
        let rule = self.rule(limit_type);
        let now = Instant::now();
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut events, now);

        let window = events.entry((user_id, limit_type)).or_default();
        if window.len() >= rule.max {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = rule.window.saturating_sub(now.duration_since(oldest));
            tracing::debug!(user_id, limit = limit_type.label(), "Rate limit hit");
            return Err(RateLimitError {
                limit_type,
                max: rule.max,
                window_secs: rule.window.as_secs(),
                retry_after_secs: ceil_secs(retry_after).max(1),
            });
        }
        window.push_back(now);
        Ok(())
    }

    /// Drop expired events and forget users with nothing left in a window.
    fn prune(&self, events: &mut HashMap<LimitKey, VecDeque<Instant>>, now: Instant) {
        events.retain(|(_, limit_type), window| {
            let span = self.rule(*limit_type).window;
            while window
                .front()
                .is_some_and(|at| now.duration_since(*at) >= span)
            {
                window.pop_front();
            }
            !window.is_empty()
        });
    }

    /// Events currently counted against `user_id`.
    pub fn in_window(&self, user_id: i64, limit_type: RateLimitType) -> usize {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        self.prune(&mut events, Instant::now());
        events
            .get(&(user_id, limit_type))
            .map_or(0, |window| window.len())
    }

    /// Number of (user, action) pairs with live events.
    pub fn tracked_keys(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
