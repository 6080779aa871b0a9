//! Sliding-window request and token throttling
//!
//! Throttling delays requests until the last minute's usage leaves room; it
//! never replays a request.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Usage {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u32)>,
}

impl Usage {
    fn evict(&mut self, now: Instant) {
        while self
            .requests
            .front()
            .is_some_and(|&t| now.duration_since(t) > WINDOW)
        {
            self.requests.pop_front();
        }
        while self
            .tokens
            .front()
            .is_some_and(|&(t, _)| now.duration_since(t) > WINDOW)
        {
            self.tokens.pop_front();
        }
    }

    fn token_total(&self) -> u32 {
        self.tokens.iter().map(|&(_, n)| n).sum()
    }

    /// Time until the oldest entry of a full window expires
    fn wait_for(oldest: Option<Instant>, now: Instant) -> Duration {
        oldest
            .map(|t| WINDOW.saturating_sub(now.duration_since(t)) + Duration::from_millis(10))
            .unwrap_or(Duration::from_millis(100))
    }
}

/// Per-provider limiter over requests and tokens per minute
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    usage: Mutex<Usage>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            tokens_per_minute,
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Wait until both windows have capacity, then record the request
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut usage = self.usage.lock().await;
                let now = Instant::now();
                usage.evict(now);

                if usage.requests.len() >= self.requests_per_minute as usize {
                    Usage::wait_for(usage.requests.front().copied(), now)
                } else if self.tokens_per_minute > 0
                    && usage.token_total() >= self.tokens_per_minute
                {
                    Usage::wait_for(usage.tokens.front().map(|&(t, _)| t), now)
                } else {
                    usage.requests.push_back(now);
                    return;
                }
            };

            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                "rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Record token usage of a completed request
    pub async fn record_tokens(&self, tokens: u32) {
        let mut usage = self.usage.lock().await;
        let now = Instant::now();
        usage.evict(now);
        usage.tokens.push_back((now, tokens));
    }

    /// Tokens used in the last minute
    pub async fn current_token_usage(&self) -> u32 {
        let mut usage = self.usage.lock().await;
        usage.evict(Instant::now());
        usage.token_total()
    }

    /// Requests made in the last minute
    pub async fn current_request_count(&self) -> usize {
        let mut usage = self.usage.lock().await;
        usage.evict(Instant::now());
        usage.requests.len()
    }
}
