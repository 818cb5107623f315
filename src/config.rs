//! Store connection and retry configuration.
//!
//! All knobs are bound once at boot into the writer and session coordinator;
//! nothing re-reads configuration per operation.

use std::time::Duration;

/// Graph store connection configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Bounded session pool; the only shared mutable resource at runtime.
    pub max_sessions: u32,
    pub connect_timeout: Duration,
    /// Default per-request deadline when the caller supplies none.
    pub request_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: std::env::var("GRAPH_STORE_URI")
                .unwrap_or_else(|_| "bolt://localhost:7687".to_string()),
            user: std::env::var("GRAPH_STORE_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("GRAPH_STORE_PASSWORD")
                .unwrap_or_else(|_| "password".to_string()),
            max_sessions: std::env::var("GRAPH_STORE_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Bounded exponential backoff for retryable store conflicts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// First-retry delay floor.
    pub base_delay: Duration,
    /// Cap applied after exponential growth, before jitter.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based), jittered over the full range.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        use rand::Rng;
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        let jitter: f64 = rand::thread_rng().gen_range(0.5..1.0);
        capped.mul_f64(jitter)
    }
}
