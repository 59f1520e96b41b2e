//! Counters for render-service traffic.
//!
//! Tracks how many requests were rewritten per endpoint, the status
//! distribution of render responses, and how often the argument-cache
//! recovery retry fired. All counters are thread-safe; the embedding crawler
//! reads them for progress reporting.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct RenderStats {
    request_counts: DashMap<String, usize>,
    response_counts: DashMap<(String, u16), usize>,
    cache_miss_retries: AtomicUsize,
}

impl RenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request rewritten into a render call against `endpoint`.
    pub fn record_request(&self, endpoint: &str) {
        *self.request_counts.entry(endpoint.to_string()).or_insert(0) += 1;
    }

    /// Record a render response for `endpoint` with the given transport status.
    pub fn record_response(&self, endpoint: &str, status: u16) {
        *self
            .response_counts
            .entry((endpoint.to_string(), status))
            .or_insert(0) += 1;
    }

    /// Record a cache-miss recovery retry.
    pub fn record_retry(&self) {
        self.cache_miss_retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn request_count(&self, endpoint: &str) -> usize {
        self.request_counts.get(endpoint).map(|c| *c).unwrap_or(0)
    }

    pub fn response_count(&self, endpoint: &str, status: u16) -> usize {
        self.response_counts
            .get(&(endpoint.to_string(), status))
            .map(|c| *c)
            .unwrap_or(0)
    }

    pub fn retries(&self) -> usize {
        self.cache_miss_retries.load(Ordering::SeqCst)
    }
}

impl std::fmt::Display for RenderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let requests: usize = self.request_counts.iter().map(|e| *e.value()).sum();
        let responses: usize = self.response_counts.iter().map(|e| *e.value()).sum();
        write!(
            f,
            "render requests: {}, responses: {}, cache-miss retries: {}",
            requests,
            responses,
            self.retries()
        )
    }
}
