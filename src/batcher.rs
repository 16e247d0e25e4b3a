//! Adaptive batch planning
//!
//! Packs chunks into contiguous batches bounded by the provider's
//! per-request token budget and a dynamic batch size that grows on
//! healthy latency and halves on transient errors. Chunks are never
//! split; an oversized chunk is rejected before it reaches the planner.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::Duration;

use crate::provider::ProviderLimits;

/// Fraction of `max_tokens_per_request` a batch may actually use.
pub const SAFETY_MARGIN: f64 = 0.9;

/// Latency samples kept for the feedback median.
const LATENCY_WINDOW: usize = 16;

/// Growth factor applied when the rolling median latency is on target.
const GROWTH: f64 = 1.1;

pub struct AdaptiveBatcher {
    current: f64,
    min_batch_size: usize,
    max_batch_size: usize,
    token_budget: usize,
    target_latency: Duration,
    latencies: VecDeque<Duration>,
    adaptive: bool,
}

impl AdaptiveBatcher {
    /// `hint` seeds the initial and minimum batch size; the provider's
    /// recommended size is the ceiling.
    pub fn new(limits: &ProviderLimits, hint: usize, adaptive: bool) -> Self {
        let max_batch_size = limits.recommended_batch_size.max(1);
        let min_batch_size = hint.clamp(1, max_batch_size);
        Self {
            current: min_batch_size as f64,
            min_batch_size,
            max_batch_size,
            token_budget: (limits.max_tokens_per_request as f64 * SAFETY_MARGIN) as usize,
            target_latency: Duration::from_secs(2),
            latencies: VecDeque::with_capacity(LATENCY_WINDOW),
            adaptive,
        }
    }

    pub fn current_batch_size(&self) -> usize {
        (self.current as usize).clamp(self.min_batch_size, self.max_batch_size)
    }

    /// Plan contiguous batches over per-chunk token estimates.
    ///
    /// Every returned range satisfies both the token budget and the
    /// current batch size. Order is preserved, which keeps per-file
    /// chunk ordinals monotone downstream.
    pub fn plan(&self, token_counts: &[usize]) -> Vec<Range<usize>> {
        let size_cap = self.current_batch_size();
        let mut batches = Vec::new();
        let mut start = 0usize;
        let mut tokens = 0usize;

        for (i, &count) in token_counts.iter().enumerate() {
            let would_overflow = tokens + count > self.token_budget || i - start >= size_cap;
            if i > start && would_overflow {
                batches.push(start..i);
                start = i;
                tokens = 0;
            }
            tokens += count;
        }
        if start < token_counts.len() {
            batches.push(start..token_counts.len());
        }
        batches
    }

    /// Feedback on a successful batch: grow when the rolling median
    /// latency is within target.
    pub fn record_success(&mut self, latency: Duration) {
        if !self.adaptive {
            return;
        }
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);

        if self.median_latency() <= self.target_latency {
            self.current = (self.current * GROWTH).min(self.max_batch_size as f64);
        }
    }

    /// Feedback on a transient failure: halve and clear the latency
    /// window so stale healthy samples cannot immediately re-grow.
    pub fn record_transient_failure(&mut self) {
        if !self.adaptive {
            return;
        }
        self.current = (self.current * 0.5).max(self.min_batch_size as f64);
        self.latencies.clear();
        tracing::debug!(batch_size = self.current_batch_size(), "Batch size halved after transient failure");
    }

    fn median_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<Duration> = self.latencies.iter().copied().collect();
        sorted.sort();
        sorted[sorted.len() / 2]
    }
}
