//! # Process-wide stats surface
//!
//! Centralises the "global mutable counters" design note from spec §9: a
//! single atomic-counters struct owned by the orchestrator, aggregating its
//! own ingest/mention counters alongside snapshots borrowed from
//! [`crate::llm::UsageCounters`], [`crate::privacy::PrivacyCounters`], and the
//! transport's reconnect count. Nothing here computes anything; it just
//! gives whatever external surface wants to report health/metrics (the
//! out-of-scope HTTP stats endpoint) one struct to read.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::llm::UsageCounters;
use crate::privacy::PrivacyCounters;

/// Orchestrator-owned counters not already tracked by a component.
#[derive(Default)]
pub struct OrchestratorCounters {
    pub messages_ingested: AtomicU64,
    pub mentions_received: AtomicU64,
    pub mentions_dropped_empty_query: AtomicU64,
    pub mentions_dropped_channel_filter: AtomicU64,
    pub ai_responses_generated: AtomicU64,
    pub ai_responses_failed: AtomicU64,
    pub actions_dispatched: AtomicU64,
    pub confirmations_sent: AtomicU64,
    pub reconnects: AtomicU64,
}

impl OrchestratorCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A point-in-time snapshot, the shape an external stats surface would
/// serialise. Plain `u64`s rather than atomics: a snapshot is a copy, never
/// updated in place.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub messages_ingested: u64,
    pub mentions_received: u64,
    pub mentions_dropped_empty_query: u64,
    pub mentions_dropped_channel_filter: u64,
    pub ai_responses_generated: u64,
    pub ai_responses_failed: u64,
    pub actions_dispatched: u64,
    pub confirmations_sent: u64,
    pub reconnects: u64,

    pub llm_requests: u64,
    pub llm_successes: u64,
    pub llm_failures: u64,
    pub llm_total_tokens: u64,
    pub llm_estimated_cost_cents: u64,

    pub privacy_total: u64,
    pub privacy_local: u64,
    pub privacy_external: u64,
    pub privacy_filtered: u64,
    pub privacy_compliance_score: f32,
}

/// Read every atomic in `orch`/`llm`/`privacy` into one immutable snapshot.
/// `compliance_score` is computed by the privacy router itself (it needs the
/// configured tier, which isn't a counter), so it's passed in rather than
/// recomputed here.
pub fn snapshot(
    orch: &OrchestratorCounters,
    llm: &UsageCounters,
    privacy: &PrivacyCounters,
    privacy_compliance_score: f32,
) -> StatsSnapshot {
    StatsSnapshot {
        messages_ingested: orch.messages_ingested.load(Ordering::Relaxed),
        mentions_received: orch.mentions_received.load(Ordering::Relaxed),
        mentions_dropped_empty_query: orch.mentions_dropped_empty_query.load(Ordering::Relaxed),
        mentions_dropped_channel_filter: orch
            .mentions_dropped_channel_filter
            .load(Ordering::Relaxed),
        ai_responses_generated: orch.ai_responses_generated.load(Ordering::Relaxed),
        ai_responses_failed: orch.ai_responses_failed.load(Ordering::Relaxed),
        actions_dispatched: orch.actions_dispatched.load(Ordering::Relaxed),
        confirmations_sent: orch.confirmations_sent.load(Ordering::Relaxed),
        reconnects: orch.reconnects.load(Ordering::Relaxed),

        llm_requests: llm.requests.load(Ordering::Relaxed),
        llm_successes: llm.successes.load(Ordering::Relaxed),
        llm_failures: llm.failures.load(Ordering::Relaxed),
        llm_total_tokens: llm.total_tokens.load(Ordering::Relaxed),
        llm_estimated_cost_cents: llm.estimated_cost_cents.load(Ordering::Relaxed),

        privacy_total: privacy.total.load(Ordering::Relaxed),
        privacy_local: privacy.local.load(Ordering::Relaxed),
        privacy_external: privacy.external.load(Ordering::Relaxed),
        privacy_filtered: privacy.filtered.load(Ordering::Relaxed),
        privacy_compliance_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn snapshot_reflects_orchestrator_counters() {
        let orch = OrchestratorCounters::new();
        orch.messages_ingested.fetch_add(3, Ordering::Relaxed);
        orch.ai_responses_generated.fetch_add(1, Ordering::Relaxed);
        let llm = UsageCounters::default();
        let privacy = PrivacyCounters::default();
        let snap = snapshot(&orch, &llm, &privacy, 80.0);
        assert_eq!(snap.messages_ingested, 3);
        assert_eq!(snap.ai_responses_generated, 1);
        assert_eq!(snap.privacy_compliance_score, 80.0);
    }
}
