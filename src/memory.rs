//! # Conversation memory (C9)
//!
//! A bounded per-channel recency buffer: at most `K` (default 20) recent
//! message records per channel, oldest evicted first. Backed by `dashmap` for
//! per-key mutual exclusion rather than one lock around a single `HashMap`,
//! the same pattern this pack's `omni-vector`/`omni-memory` crates and the
//! `vyotiq-agent` embedder use for shared concurrent maps.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::store::Record;

pub const DEFAULT_CAPACITY: usize = 20;

pub struct ConversationMemory {
    capacity: usize,
    channels: DashMap<String, VecDeque<Record>>,
}

impl ConversationMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: DashMap::new(),
        }
    }

    /// Append `record` to `channel`'s buffer, evicting the oldest entry if
    /// the buffer is already at capacity.
    pub fn record(&self, channel: &str, record: Record) {
        let mut buf = self.channels.entry(channel.to_string()).or_default();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(record);
    }

    /// Snapshot of the most recent records for `channel`, oldest first.
    pub fn recent(&self, channel: &str) -> Vec<Record> {
        self.channels
            .get(channel)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvcodec::MetaRecord;

    fn rec(id: &str) -> Record {
        Record {
            id: id.to_string(),
            vector: vec![1.0],
            metadata: MetaRecord::new(),
        }
    }

    #[test]
    fn recency_buffer_evicts_oldest_on_overflow() {
        let mem = ConversationMemory::new(2);
        mem.record("C1", rec("a"));
        mem.record("C1", rec("b"));
        mem.record("C1", rec("c"));
        let recent = mem.recent("C1");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "b");
        assert_eq!(recent[1].id, "c");
    }

    #[test]
    fn channels_are_independent() {
        let mem = ConversationMemory::new(20);
        mem.record("C1", rec("a"));
        mem.record("C2", rec("b"));
        assert_eq!(mem.recent("C1").len(), 1);
        assert_eq!(mem.recent("C2").len(), 1);
    }

    #[test]
    fn unknown_channel_yields_empty_snapshot() {
        let mem = ConversationMemory::new(20);
        assert!(mem.recent("nope").is_empty());
    }
}
