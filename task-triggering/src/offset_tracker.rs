//! Per-partition bookkeeping of polled-vs-completed offsets.
//!
//! Tasks polled from a partition may finish processing in any order; the
//! consumer may only ever commit a contiguous prefix of what it polled, so
//! completions have to accumulate until they reach the head of what's still
//! outstanding before they can be staged for commit.
//!
//! A bucket can be subscribed to more than one topic at once — the base
//! trigger topic plus any `trigger_topic_aliases` — so bookkeeping is keyed
//! by `(topic, partition)` rather than partition alone: two different
//! topics can otherwise share a partition number and have their offsets
//! conflated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub type PartitionId = i32;
pub type MessageOffset = i64;
pub type TopicPartition = (String, PartitionId);

#[derive(Default)]
struct PartitionState {
    /// Offsets observed but not yet acknowledged, in ascending order.
    polled: BTreeSet<MessageOffset>,
    /// Offsets whose processing finished but which aren't yet at the head
    /// of `polled`. Always a subset of `polled`.
    completed: BTreeSet<MessageOffset>,
}

#[derive(Default)]
struct State {
    partitions: HashMap<TopicPartition, PartitionState>,
    offsets_to_be_committed: BTreeMap<TopicPartition, MessageOffset>,
}

/// One instance per [`crate::bucket::ConsumerBucket`]; a single mutex
/// guards `polled`, `completed`, and the commit staging map together, since
/// both the poll loop and the completion callback path touch all three.
pub struct OffsetTracker {
    state: Mutex<State>,
    already_committed_occurrences: AtomicU64,
}

impl Default for OffsetTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            already_committed_occurrences: AtomicU64::new(0),
        }
    }

    /// Record that `offset` was just polled from `(topic, partition)`. Also
    /// removes it from `completed`, defensively: a rebalance can redeliver a
    /// message whose earlier copy we already finished processing.
    pub fn register_polled(&self, topic: impl Into<String>, partition: PartitionId, offset: MessageOffset) {
        let mut state = self.state.lock().expect("offset tracker mutex poisoned");
        let partition_state = state.partitions.entry((topic.into(), partition)).or_default();
        partition_state.completed.remove(&offset);
        partition_state.polled.insert(offset);
    }

    /// Mark `offset` as done. If it's at the head of `polled`, drains every
    /// contiguous completed offset from the head, staging `head + 1` as the
    /// next commitable offset for `(topic, partition)` each time the head
    /// advances — the committed value is always the offset of the next
    /// message to read.
    ///
    /// A release for an offset no longer tracked (already drained, or never
    /// registered — both are possible after a rebalance redelivers a
    /// message we already committed past) is a no-op, counted via
    /// [`Self::already_committed_occurrences`].
    pub fn release_completed(&self, topic: &str, partition: PartitionId, offset: MessageOffset) {
        let mut state = self.state.lock().expect("offset tracker mutex poisoned");
        let State {
            partitions,
            offsets_to_be_committed,
        } = &mut *state;

        let key = (topic.to_string(), partition);
        let Some(partition_state) = partitions.get_mut(&key) else {
            self.already_committed_occurrences.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if !partition_state.polled.contains(&offset) {
            self.already_committed_occurrences.fetch_add(1, Ordering::Relaxed);
            return;
        }

        partition_state.completed.insert(offset);

        while let Some(&head) = partition_state.polled.iter().next() {
            if !partition_state.completed.remove(&head) {
                break;
            }
            partition_state.polled.remove(&head);
            offsets_to_be_committed.insert(key.clone(), head + 1);
        }
    }

    /// Atomically remove and return every staged commit. Safe to call even
    /// when nothing is staged; returns an empty map. Overwrites within the
    /// staging map are safe because commits are monotonic per partition.
    pub fn drain_commitable(&self) -> BTreeMap<TopicPartition, MessageOffset> {
        let mut state = self.state.lock().expect("offset tracker mutex poisoned");
        std::mem::take(&mut state.offsets_to_be_committed)
    }

    /// Number of outstanding (polled, not yet committed) offsets across all
    /// partitions — the `offsets` gauge exposed by the bucket.
    pub fn outstanding_count(&self) -> usize {
        let state = self.state.lock().expect("offset tracker mutex poisoned");
        state.partitions.values().map(|p| p.polled.len()).sum()
    }

    /// Number of offsets currently staged for commit but not yet drained —
    /// the `offsetsToBeCommitted` gauge.
    pub fn staged_commit_count(&self) -> usize {
        let state = self.state.lock().expect("offset tracker mutex poisoned");
        state.offsets_to_be_committed.len()
    }

    /// Number of offsets marked completed but still sitting behind an
    /// in-flight predecessor, across all partitions — the
    /// `offsetsCompleted` gauge.
    pub fn completed_not_yet_staged_count(&self) -> usize {
        let state = self.state.lock().expect("offset tracker mutex poisoned");
        state.partitions.values().map(|p| p.completed.len()).sum()
    }

    pub fn already_committed_occurrences(&self) -> u64 {
        self.already_committed_occurrences.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Poll [10,11,12], complete 11, 12, 10 in that order. Only completing
    /// 10 (the head) should stage a commit, and exactly one.
    #[test]
    fn out_of_order_completion_stages_single_commit() {
        let tracker = OffsetTracker::new();
        for offset in [10, 11, 12] {
            tracker.register_polled("t", 0, offset);
        }

        tracker.release_completed("t", 0, 11);
        assert!(tracker.drain_commitable().is_empty());

        tracker.release_completed("t", 0, 12);
        assert!(tracker.drain_commitable().is_empty());

        tracker.release_completed("t", 0, 10);
        let staged = tracker.drain_commitable();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged.get(&("t".to_string(), 0)), Some(&13));
    }

    #[test]
    fn drain_is_empty_after_being_drained_once() {
        let tracker = OffsetTracker::new();
        tracker.register_polled("t", 0, 5);
        tracker.release_completed("t", 0, 5);
        assert_eq!(tracker.drain_commitable().get(&("t".to_string(), 0)), Some(&6));
        assert!(tracker.drain_commitable().is_empty());
    }

    #[test]
    fn completion_of_unknown_offset_is_a_counted_no_op() {
        let tracker = OffsetTracker::new();
        tracker.release_completed("t", 0, 99);
        assert!(tracker.drain_commitable().is_empty());
        assert_eq!(tracker.already_committed_occurrences(), 1);
    }

    #[test]
    fn redelivery_after_rebalance_clears_stale_completed_entry() {
        let tracker = OffsetTracker::new();
        tracker.register_polled("t", 0, 1);
        tracker.release_completed("t", 0, 1);
        assert_eq!(tracker.drain_commitable().get(&("t".to_string(), 0)), Some(&2));

        // Rebalance redelivers offset 1; registering it again must not let a
        // stale "completed" entry immediately re-stage a commit.
        tracker.register_polled("t", 0, 1);
        assert!(tracker.drain_commitable().is_empty());
        tracker.release_completed("t", 0, 1);
        assert_eq!(tracker.drain_commitable().get(&("t".to_string(), 0)), Some(&2));
    }

    #[test]
    fn independent_partitions_track_separately() {
        let tracker = OffsetTracker::new();
        tracker.register_polled("t", 0, 1);
        tracker.register_polled("t", 1, 1);
        tracker.release_completed("t", 1, 1);

        let staged = tracker.drain_commitable();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged.get(&("t".to_string(), 1)), Some(&2));
        assert_eq!(tracker.outstanding_count(), 1);
    }

    #[test]
    fn dirty_offset_never_committed_past_still_in_flight_predecessor() {
        // Invariant 2: committed offset for a partition never exceeds
        // min(polled offsets not yet completed) + 1.
        let tracker = OffsetTracker::new();
        for offset in [1, 2, 3] {
            tracker.register_polled("t", 0, offset);
        }
        tracker.release_completed("t", 0, 2);
        tracker.release_completed("t", 0, 3);
        assert!(tracker.drain_commitable().is_empty());
        assert_eq!(tracker.outstanding_count(), 3);
    }

    /// Two topics sharing partition number 0 must not have their offsets
    /// conflated, as happens when a bucket subscribes to both a base topic
    /// and a data-center alias.
    #[test]
    fn same_partition_number_on_different_topics_is_tracked_independently() {
        let tracker = OffsetTracker::new();
        tracker.register_polled("base", 0, 5);
        tracker.register_polled("dc1.base", 0, 9);

        tracker.release_completed("dc1.base", 0, 9);
        let staged = tracker.drain_commitable();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged.get(&("dc1.base".to_string(), 0)), Some(&10));
        assert_eq!(tracker.outstanding_count(), 1);

        tracker.release_completed("base", 0, 5);
        let staged = tracker.drain_commitable();
        assert_eq!(staged.get(&("base".to_string(), 0)), Some(&6));
    }
}
