//! Slice collector
//!
//! Applies recorder messages to per-recorder state. Each recorder's state
//! sits behind its own mutex inside a `DashMap`, so messages from one
//! recorder apply in delivery order while different recorders never wait on
//! each other.
//!
//! A recorder id may be reused by a restarted process. Every listener
//! incarnation carries its own epoch, and slices and sequence numbers are
//! tracked per (recorder, epoch). Per slice the state machine is
//! `Idle -> Open -> Closed -> Merged`:
//!
//! - `METHOD_START` on an idle slice opens it
//! - `METHOD_END` on an open slice closes it and accounts its events
//! - [`SliceCollector::merge_into`] hands closed slices to the registry and
//!   keeps only their event count
//! - anything else is dropped and reported through [`SliceOutcome`]

use std::collections::HashMap;

use dashmap::DashMap;
use parking_lot::Mutex;
use tally_core::Bitmap;
use tally_durability::{CoverageData, TestCoverage, TestExit};
use tracing::{debug, info, warn};

use crate::protocol::{Envelope, ErrorInfo, Flush, MethodEnd, MethodStart, RecorderMessage};

/// Epoch of messages applied through [`SliceCollector::record`].
pub const LOCAL_EPOCH: u64 = 0;

/// Highest slot count accepted from a flush unless configured otherwise.
pub const DEFAULT_MAX_SLOTS: u32 = 1 << 22;

/// What applying one message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceOutcome {
    /// Slice opened
    Opened {
        /// Slice number
        slice: u32,
    },
    /// Slice closed and its events accounted
    Closed {
        /// Slice number
        slice: u32,
        /// Events accounted
        events: u32,
    },
    /// Hit deltas merged
    Flushed {
        /// Slots accepted
        slots: usize,
        /// Slots at or past the slot limit; dropped
        rejected: usize,
    },
    /// Start for a slice that is already open or closed; dropped
    AlreadyStarted {
        /// Slice number
        slice: u32,
    },
    /// End with no open slice; dropped
    NoOpenSlice {
        /// Slice number
        slice: u32,
    },
    /// End for a slice already closed; dropped
    AlreadyClosed {
        /// Slice number
        slice: u32,
    },
    /// Sequence number already applied in this epoch; dropped
    Duplicate {
        /// Sequence number
        sequence: u64,
    },
}

impl SliceOutcome {
    /// Returns `true` if the message changed collector state.
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            SliceOutcome::Opened { .. } | SliceOutcome::Closed { .. } | SliceOutcome::Flushed { .. }
        )
    }
}

/// A slice that has been closed but not yet merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSlice {
    /// Slice number
    pub slice: u32,
    /// Recorder type tag
    pub type_name: String,
    /// Method the slice covered
    pub method: String,
    /// Runtime test name
    pub test_name: Option<String>,
    /// Slice start (ms since epoch)
    pub start_ts: i64,
    /// Slice end (ms since epoch)
    pub end_ts: i64,
    /// Events accounted
    pub events: u32,
    /// Failure details
    pub error: Option<ErrorInfo>,
    /// Slots flushed with a non-zero delta while the slice was open
    pub hits: Bitmap,
}

impl ClosedSlice {
    /// `Failed` when the end carried error details.
    pub fn exit(&self) -> TestExit {
        if self.error.is_some() {
            TestExit::Failed
        } else {
            TestExit::Passed
        }
    }

    /// Per-test record for the registry. The method stands in for a missing
    /// test name.
    pub fn to_test_coverage(&self) -> TestCoverage {
        TestCoverage {
            test_name: self
                .test_name
                .clone()
                .unwrap_or_else(|| self.method.clone()),
            method: self.method.clone(),
            slice: self.slice,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            exit: self.exit(),
            hits: self.hits.clone(),
        }
    }
}

#[derive(Debug)]
enum SliceState {
    Open {
        type_name: String,
        start_ts: i64,
        hits: Bitmap,
    },
    Closed(ClosedSlice),
    Merged {
        events: u32,
    },
}

impl SliceState {
    fn events(&self) -> Option<u32> {
        match self {
            SliceState::Open { .. } => None,
            SliceState::Closed(c) => Some(c.events),
            SliceState::Merged { events } => Some(*events),
        }
    }
}

/// One run of a recorder: its sequence numbers and slices.
#[derive(Debug, Default)]
struct Incarnation {
    epoch: u64,
    last_sequence: u64,
    slices: HashMap<u32, SliceState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    /// Arrival order; the last one is the newest.
    incarnations: Vec<Incarnation>,
    events: u64,
    /// Hits not yet merged, per slot
    pending_hits: Vec<u64>,
    /// Hits flushed over the collector's lifetime
    flushed_hits: u64,
}

impl RecorderState {
    fn incarnation_index(&mut self, recorder: &str, epoch: u64) -> usize {
        if let Some(pos) = self.incarnations.iter().position(|i| i.epoch == epoch) {
            return pos;
        }
        if !self.incarnations.is_empty() {
            info!(
                target: "tally::recorder",
                recorder,
                epoch,
                previous = self.incarnations.len(),
                "recorder restarted under a known id"
            );
        }
        self.incarnations.push(Incarnation {
            epoch,
            ..Incarnation::default()
        });
        self.incarnations.len() - 1
    }

    fn dispatch(
        &mut self,
        recorder: &str,
        idx: usize,
        message: &RecorderMessage,
        max_slots: u32,
    ) -> SliceOutcome {
        match message {
            RecorderMessage::MethodStart(m) => self.start(recorder, idx, m),
            RecorderMessage::MethodEnd(m) => self.end(recorder, idx, m),
            RecorderMessage::Flush(m) => self.flush(recorder, idx, m, max_slots),
        }
    }

    fn start(&mut self, recorder: &str, idx: usize, m: &MethodStart) -> SliceOutcome {
        let slices = &mut self.incarnations[idx].slices;
        if slices.contains_key(&m.slice) {
            debug!(
                target: "tally::recorder",
                recorder,
                slice = m.slice,
                "duplicate METHOD_START dropped"
            );
            return SliceOutcome::AlreadyStarted { slice: m.slice };
        }
        slices.insert(
            m.slice,
            SliceState::Open {
                type_name: m.type_name.clone(),
                start_ts: m.start_ts,
                hits: Bitmap::new(),
            },
        );
        SliceOutcome::Opened { slice: m.slice }
    }

    fn end(&mut self, recorder: &str, idx: usize, m: &MethodEnd) -> SliceOutcome {
        let slices = &mut self.incarnations[idx].slices;
        match slices.remove(&m.slice) {
            None => {
                warn!(
                    target: "tally::recorder",
                    recorder,
                    slice = m.slice,
                    method = %m.method,
                    "METHOD_END without METHOD_START dropped"
                );
                SliceOutcome::NoOpenSlice { slice: m.slice }
            }
            Some(done @ (SliceState::Closed(_) | SliceState::Merged { .. })) => {
                slices.insert(m.slice, done);
                debug!(
                    target: "tally::recorder",
                    recorder,
                    slice = m.slice,
                    "second METHOD_END dropped"
                );
                SliceOutcome::AlreadyClosed { slice: m.slice }
            }
            Some(SliceState::Open {
                type_name,
                start_ts,
                hits,
            }) => {
                if type_name != m.type_name {
                    debug!(
                        target: "tally::recorder",
                        recorder,
                        slice = m.slice,
                        opened_as = %type_name,
                        closed_as = %m.type_name,
                        "slice closed with a different type tag"
                    );
                }
                slices.insert(
                    m.slice,
                    SliceState::Closed(ClosedSlice {
                        slice: m.slice,
                        type_name: m.type_name.clone(),
                        method: m.method.clone(),
                        test_name: m.test_name.clone(),
                        start_ts,
                        end_ts: m.end_ts,
                        events: m.event_count,
                        error: m.error.clone(),
                        hits,
                    }),
                );
                self.events += m.event_count as u64;
                SliceOutcome::Closed {
                    slice: m.slice,
                    events: m.event_count,
                }
            }
        }
    }

    fn flush(&mut self, recorder: &str, idx: usize, m: &Flush, max_slots: u32) -> SliceOutcome {
        let slices = &mut self.incarnations[idx].slices;
        let mut accepted = 0;
        let mut rejected = 0;
        for (slot, n) in &m.hits {
            if *slot >= max_slots {
                rejected += 1;
                continue;
            }
            let slot = *slot as usize;
            if slot >= self.pending_hits.len() {
                self.pending_hits.resize(slot + 1, 0);
            }
            self.pending_hits[slot] += *n as u64;
            self.flushed_hits += *n as u64;
            if *n > 0 {
                for state in slices.values_mut() {
                    if let SliceState::Open { hits, .. } = state {
                        hits.insert(slot);
                    }
                }
            }
            accepted += 1;
        }
        if rejected > 0 {
            warn!(
                target: "tally::recorder",
                recorder,
                rejected,
                max_slots,
                "flushed slots past the slot limit dropped"
            );
        }
        SliceOutcome::Flushed {
            slots: accepted,
            rejected,
        }
    }

    /// Move pending hits into `totals` and closed slices into `tests`.
    fn drain_into(&mut self, totals: &mut Vec<u64>, tests: &mut Vec<TestCoverage>) {
        if self.pending_hits.len() > totals.len() {
            totals.resize(self.pending_hits.len(), 0);
        }
        for (t, h) in totals.iter_mut().zip(self.pending_hits.drain(..)) {
            *t += h;
        }
        for incarnation in &mut self.incarnations {
            for state in incarnation.slices.values_mut() {
                if let SliceState::Closed(c) = state {
                    let events = c.events;
                    tests.push(c.to_test_coverage());
                    *state = SliceState::Merged { events };
                }
            }
        }
    }
}

/// Per-recorder totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderSummary {
    /// Recorder identity
    pub recorder_id: String,
    /// Events from closed slices
    pub events: u64,
    /// Slices closed, merged or not
    pub closed_slices: usize,
    /// Slices still open
    pub open_slices: usize,
    /// Hits flushed
    pub hits: u64,
}

/// Merges messages from any number of recorders.
#[derive(Debug)]
pub struct SliceCollector {
    recorders: DashMap<String, Mutex<RecorderState>>,
    max_slots: u32,
}

impl Default for SliceCollector {
    fn default() -> Self {
        SliceCollector {
            recorders: DashMap::new(),
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }
}

impl SliceCollector {
    /// Empty collector accepting up to [`DEFAULT_MAX_SLOTS`] slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop flushed slots at or past `max_slots`. A registry's slot count is
    /// the natural bound.
    pub fn with_max_slots(mut self, max_slots: u32) -> Self {
        self.max_slots = max_slots;
        self
    }

    /// Slot limit for flushes.
    pub fn max_slots(&self) -> u32 {
        self.max_slots
    }

    fn with_recorder<T>(&self, recorder: &str, f: impl FnOnce(&mut RecorderState) -> T) -> T {
        if let Some(state) = self.recorders.get(recorder) {
            let mut guard = state.lock();
            return f(&mut guard);
        }
        let state = self
            .recorders
            .entry(recorder.to_string())
            .or_default()
            .downgrade();
        let mut guard = state.lock();
        f(&mut guard)
    }

    /// Apply a sequenced message. Sequence numbers at or below the last one
    /// applied for the recorder's epoch are dropped, which makes retries
    /// harmless. A new epoch starts its own sequence.
    pub fn apply(&self, envelope: &Envelope) -> SliceOutcome {
        let max_slots = self.max_slots;
        let recorder = envelope.recorder_id.as_str();
        self.with_recorder(recorder, |state| {
            let idx = state.incarnation_index(recorder, envelope.epoch);
            let incarnation = &mut state.incarnations[idx];
            if envelope.sequence <= incarnation.last_sequence {
                debug!(
                    target: "tally::recorder",
                    recorder,
                    epoch = envelope.epoch,
                    sequence = envelope.sequence,
                    "duplicate delivery dropped"
                );
                return SliceOutcome::Duplicate {
                    sequence: envelope.sequence,
                };
            }
            incarnation.last_sequence = envelope.sequence;
            state.dispatch(recorder, idx, &envelope.message, max_slots)
        })
    }

    /// Apply an unsequenced message, as an in-process recorder would.
    pub fn record(&self, recorder: &str, message: &RecorderMessage) -> SliceOutcome {
        let max_slots = self.max_slots;
        self.with_recorder(recorder, |state| {
            let idx = state.incarnation_index(recorder, LOCAL_EPOCH);
            state.dispatch(recorder, idx, message, max_slots)
        })
    }

    /// Events accounted to `slice` of `recorder`, once closed. The newest
    /// incarnation that used the slice number wins.
    pub fn slice_events(&self, recorder: &str, slice: u32) -> Option<u32> {
        let state = self.recorders.get(recorder)?;
        let guard = state.lock();
        let found = guard
            .incarnations
            .iter()
            .rev()
            .find_map(|i| i.slices.get(&slice))
            .and_then(SliceState::events);
        found
    }

    /// Events accounted to `recorder`.
    pub fn recorder_events(&self, recorder: &str) -> u64 {
        self.recorders
            .get(recorder)
            .map(|s| {
                let state = s.lock();
                state.events
            })
            .unwrap_or(0)
    }

    /// Events accounted across all recorders.
    pub fn total_events(&self) -> u64 {
        self.recorders
            .iter()
            .map(|entry| {
                let state = entry.value().lock();
                state.events
            })
            .sum()
    }

    /// Closed slices of `recorder` not yet merged, oldest incarnation first
    /// and by slice number within one.
    pub fn closed_slices(&self, recorder: &str) -> Vec<ClosedSlice> {
        let Some(state) = self.recorders.get(recorder) else {
            return Vec::new();
        };
        let guard = state.lock();
        let mut out = Vec::new();
        for incarnation in &guard.incarnations {
            let mut closed: Vec<ClosedSlice> = incarnation
                .slices
                .values()
                .filter_map(|s| match s {
                    SliceState::Closed(c) => Some(c.clone()),
                    _ => None,
                })
                .collect();
            closed.sort_by_key(|c| c.slice);
            out.extend(closed);
        }
        out
    }

    /// Totals per recorder, ordered by recorder id.
    pub fn summaries(&self) -> Vec<RecorderSummary> {
        let mut out: Vec<RecorderSummary> = self
            .recorders
            .iter()
            .map(|entry| {
                let state = entry.value().lock();
                let (mut closed, mut open) = (0, 0);
                for s in state.incarnations.iter().flat_map(|i| i.slices.values()) {
                    match s {
                        SliceState::Open { .. } => open += 1,
                        _ => closed += 1,
                    }
                }
                RecorderSummary {
                    recorder_id: entry.key().clone(),
                    events: state.events,
                    closed_slices: closed,
                    open_slices: open,
                    hits: state.flushed_hits,
                }
            })
            .collect();
        out.sort_by(|a, b| a.recorder_id.cmp(&b.recorder_id));
        out
    }

    /// Hits flushed since the last merge, summed over recorders and
    /// saturating at `u32::MAX` per slot.
    pub fn hit_counts(&self) -> Vec<u32> {
        let mut totals: Vec<u64> = Vec::new();
        for entry in self.recorders.iter() {
            let state = entry.value().lock();
            if state.pending_hits.len() > totals.len() {
                totals.resize(state.pending_hits.len(), 0);
            }
            for (t, h) in totals.iter_mut().zip(&state.pending_hits) {
                *t += *h;
            }
        }
        saturate(totals)
    }

    /// Move everything collected since the last merge into `coverage`: hit
    /// counts are added and each closed slice becomes a per-test record.
    /// Merged slices keep only their event count, so merging twice never
    /// counts anything twice. Returns the number of per-test records added.
    pub fn merge_into(&self, coverage: &mut CoverageData) -> usize {
        let mut totals: Vec<u64> = Vec::new();
        let mut tests = Vec::new();
        for entry in self.recorders.iter() {
            let mut state = entry.value().lock();
            state.drain_into(&mut totals, &mut tests);
        }
        tests.sort_by(|a, b| {
            (a.start_ts, a.slice, &a.test_name).cmp(&(b.start_ts, b.slice, &b.test_name))
        });
        coverage.add_hits(&saturate(totals));
        let added = tests.len();
        coverage.per_test.extend(tests);
        added
    }
}

fn saturate(totals: Vec<u64>) -> Vec<u32> {
    totals
        .into_iter()
        .map(|t| u32::try_from(t).unwrap_or(u32::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(slice: u32) -> RecorderMessage {
        RecorderMessage::MethodStart(MethodStart {
            type_name: "X".into(),
            slice,
            start_ts: 1_000,
        })
    }

    fn end(slice: u32, count: u32) -> RecorderMessage {
        RecorderMessage::MethodEnd(MethodEnd {
            type_name: "X".into(),
            method: "m".into(),
            test_name: None,
            slice,
            end_ts: 2_000,
            event_count: count,
            error: None,
        })
    }

    fn flush(hits: Vec<(u32, u32)>) -> RecorderMessage {
        RecorderMessage::Flush(Flush { hits })
    }

    fn env(recorder: &str, epoch: u64, sequence: u64, message: RecorderMessage) -> Envelope {
        Envelope {
            recorder_id: recorder.into(),
            epoch,
            sequence,
            message,
        }
    }

    #[test]
    fn test_start_then_end_accounts_events() {
        let c = SliceCollector::new();
        assert_eq!(c.record("r", &start(1)), SliceOutcome::Opened { slice: 1 });
        assert_eq!(
            c.record("r", &end(1, 5)),
            SliceOutcome::Closed {
                slice: 1,
                events: 5
            }
        );
        assert_eq!(c.slice_events("r", 1), Some(5));
        assert_eq!(c.total_events(), 5);
    }

    #[test]
    fn test_lone_end_is_dropped() {
        let c = SliceCollector::new();
        assert_eq!(c.record("r", &end(1, 5)), SliceOutcome::NoOpenSlice { slice: 1 });
        assert_eq!(c.total_events(), 0);
        assert_eq!(c.slice_events("r", 1), None);
    }

    #[test]
    fn test_second_end_is_not_double_counted() {
        let c = SliceCollector::new();
        c.record("r", &start(1));
        c.record("r", &end(1, 5));
        assert_eq!(c.record("r", &end(1, 5)), SliceOutcome::AlreadyClosed { slice: 1 });
        assert_eq!(c.record("r", &start(1)), SliceOutcome::AlreadyStarted { slice: 1 });
        assert_eq!(c.recorder_events("r"), 5);
    }

    #[test]
    fn test_end_from_other_recorder_does_not_close() {
        let c = SliceCollector::new();
        c.record("a", &start(1));
        assert_eq!(c.record("b", &end(1, 3)), SliceOutcome::NoOpenSlice { slice: 1 });
        assert_eq!(c.summaries()[0].open_slices, 1);
    }

    #[test]
    fn test_replayed_sequence_is_dropped() {
        let c = SliceCollector::new();
        c.apply(&env("r", 7, 1, start(1)));
        c.apply(&env("r", 7, 2, end(1, 4)));
        assert_eq!(
            c.apply(&env("r", 7, 2, end(1, 4))),
            SliceOutcome::Duplicate { sequence: 2 }
        );
        assert_eq!(c.total_events(), 4);
    }

    #[test]
    fn test_restarted_recorder_starts_a_new_sequence() {
        let c = SliceCollector::new();
        c.apply(&env("shard", 1, 1, start(1)));
        c.apply(&env("shard", 1, 2, end(1, 3)));

        // Same id, new epoch, sequence numbering from 1 again.
        assert_eq!(
            c.apply(&env("shard", 2, 1, start(1))),
            SliceOutcome::Opened { slice: 1 }
        );
        assert_eq!(
            c.apply(&env("shard", 2, 2, end(1, 4))),
            SliceOutcome::Closed {
                slice: 1,
                events: 4
            }
        );
        assert_eq!(c.slice_events("shard", 1), Some(4));
        assert_eq!(c.recorder_events("shard"), 7);
        assert_eq!(c.closed_slices("shard").len(), 2);

        // Retries within the old epoch are still recognised.
        assert_eq!(
            c.apply(&env("shard", 1, 2, end(1, 3))),
            SliceOutcome::Duplicate { sequence: 2 }
        );
        assert_eq!(c.total_events(), 7);
    }

    #[test]
    fn test_end_in_other_epoch_does_not_close() {
        let c = SliceCollector::new();
        c.apply(&env("r", 1, 1, start(5)));
        assert_eq!(
            c.apply(&env("r", 2, 1, end(5, 2))),
            SliceOutcome::NoOpenSlice { slice: 5 }
        );
        assert_eq!(c.summaries()[0].open_slices, 1);
    }

    #[test]
    fn test_flush_merges_across_recorders() {
        let c = SliceCollector::new();
        c.record("a", &flush(vec![(0, 2), (3, 1)]));
        c.record("b", &flush(vec![(3, 4)]));
        assert_eq!(c.hit_counts(), vec![2, 0, 0, 5]);

        let mut cov = CoverageData::with_slots(2);
        c.merge_into(&mut cov);
        assert_eq!(cov.hits, vec![2, 0, 0, 5]);
    }

    #[test]
    fn test_flush_past_slot_limit_is_dropped() {
        let c = SliceCollector::new().with_max_slots(4);
        assert_eq!(
            c.record("r", &flush(vec![(1, 2), (u32::MAX, 1), (4, 9)])),
            SliceOutcome::Flushed {
                slots: 1,
                rejected: 2
            }
        );
        assert_eq!(c.hit_counts(), vec![0, 2]);
        assert_eq!(c.summaries()[0].hits, 2);
    }

    #[test]
    fn test_default_slot_limit_refuses_huge_slot() {
        let c = SliceCollector::new();
        assert_eq!(c.max_slots(), DEFAULT_MAX_SLOTS);
        assert_eq!(
            c.record("r", &flush(vec![(u32::MAX, 1)])),
            SliceOutcome::Flushed {
                slots: 0,
                rejected: 1
            }
        );
        assert!(c.hit_counts().is_empty());
    }

    #[test]
    fn test_closed_slices_keep_details() {
        let c = SliceCollector::new();
        c.record("r", &start(2));
        c.record(
            "r",
            &RecorderMessage::MethodEnd(MethodEnd {
                type_name: "X".into(),
                method: "BoxTest.size".into(),
                test_name: Some("size".into()),
                slice: 2,
                end_ts: 1_500,
                event_count: 9,
                error: Some(ErrorInfo {
                    message: Some("expected 1".into()),
                    stack_trace: None,
                }),
            }),
        );
        let closed = c.closed_slices("r");
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].start_ts, 1_000);
        assert_eq!(closed[0].end_ts, 1_500);
        assert_eq!(closed[0].test_name.as_deref(), Some("size"));
        assert_eq!(closed[0].exit(), TestExit::Failed);
    }

    #[test]
    fn test_flushes_are_attributed_to_open_slices() {
        let c = SliceCollector::new();
        c.record("r", &flush(vec![(0, 1)]));
        c.record("r", &start(1));
        c.record("r", &flush(vec![(2, 3), (5, 0)]));
        c.record("r", &end(1, 1));
        c.record("r", &flush(vec![(4, 1)]));

        let closed = c.closed_slices("r");
        let hit: Vec<usize> = closed[0].hits.iter().collect();
        assert_eq!(hit, vec![2]);
        assert_eq!(closed[0].exit(), TestExit::Passed);
    }

    #[test]
    fn test_merge_writes_per_test_records_once() {
        let c = SliceCollector::new();
        c.record("r", &start(1));
        c.record("r", &flush(vec![(1, 2)]));
        c.record("r", &end(1, 6));
        c.record("r", &start(2));

        let mut cov = CoverageData::with_slots(3);
        assert_eq!(c.merge_into(&mut cov), 1);
        assert_eq!(cov.hits, vec![0, 2, 0]);
        assert_eq!(cov.per_test.len(), 1);
        let test = &cov.per_test[0];
        assert_eq!(test.test_name, "m");
        assert_eq!((test.slice, test.start_ts, test.end_ts), (1, 1_000, 2_000));
        assert!(test.hits.contains(1));

        // Merged slices are released but still count as closed.
        assert!(c.closed_slices("r").is_empty());
        assert!(c.hit_counts().is_empty());
        assert_eq!(c.slice_events("r", 1), Some(6));
        assert_eq!(c.record("r", &end(1, 6)), SliceOutcome::AlreadyClosed { slice: 1 });
        let summary = &c.summaries()[0];
        assert_eq!((summary.closed_slices, summary.open_slices), (1, 1));
        assert_eq!(summary.hits, 2);

        assert_eq!(c.merge_into(&mut cov), 0);
        assert_eq!(cov.hits, vec![0, 2, 0]);
        assert_eq!(cov.per_test.len(), 1);
    }
}
