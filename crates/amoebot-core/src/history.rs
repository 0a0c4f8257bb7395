//! Run-length histories of per-round values.
//!
//! Every mutable piece of particle state is stored as a [`History`]: the
//! sequence of values it has held, keyed by the round in which each value was
//! first recorded. Storage is change-points only; recording the value a
//! history already holds costs nothing, so a long idle stretch occupies a
//! single entry.
//!
//! Design notes:
//! - Recording is append-only in round order, with one exception: recording
//!   at the most recent change point overwrites it in place. Rounds earlier
//!   than that are rejected as [`HistoryError::OutOfOrder`].
//! - Each history carries a marker round used for replay and rollback.
//!   [`History::cut_at_marker`] drops every entry after the marker, which is
//!   how a failed round is undone.
//! - Lookups clamp forward: asking for a round beyond the last change point
//!   returns the latest value, because run-length storage cannot distinguish
//!   "unchanged" from "not yet simulated". Asking for a round before the
//!   first entry is an error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A simulation round number. Round 0 is the initial configuration.
pub type Round = u64;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("cannot record at round {round}: latest change point is round {latest}")]
    OutOfOrder { round: Round, latest: Round },

    #[error("round {round} precedes the first recorded round {first}")]
    RoundOutOfRange { round: Round, first: Round },

    #[error("marker round {round} precedes the first recorded round {first}")]
    MarkerBeforeStart { round: Round, first: Round },

    #[error("shifting round {round} by {delta} leaves the valid round range")]
    TimescaleOverflow { round: Round, delta: i64 },

    #[error("history snapshot is corrupt: {0}")]
    CorruptSnapshot(String),
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// A run-length encoded timeline of values of type `T`.
///
/// Invariants: `rounds` is strictly increasing, `rounds` and `values` have
/// equal nonzero length, consecutive values differ, and the marker never
/// precedes the first round.
#[derive(Debug, Clone, PartialEq)]
pub struct History<T> {
    rounds: Vec<Round>,
    values: Vec<T>,
    marker: Round,
}

impl<T: Clone + PartialEq> History<T> {
    /// A history whose first change point is `value` at `round`. The marker
    /// starts at `round`.
    pub fn new(value: T, round: Round) -> History<T> {
        History { rounds: vec![round], values: vec![value], marker: round }
    }

    /// Records `value` at `round`.
    ///
    /// Recording past the latest change point appends a new entry only if the
    /// value actually changed. Recording at the latest change point replaces
    /// it, and drops the entry entirely if the replacement equals the value
    /// before it. Recording at any earlier round fails.
    pub fn record(&mut self, value: T, round: Round) -> Result<(), HistoryError> {
        let latest = self.latest_round();
        if round > latest {
            if *self.latest() != value {
                self.rounds.push(round);
                self.values.push(value);
            }
            Ok(())
        } else if round == latest {
            let last = self.values.len() - 1;
            if last > 0 && self.values[last - 1] == value {
                self.rounds.pop();
                self.values.pop();
            } else {
                self.values[last] = value;
            }
            Ok(())
        } else {
            Err(HistoryError::OutOfOrder { round, latest })
        }
    }

    /// The value in effect at `round`: the entry at the latest change point
    /// not after it. Rounds past the last change point yield the latest
    /// value; rounds before the first entry are out of range.
    pub fn value_at(&self, round: Round) -> Result<&T, HistoryError> {
        let idx = self.rounds.partition_point(|&r| r <= round);
        if idx == 0 {
            Err(HistoryError::RoundOutOfRange { round, first: self.first_round() })
        } else {
            Ok(&self.values[idx - 1])
        }
    }

    /// The most recently recorded value.
    pub fn latest(&self) -> &T {
        &self.values[self.values.len() - 1]
    }

    /// The round of the most recent change point.
    pub fn latest_round(&self) -> Round {
        self.rounds[self.rounds.len() - 1]
    }

    /// The round of the first change point.
    pub fn first_round(&self) -> Round {
        self.rounds[0]
    }

    /// Number of stored change points.
    pub fn change_points(&self) -> usize {
        self.rounds.len()
    }

    // -- marker -------------------------------------------------------------

    /// The current marker round.
    pub fn marker(&self) -> Round {
        self.marker
    }

    /// The value in effect at the marker.
    pub fn value_at_marker(&self) -> &T {
        // The marker never precedes the first round, so the lookup cannot
        // fail.
        match self.value_at(self.marker) {
            Ok(value) => value,
            Err(_) => unreachable!("marker precedes first round"),
        }
    }

    /// Moves the marker to `round`.
    pub fn set_marker(&mut self, round: Round) -> Result<(), HistoryError> {
        if round < self.first_round() {
            return Err(HistoryError::MarkerBeforeStart { round, first: self.first_round() });
        }
        self.marker = round;
        Ok(())
    }

    /// Advances the marker one round. Always succeeds; lookups past the last
    /// change point clamp to the latest value.
    pub fn step_forward(&mut self) -> bool {
        self.marker += 1;
        true
    }

    /// Moves the marker back one round, stopping at the first recorded round.
    pub fn step_back(&mut self) -> bool {
        if self.marker > self.first_round() {
            self.marker -= 1;
            true
        } else {
            false
        }
    }

    /// Discards every change point after the marker, restoring the history
    /// to its state as of the marker round.
    pub fn cut_at_marker(&mut self) {
        let keep = self.rounds.partition_point(|&r| r <= self.marker);
        // The marker invariant guarantees at least the first entry survives.
        self.rounds.truncate(keep);
        self.values.truncate(keep);
    }

    /// Shifts every recorded round and the marker by `delta`, e.g. to splice
    /// a saved history into a differently-aligned timeline.
    pub fn shift_timescale(&mut self, delta: i64) -> Result<(), HistoryError> {
        let shift = |round: Round| -> Result<Round, HistoryError> {
            round
                .checked_add_signed(delta)
                .ok_or(HistoryError::TimescaleOverflow { round, delta })
        };
        // Validate before mutating so a failure leaves the history intact.
        let rounds = self.rounds.iter().map(|&r| shift(r)).collect::<Result<Vec<_>, _>>()?;
        let marker = shift(self.marker)?;
        self.rounds = rounds;
        self.marker = marker;
        Ok(())
    }

    // -- snapshots ----------------------------------------------------------

    /// An owned, serializable copy of this history.
    pub fn to_snapshot(&self) -> HistorySnapshot<T> {
        HistorySnapshot {
            rounds: self.rounds.clone(),
            values: self.values.clone(),
            marker: self.marker,
        }
    }

    /// Rebuilds a history from a snapshot, re-checking every invariant.
    pub fn from_snapshot(snapshot: HistorySnapshot<T>) -> Result<History<T>, HistoryError> {
        let HistorySnapshot { rounds, values, marker } = snapshot;
        if rounds.is_empty() {
            return Err(HistoryError::CorruptSnapshot("no change points".into()));
        }
        if rounds.len() != values.len() {
            return Err(HistoryError::CorruptSnapshot(format!(
                "{} rounds but {} values",
                rounds.len(),
                values.len()
            )));
        }
        if !rounds.windows(2).all(|w| w[0] < w[1]) {
            return Err(HistoryError::CorruptSnapshot("rounds not strictly increasing".into()));
        }
        if values.windows(2).any(|w| w[0] == w[1]) {
            return Err(HistoryError::CorruptSnapshot("adjacent change points are equal".into()));
        }
        if marker < rounds[0] {
            return Err(HistoryError::CorruptSnapshot(format!(
                "marker {marker} precedes first round {}",
                rounds[0]
            )));
        }
        Ok(History { rounds, values, marker })
    }
}

/// Serializable mirror of a [`History`]. Produced by [`History::to_snapshot`]
/// and validated on restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot<T> {
    pub rounds: Vec<Round>,
    pub values: Vec<T>,
    pub marker: Round,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // Test 1: a fresh history holds its initial value everywhere after start
    // -----------------------------------------------------------------------
    #[test]
    fn fresh_history_reports_initial_value() {
        let h = History::new(7u32, 3);
        assert_eq!(h.first_round(), 3);
        assert_eq!(h.latest_round(), 3);
        assert_eq!(*h.latest(), 7);
        assert_eq!(h.value_at(3), Ok(&7));
        assert_eq!(h.value_at(100), Ok(&7));
        assert_eq!(h.marker(), 3);
        assert_eq!(
            h.value_at(2),
            Err(HistoryError::RoundOutOfRange { round: 2, first: 3 })
        );
    }

    // -----------------------------------------------------------------------
    // Test 2: unchanged values do not grow the history
    // -----------------------------------------------------------------------
    #[test]
    fn unchanged_records_are_free() {
        let mut h = History::new(1u32, 0);
        h.record(1, 1).unwrap();
        h.record(1, 2).unwrap();
        h.record(1, 50).unwrap();
        assert_eq!(h.change_points(), 1);
        h.record(2, 51).unwrap();
        assert_eq!(h.change_points(), 2);
        assert_eq!(h.value_at(50), Ok(&1));
        assert_eq!(h.value_at(51), Ok(&2));
    }

    // -----------------------------------------------------------------------
    // Test 3: lookups resolve to the latest change point not after the round
    // -----------------------------------------------------------------------
    #[test]
    fn lookup_uses_latest_change_point() {
        let mut h = History::new("a".to_string(), 0);
        h.record("b".into(), 5).unwrap();
        h.record("c".into(), 9).unwrap();
        assert_eq!(h.value_at(0).unwrap(), "a");
        assert_eq!(h.value_at(4).unwrap(), "a");
        assert_eq!(h.value_at(5).unwrap(), "b");
        assert_eq!(h.value_at(8).unwrap(), "b");
        assert_eq!(h.value_at(9).unwrap(), "c");
        assert_eq!(h.value_at(1_000).unwrap(), "c");
    }

    // -----------------------------------------------------------------------
    // Test 4: recording at the latest change point overwrites in place
    // -----------------------------------------------------------------------
    #[test]
    fn overwrite_at_latest_change_point() {
        let mut h = History::new(1u32, 0);
        h.record(2, 4).unwrap();
        h.record(3, 4).unwrap();
        assert_eq!(h.change_points(), 2);
        assert_eq!(h.value_at(4), Ok(&3));
        assert_eq!(h.value_at(3), Ok(&1));
    }

    // -----------------------------------------------------------------------
    // Test 5: overwriting back to the previous value compacts the entry away
    // -----------------------------------------------------------------------
    #[test]
    fn overwrite_compacts_redundant_entry() {
        let mut h = History::new(1u32, 0);
        h.record(2, 4).unwrap();
        h.record(1, 4).unwrap();
        assert_eq!(h.change_points(), 1);
        assert_eq!(h.value_at(4), Ok(&1));
        assert_eq!(h.latest_round(), 0);

        // Overwriting the sole entry never pops it.
        let mut solo = History::new(1u32, 0);
        solo.record(9, 0).unwrap();
        assert_eq!(solo.change_points(), 1);
        assert_eq!(*solo.latest(), 9);
    }

    // -----------------------------------------------------------------------
    // Test 6: recording before the latest change point is rejected
    // -----------------------------------------------------------------------
    #[test]
    fn out_of_order_record_is_rejected() {
        let mut h = History::new(1u32, 0);
        h.record(2, 5).unwrap();
        let err = h.record(3, 4).unwrap_err();
        assert_eq!(err, HistoryError::OutOfOrder { round: 4, latest: 5 });
        // The failed record left nothing behind.
        assert_eq!(h.change_points(), 2);
        assert_eq!(h.value_at(4), Ok(&1));
    }

    // -----------------------------------------------------------------------
    // Test 7: marker movement respects the first recorded round
    // -----------------------------------------------------------------------
    #[test]
    fn marker_movement() {
        let mut h = History::new(0u32, 2);
        assert!(h.step_forward());
        assert_eq!(h.marker(), 3);
        assert!(h.step_back());
        assert!(!h.step_back());
        assert_eq!(h.marker(), 2);
        h.set_marker(10).unwrap();
        assert_eq!(h.marker(), 10);
        let err = h.set_marker(1).unwrap_err();
        assert_eq!(err, HistoryError::MarkerBeforeStart { round: 1, first: 2 });
    }

    // -----------------------------------------------------------------------
    // Test 8: cutting at the marker rolls the timeline back
    // -----------------------------------------------------------------------
    #[test]
    fn cut_at_marker_rolls_back() {
        let mut h = History::new(1u32, 0);
        h.record(2, 3).unwrap();
        h.record(3, 7).unwrap();
        h.set_marker(3).unwrap();
        h.cut_at_marker();
        assert_eq!(h.change_points(), 2);
        assert_eq!(*h.latest(), 2);
        assert_eq!(h.latest_round(), 3);
        // Cutting exactly at a change point keeps that entry.
        h.set_marker(0).unwrap();
        h.cut_at_marker();
        assert_eq!(h.change_points(), 1);
        assert_eq!(*h.latest(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 9: timescale shifts move every round and fail atomically
    // -----------------------------------------------------------------------
    #[test]
    fn timescale_shift() {
        let mut h = History::new(1u32, 2);
        h.record(2, 5).unwrap();
        h.shift_timescale(10).unwrap();
        assert_eq!(h.first_round(), 12);
        assert_eq!(h.latest_round(), 15);
        assert_eq!(h.marker(), 12);
        h.shift_timescale(-12).unwrap();
        assert_eq!(h.first_round(), 0);

        let err = h.shift_timescale(-1).unwrap_err();
        assert!(matches!(err, HistoryError::TimescaleOverflow { round: 0, delta: -1 }));
        // The failed shift left the history untouched.
        assert_eq!(h.first_round(), 0);
        assert_eq!(h.latest_round(), 3);
    }

    // -----------------------------------------------------------------------
    // Test 10: snapshots restore exactly and reject corruption
    // -----------------------------------------------------------------------
    #[test]
    fn snapshot_round_trip_and_validation() {
        let mut h = History::new(1u32, 0);
        h.record(2, 3).unwrap();
        h.set_marker(2).unwrap();
        let restored = History::from_snapshot(h.to_snapshot()).unwrap();
        assert_eq!(restored, h);

        let mut bad = h.to_snapshot();
        bad.rounds[1] = 0;
        let err = History::from_snapshot(bad).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("strictly increasing"), "got: {msg}");

        let mut dup = h.to_snapshot();
        dup.values[1] = dup.values[0];
        assert!(History::from_snapshot(dup).is_err());

        let mut marker = h.to_snapshot();
        marker.marker = 0;
        assert!(History::from_snapshot(marker).is_ok());
        let mut shifted = History::new(1u32, 5).to_snapshot();
        shifted.marker = 4;
        assert!(History::from_snapshot(shifted).is_err());
    }
}
