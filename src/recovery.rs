// src/recovery.rs
//
// Per-instrument sequencing and snapshot recovery. Entries inside one
// incremental message share a single rpt_seq, so Normal must accept a repeat
// of the last applied sequence without calling it a gap; only a strictly
// greater-than-expected sequence trips the state machine. Recovery is
// snapshot-driven: once a gap is seen, incrementals for that instrument are
// dropped until a snapshot resyncs the book. Instruments are independent of
// each other.

use hashbrown::HashMap;
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Applying incrementals in sequence.
    Normal,
    /// Gap seen; incrementals dropped until a snapshot arrives.
    GapDetected,
    /// Snapshot accepted, waiting for the book swap to complete.
    Recovering,
}

#[derive(Debug, Clone)]
pub struct SecurityRecovery {
    pub state: RecoveryState,
    /// Next rpt_seq expected while Normal.
    pub expected_rpt_seq: u32,
    /// Highest rpt_seq applied to the book.
    pub last_good_rpt_seq: u32,
    /// rpt_seq of the snapshot being awaited/applied.
    pub snapshot_rpt_seq: u32,
    /// Monotonic time the gap was first noticed; 0 when none.
    pub gap_first_seen_ns: u64,
    pub recovery_attempts: u32,
}

impl SecurityRecovery {
    fn with_seq(initial_seq: u32) -> Self {
        Self {
            state: RecoveryState::Normal,
            expected_rpt_seq: initial_seq,
            last_good_rpt_seq: initial_seq.saturating_sub(1),
            snapshot_rpt_seq: 0,
            gap_first_seen_ns: 0,
            recovery_attempts: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryStats {
    pub gaps_detected: u64,
    pub recoveries_completed: u64,
    pub messages_dropped: u64,
}

/// Tracks recovery state for every instrument seen on the feed.
#[derive(Debug, Default)]
pub struct RecoveryManager {
    states: HashMap<u32, SecurityRecovery>,
    stats: RecoveryStats,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an instrument at `initial_seq` (used for security definitions).
    /// A record that already exists keeps its sequencing.
    pub fn ensure_security(&mut self, security_id: u32, initial_seq: u32) {
        self.states
            .entry(security_id)
            .or_insert_with(|| SecurityRecovery::with_seq(initial_seq));
    }

    /// Gates one incremental entry. Returns true when the entry should be
    /// applied to the book.
    pub fn on_incremental(&mut self, security_id: u32, rpt_seq: u32, now_ns: u64) -> bool {
        let state = match self.states.get_mut(&security_id) {
            Some(s) => s,
            None => {
                // First sight: adopt the stream where it is.
                self.states
                    .insert(security_id, SecurityRecovery::with_seq(rpt_seq + 1));
                return true;
            }
        };

        match state.state {
            RecoveryState::Normal => {
                if rpt_seq == state.last_good_rpt_seq {
                    // Another entry from the same batch.
                    true
                } else if rpt_seq > state.last_good_rpt_seq && rpt_seq <= state.expected_rpt_seq {
                    state.last_good_rpt_seq = rpt_seq;
                    state.expected_rpt_seq = rpt_seq + 1;
                    true
                } else if rpt_seq < state.last_good_rpt_seq {
                    self.stats.messages_dropped += 1;
                    false
                } else {
                    state.state = RecoveryState::GapDetected;
                    state.gap_first_seen_ns = now_ns;
                    state.recovery_attempts += 1;
                    self.stats.gaps_detected += 1;
                    false
                }
            }
            RecoveryState::GapDetected | RecoveryState::Recovering => {
                self.stats.messages_dropped += 1;
                false
            }
        }
    }

    /// Gates one snapshot message. Returns true when the snapshot should be
    /// applied to the book (the caller then finishes with
    /// [`complete_recovery`](Self::complete_recovery)).
    pub fn on_snapshot(
        &mut self,
        security_id: u32,
        snapshot_rpt_seq: u32,
        _last_incr_seq: u32,
    ) -> bool {
        let state = match self.states.get_mut(&security_id) {
            Some(s) => s,
            None => {
                // Unknown instrument: bootstrap straight from the snapshot.
                self.states.insert(
                    security_id,
                    SecurityRecovery::with_seq(snapshot_rpt_seq + 1),
                );
                return true;
            }
        };

        match state.state {
            // Up to date; the snapshot carries nothing newer than the book.
            RecoveryState::Normal => false,
            RecoveryState::GapDetected => {
                state.state = RecoveryState::Recovering;
                state.snapshot_rpt_seq = snapshot_rpt_seq;
                true
            }
            RecoveryState::Recovering => {
                if snapshot_rpt_seq > state.snapshot_rpt_seq {
                    state.snapshot_rpt_seq = snapshot_rpt_seq;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Called after the book has been replaced by a snapshot at `rpt_seq`;
    /// resumes incremental processing from there.
    pub fn complete_recovery(&mut self, security_id: u32, rpt_seq: u32) {
        if let Some(state) = self.states.get_mut(&security_id) {
            state.state = RecoveryState::Normal;
            state.expected_rpt_seq = rpt_seq + 1;
            state.last_good_rpt_seq = rpt_seq;
            state.gap_first_seen_ns = 0;
            self.stats.recoveries_completed += 1;
        }
    }

    /// Channel reset: every instrument back to Normal expecting sequence 1.
    pub fn reset_all(&mut self) {
        for state in self.states.values_mut() {
            *state = SecurityRecovery::with_seq(1);
        }
    }

    /// True when any instrument is off the happy path; snapshot datagrams
    /// are worth parsing only then.
    pub fn needs_recovery(&self) -> bool {
        self.states
            .values()
            .any(|s| s.state != RecoveryState::Normal)
    }

    pub fn recovering_securities(&self) -> SmallVec<[u32; 8]> {
        self.states
            .iter()
            .filter(|(_, s)| s.state != RecoveryState::Normal)
            .map(|(&id, _)| id)
            .collect()
    }

    pub fn state(&self, security_id: u32) -> RecoveryState {
        self.states
            .get(&security_id)
            .map_or(RecoveryState::Normal, |s| s.state)
    }

    pub fn expected_rpt_seq(&self, security_id: u32) -> u32 {
        self.states
            .get(&security_id)
            .map_or(1, |s| s.expected_rpt_seq)
    }

    pub fn last_good_rpt_seq(&self, security_id: u32) -> u32 {
        self.states
            .get(&security_id)
            .map_or(0, |s| s.last_good_rpt_seq)
    }

    /// Sweeps instruments stuck outside Normal. An instrument whose gap has
    /// been open longer than `timeout_ns` is reported, its attempt counter
    /// bumped and its clock re-armed; it keeps waiting for the next snapshot.
    pub fn check_timeouts(&mut self, now_ns: u64, timeout_ns: u64) -> SmallVec<[u32; 8]> {
        let mut timed_out = SmallVec::new();
        for (&id, state) in self.states.iter_mut() {
            if state.state == RecoveryState::Normal {
                continue;
            }
            if state.gap_first_seen_ns == 0 {
                state.gap_first_seen_ns = now_ns;
            } else if now_ns - state.gap_first_seen_ns > timeout_ns {
                timed_out.push(id);
                state.recovery_attempts += 1;
                state.gap_first_seen_ns = now_ns;
            }
        }
        timed_out
    }

    #[inline]
    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    #[cfg(test)]
    pub fn record(&self, security_id: u32) -> Option<&SecurityRecovery> {
        self.states.get(&security_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: u32 = 1001;

    #[test]
    fn first_sight_adopts_the_stream() {
        let mut mgr = RecoveryManager::new();
        assert!(mgr.on_incremental(ID, 5, 0));
        assert_eq!(mgr.state(ID), RecoveryState::Normal);
        assert_eq!(mgr.last_good_rpt_seq(ID), 5);
        assert_eq!(mgr.expected_rpt_seq(ID), 6);
    }

    #[test]
    fn repeated_rpt_seq_is_idempotent() {
        let mut mgr = RecoveryManager::new();
        // Two entries from the same message share rpt_seq.
        assert!(mgr.on_incremental(ID, 1, 0));
        assert!(mgr.on_incremental(ID, 1, 0));
        assert_eq!(mgr.last_good_rpt_seq(ID), 1);
        assert_eq!(mgr.expected_rpt_seq(ID), 2);
        assert_eq!(mgr.stats().gaps_detected, 0);

        assert!(mgr.on_incremental(ID, 2, 0));
        assert!(mgr.on_incremental(ID, 2, 0));
        assert_eq!(mgr.expected_rpt_seq(ID), 3);
    }

    #[test]
    fn stale_sequence_dropped() {
        let mut mgr = RecoveryManager::new();
        assert!(mgr.on_incremental(ID, 5, 0));
        assert!(!mgr.on_incremental(ID, 3, 0));
        assert_eq!(mgr.state(ID), RecoveryState::Normal);
        assert_eq!(mgr.stats().messages_dropped, 1);
    }

    #[test]
    fn gap_trips_the_state_machine() {
        let mut mgr = RecoveryManager::new();
        for seq in 1..=5 {
            assert!(mgr.on_incremental(ID, seq, 0));
        }
        // Jump to 7: 6 went missing.
        assert!(!mgr.on_incremental(ID, 7, 1_000));
        assert_eq!(mgr.state(ID), RecoveryState::GapDetected);
        assert_eq!(mgr.stats().gaps_detected, 1);
        assert_eq!(mgr.record(ID).unwrap().gap_first_seen_ns, 1_000);

        // Everything is dropped while gapped.
        assert!(!mgr.on_incremental(ID, 8, 0));
        assert!(!mgr.on_incremental(ID, 9, 0));
        assert_eq!(mgr.stats().messages_dropped, 2);
        assert!(mgr.needs_recovery());
    }

    #[test]
    fn snapshot_completes_recovery() {
        let mut mgr = RecoveryManager::new();
        for seq in 1..=5 {
            mgr.on_incremental(ID, seq, 0);
        }
        mgr.on_incremental(ID, 7, 0);
        assert_eq!(mgr.state(ID), RecoveryState::GapDetected);

        assert!(mgr.on_snapshot(ID, 10, 9));
        assert_eq!(mgr.state(ID), RecoveryState::Recovering);

        mgr.complete_recovery(ID, 10);
        assert_eq!(mgr.state(ID), RecoveryState::Normal);
        assert_eq!(mgr.expected_rpt_seq(ID), 11);
        assert_eq!(mgr.last_good_rpt_seq(ID), 10);
        assert_eq!(mgr.stats().recoveries_completed, 1);
        assert!(!mgr.needs_recovery());

        // Incrementals resume from the snapshot point.
        assert!(mgr.on_incremental(ID, 11, 0));
    }

    #[test]
    fn snapshot_in_normal_is_discarded() {
        let mut mgr = RecoveryManager::new();
        mgr.on_incremental(ID, 5, 0);
        assert!(!mgr.on_snapshot(ID, 99, 98));
        assert_eq!(mgr.state(ID), RecoveryState::Normal);
        assert_eq!(mgr.expected_rpt_seq(ID), 6);
    }

    #[test]
    fn snapshot_for_unknown_instrument_bootstraps() {
        let mut mgr = RecoveryManager::new();
        assert!(mgr.on_snapshot(ID, 20, 19));
        assert_eq!(mgr.state(ID), RecoveryState::Normal);
        assert_eq!(mgr.expected_rpt_seq(ID), 21);
    }

    #[test]
    fn fresher_snapshot_refreshes_recovering() {
        let mut mgr = RecoveryManager::new();
        mgr.on_incremental(ID, 1, 0);
        mgr.on_incremental(ID, 5, 0); // gap
        assert!(mgr.on_snapshot(ID, 10, 9));
        assert_eq!(mgr.state(ID), RecoveryState::Recovering);

        // Stale or equal snapshots are ignored; newer ones refresh.
        assert!(!mgr.on_snapshot(ID, 10, 9));
        assert!(!mgr.on_snapshot(ID, 8, 7));
        assert!(mgr.on_snapshot(ID, 12, 11));
        assert_eq!(mgr.record(ID).unwrap().snapshot_rpt_seq, 12);
    }

    #[test]
    fn channel_reset_rearms_everything() {
        let mut mgr = RecoveryManager::new();
        mgr.on_incremental(1001, 5, 0);
        mgr.on_incremental(1002, 3, 0);
        mgr.on_incremental(1002, 9, 0); // 1002 gapped

        mgr.reset_all();
        for id in [1001, 1002] {
            assert_eq!(mgr.state(id), RecoveryState::Normal);
            assert_eq!(mgr.expected_rpt_seq(id), 1);
            assert_eq!(mgr.last_good_rpt_seq(id), 0);
        }
        assert!(!mgr.needs_recovery());
    }

    #[test]
    fn instruments_recover_independently() {
        let mut mgr = RecoveryManager::new();
        mgr.on_incremental(1001, 1, 0);
        mgr.on_incremental(1002, 1, 0);
        mgr.on_incremental(1001, 5, 0); // 1001 gapped

        assert_eq!(mgr.state(1001), RecoveryState::GapDetected);
        assert_eq!(mgr.state(1002), RecoveryState::Normal);
        assert!(mgr.on_incremental(1002, 2, 0));
        assert_eq!(mgr.recovering_securities().as_slice(), &[1001]);
    }

    #[test]
    fn timeout_sweep_reports_and_rearms() {
        let mut mgr = RecoveryManager::new();
        mgr.on_incremental(ID, 1, 0);
        mgr.on_incremental(ID, 5, 1_000); // gap at t=1000

        let timeout = 5_000_000_000;
        assert!(mgr.check_timeouts(2_000, timeout).is_empty());

        let timed_out = mgr.check_timeouts(1_000 + timeout + 1, timeout);
        assert_eq!(timed_out.as_slice(), &[ID]);
        // Clock re-armed; still waiting in GapDetected.
        assert_eq!(mgr.state(ID), RecoveryState::GapDetected);
        let again = mgr.check_timeouts(1_000 + timeout + 2, timeout);
        assert!(again.is_empty());
    }

    #[test]
    fn sweep_arms_clock_when_unset() {
        let mut mgr = RecoveryManager::new();
        mgr.on_incremental(ID, 1, 0);
        mgr.on_incremental(ID, 5, 0); // gap with now=0 leaves clock unset
        assert_eq!(mgr.record(ID).unwrap().gap_first_seen_ns, 0);

        mgr.check_timeouts(42, 5_000_000_000);
        assert_eq!(mgr.record(ID).unwrap().gap_first_seen_ns, 42);
    }
}
