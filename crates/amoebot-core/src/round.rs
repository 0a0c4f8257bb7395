//! Round orchestration: the synchronous activation cycle.
//!
//! One round is a transaction. The phase machine runs
//! `Idle → MoveActivation → MoveResolution → InterPhase → BeepActivation →
//! BeepResolution → Finalize → Idle`; any conflict along the way branches to
//! `RollingBack`, which restores the previous committed round exactly and
//! reports the conflict in the returned [`RoundOutcome`].
//!
//! Time is kept by two counters. `current` steps past `committed` before the
//! first activation, so every write made during the round lands on a round
//! that, for readers, does not exist yet: a particle reads its own state at
//! `current` (seeing its writes) and its neighbors' at `committed`. Commit
//! is then a single counter step at Finalize; rollback cuts every history
//! back to the markers synced at round start.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithm::ParticleHandle;
use crate::circuits;
use crate::error::{Conflict, RoundOutcome};
use crate::grid::MAX_LABELS;
use crate::history::Round;
use crate::id::ParticleId;
use crate::movement;
use crate::system::ParticleSystem;

// ---------------------------------------------------------------------------
// Phases and the round clock
// ---------------------------------------------------------------------------

/// Where within the round cycle the engine currently is.
///
/// Between rounds the system always reads [`Phase::Idle`]. The other phases
/// are observable only from inside activation callbacks, where they gate
/// which handle calls are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    MoveActivation,
    MoveResolution,
    InterPhase,
    BeepActivation,
    BeepResolution,
    Finalize,
    RollingBack,
}

/// The two round counters driving the snapshot illusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundClock {
    /// The round being built; equals `committed` between rounds.
    pub(crate) current: Round,
    /// The last fully committed round.
    pub(crate) committed: Round,
}

impl RoundClock {
    pub fn current(&self) -> Round {
        self.current
    }

    pub fn committed(&self) -> Round {
        self.committed
    }
}

/// A particle activation order that is not a permutation of the system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("activation order lists {got} particles, the system has {expected}")]
    WrongLength { got: usize, expected: usize },

    #[error("activation order repeats or does not know {particle:?}")]
    NotAPermutation { particle: ParticleId },
}

// ---------------------------------------------------------------------------
// The round driver
// ---------------------------------------------------------------------------

impl ParticleSystem {
    /// Simulates one full round, activating particles in creation order.
    ///
    /// Never fails: a conflicted round rolls back completely and reports
    /// itself through [`RoundOutcome::Rejected`].
    pub fn simulate_round(&mut self) -> RoundOutcome {
        let order: Vec<ParticleId> = self.particles.keys().collect();
        self.run_round(&order)
    }

    /// Simulates one round with an explicit activation order.
    ///
    /// The order must name every particle exactly once. Committed results do
    /// not depend on the permutation; this entry point exists so that can be
    /// tested directly.
    pub fn simulate_round_with_order(
        &mut self,
        order: &[ParticleId],
    ) -> Result<RoundOutcome, OrderError> {
        if order.len() != self.particles.len() {
            return Err(OrderError::WrongLength {
                got: order.len(),
                expected: self.particles.len(),
            });
        }
        let mut seen = std::collections::HashSet::with_capacity(order.len());
        for &id in order {
            if !self.particles.contains_key(id) || !seen.insert(id) {
                return Err(OrderError::NotAPermutation { particle: id });
            }
        }
        Ok(self.run_round(order))
    }

    fn run_round(&mut self, order: &[ParticleId]) -> RoundOutcome {
        let round = self.clock.committed + 1;
        self.clock.current = round;
        // The markers frame the state every history returns to on rollback.
        self.sync_markers();

        self.phase = Phase::MoveActivation;
        if let Err(conflict) = self.activate_all(order) {
            return self.roll_back(round, conflict);
        }
        self.phase = Phase::MoveResolution;
        if let Err(conflict) = movement::resolve_and_commit(self) {
            return self.roll_back(round, conflict);
        }

        // Movement intents are spent. Dropping them here keeps bond reads in
        // the beep half from aliasing the relabeled boundary.
        self.phase = Phase::InterPhase;
        for (_, particle) in &mut self.particles {
            particle.scratch.move_intent = None;
            particle.scratch.bond_intents = [None; MAX_LABELS];
            particle.scratch.automatic_intent = None;
        }

        self.phase = Phase::BeepActivation;
        if let Err(conflict) = self.activate_all(order) {
            return self.roll_back(round, conflict);
        }
        self.phase = Phase::BeepResolution;
        circuits::resolve_and_commit(self);

        self.phase = Phase::Finalize;
        for (_, particle) in &mut self.particles {
            particle.clear_scratch();
        }
        self.clock.committed = round;
        self.sync_markers();
        self.terminated = self.all_finished();
        self.phase = Phase::Idle;
        log::debug!("round {round} committed, terminated={}", self.terminated);
        RoundOutcome::Committed { round }
    }

    /// Runs the current phase's callback once per particle, in order.
    fn activate_all(&mut self, order: &[ParticleId]) -> Result<(), Conflict> {
        for &id in order {
            self.particles[id].scratch.active = true;
            let mut handle = ParticleHandle {
                particles: &mut self.particles,
                position_index: &self.position_index,
                pins_per_edge: self.pins_per_edge,
                clock: self.clock,
                phase: self.phase,
                id,
            };
            let result = match self.phase {
                Phase::MoveActivation => self.algorithm.activate_move(&mut handle),
                Phase::BeepActivation => self.algorithm.activate_beep(&mut handle),
                phase => unreachable!("activation loop entered in phase {phase:?}"),
            };
            self.particles[id].scratch.active = false;
            result.map_err(|source| Conflict::Algorithm { particle: id, source })?;
        }
        Ok(())
    }

    fn sync_markers(&mut self) {
        let committed = self.clock.committed;
        for (_, particle) in &mut self.particles {
            particle.sync_markers(committed);
        }
        for (_, object) in &mut self.objects {
            object.sync_marker(committed);
        }
    }

    /// Restores the last committed round exactly and reports the conflict.
    fn roll_back(&mut self, round: Round, conflict: Conflict) -> RoundOutcome {
        self.phase = Phase::RollingBack;
        for (_, particle) in &mut self.particles {
            particle.clear_scratch();
            particle.cut_at_markers();
        }
        for (_, object) in &mut self.objects {
            object.cut_at_marker();
        }
        self.rebuild_position_index();
        self.clock.current = self.clock.committed;
        self.phase = Phase::Idle;
        log::warn!("round {round} rolled back: {conflict}");
        RoundOutcome::Rejected { round, conflict }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
