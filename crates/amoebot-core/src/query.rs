//! Read-only views of the system and the timeline scrubbing API.
//!
//! Views are owned aggregates computed for one round — no references into
//! engine storage — so they can cross FFI boundaries or feed a renderer
//! while the simulation keeps running. Because every piece of particle
//! state is historied, a view can be built for any committed round, not
//! just the latest one.
//!
//! The marker API drives timeline scrubbing: the markers shared by all
//! histories select the round [`ParticleSystem::view`] reads, and
//! [`ParticleSystem::cut_at_round`] permanently rewinds the session to an
//! earlier committed round. [`ParticleSystem::shift_timescale`] rebases the
//! whole timeline, e.g. to splice a restored session behind a prefix.

use slotmap::SecondaryMap;
use std::collections::HashMap;
use thiserror::Error;

use crate::grid::{BodyPart, Direction, GridPos};
use crate::history::{HistoryError, Round};
use crate::id::{EntityId, ParticleId};
use crate::particle::Shape;
use crate::pins::{Message, PinId, Rgb};
use crate::round::RoundClock;
use crate::snapshot::AnchorRef;
use crate::system::ParticleSystem;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimelineError {
    #[error("round {round} precedes the earliest recorded round {earliest}")]
    BeforeStart { round: Round, earliest: Round },

    #[error("round {round} is past the last committed round {committed}")]
    PastCommitted { round: Round, committed: Round },

    #[error(transparent)]
    History(#[from] HistoryError),
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// One partition set of a particle's pin configuration, with the signal
/// state recorded for the viewed round.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionSetView {
    /// Member pins, ascending.
    pub pins: Vec<PinId>,
    /// Beep sent on this set in the viewed round.
    pub beep: bool,
    /// Message sent on this set in the viewed round.
    pub message: Option<Message>,
    /// Beep heard on the set's circuit (senders hear themselves).
    pub received_beep: bool,
    /// Message delivered on the set's circuit.
    pub received_message: Option<Message>,
    /// Display color of the set's circuit.
    pub color: Option<Rgb>,
}

/// One effective bond: both endpoints held it in the viewed round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondView {
    /// The node the bond leaves from.
    pub node: GridPos,
    /// The bond's direction in the global frame.
    pub direction: Direction,
}

/// An aggregated, read-only view of one particle at one round.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleView {
    /// The particle's creation index.
    pub index: usize,
    pub head: GridPos,
    /// The tail node; equals the head when contracted.
    pub tail: GridPos,
    /// Global tail-to-head direction; `None` when contracted.
    pub expansion: Option<Direction>,
    /// Verdict of the finished hook at the last evaluation. Not historied,
    /// so it reflects the latest committed state regardless of the viewed
    /// round.
    pub finished: bool,
    /// Effective bonds, one per boundary edge both sides held.
    pub bonds: Vec<BondView>,
    /// The pin configuration recorded for the viewed round.
    pub partition_sets: Vec<PartitionSetView>,
}

/// An aggregated, read-only view of one object at one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectView {
    /// The object's creation index.
    pub index: usize,
    pub nodes: Vec<GridPos>,
}

/// The whole system at one round.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemView {
    /// The round the view was computed for.
    pub round: Round,
    /// The anchor, by creation index.
    pub anchor: AnchorRef,
    /// Whether every particle's finished hook held after the last committed
    /// round. Not historied.
    pub terminated: bool,
    /// Particles in creation order.
    pub particles: Vec<ParticleView>,
    /// Objects in creation order.
    pub objects: Vec<ObjectView>,
}

// ---------------------------------------------------------------------------
// View construction
// ---------------------------------------------------------------------------

impl ParticleSystem {
    /// The whole system as of `round`.
    ///
    /// Fails with [`HistoryError::RoundOutOfRange`] if `round` precedes the
    /// earliest recorded round; rounds past the last change point clamp to
    /// the latest recorded state.
    pub fn view_at(&self, round: Round) -> Result<SystemView, HistoryError> {
        let mut shapes: SecondaryMap<ParticleId, Shape> = SecondaryMap::new();
        let mut occupied: HashMap<GridPos, EntityId> = HashMap::new();
        for (id, particle) in &self.particles {
            let shape = particle.shape_at(round)?;
            for node in shape.nodes() {
                occupied.insert(node, EntityId::Particle(id));
            }
            shapes.insert(id, shape);
        }

        let mut objects = Vec::with_capacity(self.objects.len());
        for (id, object) in &self.objects {
            let nodes = object.nodes_at(round)?;
            for &node in &nodes {
                occupied.insert(node, EntityId::Object(id));
            }
            objects.push(ObjectView { index: object.index(), nodes });
        }

        let mut particles = Vec::with_capacity(self.particles.len());
        for (id, particle) in &self.particles {
            let shape = shapes[id];
            let mut bonds = Vec::new();
            for label in shape.labels() {
                if !particle.bond_flag_at(label, round)? {
                    continue;
                }
                let (Some(node), Some(dir), Some(target)) = (
                    shape.label_node(label),
                    shape.label_dir_global(label),
                    shape.edge_target(label),
                ) else {
                    continue;
                };
                let held = match occupied.get(&target) {
                    None => false,
                    // Objects accept every bond offered to them.
                    Some(EntityId::Object(_)) => true,
                    Some(EntityId::Particle(other_id)) => {
                        let other_shape = shapes[*other_id];
                        let part = if other_shape.head == target {
                            BodyPart::Head
                        } else {
                            BodyPart::Tail
                        };
                        match other_shape.label_toward(part, dir.opposite()) {
                            Some(facing) => self.particles[*other_id].bond_flag_at(facing, round)?,
                            None => false,
                        }
                    }
                };
                if held {
                    bonds.push(BondView { node, direction: dir });
                }
            }

            let config = particle.pin_config_at(round)?;
            let partition_sets = config
                .sets()
                .iter()
                .map(|set| PartitionSetView {
                    pins: set.pins().to_vec(),
                    beep: set.beep,
                    message: set.message,
                    received_beep: set.received_beep,
                    received_message: set.received_message,
                    color: set.color,
                })
                .collect();

            particles.push(ParticleView {
                index: particle.index(),
                head: shape.head,
                tail: shape.tail(),
                expansion: shape.expansion,
                finished: particle.finished,
                bonds,
                partition_sets,
            });
        }

        let anchor = match self.anchor {
            EntityId::Particle(id) => AnchorRef::Particle(self.particles[id].index()),
            EntityId::Object(id) => AnchorRef::Object(self.objects[id].index()),
        };
        Ok(SystemView { round, anchor, terminated: self.terminated, particles, objects })
    }

    /// The system as of the marker round.
    pub fn view(&self) -> SystemView {
        match self.view_at(self.marker_round()) {
            Ok(view) => view,
            Err(err) => unreachable!("the marker round is always viewable: {err}"),
        }
    }

    // -- timeline -----------------------------------------------------------

    /// The earliest round every history in the system can answer.
    pub fn earliest_round(&self) -> Round {
        let mut earliest = 0;
        for (_, particle) in &self.particles {
            earliest = earliest.max(particle.earliest_recorded_round());
        }
        for (_, object) in &self.objects {
            earliest = earliest.max(object.origin().first_round());
        }
        earliest
    }

    /// The round of the most recent change point anywhere in the system.
    /// Quiet rounds after it are still committed; the timeline ends at
    /// [`ParticleSystem::round`].
    pub fn latest_recorded_round(&self) -> Round {
        let mut latest = 0;
        for (_, particle) in &self.particles {
            latest = latest.max(particle.latest_recorded_round());
        }
        for (_, object) in &self.objects {
            latest = latest.max(object.origin().latest_round());
        }
        latest
    }

    /// The marker round shared by every history.
    pub fn marker_round(&self) -> Round {
        if let Some(particle) = self.particles.values().next() {
            return particle.marker_round();
        }
        match self.objects.values().next() {
            Some(object) => object.origin().marker(),
            None => unreachable!("a system always holds at least one entity"),
        }
    }

    /// Moves every history marker to `round`.
    ///
    /// The round must lie between [`ParticleSystem::earliest_round`] and the
    /// last committed round.
    pub fn set_marker_round(&mut self, round: Round) -> Result<(), TimelineError> {
        let earliest = self.earliest_round();
        if round < earliest {
            return Err(TimelineError::BeforeStart { round, earliest });
        }
        let committed = self.clock.committed;
        if round > committed {
            return Err(TimelineError::PastCommitted { round, committed });
        }
        self.apply_markers(round);
        Ok(())
    }

    /// Advances the markers one round, stopping at the last committed round.
    /// Returns whether they moved.
    pub fn step_markers_forward(&mut self) -> bool {
        let marker = self.marker_round();
        if marker >= self.clock.committed {
            return false;
        }
        self.apply_markers(marker + 1);
        true
    }

    /// Moves the markers back one round, stopping at the earliest recorded
    /// round. Returns whether they moved.
    pub fn step_markers_back(&mut self) -> bool {
        let marker = self.marker_round();
        if marker <= self.earliest_round() {
            return false;
        }
        self.apply_markers(marker - 1);
        true
    }

    /// Permanently rewinds the session to `round`: discards every change
    /// point after it and makes it the last committed round. Simulation
    /// continues from there; the discarded future is unrecoverable.
    pub fn cut_at_round(&mut self, round: Round) -> Result<(), TimelineError> {
        self.set_marker_round(round)?;
        for (_, particle) in &mut self.particles {
            particle.cut_at_markers();
        }
        for (_, object) in &mut self.objects {
            object.cut_at_marker();
        }
        self.clock = RoundClock { current: round, committed: round };
        self.rebuild_position_index();
        self.terminated = self.all_finished();
        Ok(())
    }

    /// Rebases the whole timeline by `delta` rounds: every change point,
    /// every marker, and the round clock.
    ///
    /// Validates the extreme rounds first; on overflow nothing moves.
    pub fn shift_timescale(&mut self, delta: i64) -> Result<(), TimelineError> {
        let mut first = self.clock.committed;
        let mut last = self.clock.current.max(self.clock.committed);
        for (_, particle) in &self.particles {
            first = first.min(particle.first_recorded_round());
            last = last.max(particle.latest_recorded_round());
        }
        for (_, object) in &self.objects {
            first = first.min(object.origin().first_round());
            last = last.max(object.origin().latest_round());
        }
        for round in [first, last] {
            if round.checked_add_signed(delta).is_none() {
                return Err(HistoryError::TimescaleOverflow { round, delta }.into());
            }
        }

        for (_, particle) in &mut self.particles {
            particle.shift_timescale(delta);
        }
        for (_, object) in &mut self.objects {
            object.shift_timescale(delta);
        }
        self.clock.current = shift_round(self.clock.current, delta);
        self.clock.committed = shift_round(self.clock.committed, delta);
        Ok(())
    }

    fn apply_markers(&mut self, round: Round) {
        for (_, particle) in &mut self.particles {
            particle.sync_markers(round);
        }
        for (_, object) in &mut self.objects {
            object.sync_marker(round);
        }
    }
}

fn shift_round(round: Round, delta: i64) -> Round {
    match round.checked_add_signed(delta) {
        Some(shifted) => shifted,
        None => unreachable!("clock shift was not validated"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{ActionError, Algorithm, ParticleHandle};
    use crate::attribute::AttrValue;
    use crate::grid::Chirality;
    use crate::error::RoundOutcome;
    use crate::system::SystemBuilder;

    fn pos(x: i32, y: i32) -> GridPos {
        GridPos::new(x, y)
    }

    fn line(algorithm: Box<dyn Algorithm>, count: i32) -> ParticleSystem {
        let mut builder = SystemBuilder::new();
        for i in 0..count {
            builder.add_particle(pos(i, 0), Chirality::CounterClockwise, Direction::E);
        }
        builder.start(algorithm).unwrap()
    }

    // Expands east when contracted, pulls the tail in otherwise.
    #[derive(Debug)]
    struct Shuttle;

    impl Algorithm for Shuttle {
        fn name(&self) -> &str {
            "shuttle"
        }

        fn activate_move(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
            if p.is_expanded() {
                p.contract(BodyPart::Head)
            } else {
                p.expand(Direction::E)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Test 1: views reproduce every recorded round
    // -----------------------------------------------------------------------
    #[test]
    fn views_reproduce_recorded_rounds() {
        let mut system = line(Box::new(Shuttle), 1);
        assert!(system.simulate_round().is_committed());
        assert!(system.simulate_round().is_committed());

        let start = system.view_at(0).unwrap();
        assert_eq!(start.round, 0);
        assert_eq!(start.anchor, AnchorRef::Particle(0));
        assert!(!start.terminated);
        assert_eq!(start.particles.len(), 1);
        let p = &start.particles[0];
        assert_eq!((p.index, p.head, p.tail, p.expansion), (0, pos(0, 0), pos(0, 0), None));
        assert!(p.bonds.is_empty());
        assert_eq!(p.partition_sets.len(), 6);

        let mid = system.view_at(1).unwrap();
        let p = &mid.particles[0];
        assert_eq!((p.head, p.tail, p.expansion), (pos(1, 0), pos(0, 0), Some(Direction::E)));
        assert_eq!(p.partition_sets.len(), 10);

        let end = system.view_at(2).unwrap();
        let p = &end.particles[0];
        assert_eq!((p.head, p.tail, p.expansion), (pos(1, 0), pos(1, 0), None));
        assert_eq!(p.partition_sets.len(), 6);

        // Rounds past the last change point clamp to the latest state.
        let clamped = system.view_at(5).unwrap();
        assert_eq!(clamped.round, 5);
        assert_eq!(clamped.particles[0].head, pos(1, 0));
    }

    // -----------------------------------------------------------------------
    // Test 2: a bond appears only while both sides hold it
    // -----------------------------------------------------------------------
    #[test]
    fn bonds_need_both_sides() {
        // Both particles drop their east bond; the object underneath keeps
        // the structure connected.
        #[derive(Debug)]
        struct Loner;

        impl Algorithm for Loner {
            fn name(&self) -> &str {
                "loner"
            }

            fn activate_move(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
                p.schedule_bond(0, false)
            }
        }

        let mut builder = SystemBuilder::new();
        builder.add_particle(pos(0, 0), Chirality::CounterClockwise, Direction::E);
        builder.add_particle(pos(1, 0), Chirality::CounterClockwise, Direction::E);
        builder.add_object(&[pos(0, -1), pos(1, -1)]);
        let mut system = builder.start(Box::new(Loner)).unwrap();
        assert!(system.simulate_round().is_committed());

        let before = system.view_at(0).unwrap();
        assert_eq!(
            before.particles[0].bonds,
            vec![
                BondView { node: pos(0, 0), direction: Direction::E },
                BondView { node: pos(0, 0), direction: Direction::Ssw },
                BondView { node: pos(0, 0), direction: Direction::Sse },
            ]
        );
        assert_eq!(
            before.particles[1].bonds,
            vec![
                BondView { node: pos(1, 0), direction: Direction::W },
                BondView { node: pos(1, 0), direction: Direction::Ssw },
            ]
        );
        assert_eq!(before.objects.len(), 1);
        assert_eq!(before.objects[0].nodes.len(), 2);
        assert!(before.objects[0].nodes.contains(&pos(0, -1)));
        assert!(before.objects[0].nodes.contains(&pos(1, -1)));

        // After the release the particle pair is unbonded from both views,
        // while the object bonds stay.
        let after = system.view_at(1).unwrap();
        assert_eq!(
            after.particles[0].bonds,
            vec![
                BondView { node: pos(0, 0), direction: Direction::Ssw },
                BondView { node: pos(0, 0), direction: Direction::Sse },
            ]
        );
        assert_eq!(
            after.particles[1].bonds,
            vec![BondView { node: pos(1, 0), direction: Direction::Ssw }]
        );
    }

    // -----------------------------------------------------------------------
    // Test 3: the marker selects the round view() reads
    // -----------------------------------------------------------------------
    #[test]
    fn view_follows_the_markers() {
        let mut system = line(Box::new(Shuttle), 1);
        for _ in 0..3 {
            assert!(system.simulate_round().is_committed());
        }
        assert_eq!(system.marker_round(), 3);
        assert_eq!(system.view().round, 3);

        system.set_marker_round(1).unwrap();
        let view = system.view();
        assert_eq!(view.round, 1);
        assert_eq!(view.particles[0].head, pos(1, 0));
        assert_eq!(view.particles[0].expansion, Some(Direction::E));

        assert!(system.step_markers_forward());
        assert_eq!(system.view().round, 2);
        assert!(system.step_markers_forward());
        assert!(!system.step_markers_forward());
        assert_eq!(system.marker_round(), 3);

        for expected in [2, 1, 0] {
            assert!(system.step_markers_back());
            assert_eq!(system.marker_round(), expected);
        }
        assert!(!system.step_markers_back());

        let err = system.set_marker_round(9).unwrap_err();
        assert_eq!(err, TimelineError::PastCommitted { round: 9, committed: 3 });
    }

    // -----------------------------------------------------------------------
    // Test 4: cutting rewinds the session for good
    // -----------------------------------------------------------------------
    #[test]
    fn cut_rewinds_the_session() {
        let mut system = line(Box::new(Shuttle), 1);
        for _ in 0..4 {
            assert!(system.simulate_round().is_committed());
        }
        let (_, particle) = system.particle_by_index(0).unwrap();
        assert_eq!(particle.head_node(), pos(2, 0));

        system.cut_at_round(2).unwrap();
        assert_eq!(system.round(), 2);
        assert_eq!(system.marker_round(), 2);
        assert_eq!(system.latest_recorded_round(), 2);
        let (_, particle) = system.particle_by_index(0).unwrap();
        assert_eq!(particle.head_node(), pos(1, 0));
        assert!(!particle.is_expanded());
        assert_eq!(system.entity_at(pos(2, 0)), None);

        // Simulation resumes from the cut round.
        assert_eq!(system.simulate_round(), RoundOutcome::Committed { round: 3 });
        let (_, particle) = system.particle_by_index(0).unwrap();
        assert_eq!(particle.head_node(), pos(2, 0));
        assert_eq!(particle.tail_node(), pos(1, 0));

        let err = system.cut_at_round(9).unwrap_err();
        assert_eq!(err, TimelineError::PastCommitted { round: 9, committed: 3 });
    }

    // -----------------------------------------------------------------------
    // Test 5: timescale shifts rebase rounds, markers, and the clock
    // -----------------------------------------------------------------------
    #[test]
    fn shift_rebases_the_timeline() {
        let mut system = line(Box::new(Shuttle), 1);
        assert!(system.simulate_round().is_committed());
        assert!(system.simulate_round().is_committed());

        system.shift_timescale(10).unwrap();
        assert_eq!(system.round(), 12);
        assert_eq!(system.earliest_round(), 10);
        assert_eq!(system.marker_round(), 12);
        assert_eq!(system.latest_recorded_round(), 12);

        assert_eq!(system.view_at(10).unwrap().particles[0].head, pos(0, 0));
        assert_eq!(system.view_at(11).unwrap().particles[0].expansion, Some(Direction::E));
        assert!(matches!(system.view_at(9), Err(HistoryError::RoundOutOfRange { .. })));

        let err = system.set_marker_round(5).unwrap_err();
        assert_eq!(err, TimelineError::BeforeStart { round: 5, earliest: 10 });

        // An underflowing shift changes nothing.
        let err = system.shift_timescale(-11).unwrap_err();
        assert!(matches!(
            err,
            TimelineError::History(HistoryError::TimescaleOverflow { round: 10, delta: -11 })
        ));
        assert_eq!(system.round(), 12);

        system.shift_timescale(-10).unwrap();
        assert_eq!(system.round(), 2);
        assert_eq!(system.view_at(0).unwrap().particles[0].head, pos(0, 0));
    }

    // -----------------------------------------------------------------------
    // Test 6: signal state and finished verdicts reach the views
    // -----------------------------------------------------------------------
    #[test]
    fn signals_and_verdicts_in_views() {
        // Beeps on the east-edge pin every round and flags itself done after
        // the first move phase.
        #[derive(Debug)]
        struct Pinger;

        impl Algorithm for Pinger {
            fn name(&self) -> &str {
                "pinger"
            }

            fn init(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
                p.create_attr("done", AttrValue::Bool(false))
            }

            fn activate_move(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
                p.set_attr("done", AttrValue::Bool(true))
            }

            fn activate_beep(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
                p.send_beep(0)
            }

            fn is_finished(&self, p: &ParticleHandle) -> bool {
                matches!(p.attr("done"), Ok(AttrValue::Bool(true)))
            }
        }

        let mut system = line(Box::new(Pinger), 2);
        assert!(system.simulate_round().is_committed());
        assert!(system.is_terminated());

        let view = system.view_at(1).unwrap();
        assert!(view.terminated);

        // Pin 0 sits on the east edge; the west particle's beep crosses to
        // the east particle's west-edge set.
        let west = &view.particles[0];
        assert_eq!(west.partition_sets[0].pins, vec![0]);
        assert!(west.partition_sets[0].beep);
        assert!(west.partition_sets[0].received_beep);
        assert!(west.partition_sets[0].color.is_some());
        assert!(!west.partition_sets[3].received_beep);

        let east = &view.particles[1];
        assert!(east.partition_sets[0].beep);
        assert!(east.partition_sets[0].received_beep);
        assert!(!east.partition_sets[3].beep);
        assert!(east.partition_sets[3].received_beep);

        // Round 0 predates the sends; the finished flag is the live verdict
        // and ignores the viewed round.
        let start = system.view_at(0).unwrap();
        assert!(!start.particles[0].partition_sets[0].beep);
        assert!(!start.particles[0].partition_sets[0].received_beep);
        assert!(start.particles[0].partition_sets[0].color.is_none());
        assert!(start.particles[0].finished);
    }
}
