//! The algorithm trait and the handle particles act through.
//!
//! An [`Algorithm`] is a stateless description of particle behavior; all
//! per-particle state lives in attributes. The engine calls the activation
//! hooks once per particle per round, passing a [`ParticleHandle`] scoped to
//! that particle.
//!
//! The handle enforces the activation model:
//! - Reads of the particle's own state see its latest values, including
//!   writes made earlier in the same activation.
//! - Reads of neighbor state see the last committed round, so activation
//!   order within a round cannot leak. Neighbor geometry (who is adjacent,
//!   which label faces back) reflects current positions, since the beep
//!   phase runs after movements take effect.
//! - Scheduling calls are phase-gated: movements and bonds during move
//!   activation, pin configurations during beep activation. Invalid calls
//!   return an [`ActionError`] without touching any state.
//!
//! Rescheduling within one activation is last-call-wins.

use std::collections::HashMap;
use std::fmt;

use slotmap::SlotMap;

use crate::attribute::{AttrValue, Attribute, is_reserved_name};
use crate::grid::{BodyPart, Direction, GridPos};
use crate::history::Round;
use crate::id::{EntityId, ParticleId};
use crate::particle::{MoveIntent, Particle};
use crate::pins::{Message, PinConfiguration, PinId};
use crate::round::{Phase, RoundClock};

// The handle's error type, re-exported so algorithm crates can import the
// whole activation vocabulary from one module.
pub use crate::error::ActionError;

// ---------------------------------------------------------------------------
// Algorithm trait
// ---------------------------------------------------------------------------

/// Behavior shared by every particle in a system.
///
/// Implementations should be cheap to call and must not keep state outside
/// the particle attributes; the engine relies on attributes being the only
/// algorithm state when it rolls a round back.
pub trait Algorithm: fmt::Debug {
    /// Stable name, recorded in snapshots to match them back up.
    fn name(&self) -> &str;

    /// Runs once per particle when the system starts. The only place
    /// attributes may be created.
    fn init(&self, particle: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
        let _ = particle;
        Ok(())
    }

    /// Movement phase activation: schedule movements and bond changes.
    fn activate_move(&self, particle: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
        let _ = particle;
        Ok(())
    }

    /// Beep phase activation: plan pin configurations and send signals.
    fn activate_beep(&self, particle: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
        let _ = particle;
        Ok(())
    }

    /// True once this particle has nothing left to do. The system terminates
    /// when every particle is finished.
    fn is_finished(&self, particle: &ParticleHandle<'_>) -> bool {
        let _ = particle;
        false
    }
}

// ---------------------------------------------------------------------------
// Particle handle
// ---------------------------------------------------------------------------

/// Access to one particle during an activation, borrowing the system's
/// storage piecewise so the algorithm object itself stays untouched.
pub struct ParticleHandle<'a> {
    pub(crate) particles: &'a mut SlotMap<ParticleId, Particle>,
    pub(crate) position_index: &'a HashMap<GridPos, EntityId>,
    pub(crate) pins_per_edge: u8,
    pub(crate) clock: RoundClock,
    pub(crate) phase: Phase,
    pub(crate) id: ParticleId,
}

impl<'a> ParticleHandle<'a> {
    fn me(&self) -> &Particle {
        &self.particles[self.id]
    }

    fn me_mut(&mut self) -> &mut Particle {
        &mut self.particles[self.id]
    }

    fn in_constructor(&self) -> bool {
        self.me().in_constructor
    }

    // -- own state ----------------------------------------------------------

    pub fn is_expanded(&self) -> bool {
        self.me().is_expanded()
    }

    /// The local tail-to-head direction, if expanded.
    pub fn expansion_direction(&self) -> Option<Direction> {
        self.me().shape().local_expansion()
    }

    /// Number of boundary-edge labels in the current state (6 or 10).
    pub fn label_count(&self) -> u8 {
        self.me().shape().label_count()
    }

    /// The bond flag currently recorded for a label.
    pub fn bond_active(&self, label: u8) -> Result<bool, ActionError> {
        self.check_label(label)?;
        Ok(self.me().bond_flag(label))
    }

    pub fn automatic_bonds(&self) -> bool {
        self.me().automatic_bonds()
    }

    // -- attributes ---------------------------------------------------------

    /// Creates an attribute. Only allowed inside [`Algorithm::init`].
    pub fn create_attr(
        &mut self,
        name: &str,
        initial: AttrValue,
    ) -> Result<(), ActionError> {
        if !self.in_constructor() {
            return Err(ActionError::AttributeOutsideConstructor { name: name.into() });
        }
        if is_reserved_name(name) {
            return Err(ActionError::ReservedAttribute { name: name.into() });
        }
        if self.me().attribute(name).is_some() {
            return Err(ActionError::DuplicateAttribute { name: name.into() });
        }
        let round = self.clock.committed;
        self.me_mut()
            .attributes
            .push(Attribute::new(name, initial, round));
        Ok(())
    }

    /// The particle's own latest value of an attribute, including writes
    /// made earlier in this activation.
    pub fn attr(&self, name: &str) -> Result<AttrValue, ActionError> {
        self.me()
            .attribute(name)
            .map(|a| a.latest().clone())
            .ok_or_else(|| ActionError::NoSuchAttribute { name: name.into() })
    }

    /// Writes an attribute, recorded at the round in flight.
    pub fn set_attr(&mut self, name: &str, value: AttrValue) -> Result<(), ActionError> {
        if !self.in_constructor()
            && !matches!(self.phase, Phase::MoveActivation | Phase::BeepActivation)
        {
            return Err(ActionError::WrongPhase { action: "write attributes", phase: self.phase });
        }
        let round = self.write_round();
        let attr = self
            .me_mut()
            .attribute_mut(name)
            .ok_or_else(|| ActionError::NoSuchAttribute { name: name.into() })?;
        attr.record(value, round)?;
        Ok(())
    }

    fn write_round(&self) -> Round {
        if self.in_constructor() { self.clock.committed } else { self.clock.current }
    }

    // -- movement scheduling ------------------------------------------------

    /// Schedules an expansion toward a local direction. The particle must be
    /// contracted; whether the target node is free is resolved with the
    /// whole round.
    pub fn expand(&mut self, local_dir: Direction) -> Result<(), ActionError> {
        self.require_move_phase("schedule an expansion")?;
        if self.is_expanded() {
            return Err(ActionError::InvalidMovement {
                reason: "already expanded".into(),
            });
        }
        self.me_mut().scratch.move_intent = Some(MoveIntent::Expand(local_dir));
        Ok(())
    }

    /// Schedules a contraction into the given part, vacating the other node.
    pub fn contract(&mut self, into: BodyPart) -> Result<(), ActionError> {
        self.require_move_phase("schedule a contraction")?;
        if !self.is_expanded() {
            return Err(ActionError::InvalidMovement {
                reason: "not expanded".into(),
            });
        }
        self.me_mut().scratch.move_intent = Some(MoveIntent::Contract(into));
        Ok(())
    }

    /// Withdraws a movement scheduled earlier in this activation.
    pub fn cancel_movement(&mut self) -> Result<(), ActionError> {
        self.require_move_phase("cancel a movement")?;
        self.me_mut().scratch.move_intent = None;
        Ok(())
    }

    /// Overrides the bond flag on one label for the round being scheduled.
    /// Explicit overrides take precedence over automatic bond handling.
    pub fn schedule_bond(&mut self, label: u8, active: bool) -> Result<(), ActionError> {
        self.require_move_phase("schedule a bond change")?;
        self.check_label(label)?;
        self.me_mut().scratch.bond_intents[label as usize] = Some(active);
        Ok(())
    }

    /// Turns automatic bond handling on or off from this round forward.
    pub fn set_automatic_bonds(&mut self, enabled: bool) -> Result<(), ActionError> {
        self.require_move_phase("change automatic bond handling")?;
        self.me_mut().scratch.automatic_intent = Some(enabled);
        Ok(())
    }

    fn require_move_phase(&self, action: &'static str) -> Result<(), ActionError> {
        if self.phase != Phase::MoveActivation {
            return Err(ActionError::WrongPhase { action, phase: self.phase });
        }
        Ok(())
    }

    // -- pin configurations and signals ---------------------------------------

    /// The particle's current pin configuration, including signals received
    /// in the last beep resolution.
    pub fn pin_config(&self) -> PinConfiguration {
        self.me().pin_config().clone()
    }

    /// Replaces the configuration planned for this round. It must be laid
    /// out for the particle's current expansion state and the system's pin
    /// count.
    pub fn plan_pin_config(&mut self, config: PinConfiguration) -> Result<(), ActionError> {
        self.require_beep_phase("plan a pin configuration")?;
        if config.pins_per_edge() != self.pins_per_edge {
            return Err(ActionError::IncompatiblePinConfiguration {
                reason: format!(
                    "{} pins per edge, system uses {}",
                    config.pins_per_edge(),
                    self.pins_per_edge
                ),
            });
        }
        let expansion = self.me().shape().local_expansion();
        if !config.fits(expansion) {
            return Err(ActionError::IncompatiblePinConfiguration {
                reason: format!(
                    "laid out for expansion {:?}, particle is at {:?}",
                    config.expansion(),
                    expansion
                ),
            });
        }
        self.me_mut().scratch.planned_pin_config = Some(config);
        Ok(())
    }

    /// The configuration this round will use, for in-place mutation: the
    /// planned one, lazily initialized from the current configuration with
    /// all signals cleared.
    pub fn planned_pin_config(&mut self) -> Result<&mut PinConfiguration, ActionError> {
        self.require_beep_phase("plan a pin configuration")?;
        let me = self.me_mut();
        if me.scratch.planned_pin_config.is_none() {
            let mut config = me.pin_config.latest().clone();
            config.clear_signals();
            me.scratch.planned_pin_config = Some(config);
        }
        match me.scratch.planned_pin_config.as_mut() {
            Some(config) => Ok(config),
            None => unreachable!("planned configuration just initialized"),
        }
    }

    /// Schedules a beep on the partition set containing `pin`.
    pub fn send_beep(&mut self, pin: PinId) -> Result<(), ActionError> {
        let config = self.planned_pin_config()?;
        let set = config.set_of(pin)?;
        config.set_mut(set)?.beep = true;
        Ok(())
    }

    /// Schedules a message on the partition set containing `pin`.
    pub fn send_message(&mut self, pin: PinId, message: Message) -> Result<(), ActionError> {
        let config = self.planned_pin_config()?;
        let set = config.set_of(pin)?;
        config.set_mut(set)?.message = Some(message);
        Ok(())
    }

    /// True if the set containing `pin` heard a beep in the last resolution.
    ///
    /// A particle that changed its expansion state since then reads `false`:
    /// movement resets the pin configuration, signals included.
    pub fn received_beep(&self, pin: PinId) -> Result<bool, ActionError> {
        let config = self.me().pin_config();
        let set = config.set_of(pin)?;
        Ok(config.set(set)?.received_beep)
    }

    /// The message the set containing `pin` received in the last resolution.
    pub fn received_message(&self, pin: PinId) -> Result<Option<Message>, ActionError> {
        let config = self.me().pin_config();
        let set = config.set_of(pin)?;
        Ok(config.set(set)?.received_message)
    }

    fn require_beep_phase(&self, action: &'static str) -> Result<(), ActionError> {
        if self.phase != Phase::BeepActivation {
            return Err(ActionError::WrongPhase { action, phase: self.phase });
        }
        Ok(())
    }

    // -- neighbors ----------------------------------------------------------

    /// True if the node across the labeled edge is occupied.
    pub fn has_neighbor(&self, label: u8) -> Result<bool, ActionError> {
        Ok(self.neighbor(label)?.is_some())
    }

    /// A committed-state view of the entity across the labeled edge.
    pub fn neighbor(&self, label: u8) -> Result<Option<NeighborView<'_>>, ActionError> {
        self.check_label(label)?;
        let shape = self.me().shape();
        let target = match shape.edge_target(label) {
            Some(node) => node,
            None => {
                return Err(ActionError::LabelOutOfRange {
                    label,
                    count: shape.label_count(),
                });
            }
        };
        let entity = match self.position_index.get(&target) {
            Some(&entity) => entity,
            None => return Ok(None),
        };
        let committed = self.clock.committed;
        let view = match entity {
            EntityId::Particle(pid) => {
                let particle = &self.particles[pid];
                let their_shape = particle.shape();
                let facing = shape
                    .label_dir_global(label)
                    .and_then(|dir| {
                        let part = if their_shape.head == target {
                            BodyPart::Head
                        } else {
                            BodyPart::Tail
                        };
                        their_shape.label_toward(part, dir.opposite())
                    });
                NeighborView {
                    entity,
                    particle: Some(particle),
                    committed,
                    touched_node: target,
                    facing_label: facing,
                }
            }
            EntityId::Object(_) => NeighborView {
                entity,
                particle: None,
                committed,
                touched_node: target,
                facing_label: None,
            },
        };
        Ok(Some(view))
    }

    /// Number of labels with an occupied node across their edge.
    pub fn neighbor_count(&self) -> usize {
        let shape = self.me().shape();
        shape
            .labels()
            .filter(|&label| {
                shape
                    .edge_target(label)
                    .is_some_and(|node| self.position_index.contains_key(&node))
            })
            .count()
    }

    fn check_label(&self, label: u8) -> Result<(), ActionError> {
        let count = self.label_count();
        if label >= count {
            return Err(ActionError::LabelOutOfRange { label, count });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Neighbor views
// ---------------------------------------------------------------------------

/// A read-only view of an adjacent entity.
///
/// Geometry (expansion, touched part, facing label) reflects the neighbor's
/// current position; attribute values come from the last committed round so
/// activation order stays invisible.
#[derive(Debug)]
pub struct NeighborView<'a> {
    entity: EntityId,
    particle: Option<&'a Particle>,
    committed: Round,
    touched_node: GridPos,
    facing_label: Option<u8>,
}

impl NeighborView<'_> {
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    pub fn is_object(&self) -> bool {
        self.particle.is_none()
    }

    pub fn is_particle(&self) -> bool {
        self.particle.is_some()
    }

    pub fn is_expanded(&self) -> bool {
        self.particle.is_some_and(Particle::is_expanded)
    }

    /// Which of the neighbor's nodes touches the queried edge. `None` for
    /// objects.
    pub fn touched_part(&self) -> Option<BodyPart> {
        let particle = self.particle?;
        if particle.shape().head == self.touched_node {
            Some(BodyPart::Head)
        } else {
            Some(BodyPart::Tail)
        }
    }

    /// The neighbor's label for the shared edge, seen from its side. `None`
    /// for objects.
    pub fn facing_label(&self) -> Option<u8> {
        self.facing_label
    }

    /// The neighbor's value of an attribute as of the last committed round.
    pub fn attr(&self, name: &str) -> Result<AttrValue, ActionError> {
        let particle = self
            .particle
            .ok_or_else(|| ActionError::NoSuchAttribute { name: name.into() })?;
        let attr = particle
            .attribute(name)
            .ok_or_else(|| ActionError::NoSuchAttribute { name: name.into() })?;
        match attr.value_at(self.committed) {
            Ok(value) => Ok(value.clone()),
            // Created after the committed round; invisible until commit.
            Err(_) => Err(ActionError::NoSuchAttribute { name: name.into() }),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Chirality;

    fn fixture() -> (SlotMap<ParticleId, Particle>, HashMap<GridPos, EntityId>, ParticleId) {
        let mut particles = SlotMap::with_key();
        let node = GridPos::new(0, 0);
        let id = particles.insert(Particle::new(
            0,
            node,
            Chirality::CounterClockwise,
            Direction::E,
            1,
            0,
        ));
        let mut index = HashMap::new();
        index.insert(node, EntityId::Particle(id));
        (particles, index, id)
    }

    fn handle<'a>(
        particles: &'a mut SlotMap<ParticleId, Particle>,
        index: &'a HashMap<GridPos, EntityId>,
        id: ParticleId,
        phase: Phase,
        clock: RoundClock,
    ) -> ParticleHandle<'a> {
        ParticleHandle { particles, position_index: index, pins_per_edge: 1, clock, phase, id }
    }

    // -----------------------------------------------------------------------
    // Test 1: movement scheduling is phase-gated and state-checked
    // -----------------------------------------------------------------------
    #[test]
    fn movement_scheduling_rules() {
        let clock = RoundClock { current: 1, committed: 0 };
        let (mut particles, index, id) = fixture();

        let mut h = handle(&mut particles, &index, id, Phase::BeepActivation, clock);
        let err = h.expand(Direction::E).unwrap_err();
        assert!(matches!(err, ActionError::WrongPhase { .. }));

        let mut h = handle(&mut particles, &index, id, Phase::MoveActivation, clock);
        let err = h.contract(BodyPart::Head).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("not expanded"), "got: {msg}");
        h.expand(Direction::Nne).unwrap();
        // Last call wins.
        h.expand(Direction::E).unwrap();
        assert_eq!(
            particles[id].scratch.move_intent,
            Some(MoveIntent::Expand(Direction::E))
        );
    }

    // -----------------------------------------------------------------------
    // Test 2: attribute creation is constructor-only, writes are phase-gated
    // -----------------------------------------------------------------------
    #[test]
    fn attribute_rules() {
        let clock = RoundClock { current: 0, committed: 0 };
        let (mut particles, index, id) = fixture();

        let mut h = handle(&mut particles, &index, id, Phase::Idle, clock);
        let err = h.create_attr("seen", AttrValue::Bool(false)).unwrap_err();
        assert!(matches!(err, ActionError::AttributeOutsideConstructor { .. }));

        particles[id].in_constructor = true;
        let mut h = handle(&mut particles, &index, id, Phase::Idle, clock);
        let err = h.create_attr("Chirality", AttrValue::Bool(false)).unwrap_err();
        assert!(matches!(err, ActionError::ReservedAttribute { .. }));
        h.create_attr("seen", AttrValue::Bool(false)).unwrap();
        let err = h.create_attr("seen", AttrValue::Bool(true)).unwrap_err();
        assert!(matches!(err, ActionError::DuplicateAttribute { .. }));
        // Constructor writes are allowed even in the idle phase.
        h.set_attr("seen", AttrValue::Bool(true)).unwrap();
        particles[id].in_constructor = false;

        let clock = RoundClock { current: 1, committed: 0 };
        let mut h = handle(&mut particles, &index, id, Phase::Finalize, clock);
        let err = h.set_attr("seen", AttrValue::Bool(false)).unwrap_err();
        assert!(matches!(err, ActionError::WrongPhase { .. }));
        assert_eq!(h.attr("seen").unwrap(), AttrValue::Bool(true));
        let err = h.attr("missing").unwrap_err();
        assert!(matches!(err, ActionError::NoSuchAttribute { .. }));
    }

    // -----------------------------------------------------------------------
    // Test 3: neighbor views read committed values, current geometry
    // -----------------------------------------------------------------------
    #[test]
    fn neighbor_views_are_committed() {
        let clock = RoundClock { current: 2, committed: 1 };
        let (mut particles, mut index, id) = fixture();
        let other_node = GridPos::new(1, 0);
        let other = particles.insert(Particle::new(
            1,
            other_node,
            Chirality::CounterClockwise,
            Direction::E,
            1,
            0,
        ));
        index.insert(other_node, EntityId::Particle(other));
        particles[other]
            .attributes
            .push(Attribute::new("mark", AttrValue::Int(0), 0));
        particles[other]
            .attribute_mut("mark")
            .unwrap()
            .record(AttrValue::Int(1), 1)
            .unwrap();
        // A round-2 write is not committed yet.
        particles[other]
            .attribute_mut("mark")
            .unwrap()
            .record(AttrValue::Int(9), 2)
            .unwrap();

        let h = handle(&mut particles, &index, id, Phase::MoveActivation, clock);
        let view = h.neighbor(0).unwrap().unwrap();
        assert!(view.is_particle());
        assert_eq!(view.attr("mark").unwrap(), AttrValue::Int(1));
        assert_eq!(view.touched_part(), Some(BodyPart::Head));
        // The neighbor's west edge faces back at us.
        assert_eq!(view.facing_label(), Some(Direction::W.index()));

        assert!(h.neighbor(1).unwrap().is_none());
        assert!(!h.has_neighbor(2).unwrap());
        assert_eq!(h.neighbor_count(), 1);
        let err = h.neighbor(6).unwrap_err();
        assert!(matches!(err, ActionError::LabelOutOfRange { label: 6, count: 6 }));
    }

    // -----------------------------------------------------------------------
    // Test 4: pin planning checks fit and lazily seeds from the current
    // configuration
    // -----------------------------------------------------------------------
    #[test]
    fn pin_planning_rules() {
        let clock = RoundClock { current: 1, committed: 0 };
        let (mut particles, index, id) = fixture();

        let mut h = handle(&mut particles, &index, id, Phase::MoveActivation, clock);
        let err = h.send_beep(0).unwrap_err();
        assert!(matches!(err, ActionError::WrongPhase { .. }));

        let mut h = handle(&mut particles, &index, id, Phase::BeepActivation, clock);
        let err = h
            .plan_pin_config(PinConfiguration::singleton(2, None))
            .unwrap_err();
        assert!(matches!(err, ActionError::IncompatiblePinConfiguration { .. }));
        let err = h
            .plan_pin_config(PinConfiguration::singleton(1, Some(Direction::E)))
            .unwrap_err();
        assert!(matches!(err, ActionError::IncompatiblePinConfiguration { .. }));

        h.send_beep(3).unwrap();
        h.send_message(3, Message::new(2, 1, 10)).unwrap();
        let planned = particles[id].scratch.planned_pin_config.as_ref().unwrap();
        let set = planned.set_of(3).unwrap();
        assert!(planned.set(set).unwrap().beep);
        assert_eq!(planned.set(set).unwrap().message, Some(Message::new(2, 1, 10)));
        // Other sets are untouched.
        assert!(!planned.set(0).unwrap().beep);
    }

    // -----------------------------------------------------------------------
    // Test 5: bond scheduling validates labels
    // -----------------------------------------------------------------------
    #[test]
    fn bond_scheduling_rules() {
        let clock = RoundClock { current: 1, committed: 0 };
        let (mut particles, index, id) = fixture();
        let mut h = handle(&mut particles, &index, id, Phase::MoveActivation, clock);
        h.schedule_bond(4, false).unwrap();
        h.set_automatic_bonds(false).unwrap();
        let err = h.schedule_bond(7, false).unwrap_err();
        assert!(matches!(err, ActionError::LabelOutOfRange { label: 7, count: 6 }));
        assert_eq!(particles[id].scratch.bond_intents[4], Some(false));
        assert_eq!(particles[id].scratch.automatic_intent, Some(false));
    }
}
