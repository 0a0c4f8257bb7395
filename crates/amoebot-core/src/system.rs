//! System construction and the top-level particle system container.
//!
//! A [`SystemBuilder`] collects the initial configuration: contracted
//! particles with their frames, passive objects, the anchor, and the number
//! of pins per edge. [`SystemBuilder::start`] validates the configuration
//! (no double occupancy, one connected structure), runs the algorithm's
//! constructor on every particle, and produces a [`ParticleSystem`] ready to
//! simulate rounds.
//!
//! The system owns all entity storage plus a position index mapping occupied
//! nodes to entities. The index is derived state: it is rebuilt from the
//! histories after every movement commit and rollback, and never serialized.

use std::collections::{HashMap, HashSet};

use slotmap::SlotMap;
use thiserror::Error;

use crate::algorithm::{Algorithm, ParticleHandle};
use crate::error::ActionError;
use crate::grid::{Chirality, Direction, GridPos};
use crate::history::Round;
use crate::id::{EntityId, ObjectId, ParticleId};
use crate::object::{Object, ObjectError};
use crate::particle::Particle;
use crate::round::{Phase, RoundClock};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("pins per edge must be at least 1")]
    InvalidPinsPerEdge,

    #[error("a system needs at least one particle or object")]
    NoEntities,

    #[error("node {node:?} is occupied twice")]
    NodeOccupied { node: GridPos },

    #[error("the initial configuration is not connected")]
    NotConnected,

    #[error("{kind} index {index} out of range ({count} registered)")]
    AnchorOutOfRange { kind: &'static str, index: usize, count: usize },

    #[error("anchor entity does not exist in this system")]
    UnknownAnchor,

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error("constructor of particle {particle} failed: {source}")]
    Init {
        particle: usize,
        #[source]
        source: ActionError,
    },
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnchorChoice {
    Particle(usize),
    Object(usize),
}

/// Collects an initial configuration before the system starts.
///
/// Particles start contracted. Indices returned by the `add_*` methods are
/// the entities' stable creation indices.
#[derive(Debug)]
pub struct SystemBuilder {
    particles: Vec<(GridPos, Chirality, Direction)>,
    objects: Vec<Vec<GridPos>>,
    anchor: Option<AnchorChoice>,
    pins_per_edge: u8,
}

impl Default for SystemBuilder {
    fn default() -> Self {
        SystemBuilder::new()
    }
}

impl SystemBuilder {
    pub fn new() -> SystemBuilder {
        SystemBuilder {
            particles: Vec::new(),
            objects: Vec::new(),
            anchor: None,
            pins_per_edge: 1,
        }
    }

    /// Sets the number of pins on every boundary edge (default 1).
    pub fn pins_per_edge(&mut self, pins: u8) -> &mut Self {
        self.pins_per_edge = pins;
        self
    }

    /// Adds a contracted particle at `node` with the given frame. Returns
    /// its creation index.
    pub fn add_particle(
        &mut self,
        node: GridPos,
        chirality: Chirality,
        compass: Direction,
    ) -> usize {
        self.particles.push((node, chirality, compass));
        self.particles.len() - 1
    }

    /// Adds a passive object occupying `nodes`. Returns its creation index.
    pub fn add_object(&mut self, nodes: &[GridPos]) -> usize {
        self.objects.push(nodes.to_vec());
        self.objects.len() - 1
    }

    /// Anchors the system at the particle with the given creation index.
    /// Without an explicit anchor the first particle (or, failing that, the
    /// first object) is used.
    pub fn anchor_particle(&mut self, index: usize) -> &mut Self {
        self.anchor = Some(AnchorChoice::Particle(index));
        self
    }

    /// Anchors the system at the object with the given creation index.
    pub fn anchor_object(&mut self, index: usize) -> &mut Self {
        self.anchor = Some(AnchorChoice::Object(index));
        self
    }

    /// Validates the configuration, runs the algorithm's constructor on
    /// every particle, and starts the system at round 0.
    pub fn start(self, algorithm: Box<dyn Algorithm>) -> Result<ParticleSystem, SetupError> {
        if self.pins_per_edge == 0 {
            return Err(SetupError::InvalidPinsPerEdge);
        }
        if self.particles.is_empty() && self.objects.is_empty() {
            return Err(SetupError::NoEntities);
        }

        let mut particles: SlotMap<ParticleId, Particle> = SlotMap::with_key();
        let mut particle_ids = Vec::with_capacity(self.particles.len());
        for (index, &(node, chirality, compass)) in self.particles.iter().enumerate() {
            let id = particles.insert(Particle::new(
                index,
                node,
                chirality,
                compass,
                self.pins_per_edge,
                0,
            ));
            particle_ids.push(id);
        }

        let mut objects: SlotMap<ObjectId, Object> = SlotMap::with_key();
        let mut object_ids = Vec::with_capacity(self.objects.len());
        for (index, nodes) in self.objects.iter().enumerate() {
            let id = objects.insert(Object::new(index, nodes, 0)?);
            object_ids.push(id);
        }

        // Occupancy: every node at most once.
        let mut position_index = HashMap::new();
        for (id, particle) in &particles {
            let node = particle.head_node();
            if position_index.insert(node, EntityId::Particle(id)).is_some() {
                return Err(SetupError::NodeOccupied { node });
            }
        }
        for (id, object) in &objects {
            for node in object.nodes() {
                if position_index.insert(node, EntityId::Object(id)).is_some() {
                    return Err(SetupError::NodeOccupied { node });
                }
            }
        }

        if !nodes_connected(&position_index) {
            return Err(SetupError::NotConnected);
        }

        let anchor = match self.anchor {
            Some(AnchorChoice::Particle(index)) => {
                let id = particle_ids.get(index).copied().ok_or(SetupError::AnchorOutOfRange {
                    kind: "particle",
                    index,
                    count: particle_ids.len(),
                })?;
                EntityId::Particle(id)
            }
            Some(AnchorChoice::Object(index)) => {
                let id = object_ids.get(index).copied().ok_or(SetupError::AnchorOutOfRange {
                    kind: "object",
                    index,
                    count: object_ids.len(),
                })?;
                EntityId::Object(id)
            }
            None => match (particle_ids.first(), object_ids.first()) {
                (Some(&id), _) => EntityId::Particle(id),
                (None, Some(&id)) => EntityId::Object(id),
                (None, None) => return Err(SetupError::NoEntities),
            },
        };

        let mut system = ParticleSystem {
            particles,
            objects,
            position_index,
            anchor,
            pins_per_edge: self.pins_per_edge,
            algorithm,
            clock: RoundClock { current: 0, committed: 0 },
            phase: Phase::Idle,
            terminated: false,
        };

        // Constructor pass: create attributes, one particle at a time.
        for id in particle_ids {
            system.particles[id].in_constructor = true;
            let mut handle = ParticleHandle {
                particles: &mut system.particles,
                position_index: &system.position_index,
                pins_per_edge: system.pins_per_edge,
                clock: system.clock,
                phase: system.phase,
                id,
            };
            let result = system.algorithm.init(&mut handle);
            system.particles[id].in_constructor = false;
            if let Err(source) = result {
                let particle = system.particles[id].index;
                return Err(SetupError::Init { particle, source });
            }
        }

        system.terminated = system.all_finished();
        log::debug!(
            "system started: {} particles, {} objects, {} pins per edge, anchor {:?}",
            system.particles.len(),
            system.objects.len(),
            system.pins_per_edge,
            system.anchor
        );
        Ok(system)
    }
}

/// True if the occupied nodes form one connected component.
fn nodes_connected(index: &HashMap<GridPos, EntityId>) -> bool {
    let Some(&start) = index.keys().next() else {
        return true;
    };
    let mut seen = HashSet::new();
    seen.insert(start);
    let mut queue = vec![start];
    while let Some(node) = queue.pop() {
        for neighbor in node.neighbors() {
            if index.contains_key(&neighbor) && seen.insert(neighbor) {
                queue.push(neighbor);
            }
        }
    }
    seen.len() == index.len()
}

// ---------------------------------------------------------------------------
// Particle system
// ---------------------------------------------------------------------------

/// A running system: entity storage, the derived position index, the anchor,
/// the algorithm, and the round clock.
#[derive(Debug)]
pub struct ParticleSystem {
    pub(crate) particles: SlotMap<ParticleId, Particle>,
    pub(crate) objects: SlotMap<ObjectId, Object>,
    pub(crate) position_index: HashMap<GridPos, EntityId>,
    pub(crate) anchor: EntityId,
    pub(crate) pins_per_edge: u8,
    pub(crate) algorithm: Box<dyn Algorithm>,
    pub(crate) clock: RoundClock,
    pub(crate) phase: Phase,
    pub(crate) terminated: bool,
}

impl ParticleSystem {
    /// The last committed round.
    pub fn round(&self) -> Round {
        self.clock.committed
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// True once every particle reported itself finished at the end of a
    /// round.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn pins_per_edge(&self) -> u8 {
        self.pins_per_edge
    }

    pub fn anchor(&self) -> EntityId {
        self.anchor
    }

    pub fn algorithm(&self) -> &dyn Algorithm {
        self.algorithm.as_ref()
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Particles in creation order.
    pub fn particles(&self) -> impl Iterator<Item = (ParticleId, &Particle)> {
        self.particles.iter()
    }

    pub fn particle(&self, id: ParticleId) -> Option<&Particle> {
        self.particles.get(id)
    }

    /// Looks a particle up by its stable creation index.
    pub fn particle_by_index(&self, index: usize) -> Option<(ParticleId, &Particle)> {
        self.particles.iter().find(|(_, p)| p.index() == index)
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects.iter()
    }

    pub fn object(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    /// The entity currently occupying `node`.
    pub fn entity_at(&self, node: GridPos) -> Option<EntityId> {
        self.position_index.get(&node).copied()
    }

    /// True if the occupied nodes form one connected component. Holds after
    /// every committed round; exposed so tests and hosts can audit it.
    pub fn is_connected(&self) -> bool {
        nodes_connected(&self.position_index)
    }

    /// Re-anchors the system; takes effect from the next round.
    pub fn set_anchor(&mut self, entity: EntityId) -> Result<(), SetupError> {
        let exists = match entity {
            EntityId::Particle(id) => self.particles.contains_key(id),
            EntityId::Object(id) => self.objects.contains_key(id),
        };
        if !exists {
            return Err(SetupError::UnknownAnchor);
        }
        self.anchor = entity;
        Ok(())
    }

    /// Rebuilds the position index from the entities' latest positions.
    ///
    /// Panics on double occupancy; movement resolution rules collisions out
    /// before any position is recorded.
    pub(crate) fn rebuild_position_index(&mut self) {
        self.position_index.clear();
        for (id, particle) in &self.particles {
            for node in particle.shape().nodes() {
                if self.position_index.insert(node, EntityId::Particle(id)).is_some() {
                    unreachable!("position index collision at {node:?}");
                }
            }
        }
        for (id, object) in &self.objects {
            for node in object.nodes() {
                if self.position_index.insert(node, EntityId::Object(id)).is_some() {
                    unreachable!("position index collision at {node:?}");
                }
            }
        }
    }

    /// Asks the algorithm whether every particle is finished.
    /// Re-evaluates the finished hook for every particle, caching the
    /// verdicts for queries.
    pub(crate) fn all_finished(&mut self) -> bool {
        let ids: Vec<ParticleId> = self.particles.keys().collect();
        let mut all = true;
        for id in ids {
            let handle = ParticleHandle {
                particles: &mut self.particles,
                position_index: &self.position_index,
                pins_per_edge: self.pins_per_edge,
                clock: self.clock,
                phase: self.phase,
                id,
            };
            let finished = self.algorithm.is_finished(&handle);
            self.particles[id].finished = finished;
            all &= finished;
        }
        all
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrValue;
    use crate::error::ActionError;

    #[derive(Debug)]
    struct Inert;

    impl Algorithm for Inert {
        fn name(&self) -> &str {
            "inert"
        }
    }

    #[derive(Debug)]
    struct FailingInit;

    impl Algorithm for FailingInit {
        fn name(&self) -> &str {
            "failing-init"
        }

        fn init(&self, _particle: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
            Err(ActionError::Algorithm("refused".into()))
        }
    }

    #[derive(Debug)]
    struct Marked;

    impl Algorithm for Marked {
        fn name(&self) -> &str {
            "marked"
        }

        fn init(&self, particle: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
            particle.create_attr("mark", AttrValue::Int(41))?;
            particle.set_attr("mark", AttrValue::Int(42))
        }

        fn is_finished(&self, particle: &ParticleHandle<'_>) -> bool {
            particle.attr("mark") == Ok(AttrValue::Int(42))
        }
    }

    fn pos(x: i32, y: i32) -> GridPos {
        GridPos::new(x, y)
    }

    fn line_builder(n: usize) -> SystemBuilder {
        let mut builder = SystemBuilder::new();
        for i in 0..n {
            builder.add_particle(pos(i as i32, 0), Chirality::CounterClockwise, Direction::E);
        }
        builder
    }

    // -----------------------------------------------------------------------
    // Test 1: a valid line starts at round 0 with the first particle anchored
    // -----------------------------------------------------------------------
    #[test]
    fn line_starts_cleanly() {
        let system = line_builder(3).start(Box::new(Inert)).unwrap();
        assert_eq!(system.round(), 0);
        assert_eq!(system.particle_count(), 3);
        assert_eq!(system.phase(), Phase::Idle);
        assert!(!system.is_terminated());

        let (first, _) = system.particle_by_index(0).unwrap();
        assert_eq!(system.anchor(), EntityId::Particle(first));
        assert_eq!(system.entity_at(pos(1, 0)), system.particle_by_index(1).map(|(id, _)| EntityId::Particle(id)));
        assert_eq!(system.entity_at(pos(9, 9)), None);
    }

    // -----------------------------------------------------------------------
    // Test 2: configuration validation
    // -----------------------------------------------------------------------
    #[test]
    fn configuration_validation() {
        let err = SystemBuilder::new().start(Box::new(Inert)).unwrap_err();
        assert!(matches!(err, SetupError::NoEntities));

        let mut builder = line_builder(1);
        builder.pins_per_edge(0);
        let err = builder.start(Box::new(Inert)).unwrap_err();
        assert!(matches!(err, SetupError::InvalidPinsPerEdge));

        let mut builder = line_builder(2);
        builder.add_particle(pos(0, 0), Chirality::Clockwise, Direction::W);
        let err = builder.start(Box::new(Inert)).unwrap_err();
        assert!(matches!(err, SetupError::NodeOccupied { node } if node == pos(0, 0)));

        let mut builder = line_builder(1);
        builder.add_particle(pos(4, 0), Chirality::CounterClockwise, Direction::E);
        let err = builder.start(Box::new(Inert)).unwrap_err();
        assert!(matches!(err, SetupError::NotConnected));
    }

    // -----------------------------------------------------------------------
    // Test 3: anchor selection and validation
    // -----------------------------------------------------------------------
    #[test]
    fn anchor_selection() {
        let mut builder = line_builder(3);
        builder.anchor_particle(2);
        let system = builder.start(Box::new(Inert)).unwrap();
        let (last, _) = system.particle_by_index(2).unwrap();
        assert_eq!(system.anchor(), EntityId::Particle(last));

        let mut builder = line_builder(3);
        builder.anchor_particle(7);
        let err = builder.start(Box::new(Inert)).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("particle index 7"), "got: {msg}");

        // An object-only system anchors at the object.
        let mut builder = SystemBuilder::new();
        builder.add_object(&[pos(0, 0), pos(1, 0)]);
        let system = builder.start(Box::new(Inert)).unwrap();
        assert!(matches!(system.anchor(), EntityId::Object(_)));
    }

    // -----------------------------------------------------------------------
    // Test 4: objects join occupancy and connectivity
    // -----------------------------------------------------------------------
    #[test]
    fn objects_participate_in_validation() {
        let mut builder = line_builder(1);
        builder.add_object(&[pos(1, 0), pos(2, 0)]);
        let system = builder.start(Box::new(Inert)).unwrap();
        assert_eq!(system.object_count(), 1);
        assert!(matches!(system.entity_at(pos(2, 0)), Some(EntityId::Object(_))));

        // An object overlapping a particle is double occupancy.
        let mut builder = line_builder(1);
        builder.add_object(&[pos(0, 0)]);
        let err = builder.start(Box::new(Inert)).unwrap_err();
        assert!(matches!(err, SetupError::NodeOccupied { .. }));

        // Object shape errors surface through setup.
        let mut builder = line_builder(1);
        builder.add_object(&[pos(1, 0), pos(5, 5)]);
        let err = builder.start(Box::new(Inert)).unwrap_err();
        assert!(matches!(err, SetupError::Object(ObjectError::DisconnectedShape)));
    }

    // -----------------------------------------------------------------------
    // Test 5: constructors run per particle and can finish the system
    // -----------------------------------------------------------------------
    #[test]
    fn constructors_run_at_start() {
        let system = line_builder(2).start(Box::new(Marked)).unwrap();
        for (_, particle) in system.particles() {
            let attr = particle.attribute("mark").unwrap();
            assert_eq!(attr.latest(), &AttrValue::Int(42));
            assert_eq!(attr.history().first_round(), 0);
            // The constructor write overwrote the initial value in place.
            assert_eq!(attr.history().change_points(), 1);
        }
        assert!(system.is_terminated());

        let err = line_builder(2).start(Box::new(FailingInit)).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("constructor of particle 0"), "got: {msg}");
    }

    // -----------------------------------------------------------------------
    // Test 6: re-anchoring validates the entity
    // -----------------------------------------------------------------------
    #[test]
    fn re_anchoring() {
        let mut system = line_builder(2).start(Box::new(Inert)).unwrap();
        let (second, _) = system.particle_by_index(1).unwrap();
        system.set_anchor(EntityId::Particle(second)).unwrap();
        assert_eq!(system.anchor(), EntityId::Particle(second));

        // The null key never names a stored particle.
        let err = system.set_anchor(EntityId::Particle(ParticleId::default()));
        assert!(matches!(err, Err(SetupError::UnknownAnchor)));
        assert_eq!(system.anchor(), EntityId::Particle(second));
    }
}
