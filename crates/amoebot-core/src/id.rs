//! Stable identifiers for the entities managed by the simulator.
//!
//! Particles and objects live in slotmaps owned by the particle system;
//! their keys double as bond-graph node ids and as keys into the
//! per-round side tables built by the movement resolver and the circuit
//! engine. Neither kind of entity is ever removed mid-session, so slot
//! iteration order equals insertion order and is used as the canonical
//! activation order.

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a particle for its whole session lifetime.
    pub struct ParticleId;

    /// Identifies an inert object for its whole session lifetime.
    pub struct ObjectId;
}

/// Either kind of entity that can occupy grid nodes and carry bonds.
///
/// The joint-movement resolver and the conflict reports treat particles
/// and objects uniformly through this union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Particle(ParticleId),
    Object(ObjectId),
}

impl EntityId {
    /// Returns the particle key, if this entity is a particle.
    pub fn as_particle(self) -> Option<ParticleId> {
        match self {
            EntityId::Particle(id) => Some(id),
            EntityId::Object(_) => None,
        }
    }

    /// Returns the object key, if this entity is an object.
    pub fn as_object(self) -> Option<ObjectId> {
        match self {
            EntityId::Particle(_) => None,
            EntityId::Object(id) => Some(id),
        }
    }

    /// True if this entity is a particle.
    pub fn is_particle(self) -> bool {
        matches!(self, EntityId::Particle(_))
    }
}

impl From<ParticleId> for EntityId {
    fn from(id: ParticleId) -> Self {
        EntityId::Particle(id)
    }
}

impl From<ObjectId> for EntityId {
    fn from(id: ObjectId) -> Self {
        EntityId::Object(id)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
