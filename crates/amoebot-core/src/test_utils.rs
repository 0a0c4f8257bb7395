//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use crate::algorithm::{ActionError, Algorithm, ParticleHandle};
use crate::attribute::AttrValue;
use crate::grid::{BodyPart, Chirality, Direction, GridPos};
use crate::system::{ParticleSystem, SystemBuilder};

// ===========================================================================
// Grid helper
// ===========================================================================

pub fn pos(x: i32, y: i32) -> GridPos {
    GridPos::new(x, y)
}

// ===========================================================================
// Algorithm fixtures
// ===========================================================================

/// Does nothing, every round.
#[derive(Debug)]
pub struct IdleAlgorithm;

impl Algorithm for IdleAlgorithm {
    fn name(&self) -> &str {
        "idle"
    }
}

/// Walks east forever: expands when contracted, pulls the tail in otherwise.
#[derive(Debug)]
pub struct EastWalker;

impl Algorithm for EastWalker {
    fn name(&self) -> &str {
        "east-walker"
    }

    fn activate_move(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
        if p.is_expanded() {
            p.contract(BodyPart::Head)
        } else {
            p.expand(Direction::E)
        }
    }
}

/// Counts its move activations in a `steps` attribute.
#[derive(Debug)]
pub struct StepCounter;

impl Algorithm for StepCounter {
    fn name(&self) -> &str {
        "step-counter"
    }

    fn init(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
        p.create_attr("steps", AttrValue::Int(0))
    }

    fn activate_move(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
        let steps = match p.attr("steps")? {
            AttrValue::Int(n) => n,
            _ => 0,
        };
        p.set_attr("steps", AttrValue::Int(steps + 1))
    }
}

// ===========================================================================
// World builders
// ===========================================================================

/// A west-to-east line of contracted particles with shared chirality and
/// compass, anchored at the west end.
pub fn line_system(algorithm: Box<dyn Algorithm>, count: i32) -> ParticleSystem {
    line_system_with_pins(algorithm, count, 1)
}

pub fn line_system_with_pins(
    algorithm: Box<dyn Algorithm>,
    count: i32,
    pins: u8,
) -> ParticleSystem {
    let mut builder = SystemBuilder::new();
    builder.pins_per_edge(pins);
    for i in 0..count {
        builder.add_particle(pos(i, 0), Chirality::CounterClockwise, Direction::E);
    }
    builder.start(algorithm).unwrap()
}

// ===========================================================================
// Query helpers
// ===========================================================================

/// The head node of the particle with creation index `index`.
pub fn head_of(system: &ParticleSystem, index: usize) -> GridPos {
    let (_, particle) = system.particle_by_index(index).unwrap();
    particle.head_node()
}

/// The latest value of an integer attribute.
pub fn int_attr(system: &ParticleSystem, index: usize, name: &str) -> i64 {
    let (_, particle) = system.particle_by_index(index).unwrap();
    particle.attribute(name).and_then(|attr| attr.latest().as_int()).unwrap()
}

/// The latest value of a boolean attribute.
pub fn bool_attr(system: &ParticleSystem, index: usize, name: &str) -> bool {
    let (_, particle) = system.particle_by_index(index).unwrap();
    particle.attribute(name).and_then(|attr| attr.latest().as_bool()).unwrap()
}
