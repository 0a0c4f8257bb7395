//! Chain locomotion through joint movement.
//!
//! A west-to-east chain of contracted particles walks east one node every
//! two rounds. The leader, the particle without an east neighbor, expands
//! east, then contracts into its head while keeping the bond behind its
//! vacated tail. The movement resolver drags every particle bonded through
//! that rear bond, so followers never schedule anything themselves.
//!
//! Movement is relative to the system anchor. Anchoring the leader makes the
//! chain advance; anchoring a follower pins the chain in place and the
//! leader's contraction pulls its own head back west instead.

use amoebot_core::algorithm::{ActionError, Algorithm, ParticleHandle};
use amoebot_core::grid::{BodyPart, Direction, label_at};

/// The gait described in the module docs. Stateless; leadership is derived
/// from the neighborhood every round.
#[derive(Debug)]
pub struct Caterpillar;

impl Algorithm for Caterpillar {
    fn name(&self) -> &str {
        "caterpillar"
    }

    fn activate_move(&self, p: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
        if p.is_expanded() {
            // Keep the bond behind the vacated tail so the contraction
            // drags the chain instead of abandoning it.
            if let Some(rear) = label_at(BodyPart::Tail, Direction::W, p.expansion_direction()) {
                if p.has_neighbor(rear)? {
                    p.schedule_bond(rear, true)?;
                }
            }
            return p.contract(BodyPart::Head);
        }
        let Some(east) = label_at(BodyPart::Head, Direction::E, None) else {
            return Ok(());
        };
        if !p.has_neighbor(east)? {
            p.expand(Direction::E)?;
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
