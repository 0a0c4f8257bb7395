//! One-hop-per-round broadcast.
//!
//! Every particle stays on the default singleton pin configuration, where
//! each pin forms its own partition set, so a beep crosses exactly one edge
//! per round. Particles without a west neighbor start infected; an infected
//! particle beeps on every pin each round, and a particle that hears any
//! beep becomes infected itself. Each particle records the round it first
//! heard the wave in `heard_round`, which equals its hop distance from the
//! nearest initiator.
//!
//! Activations carry no round number, so the algorithm counts its own
//! activations in a `round` attribute.

use amoebot_core::algorithm::{ActionError, Algorithm, ParticleHandle};
use amoebot_core::attribute::AttrValue;
use amoebot_core::grid::Direction;

const ROUND: &str = "round";
const HEARD_ROUND: &str = "heard_round";

/// The broadcast described in the module docs. A particle is finished once
/// it has heard the wave; the system terminates when the wave has covered
/// every particle.
#[derive(Debug)]
pub struct BeepWave;

impl Algorithm for BeepWave {
    fn name(&self) -> &str {
        "beep-wave"
    }

    fn init(&self, p: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
        p.create_attr(ROUND, AttrValue::Int(-1))?;
        p.create_attr(HEARD_ROUND, AttrValue::Int(-1))
    }

    fn activate_beep(&self, p: &mut ParticleHandle<'_>) -> Result<(), ActionError> {
        let round = p.attr(ROUND)?.as_int().unwrap_or(-1) + 1;
        p.set_attr(ROUND, AttrValue::Int(round))?;

        let mut heard = p.attr(HEARD_ROUND)?.as_int().unwrap_or(-1) >= 0;
        if !heard {
            let mut infected = !p.has_neighbor(Direction::W.index())?;
            if !infected {
                for pin in 0..p.pin_config().pin_count() {
                    if p.received_beep(pin)? {
                        infected = true;
                        break;
                    }
                }
            }
            if infected {
                p.set_attr(HEARD_ROUND, AttrValue::Int(round))?;
                heard = true;
            }
        }

        if heard {
            for pin in 0..p.pin_config().pin_count() {
                p.send_beep(pin)?;
            }
        }
        Ok(())
    }

    fn is_finished(&self, p: &ParticleHandle<'_>) -> bool {
        matches!(p.attr(HEARD_ROUND), Ok(value) if value.as_int().unwrap_or(-1) >= 0)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use amoebot_core::grid::{Chirality, GridPos};
    use amoebot_core::system::{ParticleSystem, SystemBuilder};
    use amoebot_core::test_utils::{int_attr, line_system, pos};

    fn world(positions: &[GridPos]) -> ParticleSystem {
        let mut builder = SystemBuilder::new();
        builder.pins_per_edge(1);
        for &position in positions {
            builder.add_particle(position, Chirality::CounterClockwise, Direction::E);
        }
        builder.start(Box::new(BeepWave)).unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: the wave crosses one hop per round along a line
    // -----------------------------------------------------------------------
    #[test]
    fn wave_advances_one_hop_per_round() {
        let mut system = line_system(Box::new(BeepWave), 5);

        for round in 0..5i64 {
            assert!(system.simulate_round().is_committed());
            for index in 0..5 {
                let expected = if index as i64 <= round { index as i64 } else { -1 };
                assert_eq!(
                    int_attr(&system, index, HEARD_ROUND),
                    expected,
                    "round {round}, particle {index}"
                );
            }
        }
    }

    // -----------------------------------------------------------------------
    // Test 2: the system terminates once the wave covers everyone
    // -----------------------------------------------------------------------
    #[test]
    fn terminates_when_covered() {
        let mut system = line_system(Box::new(BeepWave), 4);

        for _ in 0..3 {
            assert!(system.simulate_round().is_committed());
            assert!(!system.is_terminated());
        }
        assert!(system.simulate_round().is_committed());
        assert!(system.is_terminated());
    }

    // -----------------------------------------------------------------------
    // Test 3: two initiators, each particle hears the nearest one
    // -----------------------------------------------------------------------
    #[test]
    fn multiple_initiators_race() {
        // (0,0) and (3,1) have no west neighbor, so both initiate. (3,1)
        // touches (3,0) across its south-south-west edge.
        let mut system = world(&[pos(0, 0), pos(1, 0), pos(2, 0), pos(3, 0), pos(3, 1)]);

        for _ in 0..3 {
            assert!(system.simulate_round().is_committed());
        }
        let expected = [0, 1, 2, 1, 0];
        for (index, heard) in expected.into_iter().enumerate() {
            assert_eq!(int_attr(&system, index, HEARD_ROUND), heard, "particle {index}");
        }
        assert!(system.is_terminated());
    }

    // -----------------------------------------------------------------------
    // Test 4: received flags in the committed configs match the wave front
    // -----------------------------------------------------------------------
    #[test]
    fn received_flags_track_the_front() {
        let mut system = line_system(Box::new(BeepWave), 3);
        // Singleton sets with one pin per edge: set index == direction index.
        let west = Direction::W.index() as usize;
        let east = Direction::E.index() as usize;

        // First round: only the initiator beeped; its east neighbor's west
        // pin carries the delivery.
        assert!(system.simulate_round().is_committed());
        let (_, middle) = system.particle_by_index(1).unwrap();
        let config = middle.pin_config();
        assert!(config.set(west).unwrap().received_beep);
        assert!(!config.set(east).unwrap().received_beep);

        // Second round: the middle particle is infected and beeps back both ways.
        assert!(system.simulate_round().is_committed());
        let (_, last) = system.particle_by_index(2).unwrap();
        assert!(last.pin_config().set(west).unwrap().received_beep);
    }
}
