//! Caterpillar locomotion example: a bonded chain walks east.
//!
//! Builds a five-particle chain anchored at its leader, runs twenty rounds,
//! and prints every particle's nodes each round. On odd rounds the leader
//! shows up expanded across two nodes; every second round the whole chain
//! has moved one node east.
//!
//! Run with: `cargo run -p amoebot-algorithms --example caterpillar_walk`

use amoebot_algorithms::caterpillar::Caterpillar;
use amoebot_core::grid::{Chirality, Direction, GridPos};
use amoebot_core::system::SystemBuilder;

fn main() {
    let mut builder = SystemBuilder::new();
    builder.pins_per_edge(1);
    for i in 0..5 {
        builder.add_particle(GridPos::new(i, 0), Chirality::CounterClockwise, Direction::E);
    }
    // The anchor rides on the leader so the chain is dragged east.
    builder.anchor_particle(4);
    let mut system = builder.start(Box::new(Caterpillar)).unwrap();

    for _ in 0..20 {
        let outcome = system.simulate_round();
        let view = system.view();
        let tag = if outcome.is_committed() { "committed" } else { "rejected" };
        print!("round {:>2} ({tag}):", view.round);
        for particle in &view.particles {
            if particle.expansion.is_some() {
                print!("  {}={}", node(particle.tail), node(particle.head));
            } else {
                print!("  {}", node(particle.head));
            }
        }
        println!();
    }
}

fn node(position: GridPos) -> String {
    format!("({},{})", position.x, position.y)
}
