#![no_main]
use amoebot_core::algorithm::Algorithm;
use amoebot_core::grid::{Chirality, Direction, GridPos};
use amoebot_core::system::SystemBuilder;
use amoebot_core::test_utils::{EastWalker, StepCounter};
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

/// A structured timeline operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Round,
    SetMarker { round: u8 },
    StepForward,
    StepBack,
    Cut { round: u8 },
    Shift { delta: i8 },
    View { round: u8 },
    Hash,
}

/// Top-level fuzz input: a world layout plus a sequence of operations.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    positions: Vec<(i8, i8)>,
    walkers: bool,
    ops: Vec<FuzzOp>,
}

fuzz_target!(|input: FuzzInput| {
    let mut builder = SystemBuilder::new();
    builder.pins_per_edge(1);
    for &(x, y) in input.positions.iter().take(16) {
        builder.add_particle(
            GridPos::new(i32::from(x), i32::from(y)),
            Chirality::CounterClockwise,
            Direction::E,
        );
    }
    let algorithm: Box<dyn Algorithm> = if input.walkers {
        Box::new(EastWalker)
    } else {
        Box::new(StepCounter)
    };
    // Overlapping or disconnected layouts are rejected at start; fine.
    let Ok(mut system) = builder.start(algorithm) else {
        return;
    };

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(64);

    for op in &input.ops[..max_ops] {
        match op {
            FuzzOp::Round => {
                system.simulate_round();
            }
            FuzzOp::SetMarker { round } => {
                let _ = system.set_marker_round(u64::from(*round));
            }
            FuzzOp::StepForward => {
                system.step_markers_forward();
            }
            FuzzOp::StepBack => {
                system.step_markers_back();
            }
            FuzzOp::Cut { round } => {
                let _ = system.cut_at_round(u64::from(*round));
            }
            FuzzOp::Shift { delta } => {
                let _ = system.shift_timescale(i64::from(*delta));
            }
            FuzzOp::View { round } => {
                let _ = system.view_at(u64::from(*round));
            }
            FuzzOp::Hash => {
                system.state_hash();
            }
        }
    }

    // The markers stay inside the recorded range whatever the mix of
    // rounds, cuts and shifts, so the marker view must always build.
    assert!(system.marker_round() >= system.earliest_round());
    system.view();
});
