#![no_main]
use amoebot_core::history::History;
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

/// A structured history operation for fuzzing.
#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Append { gap: u8, value: i8 },
    RecordAt { round: u16, value: i8 },
    SetMarker { round: u16 },
    StepForward,
    StepBack,
    CutAtMarker,
    Shift { delta: i16 },
    Lookup { round: u16 },
}

/// Top-level fuzz input: the starting round plus a sequence of operations.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    start: u16,
    ops: Vec<FuzzOp>,
}

fuzz_target!(|input: FuzzInput| {
    let mut history = History::new(0i32, u64::from(input.start));

    // Limit operations to prevent timeouts.
    let max_ops = input.ops.len().min(200);

    for op in &input.ops[..max_ops] {
        match op {
            FuzzOp::Append { gap, value } => {
                let round = history.latest_round().saturating_add(u64::from(*gap));
                let _ = history.record(i32::from(*value), round);
            }
            FuzzOp::RecordAt { round, value } => {
                // Out-of-order rounds must return Err, never panic.
                let _ = history.record(i32::from(*value), u64::from(*round));
            }
            FuzzOp::SetMarker { round } => {
                let _ = history.set_marker(u64::from(*round));
            }
            FuzzOp::StepForward => {
                history.step_forward();
            }
            FuzzOp::StepBack => {
                history.step_back();
            }
            FuzzOp::CutAtMarker => {
                history.cut_at_marker();
                assert!(history.latest_round() <= history.marker());
            }
            FuzzOp::Shift { delta } => {
                let _ = history.shift_timescale(i64::from(*delta));
            }
            FuzzOp::Lookup { round } => {
                let _ = history.value_at(u64::from(*round));
                history.value_at_marker();
            }
        }
    }

    // Whatever the mix of operations, the structural invariants hold.
    assert!(history.marker() >= history.first_round());
    assert!(history.latest_round() >= history.first_round());
    assert!(history.change_points() >= 1);

    // A live history always snapshots to something that restores.
    match History::from_snapshot(history.to_snapshot()) {
        Ok(restored) => assert_eq!(restored, history),
        Err(err) => panic!("live history failed to round-trip: {err}"),
    }
});
