//! Criterion benchmarks for the amoebot round pipeline.
//!
//! Four benchmark groups:
//! - `block`: contracted idle blocks at two sizes -- full-pipeline round cost
//! - `circuit_heavy`: a 200-particle line that plans fully-connected
//!   configurations and beeps every round -- circuit resolution cost
//! - `timeline`: views, hashing and cuts against a deep movement history
//! - `serialization`: snapshot encode/decode for a warmed block

use criterion::{criterion_group, criterion_main, Criterion};

use amoebot_core::algorithm::{ActionError, Algorithm, ParticleHandle};
use amoebot_core::grid::{Chirality, Direction};
use amoebot_core::pins::PinConfiguration;
use amoebot_core::snapshot::read_header;
use amoebot_core::system::{ParticleSystem, SystemBuilder};
use amoebot_core::test_utils::*;

// ===========================================================================
// World builders
// ===========================================================================

/// A `side` x `side` parallelogram of contracted idle particles.
///
/// Every particle touches its east and north-north-east neighbors, so the
/// block stays connected and every round commits. Warmed for a few rounds so
/// the run-length histories reach their steady state before measurement.
fn build_idle_block(side: i32, pins: u8) -> ParticleSystem {
    let mut builder = SystemBuilder::new();
    builder.pins_per_edge(pins);
    for x in 0..side {
        for y in 0..side {
            builder.add_particle(pos(x, y), Chirality::CounterClockwise, Direction::E);
        }
    }
    let mut system = builder.start(Box::new(IdleAlgorithm)).unwrap();
    for _ in 0..5 {
        system.simulate_round();
    }
    system
}

/// Plans a fully-connected pin configuration and beeps on it, every round.
#[derive(Debug)]
struct Chatter;

impl Algorithm for Chatter {
    fn name(&self) -> &str {
        "chatter"
    }

    fn activate_beep(&self, p: &mut ParticleHandle) -> Result<(), ActionError> {
        p.plan_pin_config(PinConfiguration::fully_connected(
            2,
            p.expansion_direction(),
        ))?;
        p.send_beep(0)
    }
}

/// A line of [`Chatter`] particles with two pins per edge.
///
/// After two warm-up rounds the planned configuration matches the committed
/// one, so rounds stop appending history and the benchmark measures circuit
/// discovery and delivery alone.
fn build_chatter_line(count: i32) -> ParticleSystem {
    let mut system = line_system_with_pins(Box::new(Chatter), count, 2);
    for _ in 0..2 {
        system.simulate_round();
    }
    system
}

/// A lone east-walker with `rounds` committed rounds of movement history.
fn build_walker(rounds: u64) -> ParticleSystem {
    let mut system = line_system(Box::new(EastWalker), 1);
    for _ in 0..rounds {
        system.simulate_round();
    }
    system
}

// ===========================================================================
// Benchmark groups
// ===========================================================================

fn bench_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("block");
    group.sample_size(50);

    let mut small = build_idle_block(8, 1);
    group.bench_function("round_64_particles", |b| {
        b.iter(|| {
            small.simulate_round();
        });
    });

    let mut large = build_idle_block(20, 2);
    group.bench_function("round_400_particles", |b| {
        b.iter(|| {
            large.simulate_round();
        });
    });

    group.finish();
}

fn bench_circuit_heavy(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_heavy");
    group.sample_size(30);

    let mut line = build_chatter_line(200);
    group.bench_function("round_200_beeping_particles", |b| {
        b.iter(|| {
            line.simulate_round();
        });
    });

    group.finish();
}

fn bench_timeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("timeline");
    group.sample_size(30);

    let walker = build_walker(512);

    group.bench_function("view_mid_history", |b| {
        b.iter(|| walker.view_at(256).unwrap());
    });

    group.bench_function("view_latest", |b| {
        b.iter(|| walker.view());
    });

    group.bench_function("state_hash_512_rounds", |b| {
        b.iter(|| walker.state_hash());
    });

    // Cutting mutates, so every iteration gets a freshly built history.
    group.bench_function("cut_to_half", |b| {
        b.iter_batched(
            || build_walker(64),
            |mut system| {
                system.cut_at_round(32).unwrap();
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialization");
    group.sample_size(30);

    let mut block = build_idle_block(16, 1);
    for _ in 0..32 {
        block.simulate_round();
    }

    group.bench_function("serialize_256_particles", |b| {
        b.iter(|| block.serialize().unwrap());
    });

    let bytes = block.serialize().unwrap();
    group.bench_function("deserialize_256_particles", |b| {
        b.iter(|| ParticleSystem::deserialize(&bytes, Box::new(IdleAlgorithm)).unwrap());
    });

    group.bench_function("read_header", |b| {
        b.iter(|| read_header(&bytes).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_blocks,
    bench_circuit_heavy,
    bench_timeline,
    bench_serialization
);
criterion_main!(benches);
