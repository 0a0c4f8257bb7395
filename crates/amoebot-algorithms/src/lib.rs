//! Amoebot algorithms built on the `amoebot-core` engine.
//!
//! Two complete algorithms, each exercising a different half of the engine:
//! - [`caterpillar::Caterpillar`] walks a bonded chain east through joint
//!   movement, one node every two rounds.
//! - [`beep_wave::BeepWave`] broadcasts a beep outward one hop per round and
//!   records when each particle first heard it.

pub mod beep_wave;
pub mod caterpillar;

use amoebot_core::algorithm::Algorithm;
use amoebot_core::registry::{AlgorithmRegistry, RegistryBuilder};

/// A registry with every algorithm in this crate registered.
pub fn registry() -> AlgorithmRegistry {
    let mut builder = RegistryBuilder::new();
    register(&mut builder, "caterpillar", "chain locomotion through joint movement", || {
        Box::new(caterpillar::Caterpillar)
    });
    register(&mut builder, "beep-wave", "one-hop-per-round broadcast", || {
        Box::new(beep_wave::BeepWave)
    });
    builder.build()
}

fn register<F>(builder: &mut RegistryBuilder, name: &str, description: &str, factory: F)
where
    F: Fn() -> Box<dyn Algorithm> + Send + Sync + 'static,
{
    match builder.register(name, description, factory) {
        Ok(()) => {}
        Err(err) => unreachable!("algorithm names are distinct: {err}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
