#![no_main]
use amoebot_core::system::ParticleSystem;
use amoebot_core::test_utils::IdleAlgorithm;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary bytes to the snapshot decoder.
    // Must not panic -- returning Err is fine.
    let _ = ParticleSystem::deserialize(data, Box::new(IdleAlgorithm));
});
