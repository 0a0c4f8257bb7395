//! Amoebot Core -- a deterministic simulator for the geometric amoebot model.
//!
//! Programmable particles live on the triangular lattice, expand and
//! contract between nodes, hold bonds to their neighbors, and communicate
//! through beeps and messages on pin circuits. This crate provides the
//! round pipeline, the joint-movement resolver, circuit discovery, full
//! per-round histories with rollback, and framed binary snapshots.
//!
//! # Round Pipeline
//!
//! Each call to [`system::ParticleSystem::simulate_round`] advances the
//! simulation by one discrete round through the following phases:
//!
//! 1. **Move activation** -- every particle's `activate_move` hook runs,
//!    scheduling expansions, contractions, and bond changes.
//! 2. **Move resolution** -- the scheduled bonds form the joint-movement
//!    graph; offsets propagate outward from the anchor and the new geometry
//!    commits, or a conflict rejects the round.
//! 3. **Beep activation** -- every particle's `activate_beep` hook runs
//!    against the post-move geometry, planning pin configurations and sends.
//! 4. **Beep resolution** -- circuits are discovered across bonded edges and
//!    every beep and message is delivered.
//! 5. **Finalize** -- the round commits, history markers move up, and
//!    termination is evaluated.
//!
//! A conflict anywhere rolls the round back: every history is cut at its
//! marker and the outcome reports the cause as a
//! [`error::RoundOutcome::Rejected`].
//!
//! # Histories
//!
//! Every piece of mutable particle state is a run-length
//! [`history::History`], so any committed round can be reproduced:
//!
//! ```rust,ignore
//! system.simulate_round();
//! let then = system.view_at(3)?;      // the world as of round 3
//! system.cut_at_round(3)?;            // rewind for good and resume there
//! ```
//!
//! # Key Types
//!
//! - [`system::ParticleSystem`] -- entity storage, round clock, and the
//!   simulation driver; built by [`system::SystemBuilder`].
//! - [`algorithm::Algorithm`] -- the hooks a distributed algorithm
//!   implements; [`algorithm::ParticleHandle`] is its strictly local window
//!   onto one particle.
//! - [`grid`] -- axial coordinates, directions, chirality, and the edge
//!   label arithmetic.
//! - [`pins::PinConfiguration`] -- per-edge pins partitioned into sets;
//!   [`circuits`] joins them into system-wide circuits.
//! - [`movement`] -- the joint-movement resolver (bonds, anchor,
//!   conflicts).
//! - [`registry::AlgorithmRegistry`] -- algorithm factories by name.
//! - [`snapshot`] -- framed bitcode serialization and the FNV-1a state
//!   hash.
//! - [`query`] -- owned per-round views and timeline scrubbing.

pub mod algorithm;
pub mod attribute;
pub mod circuits;
#[cfg(feature = "data-loader")]
pub mod data_loader;
pub mod error;
pub mod grid;
pub mod history;
pub mod id;
pub mod movement;
pub mod object;
pub mod particle;
pub mod pins;
pub mod query;
pub mod registry;
pub mod round;
pub mod snapshot;
pub mod system;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
