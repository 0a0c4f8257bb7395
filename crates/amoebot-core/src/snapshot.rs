//! Session snapshots: plain-data mirrors, framed bytes, and state hashing.
//!
//! [`SystemSnapshot`] mirrors the full session state — every history, every
//! attribute, the anchor and the committed round — as owned plain data.
//! Restoring re-checks every invariant the live structures maintain, so a
//! tampered or truncated snapshot is rejected rather than trusted.
//!
//! On the wire a snapshot is a fixed 14-byte header (magic, format version,
//! committed round, all little-endian) followed by a `bitcode` payload. The
//! header is framed outside the payload so magic and version are checked
//! before any decoding happens.
//!
//! Algorithms hold host code and are not serialized; restoring takes a fresh
//! instance and verifies it carries the name the snapshot was taken with.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;
use thiserror::Error;

use crate::algorithm::Algorithm;
use crate::attribute::AttrValue;
use crate::grid::{Direction, GridPos};
use crate::history::{HistorySnapshot, Round};
use crate::id::EntityId;
use crate::object::{Object, ObjectSnapshot};
use crate::particle::{Particle, ParticleSnapshot};
use crate::pins::{Message, PinConfiguration, Rgb};
use crate::round::{Phase, RoundClock};
use crate::system::ParticleSystem;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying a serialized system snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0xA0EB_0001;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u16 = 1;

/// Bytes of header preceding the payload: magic, version, committed round.
const HEADER_LEN: usize = 4 + 2 + 8;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SnapshotError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),

    #[error("data too short for a snapshot header")]
    TooShort,

    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),

    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u16),

    #[error("bitcode decoding failed: {0}")]
    Decode(String),

    #[error("snapshot was taken with algorithm '{expected}', not '{found}'")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// The fixed-size prefix of every serialized snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u16,
    /// Committed round at the time the snapshot was taken.
    pub round: Round,
}

impl SnapshotHeader {
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(self.magic));
        }
        if self.version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Reads and validates the header without touching the payload.
pub fn read_header(bytes: &[u8]) -> Result<SnapshotHeader, SnapshotError> {
    if bytes.len() < HEADER_LEN {
        return Err(SnapshotError::TooShort);
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    let round = u64::from_le_bytes([
        bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11], bytes[12], bytes[13],
    ]);
    let header = SnapshotHeader { magic, version, round };
    header.validate()?;
    Ok(header)
}

// ---------------------------------------------------------------------------
// The snapshot mirror
// ---------------------------------------------------------------------------

/// Anchor reference by creation index, stable across key regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnchorRef {
    Particle(usize),
    Object(usize),
}

/// Serializable mirror of a whole [`ParticleSystem`] session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub algorithm: String,
    pub pins_per_edge: u8,
    pub committed: Round,
    pub anchor: AnchorRef,
    pub particles: Vec<ParticleSnapshot>,
    pub objects: Vec<ObjectSnapshot>,
}

impl ParticleSystem {
    /// Captures the full session state as plain data.
    pub fn snapshot(&self) -> SystemSnapshot {
        let anchor = match self.anchor {
            EntityId::Particle(id) => AnchorRef::Particle(self.particles[id].index()),
            EntityId::Object(id) => AnchorRef::Object(self.objects[id].index()),
        };
        SystemSnapshot {
            algorithm: self.algorithm.name().to_string(),
            pins_per_edge: self.pins_per_edge,
            committed: self.clock.committed,
            anchor,
            particles: self.particles.values().map(Particle::to_snapshot).collect(),
            objects: self.objects.values().map(Object::to_snapshot).collect(),
        }
    }

    /// Rebuilds a session from a snapshot, re-validating its invariants.
    ///
    /// `algorithm` must carry the name the snapshot was taken with; beyond
    /// that, occupancy, creation indices, pin widths, and history bounds are
    /// all checked before any state is trusted.
    pub fn from_snapshot(
        snapshot: SystemSnapshot,
        algorithm: Box<dyn Algorithm>,
    ) -> Result<ParticleSystem, SnapshotError> {
        let SystemSnapshot { algorithm: name, pins_per_edge, committed, anchor, particles, objects } =
            snapshot;
        if algorithm.name() != name {
            return Err(SnapshotError::AlgorithmMismatch {
                expected: name,
                found: algorithm.name().to_string(),
            });
        }
        if pins_per_edge == 0 {
            return Err(SnapshotError::Corrupt("pins per edge is zero".into()));
        }
        if particles.is_empty() && objects.is_empty() {
            return Err(SnapshotError::Corrupt("snapshot holds no entities".into()));
        }

        let mut particle_map = SlotMap::with_key();
        for (position, snap) in particles.into_iter().enumerate() {
            if snap.index != position {
                return Err(SnapshotError::Corrupt(format!(
                    "particle {position} carries creation index {}",
                    snap.index
                )));
            }
            for config in &snap.pin_config.values {
                if config.pins_per_edge() != pins_per_edge {
                    return Err(SnapshotError::Corrupt(format!(
                        "particle {position} recorded a {}-pin configuration in a {pins_per_edge}-pin system",
                        config.pins_per_edge()
                    )));
                }
            }
            let particle =
                Particle::from_snapshot(snap).map_err(|err| SnapshotError::Corrupt(format!("{err}")))?;
            if particle.latest_recorded_round() > committed {
                return Err(SnapshotError::Corrupt(format!(
                    "particle {position} recorded past the committed round {committed}"
                )));
            }
            particle_map.insert(particle);
        }

        let mut object_map = SlotMap::with_key();
        for (position, snap) in objects.into_iter().enumerate() {
            if snap.index != position {
                return Err(SnapshotError::Corrupt(format!(
                    "object {position} carries creation index {}",
                    snap.index
                )));
            }
            let object =
                Object::from_snapshot(snap).map_err(|err| SnapshotError::Corrupt(format!("{err}")))?;
            if object.origin().latest_round() > committed {
                return Err(SnapshotError::Corrupt(format!(
                    "object {position} recorded past the committed round {committed}"
                )));
            }
            object_map.insert(object);
        }

        let anchor = match anchor {
            AnchorRef::Particle(index) => particle_map
                .iter()
                .find(|(_, p)| p.index() == index)
                .map(|(id, _)| EntityId::Particle(id)),
            AnchorRef::Object(index) => object_map
                .iter()
                .find(|(_, o)| o.index() == index)
                .map(|(id, _)| EntityId::Object(id)),
        }
        .ok_or_else(|| SnapshotError::Corrupt("anchor references a missing entity".into()))?;

        let mut position_index: HashMap<GridPos, EntityId> = HashMap::new();
        for (id, particle) in &particle_map {
            for node in particle.shape().nodes() {
                if let Some(other) = position_index.insert(node, EntityId::Particle(id)) {
                    return Err(SnapshotError::Corrupt(format!(
                        "{other:?} and {:?} both occupy {node:?}",
                        EntityId::Particle(id)
                    )));
                }
            }
        }
        for (id, object) in &object_map {
            for node in object.nodes() {
                if let Some(other) = position_index.insert(node, EntityId::Object(id)) {
                    return Err(SnapshotError::Corrupt(format!(
                        "{other:?} and {:?} both occupy {node:?}",
                        EntityId::Object(id)
                    )));
                }
            }
        }

        // Markers are kept in lockstep across every history; a snapshot
        // where they diverge or outrun the committed round was not produced
        // by this engine.
        let marker = match particle_map.values().next() {
            Some(particle) => particle.marker_round(),
            None => match object_map.values().next() {
                Some(object) => object.origin().marker(),
                None => unreachable!("entity emptiness was validated above"),
            },
        };
        if marker > committed {
            return Err(SnapshotError::Corrupt(format!(
                "marker round {marker} is past the committed round {committed}"
            )));
        }
        for (_, particle) in &particle_map {
            if !particle.markers_at(marker) {
                return Err(SnapshotError::Corrupt(format!(
                    "particle {} carries markers diverging from round {marker}",
                    particle.index()
                )));
            }
        }
        for (_, object) in &object_map {
            if object.origin().marker() != marker {
                return Err(SnapshotError::Corrupt(format!(
                    "object {} carries a marker diverging from round {marker}",
                    object.index()
                )));
            }
        }

        let mut system = ParticleSystem {
            particles: particle_map,
            objects: object_map,
            position_index,
            anchor,
            pins_per_edge,
            algorithm,
            clock: RoundClock { current: committed, committed },
            phase: Phase::Idle,
            terminated: false,
        };
        system.terminated = system.all_finished();
        log::debug!(
            "restored snapshot at round {committed}: {} particles, {} objects",
            system.particle_count(),
            system.object_count()
        );
        Ok(system)
    }

    /// Frames the snapshot as bytes: header, then the bitcode payload.
    pub fn serialize(&self) -> Result<Vec<u8>, SnapshotError> {
        let snapshot = self.snapshot();
        let payload =
            bitcode::serialize(&snapshot).map_err(|err| SnapshotError::Encode(err.to_string()))?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&snapshot.committed.to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Restores a session from framed bytes produced by [`Self::serialize`].
    pub fn deserialize(
        bytes: &[u8],
        algorithm: Box<dyn Algorithm>,
    ) -> Result<ParticleSystem, SnapshotError> {
        let header = read_header(bytes)?;
        let snapshot: SystemSnapshot = bitcode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|err| SnapshotError::Decode(err.to_string()))?;
        if snapshot.committed != header.round {
            return Err(SnapshotError::Corrupt(
                "header round disagrees with the payload".into(),
            ));
        }
        ParticleSystem::from_snapshot(snapshot, algorithm)
    }

    /// FNV-1a hash over the full session state.
    ///
    /// Two systems with identical histories hash identically, so this backs
    /// cheap determinism and rollback-atomicity checks.
    pub fn state_hash(&self) -> u64 {
        let mut hash = StateHash::new();
        write_system(&mut hash, &self.snapshot());
        hash.finish()
    }
}

// ---------------------------------------------------------------------------
// State hashing
// ---------------------------------------------------------------------------

/// Incremental FNV-1a hasher for determinism checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHash(pub u64);

impl StateHash {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    pub fn new() -> StateHash {
        StateHash(Self::FNV_OFFSET)
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= byte as u64;
            self.0 = self.0.wrapping_mul(Self::FNV_PRIME);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write(&v.to_le_bytes());
    }

    pub fn finish(self) -> u64 {
        self.0
    }
}

impl Default for StateHash {
    fn default() -> Self {
        Self::new()
    }
}

fn write_system(hash: &mut StateHash, snapshot: &SystemSnapshot) {
    write_str(hash, &snapshot.algorithm);
    hash.write_u8(snapshot.pins_per_edge);
    hash.write_u64(snapshot.committed);
    match snapshot.anchor {
        AnchorRef::Particle(index) => {
            hash.write_u8(0);
            hash.write_u64(index as u64);
        }
        AnchorRef::Object(index) => {
            hash.write_u8(1);
            hash.write_u64(index as u64);
        }
    }
    hash.write_u64(snapshot.particles.len() as u64);
    for particle in &snapshot.particles {
        write_particle(hash, particle);
    }
    hash.write_u64(snapshot.objects.len() as u64);
    for object in &snapshot.objects {
        write_object(hash, object);
    }
}

fn write_particle(hash: &mut StateHash, particle: &ParticleSnapshot) {
    hash.write_u64(particle.index as u64);
    hash.write_u8(particle.chirality as u8);
    hash.write_u8(particle.compass.index());
    write_history(hash, &particle.head, |h, &pos| write_pos(h, pos));
    write_history(hash, &particle.expansion, write_dir_opt);
    for flags in &particle.bond_flags {
        write_history(hash, flags, |h, &flag| h.write_u8(flag as u8));
    }
    write_history(hash, &particle.automatic_bonds, |h, &flag| h.write_u8(flag as u8));
    write_history(hash, &particle.pin_config, write_config);
    hash.write_u64(particle.attributes.len() as u64);
    for attr in &particle.attributes {
        write_str(hash, &attr.name);
        hash.write_u8(attr.kind as u8);
        write_history(hash, &attr.history, write_value);
    }
}

fn write_object(hash: &mut StateHash, object: &ObjectSnapshot) {
    hash.write_u64(object.index as u64);
    write_history(hash, &object.origin, |h, &pos| write_pos(h, pos));
    hash.write_u64(object.shape.len() as u64);
    for offset in &object.shape {
        hash.write_i32(offset.x);
        hash.write_i32(offset.y);
    }
}

fn write_history<T>(
    hash: &mut StateHash,
    history: &HistorySnapshot<T>,
    mut value: impl FnMut(&mut StateHash, &T),
) {
    hash.write_u64(history.rounds.len() as u64);
    for (&round, entry) in history.rounds.iter().zip(&history.values) {
        hash.write_u64(round);
        value(hash, entry);
    }
    hash.write_u64(history.marker);
}

fn write_pos(hash: &mut StateHash, pos: GridPos) {
    hash.write_i32(pos.x);
    hash.write_i32(pos.y);
}

fn write_dir_opt(hash: &mut StateHash, dir: &Option<Direction>) {
    match dir {
        Some(dir) => hash.write_u8(dir.index() + 1),
        None => hash.write_u8(0),
    }
}

fn write_config(hash: &mut StateHash, config: &PinConfiguration) {
    hash.write_u8(config.pins_per_edge());
    write_dir_opt(hash, &config.expansion());
    hash.write_u64(config.set_count() as u64);
    for set in config.sets() {
        hash.write_u64(set.pins().len() as u64);
        for &pin in set.pins() {
            hash.write_u32(pin as u32);
        }
        hash.write_u8(set.beep as u8);
        write_message_opt(hash, set.message);
        write_color_opt(hash, set.color_override);
        hash.write_u8(set.received_beep as u8);
        write_message_opt(hash, set.received_message);
        write_color_opt(hash, set.color);
    }
}

fn write_message_opt(hash: &mut StateHash, message: Option<Message>) {
    match message {
        Some(message) => {
            hash.write_u8(1);
            hash.write_i32(message.priority);
            hash.write_u32(message.tag);
            hash.write_i64(message.value);
        }
        None => hash.write_u8(0),
    }
}

fn write_color_opt(hash: &mut StateHash, color: Option<Rgb>) {
    match color {
        Some(color) => {
            hash.write_u8(1);
            hash.write(&color);
        }
        None => hash.write_u8(0),
    }
}

fn write_value(hash: &mut StateHash, value: &AttrValue) {
    match value {
        AttrValue::Int(v) => {
            hash.write_u8(0);
            hash.write_i64(*v);
        }
        AttrValue::Float(v) => {
            hash.write_u8(1);
            hash.write_u64(v.to_bits());
        }
        AttrValue::Bool(v) => {
            hash.write_u8(2);
            hash.write_u8(*v as u8);
        }
        AttrValue::Str(v) => {
            hash.write_u8(3);
            write_str(hash, v);
        }
        AttrValue::Dir(v) => {
            hash.write_u8(4);
            write_dir_opt(hash, v);
        }
        AttrValue::EnumIdx(v) => {
            hash.write_u8(5);
            hash.write_u32(*v);
        }
        AttrValue::PinConfig(v) => {
            hash.write_u8(6);
            write_config(hash, v);
        }
    }
}

fn write_str(hash: &mut StateHash, s: &str) {
    hash.write_u64(s.len() as u64);
    hash.write(s.as_bytes());
}

// ===========================================================================
// Tests
// ===========================================================================
