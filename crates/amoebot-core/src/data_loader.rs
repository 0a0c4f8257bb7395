//! Data-driven world loading from JSON.
//!
//! Feature-gated behind `data-loader`. Provides JSON deserialization into
//! [`SystemBuilder`] for hosts that define worlds in data files.

use crate::algorithm::Algorithm;
use crate::grid::{Chirality, Direction, GridPos};
use crate::system::{ParticleSystem, SetupError, SystemBuilder};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during world loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("world setup error: {0}")]
    Setup(#[from] SetupError),
    #[error("unknown chirality: {0:?}")]
    UnknownChirality(String),
    #[error("unknown direction: {0:?}")]
    UnknownDirection(String),
}

// ---------------------------------------------------------------------------
// JSON data structures
// ---------------------------------------------------------------------------

/// Top-level world description for JSON deserialization.
#[derive(Debug, serde::Deserialize)]
pub struct WorldData {
    #[serde(default = "default_pins")]
    pub pins_per_edge: u8,
    #[serde(default)]
    pub particles: Vec<ParticleData>,
    #[serde(default)]
    pub objects: Vec<ObjectData>,
    #[serde(default)]
    pub anchor: Option<AnchorData>,
}

fn default_pins() -> u8 {
    1
}

/// JSON representation of one contracted particle placement.
#[derive(Debug, serde::Deserialize)]
pub struct ParticleData {
    /// Axial grid coordinates.
    pub position: [i32; 2],
    /// "clockwise" or "counterclockwise"; counterclockwise when omitted.
    #[serde(default)]
    pub chirality: Option<String>,
    /// Local-east direction: "e", "nne", "nnw", "w", "ssw", "sse"; east
    /// when omitted.
    #[serde(default)]
    pub compass: Option<String>,
}

/// JSON representation of one object.
#[derive(Debug, serde::Deserialize)]
pub struct ObjectData {
    /// The occupied nodes, in axial coordinates.
    pub nodes: Vec<[i32; 2]>,
}

/// JSON representation of the anchor choice, by creation index.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorData {
    Particle(usize),
    Object(usize),
}

// ---------------------------------------------------------------------------
// Loading functions
// ---------------------------------------------------------------------------

/// Load a world description from a JSON string.
pub fn load_world_json(json: &str) -> Result<SystemBuilder, DataLoadError> {
    let data: WorldData = serde_json::from_str(json)?;
    build_world(data)
}

/// Load a world description from JSON bytes.
pub fn load_world_json_bytes(bytes: &[u8]) -> Result<SystemBuilder, DataLoadError> {
    let data: WorldData = serde_json::from_slice(bytes)?;
    build_world(data)
}

/// Load a world description and start it under `algorithm`.
pub fn start_world_json(
    json: &str,
    algorithm: Box<dyn Algorithm>,
) -> Result<ParticleSystem, DataLoadError> {
    let builder = load_world_json(json)?;
    Ok(builder.start(algorithm)?)
}

fn parse_chirality(name: &str) -> Result<Chirality, DataLoadError> {
    match name {
        "clockwise" => Ok(Chirality::Clockwise),
        "counterclockwise" => Ok(Chirality::CounterClockwise),
        other => Err(DataLoadError::UnknownChirality(other.to_string())),
    }
}

fn parse_direction(name: &str) -> Result<Direction, DataLoadError> {
    match name {
        "e" => Ok(Direction::E),
        "nne" => Ok(Direction::Nne),
        "nnw" => Ok(Direction::Nnw),
        "w" => Ok(Direction::W),
        "ssw" => Ok(Direction::Ssw),
        "sse" => Ok(Direction::Sse),
        other => Err(DataLoadError::UnknownDirection(other.to_string())),
    }
}

fn build_world(data: WorldData) -> Result<SystemBuilder, DataLoadError> {
    let mut builder = SystemBuilder::new();
    builder.pins_per_edge(data.pins_per_edge);

    for particle in &data.particles {
        let chirality =
            parse_chirality(particle.chirality.as_deref().unwrap_or("counterclockwise"))?;
        let compass = parse_direction(particle.compass.as_deref().unwrap_or("e"))?;
        builder.add_particle(
            GridPos::new(particle.position[0], particle.position[1]),
            chirality,
            compass,
        );
    }

    for object in &data.objects {
        let nodes: Vec<GridPos> =
            object.nodes.iter().map(|&[x, y]| GridPos::new(x, y)).collect();
        builder.add_object(&nodes);
    }

    match data.anchor {
        Some(AnchorData::Particle(index)) => {
            builder.anchor_particle(index);
        }
        Some(AnchorData::Object(index)) => {
            builder.anchor_object(index);
        }
        None => {}
    }

    Ok(builder)
}

// ===========================================================================
// Tests
// ===========================================================================
