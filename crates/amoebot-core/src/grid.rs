//! Triangular-lattice geometry: positions, directions, and edge labels.
//!
//! Positions use axial integer coordinates. The six cardinal directions are
//! 60 degrees apart, counted counter-clockwise from East; the twelve
//! half-directions refine them to 30-degree steps for sub-hex placement.
//!
//! Every particle also has a private coordinate frame given by its compass
//! direction (the global direction it calls local East) and its chirality
//! (whether local rotation follows the global counter-clockwise sense).
//! [`local_to_global`] and [`global_to_local`] translate between the frames.
//!
//! Edge labels enumerate the boundary edges of a particle shape: 0..6 for a
//! contracted particle (label == local direction), 0..10 for an expanded one,
//! counted counter-clockwise starting from the head edge in the expansion
//! direction.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub};

// ---------------------------------------------------------------------------
// Directions
// ---------------------------------------------------------------------------

/// One of the six lattice directions, counter-clockwise from East.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// East: +x.
    E,
    /// North-north-east: +y.
    Nne,
    /// North-north-west: -x +y.
    Nnw,
    /// West: -x.
    W,
    /// South-south-west: -y.
    Ssw,
    /// South-south-east: +x -y.
    Sse,
}

/// All six directions in index order.
pub const DIRECTIONS: [Direction; 6] = [
    Direction::E,
    Direction::Nne,
    Direction::Nnw,
    Direction::W,
    Direction::Ssw,
    Direction::Sse,
];

impl Direction {
    /// The direction's index, 0..6 counter-clockwise from East.
    pub fn index(self) -> u8 {
        match self {
            Direction::E => 0,
            Direction::Nne => 1,
            Direction::Nnw => 2,
            Direction::W => 3,
            Direction::Ssw => 4,
            Direction::Sse => 5,
        }
    }

    /// The direction with the given index, reduced modulo 6.
    pub fn from_index(index: u8) -> Direction {
        DIRECTIONS[(index % 6) as usize]
    }

    /// The opposing direction (rotation by 180 degrees).
    pub fn opposite(self) -> Direction {
        self.rotated_by(3)
    }

    /// Rotates by `steps` 60-degree increments, counter-clockwise when
    /// positive.
    pub fn rotated_by(self, steps: i32) -> Direction {
        let index = (self.index() as i32 + steps).rem_euclid(6);
        Direction::from_index(index as u8)
    }

    /// The unit displacement of one step in this direction.
    pub fn offset(self) -> GridOffset {
        match self {
            Direction::E => GridOffset { x: 1, y: 0 },
            Direction::Nne => GridOffset { x: 0, y: 1 },
            Direction::Nnw => GridOffset { x: -1, y: 1 },
            Direction::W => GridOffset { x: -1, y: 0 },
            Direction::Ssw => GridOffset { x: 0, y: -1 },
            Direction::Sse => GridOffset { x: 1, y: -1 },
        }
    }

    /// This direction as a half-direction (even indices are cardinal).
    pub fn half(self) -> HalfDir {
        HalfDir(self.index() * 2)
    }
}

/// One of the twelve 30-degree directions; even values coincide with the
/// cardinal [`Direction`]s, odd values point at the corners between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HalfDir(u8);

impl HalfDir {
    /// The half-direction with the given index, reduced modulo 12.
    pub fn new(index: u8) -> HalfDir {
        HalfDir(index % 12)
    }

    /// Index in 0..12, counter-clockwise from East.
    pub fn index(self) -> u8 {
        self.0
    }

    /// The opposing half-direction.
    pub fn opposite(self) -> HalfDir {
        self.rotated_by(6)
    }

    /// Rotates by `steps` 30-degree increments, counter-clockwise when
    /// positive.
    pub fn rotated_by(self, steps: i32) -> HalfDir {
        HalfDir((self.0 as i32 + steps).rem_euclid(12) as u8)
    }

    /// True if this half-direction coincides with a cardinal direction.
    pub fn is_cardinal(self) -> bool {
        self.0 % 2 == 0
    }

    /// The cardinal direction this refines, if it is one.
    pub fn cardinal(self) -> Option<Direction> {
        if self.is_cardinal() {
            Some(Direction::from_index(self.0 / 2))
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Chirality and coordinate frames
// ---------------------------------------------------------------------------

/// Fixed per-particle handedness: whether local rotation follows the global
/// counter-clockwise sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chirality {
    CounterClockwise,
    Clockwise,
}

/// Maps a particle-local direction to the global frame.
///
/// Local East always maps to the compass direction; further local rotation
/// runs with or against the global counter-clockwise sense depending on
/// chirality.
pub fn local_to_global(chirality: Chirality, compass: Direction, local: Direction) -> Direction {
    match chirality {
        Chirality::CounterClockwise => compass.rotated_by(local.index() as i32),
        Chirality::Clockwise => compass.rotated_by(-(local.index() as i32)),
    }
}

/// Maps a global direction into a particle's local frame; inverse of
/// [`local_to_global`].
pub fn global_to_local(chirality: Chirality, compass: Direction, global: Direction) -> Direction {
    let diff = global.index() as i32 - compass.index() as i32;
    match chirality {
        Chirality::CounterClockwise => Direction::from_index(diff.rem_euclid(6) as u8),
        Chirality::Clockwise => Direction::from_index((-diff).rem_euclid(6) as u8),
    }
}

// ---------------------------------------------------------------------------
// Positions and offsets
// ---------------------------------------------------------------------------

/// A node of the triangular lattice in axial coordinates.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

/// A displacement between two lattice nodes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridOffset {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub const ORIGIN: GridPos = GridPos { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> GridPos {
        GridPos { x, y }
    }

    /// The adjacent node one step in `dir`.
    pub fn neighbor(self, dir: Direction) -> GridPos {
        self + dir.offset()
    }

    /// All six adjacent nodes, in direction-index order.
    pub fn neighbors(self) -> [GridPos; 6] {
        DIRECTIONS.map(|d| self.neighbor(d))
    }

    /// The direction from `self` to an adjacent node, if it is adjacent.
    pub fn direction_to(self, other: GridPos) -> Option<Direction> {
        let delta = other - self;
        DIRECTIONS.into_iter().find(|d| d.offset() == delta)
    }

    /// Lattice distance (minimum number of unit steps).
    pub fn distance(self, other: GridPos) -> u32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = -dx - dy;
        (dx.unsigned_abs() + dy.unsigned_abs() + dz.unsigned_abs()) / 2
    }

    pub fn is_adjacent(self, other: GridPos) -> bool {
        self.distance(other) == 1
    }
}

impl GridOffset {
    pub const ZERO: GridOffset = GridOffset { x: 0, y: 0 };

    pub fn is_zero(self) -> bool {
        self == GridOffset::ZERO
    }
}

impl Add<GridOffset> for GridPos {
    type Output = GridPos;
    fn add(self, rhs: GridOffset) -> GridPos {
        GridPos { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl AddAssign<GridOffset> for GridPos {
    fn add_assign(&mut self, rhs: GridOffset) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for GridPos {
    type Output = GridOffset;
    fn sub(self, rhs: GridPos) -> GridOffset {
        GridOffset { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl Add for GridOffset {
    type Output = GridOffset;
    fn add(self, rhs: GridOffset) -> GridOffset {
        GridOffset { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl Sub for GridOffset {
    type Output = GridOffset;
    fn sub(self, rhs: GridOffset) -> GridOffset {
        GridOffset { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl Neg for GridOffset {
    type Output = GridOffset;
    fn neg(self) -> GridOffset {
        GridOffset { x: -self.x, y: -self.y }
    }
}

// ---------------------------------------------------------------------------
// Edge labels
// ---------------------------------------------------------------------------

/// One of the two nodes of a particle shape. A contracted particle's head and
/// tail coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyPart {
    Head,
    Tail,
}

impl BodyPart {
    pub fn opposite(self) -> BodyPart {
        match self {
            BodyPart::Head => BodyPart::Tail,
            BodyPart::Tail => BodyPart::Head,
        }
    }
}

/// Number of edge labels for a shape: 6 contracted, 10 expanded.
pub const CONTRACTED_LABELS: u8 = 6;
pub const EXPANDED_LABELS: u8 = 10;
pub const MAX_LABELS: usize = EXPANDED_LABELS as usize;

/// Number of boundary-edge labels for the given expansion state.
pub fn label_count(expanded: bool) -> u8 {
    if expanded { EXPANDED_LABELS } else { CONTRACTED_LABELS }
}

/// Label layout around an expanded shape, as (body part, direction step
/// relative to the expansion direction), counter-clockwise from the head's
/// expansion-direction edge.
const EXPANDED_LAYOUT: [(BodyPart, u8); 10] = [
    (BodyPart::Head, 0),
    (BodyPart::Head, 1),
    (BodyPart::Head, 2),
    (BodyPart::Tail, 1),
    (BodyPart::Tail, 2),
    (BodyPart::Tail, 3),
    (BodyPart::Tail, 4),
    (BodyPart::Tail, 5),
    (BodyPart::Head, 4),
    (BodyPart::Head, 5),
];

/// The body part a label belongs to. `expansion` is the local expansion
/// direction (`None` for a contracted shape, where every label is on the
/// single node). Labels outside the shape's range return `None`.
pub fn label_part(label: u8, expansion: Option<Direction>) -> Option<BodyPart> {
    match expansion {
        None if label < CONTRACTED_LABELS => Some(BodyPart::Head),
        None => None,
        Some(_) if label < EXPANDED_LABELS => Some(EXPANDED_LAYOUT[label as usize].0),
        Some(_) => None,
    }
}

/// The local direction a label's edge points in. `expansion` as in
/// [`label_part`].
pub fn label_direction(label: u8, expansion: Option<Direction>) -> Option<Direction> {
    match expansion {
        None if label < CONTRACTED_LABELS => Some(Direction::from_index(label)),
        None => None,
        Some(ed) if label < EXPANDED_LABELS => {
            let (_, step) = EXPANDED_LAYOUT[label as usize];
            Some(ed.rotated_by(step as i32))
        }
        Some(_) => None,
    }
}

/// The label of the edge leaving `part` in local direction `dir`, if that
/// edge is on the shape boundary. The head has no edge toward the tail and
/// vice versa.
pub fn label_at(part: BodyPart, dir: Direction, expansion: Option<Direction>) -> Option<u8> {
    match expansion {
        None => Some(dir.index()),
        Some(ed) => {
            let step = (dir.index() as i32 - ed.index() as i32).rem_euclid(6) as u8;
            EXPANDED_LAYOUT
                .iter()
                .position(|&(p, s)| p == part && s == step)
                .map(|i| i as u8)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
