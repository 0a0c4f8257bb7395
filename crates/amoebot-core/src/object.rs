//! Passive objects: connected clumps of occupied nodes.
//!
//! Objects never activate. They hold their nodes, always accept bonds on
//! every boundary edge, and move only when joint movement drags the whole
//! clump along. Shape is fixed at creation; only the origin node is
//! historied.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{GridOffset, GridPos};
use crate::history::{History, HistoryError, HistorySnapshot, Round};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("an object needs at least one node")]
    EmptyShape,

    #[error("node {node:?} appears twice in the object shape")]
    DuplicateNode { node: GridPos },

    #[error("object shape is not connected")]
    DisconnectedShape,

    #[error("object snapshot is corrupt: {0}")]
    CorruptSnapshot(String),
}

/// Splits a node list into an origin and connected, duplicate-free offsets.
///
/// The first node becomes the origin. Fails on duplicates or if the nodes do
/// not form one connected component under lattice adjacency.
pub fn normalize_shape(nodes: &[GridPos]) -> Result<(GridPos, Vec<GridOffset>), ObjectError> {
    let origin = *nodes.first().ok_or(ObjectError::EmptyShape)?;
    let mut offsets = Vec::with_capacity(nodes.len());
    for &node in nodes {
        let offset = node - origin;
        if offsets.contains(&offset) {
            return Err(ObjectError::DuplicateNode { node });
        }
        offsets.push(offset);
    }

    // Flood fill from the origin over the offset set.
    let mut seen = vec![false; offsets.len()];
    let mut queue = vec![0usize];
    seen[0] = true;
    while let Some(idx) = queue.pop() {
        let here = origin + offsets[idx];
        for neighbor in here.neighbors() {
            let delta = neighbor - origin;
            if let Some(other) = offsets.iter().position(|&o| o == delta) {
                if !seen[other] {
                    seen[other] = true;
                    queue.push(other);
                }
            }
        }
    }
    if seen.iter().all(|&s| s) {
        Ok((origin, offsets))
    } else {
        Err(ObjectError::DisconnectedShape)
    }
}

// ---------------------------------------------------------------------------
// Objects
// ---------------------------------------------------------------------------

/// One passive object. `index` is its stable creation index.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    index: usize,
    origin: History<GridPos>,
    shape: Vec<GridOffset>,
}

impl Object {
    /// Builds an object occupying `nodes`, validated as one connected shape.
    pub fn new(index: usize, nodes: &[GridPos], round: Round) -> Result<Object, ObjectError> {
        let (origin, shape) = normalize_shape(nodes)?;
        Ok(Object { index, origin: History::new(origin, round), shape })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn origin(&self) -> &History<GridPos> {
        &self.origin
    }

    pub(crate) fn origin_mut(&mut self) -> &mut History<GridPos> {
        &mut self.origin
    }

    /// Moves the rollback marker to `round`.
    pub(crate) fn sync_marker(&mut self, round: Round) {
        match self.origin.set_marker(round) {
            Ok(()) => {}
            Err(err) => unreachable!("object marker cannot be synced: {err}"),
        }
    }

    /// Discards everything recorded after the marker.
    pub(crate) fn cut_at_marker(&mut self) {
        self.origin.cut_at_marker();
    }

    /// Rebases the origin history by `delta` rounds.
    ///
    /// Panics if a shifted round leaves the valid range; callers validate
    /// the extreme rounds first.
    pub(crate) fn shift_timescale(&mut self, delta: i64) {
        match self.origin.shift_timescale(delta) {
            Ok(()) => {}
            Err(err) => unreachable!("timescale shift was not validated: {err}"),
        }
    }

    /// Number of nodes the object occupies.
    pub fn node_count(&self) -> usize {
        self.shape.len()
    }

    /// The object's nodes in their current position.
    pub fn nodes(&self) -> impl Iterator<Item = GridPos> + '_ {
        let origin = *self.origin.latest();
        self.shape.iter().map(move |&offset| origin + offset)
    }

    /// The object's nodes as of `round`.
    pub fn nodes_at(&self, round: Round) -> Result<Vec<GridPos>, HistoryError> {
        let origin = *self.origin.value_at(round)?;
        Ok(self.shape.iter().map(|&offset| origin + offset).collect())
    }

    pub fn occupies(&self, node: GridPos) -> bool {
        let origin = *self.origin.latest();
        self.shape.iter().any(|&offset| origin + offset == node)
    }

    /// Displaces the whole object, recording the new origin at `round`.
    pub(crate) fn displace(&mut self, offset: GridOffset, round: Round) -> Result<(), HistoryError> {
        let origin = *self.origin.latest();
        self.origin.record(origin + offset, round)
    }

    pub fn to_snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            index: self.index,
            origin: self.origin.to_snapshot(),
            shape: self.shape.clone(),
        }
    }

    pub fn from_snapshot(snapshot: ObjectSnapshot) -> Result<Object, ObjectError> {
        let ObjectSnapshot { index, origin, shape } = snapshot;
        let origin = History::from_snapshot(origin)
            .map_err(|err| ObjectError::CorruptSnapshot(format!("{err}")))?;
        // Re-validate the shape relative to an arbitrary origin.
        let sample = *origin.latest();
        let nodes: Vec<GridPos> = shape.iter().map(|&o| sample + o).collect();
        let (_, normalized) = normalize_shape(&nodes)?;
        if normalized != shape {
            return Err(ObjectError::DisconnectedShape);
        }
        Ok(Object { index, origin, shape })
    }
}

/// Serializable mirror of an [`Object`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub index: usize,
    pub origin: HistorySnapshot<GridPos>,
    pub shape: Vec<GridOffset>,
}

// ===========================================================================
// Tests
// ===========================================================================
