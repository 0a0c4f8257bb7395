//! Pin configurations: how a particle wires its boundary pins together.
//!
//! Each boundary edge of a particle carries `pins_per_edge` pins. A pin
//! configuration partitions all of a shape's pins into disjoint partition
//! sets; pins in one set are electrically joined inside the particle. Where
//! two particles share an edge their facing pins touch, so partition sets
//! chain into system-wide circuits (built in [`crate::circuits`]).
//!
//! Pins are identified locally as `label * pins_per_edge + offset`. Local
//! offsets are chirality-relative; [`geometric_position`] maps them onto the
//! shared edge so that both endpoints of an edge agree on which pins touch.
//!
//! A configuration also carries the transient signal state for one round:
//! beeps and messages scheduled on each set, and those received by it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::{Direction, label_count};

/// A local pin identifier: `label * pins_per_edge + offset`.
pub type PinId = u16;

/// An RGB display color.
pub type Rgb = [u8; 3];

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error("pin {pin} out of range for a shape with {count} pins")]
    PinOutOfRange { pin: PinId, count: PinId },

    #[error("partition set {set} out of range ({count} sets)")]
    SetOutOfRange { set: usize, count: usize },
}

// ---------------------------------------------------------------------------
// Pin identifiers
// ---------------------------------------------------------------------------

/// The pin id of `offset` on the edge with `label`.
pub fn pin_id(label: u8, offset: u8, pins_per_edge: u8) -> PinId {
    label as PinId * pins_per_edge as PinId + offset as PinId
}

/// The edge label a pin sits on.
pub fn pin_label(pin: PinId, pins_per_edge: u8) -> u8 {
    (pin / pins_per_edge as PinId) as u8
}

/// The pin's offset along its edge, in the particle's local order.
pub fn pin_offset(pin: PinId, pins_per_edge: u8) -> u8 {
    (pin % pins_per_edge as PinId) as u8
}

/// The chirality-independent position of a local pin offset along its edge.
///
/// Both particles sharing an edge compute positions in the same global sense,
/// so position `i` on one side touches position `pins_per_edge - 1 - i` seen
/// from the other side ([`facing_position`]). The mapping is its own inverse,
/// so it also converts geometric positions back to local offsets.
pub fn geometric_position(
    chirality: crate::grid::Chirality,
    offset: u8,
    pins_per_edge: u8,
) -> u8 {
    match chirality {
        crate::grid::Chirality::CounterClockwise => offset,
        crate::grid::Chirality::Clockwise => pins_per_edge - 1 - offset,
    }
}

/// The geometric position across the shared edge that touches `position`.
pub fn facing_position(position: u8, pins_per_edge: u8) -> u8 {
    pins_per_edge - 1 - position
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A payload carried on a circuit alongside a beep.
///
/// When several particles send on the same circuit in one round, the message
/// with the strictly highest priority is delivered; on a priority tie an
/// arbitrary but deterministic sender wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub priority: i32,
    pub tag: u32,
    pub value: i64,
}

impl Message {
    pub fn new(priority: i32, tag: u32, value: i64) -> Message {
        Message { priority, tag, value }
    }
}

// ---------------------------------------------------------------------------
// Partition sets
// ---------------------------------------------------------------------------

/// A group of pins joined inside one particle, plus its per-round signal
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionSet {
    /// Member pins, sorted ascending.
    pins: Vec<PinId>,
    /// Beep scheduled for sending this round.
    pub beep: bool,
    /// Message scheduled for sending this round.
    pub message: Option<Message>,
    /// Requested display color for the whole circuit this set joins.
    pub color_override: Option<Rgb>,
    /// Beep heard on the set's circuit last resolution.
    pub received_beep: bool,
    /// Message delivered on the set's circuit last resolution.
    pub received_message: Option<Message>,
    /// Display color assigned to the set's circuit last resolution.
    pub color: Option<Rgb>,
}

impl PartitionSet {
    fn new(mut pins: Vec<PinId>) -> PartitionSet {
        pins.sort_unstable();
        PartitionSet {
            pins,
            beep: false,
            message: None,
            color_override: None,
            received_beep: false,
            received_message: None,
            color: None,
        }
    }

    /// Member pins, ascending.
    pub fn pins(&self) -> &[PinId] {
        &self.pins
    }

    pub fn contains(&self, pin: PinId) -> bool {
        self.pins.binary_search(&pin).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Pin configurations
// ---------------------------------------------------------------------------

/// A complete partition of a shape's pins, laid out for one expansion state.
///
/// `expansion` is the particle's local expansion direction the configuration
/// was built for; a configuration only fits a particle whose expansion state
/// matches, because the pin count and edge labels depend on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinConfiguration {
    pins_per_edge: u8,
    expansion: Option<Direction>,
    sets: Vec<PartitionSet>,
    /// Dense map from pin id to index in `sets`.
    pin_to_set: Vec<usize>,
}

impl PinConfiguration {
    /// The default configuration: every pin in its own singleton set.
    pub fn singleton(pins_per_edge: u8, expansion: Option<Direction>) -> PinConfiguration {
        let count = Self::count(pins_per_edge, expansion);
        PinConfiguration {
            pins_per_edge,
            expansion,
            sets: (0..count).map(|p| PartitionSet::new(vec![p])).collect(),
            pin_to_set: (0..count as usize).collect(),
        }
    }

    /// All pins joined in a single set.
    pub fn fully_connected(pins_per_edge: u8, expansion: Option<Direction>) -> PinConfiguration {
        let count = Self::count(pins_per_edge, expansion);
        PinConfiguration {
            pins_per_edge,
            expansion,
            sets: vec![PartitionSet::new((0..count).collect())],
            pin_to_set: vec![0; count as usize],
        }
    }

    fn count(pins_per_edge: u8, expansion: Option<Direction>) -> PinId {
        label_count(expansion.is_some()) as PinId * pins_per_edge as PinId
    }

    pub fn pins_per_edge(&self) -> u8 {
        self.pins_per_edge
    }

    /// The local expansion direction this configuration is laid out for.
    pub fn expansion(&self) -> Option<Direction> {
        self.expansion
    }

    /// Total number of pins on the shape.
    pub fn pin_count(&self) -> PinId {
        self.pin_to_set.len() as PinId
    }

    /// True if this configuration fits a shape in the given expansion state.
    pub fn fits(&self, expansion: Option<Direction>) -> bool {
        self.expansion == expansion
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn sets(&self) -> &[PartitionSet] {
        &self.sets
    }

    /// The partition set a pin belongs to.
    pub fn set_of(&self, pin: PinId) -> Result<usize, PinError> {
        self.pin_to_set
            .get(pin as usize)
            .copied()
            .ok_or(PinError::PinOutOfRange { pin, count: self.pin_count() })
    }

    pub fn set(&self, set: usize) -> Result<&PartitionSet, PinError> {
        self.sets
            .get(set)
            .ok_or(PinError::SetOutOfRange { set, count: self.sets.len() })
    }

    pub fn set_mut(&mut self, set: usize) -> Result<&mut PartitionSet, PinError> {
        let count = self.sets.len();
        self.sets
            .get_mut(set)
            .ok_or(PinError::SetOutOfRange { set, count })
    }

    /// Merges the sets containing the given pins into one.
    ///
    /// The merged set keeps the position (and scheduled signals) of the
    /// earliest involved set; later sets are removed and their pins folded
    /// in. Connecting fewer than two distinct sets is a no-op.
    pub fn connect(&mut self, pins: &[PinId]) -> Result<(), PinError> {
        let mut involved = Vec::new();
        for &pin in pins {
            let set = self.set_of(pin)?;
            if !involved.contains(&set) {
                involved.push(set);
            }
        }
        if involved.len() < 2 {
            return Ok(());
        }
        involved.sort_unstable();
        let target = involved[0];

        // Fold later sets into the first, highest index first so removal
        // does not shift the ones still pending.
        for &set in involved[1..].iter().rev() {
            let removed = self.sets.remove(set);
            self.sets[target].pins.extend(removed.pins);
            self.sets[target].beep |= removed.beep;
            if self.sets[target].message.is_none() {
                self.sets[target].message = removed.message;
            }
            if self.sets[target].color_override.is_none() {
                self.sets[target].color_override = removed.color_override;
            }
        }
        self.sets[target].pins.sort_unstable();

        // Rebuild the dense pin map from the surviving sets.
        for (idx, set) in self.sets.iter().enumerate() {
            for &pin in &set.pins {
                self.pin_to_set[pin as usize] = idx;
            }
        }
        Ok(())
    }

    /// Clears scheduled sends and received signals on every set, leaving
    /// only the partition structure and color overrides.
    pub fn clear_signals(&mut self) {
        for set in &mut self.sets {
            set.beep = false;
            set.message = None;
            set.received_beep = false;
            set.received_message = None;
            set.color = None;
        }
    }

    /// Clears only the scheduled sends, keeping received signals readable.
    pub fn clear_sends(&mut self) {
        for set in &mut self.sets {
            set.beep = false;
            set.message = None;
        }
    }

    /// True if any set has a beep or message scheduled.
    pub fn has_scheduled_sends(&self) -> bool {
        self.sets.iter().any(|s| s.beep || s.message.is_some())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
