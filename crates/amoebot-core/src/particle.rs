//! Particles: the active entities of the system.
//!
//! A particle occupies one node (contracted) or two adjacent nodes
//! (expanded, a head and a tail). All of its mutable state is historied per
//! round: head position, expansion state, per-label bond flags, the
//! automatic-bond mode, the pin configuration, and every algorithm
//! attribute. The engine records into these histories when a round commits
//! and cuts them back when it rolls back, so a particle is always exactly
//! reproducible at any committed round.
//!
//! Scheduling state for the round in flight lives in a separate scratch
//! block that is never serialized and is discarded wholesale on rollback.
//!
//! [`Shape`] captures the geometry of a particle at one round — node
//! positions, edge labels, frame conversions — so movement resolution and
//! circuit discovery share one label arithmetic.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attribute::{Attribute, AttributeError, AttributeSnapshot, is_reserved_name};
use crate::grid::{
    BodyPart, Chirality, Direction, GridOffset, GridPos, MAX_LABELS, global_to_local, label_at,
    label_count, label_direction, label_part, local_to_global,
};
use crate::history::{History, HistoryError, HistorySnapshot, Round};
use crate::pins::PinConfiguration;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParticleError {
    #[error("particle snapshot is corrupt: {0}")]
    CorruptSnapshot(String),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error(transparent)]
    Attribute(#[from] AttributeError),
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// A particle's geometry at one round: positions plus the frame needed to
/// resolve edge labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub head: GridPos,
    /// Global tail-to-head direction; `None` when contracted.
    pub expansion: Option<Direction>,
    pub chirality: Chirality,
    pub compass: Direction,
}

impl Shape {
    pub fn is_expanded(&self) -> bool {
        self.expansion.is_some()
    }

    /// The tail node; equals the head when contracted.
    pub fn tail(&self) -> GridPos {
        match self.expansion {
            Some(dir) => self.head + dir.opposite().offset(),
            None => self.head,
        }
    }

    pub fn part_node(&self, part: BodyPart) -> GridPos {
        match part {
            BodyPart::Head => self.head,
            BodyPart::Tail => self.tail(),
        }
    }

    /// The occupied nodes: head, then tail if distinct.
    pub fn nodes(&self) -> impl Iterator<Item = GridPos> {
        let tail = self.expansion.map(|dir| self.head + dir.opposite().offset());
        std::iter::once(self.head).chain(tail)
    }

    pub fn occupies(&self, node: GridPos) -> bool {
        self.nodes().any(|n| n == node)
    }

    /// The expansion direction in the particle's local frame.
    pub fn local_expansion(&self) -> Option<Direction> {
        self.expansion
            .map(|dir| global_to_local(self.chirality, self.compass, dir))
    }

    /// Number of boundary-edge labels in this state.
    pub fn label_count(&self) -> u8 {
        label_count(self.is_expanded())
    }

    pub fn labels(&self) -> impl Iterator<Item = u8> {
        0..self.label_count()
    }

    /// The body part a label's edge leaves from.
    pub fn label_part(&self, label: u8) -> Option<BodyPart> {
        label_part(label, self.local_expansion())
    }

    /// The label's edge direction in the local frame.
    pub fn label_dir_local(&self, label: u8) -> Option<Direction> {
        label_direction(label, self.local_expansion())
    }

    /// The label's edge direction in the global frame.
    pub fn label_dir_global(&self, label: u8) -> Option<Direction> {
        self.label_dir_local(label)
            .map(|dir| local_to_global(self.chirality, self.compass, dir))
    }

    /// The node a label's edge leaves from.
    pub fn label_node(&self, label: u8) -> Option<GridPos> {
        self.label_part(label).map(|part| self.part_node(part))
    }

    /// The node across a label's edge.
    pub fn edge_target(&self, label: u8) -> Option<GridPos> {
        let node = self.label_node(label)?;
        let dir = self.label_dir_global(label)?;
        Some(node + dir.offset())
    }

    /// The label on `part` whose edge points in `global_dir`, if that edge is
    /// on the boundary.
    pub fn label_toward(&self, part: BodyPart, global_dir: Direction) -> Option<u8> {
        let local = global_to_local(self.chirality, self.compass, global_dir);
        label_at(part, local, self.local_expansion())
    }
}

// ---------------------------------------------------------------------------
// Scheduling scratch
// ---------------------------------------------------------------------------

/// A movement scheduled during move activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveIntent {
    /// Expand the head toward a local direction.
    Expand(Direction),
    /// Contract into the given part, vacating the other node.
    Contract(BodyPart),
}

/// Per-round scheduling state. Never serialized; cleared when the round
/// finishes either way.
#[derive(Debug, Clone, Default)]
pub(crate) struct Scratch {
    pub move_intent: Option<MoveIntent>,
    /// Explicit per-label bond overrides for this round.
    pub bond_intents: [Option<bool>; MAX_LABELS],
    pub automatic_intent: Option<bool>,
    pub planned_pin_config: Option<PinConfiguration>,
    /// Movement resolution: displacement of the moving part, the part whose
    /// bonds transmit it, and the system offset assigned by the solver.
    pub move_vec: GridOffset,
    pub moving_part: Option<BodyPart>,
    pub offset: Option<GridOffset>,
    /// True only while this particle's own activation callback runs.
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Particle
// ---------------------------------------------------------------------------

/// One particle. Fields are written by the engine; algorithms act through
/// [`crate::algorithm::ParticleHandle`].
#[derive(Debug, Clone)]
pub struct Particle {
    pub(crate) index: usize,
    pub(crate) chirality: Chirality,
    pub(crate) compass: Direction,
    pub(crate) head: History<GridPos>,
    /// Global tail-to-head direction; `None` while contracted.
    pub(crate) expansion: History<Option<Direction>>,
    /// One independently historied flag per possible label. Labels outside
    /// the current shape keep their default.
    pub(crate) bond_flags: Vec<History<bool>>,
    pub(crate) automatic_bonds: History<bool>,
    pub(crate) pin_config: History<PinConfiguration>,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) scratch: Scratch,
    pub(crate) in_constructor: bool,
    /// Cached finished-hook verdict from the last evaluation; not historied.
    pub(crate) finished: bool,
}

impl Particle {
    /// A contracted particle at `node`, with default-active bonds, automatic
    /// bond handling on, and the singleton pin configuration.
    pub fn new(
        index: usize,
        node: GridPos,
        chirality: Chirality,
        compass: Direction,
        pins_per_edge: u8,
        round: Round,
    ) -> Particle {
        Particle {
            index,
            chirality,
            compass,
            head: History::new(node, round),
            expansion: History::new(None, round),
            bond_flags: (0..MAX_LABELS).map(|_| History::new(true, round)).collect(),
            automatic_bonds: History::new(true, round),
            pin_config: History::new(PinConfiguration::singleton(pins_per_edge, None), round),
            attributes: Vec::new(),
            scratch: Scratch::default(),
            in_constructor: false,
            finished: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn chirality(&self) -> Chirality {
        self.chirality
    }

    pub fn compass(&self) -> Direction {
        self.compass
    }

    // -- geometry -----------------------------------------------------------

    /// The particle's current geometry.
    pub fn shape(&self) -> Shape {
        Shape {
            head: *self.head.latest(),
            expansion: *self.expansion.latest(),
            chirality: self.chirality,
            compass: self.compass,
        }
    }

    /// The particle's geometry as of `round`.
    pub fn shape_at(&self, round: Round) -> Result<Shape, HistoryError> {
        Ok(Shape {
            head: *self.head.value_at(round)?,
            expansion: *self.expansion.value_at(round)?,
            chirality: self.chirality,
            compass: self.compass,
        })
    }

    pub fn is_expanded(&self) -> bool {
        self.expansion.latest().is_some()
    }

    pub fn head_node(&self) -> GridPos {
        *self.head.latest()
    }

    pub fn tail_node(&self) -> GridPos {
        self.shape().tail()
    }

    /// Converts a local direction to the global frame.
    pub fn local_to_global(&self, local: Direction) -> Direction {
        local_to_global(self.chirality, self.compass, local)
    }

    /// Converts a global direction to the particle's local frame.
    pub fn global_to_local(&self, global: Direction) -> Direction {
        global_to_local(self.chirality, self.compass, global)
    }

    // -- bonds --------------------------------------------------------------

    /// The recorded bond flag for a label (default-active for labels the
    /// current shape does not use).
    pub fn bond_flag(&self, label: u8) -> bool {
        self.bond_flags
            .get(label as usize)
            .map(|h| *h.latest())
            .unwrap_or(true)
    }

    pub fn bond_flag_at(&self, label: u8, round: Round) -> Result<bool, HistoryError> {
        match self.bond_flags.get(label as usize) {
            Some(history) => history.value_at(round).copied(),
            None => Ok(true),
        }
    }

    pub fn automatic_bonds(&self) -> bool {
        *self.automatic_bonds.latest()
    }

    // -- pins ---------------------------------------------------------------

    pub fn pin_config(&self) -> &PinConfiguration {
        self.pin_config.latest()
    }

    pub fn pin_config_at(&self, round: Round) -> Result<&PinConfiguration, HistoryError> {
        self.pin_config.value_at(round)
    }

    // -- attributes ---------------------------------------------------------

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name() == name)
    }

    pub(crate) fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.iter_mut().find(|a| a.name() == name)
    }

    // -- history maintenance ------------------------------------------------

    /// Moves every history marker to `round`.
    ///
    /// Panics if `round` precedes a history's first entry; the engine only
    /// syncs to committed rounds, which no entity can postdate.
    pub(crate) fn sync_markers(&mut self, round: Round) {
        sync_marker(&mut self.head, round);
        sync_marker(&mut self.expansion, round);
        for flags in &mut self.bond_flags {
            sync_marker(flags, round);
        }
        sync_marker(&mut self.automatic_bonds, round);
        sync_marker(&mut self.pin_config, round);
        for attr in &mut self.attributes {
            sync_marker(attr.history_mut(), round);
        }
    }

    /// The latest round any of the particle's histories recorded.
    pub(crate) fn latest_recorded_round(&self) -> Round {
        let mut latest = self.head.latest_round().max(self.expansion.latest_round());
        for flags in &self.bond_flags {
            latest = latest.max(flags.latest_round());
        }
        latest = latest.max(self.automatic_bonds.latest_round());
        latest = latest.max(self.pin_config.latest_round());
        for attr in &self.attributes {
            latest = latest.max(attr.history().latest_round());
        }
        latest
    }

    /// The earliest change point in any of the particle's histories.
    pub(crate) fn first_recorded_round(&self) -> Round {
        let mut first = self.head.first_round().min(self.expansion.first_round());
        for flags in &self.bond_flags {
            first = first.min(flags.first_round());
        }
        first = first.min(self.automatic_bonds.first_round());
        first = first.min(self.pin_config.first_round());
        for attr in &self.attributes {
            first = first.min(attr.history().first_round());
        }
        first
    }

    /// The earliest round every one of the particle's histories covers.
    pub(crate) fn earliest_recorded_round(&self) -> Round {
        let mut earliest = self.head.first_round().max(self.expansion.first_round());
        for flags in &self.bond_flags {
            earliest = earliest.max(flags.first_round());
        }
        earliest = earliest.max(self.automatic_bonds.first_round());
        earliest = earliest.max(self.pin_config.first_round());
        for attr in &self.attributes {
            earliest = earliest.max(attr.history().first_round());
        }
        earliest
    }

    /// The marker round shared by the particle's histories.
    pub(crate) fn marker_round(&self) -> Round {
        self.head.marker()
    }

    /// Whether every history's marker sits at `round`.
    pub(crate) fn markers_at(&self, round: Round) -> bool {
        self.head.marker() == round
            && self.expansion.marker() == round
            && self.bond_flags.iter().all(|flags| flags.marker() == round)
            && self.automatic_bonds.marker() == round
            && self.pin_config.marker() == round
            && self.attributes.iter().all(|attr| attr.history().marker() == round)
    }

    /// Drops every change point after the markers, undoing an uncommitted
    /// round.
    pub(crate) fn cut_at_markers(&mut self) {
        self.head.cut_at_marker();
        self.expansion.cut_at_marker();
        for flags in &mut self.bond_flags {
            flags.cut_at_marker();
        }
        self.automatic_bonds.cut_at_marker();
        self.pin_config.cut_at_marker();
        for attr in &mut self.attributes {
            attr.history_mut().cut_at_marker();
        }
    }

    /// Rebases every history by `delta` rounds.
    ///
    /// Panics if a shifted round leaves the valid range; callers validate
    /// the extreme rounds first.
    pub(crate) fn shift_timescale(&mut self, delta: i64) {
        shift_history(&mut self.head, delta);
        shift_history(&mut self.expansion, delta);
        for flags in &mut self.bond_flags {
            shift_history(flags, delta);
        }
        shift_history(&mut self.automatic_bonds, delta);
        shift_history(&mut self.pin_config, delta);
        for attr in &mut self.attributes {
            shift_history(attr.history_mut(), delta);
        }
    }

    pub(crate) fn clear_scratch(&mut self) {
        self.scratch = Scratch::default();
    }

    // -- snapshots ----------------------------------------------------------

    pub fn to_snapshot(&self) -> ParticleSnapshot {
        ParticleSnapshot {
            index: self.index,
            chirality: self.chirality,
            compass: self.compass,
            head: self.head.to_snapshot(),
            expansion: self.expansion.to_snapshot(),
            bond_flags: self.bond_flags.iter().map(History::to_snapshot).collect(),
            automatic_bonds: self.automatic_bonds.to_snapshot(),
            pin_config: self.pin_config.to_snapshot(),
            attributes: self.attributes.iter().map(Attribute::to_snapshot).collect(),
        }
    }

    pub fn from_snapshot(snapshot: ParticleSnapshot) -> Result<Particle, ParticleError> {
        let ParticleSnapshot {
            index,
            chirality,
            compass,
            head,
            expansion,
            bond_flags,
            automatic_bonds,
            pin_config,
            attributes,
        } = snapshot;
        if bond_flags.len() != MAX_LABELS {
            return Err(ParticleError::CorruptSnapshot(format!(
                "expected {MAX_LABELS} bond histories, found {}",
                bond_flags.len()
            )));
        }
        let attributes = attributes
            .into_iter()
            .map(Attribute::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?;
        for attr in &attributes {
            if is_reserved_name(attr.name()) {
                return Err(ParticleError::CorruptSnapshot(format!(
                    "attribute name '{}' is reserved",
                    attr.name()
                )));
            }
        }
        Ok(Particle {
            index,
            chirality,
            compass,
            head: History::from_snapshot(head)?,
            expansion: History::from_snapshot(expansion)?,
            bond_flags: bond_flags
                .into_iter()
                .map(History::from_snapshot)
                .collect::<Result<Vec<_>, _>>()?,
            automatic_bonds: History::from_snapshot(automatic_bonds)?,
            pin_config: History::from_snapshot(pin_config)?,
            attributes,
            scratch: Scratch::default(),
            in_constructor: false,
            finished: false,
        })
    }
}

fn sync_marker<T: Clone + PartialEq>(history: &mut History<T>, round: Round) {
    match history.set_marker(round) {
        Ok(()) => {}
        Err(_) => unreachable!("marker {round} precedes history start"),
    }
}

fn shift_history<T: Clone + PartialEq>(history: &mut History<T>, delta: i64) {
    match history.shift_timescale(delta) {
        Ok(()) => {}
        Err(err) => unreachable!("timescale shift was not validated: {err}"),
    }
}

/// Serializable mirror of a [`Particle`]. Scratch state is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleSnapshot {
    pub index: usize,
    pub chirality: Chirality,
    pub compass: Direction,
    pub head: HistorySnapshot<GridPos>,
    pub expansion: HistorySnapshot<Option<Direction>>,
    pub bond_flags: Vec<HistorySnapshot<bool>>,
    pub automatic_bonds: HistorySnapshot<bool>,
    pub pin_config: HistorySnapshot<PinConfiguration>,
    pub attributes: Vec<AttributeSnapshot>,
}

// ===========================================================================
// Tests
// ===========================================================================
