//! Round conflicts and activation errors.
//!
//! Two layers of failure exist. [`ActionError`] is returned synchronously to
//! algorithm code when a single call is invalid (wrong phase, bad label,
//! type mismatch); the algorithm may recover and try something else. A
//! [`Conflict`] is detected by the engine while resolving a whole round —
//! contradictory joint movements, position collisions, disconnection, or an
//! activation that gave up — and always rolls the round back.

use thiserror::Error;

use crate::attribute::AttributeError;
use crate::grid::GridPos;
use crate::history::Round;
use crate::id::{EntityId, ParticleId};
use crate::pins::PinError;
use crate::round::Phase;

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Why a round could not be committed. Any conflict rolls every history back
/// to the last committed round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Conflict {
    /// The bond structure assigns two incompatible displacements to the same
    /// entity.
    #[error("joint movement conflict between {a:?} and {b:?}")]
    JointMovement { a: EntityId, b: EntityId },

    /// Two entities would occupy the same node after the move.
    #[error("position conflict at {node:?} between {a:?} and {b:?}")]
    Position { node: GridPos, a: EntityId, b: EntityId },

    /// An entity is no longer connected to the anchor through bonds.
    #[error("{entity:?} is disconnected from the anchor")]
    Disconnection { entity: EntityId },

    /// An activation callback returned an error.
    #[error("activation of {particle:?} failed: {source}")]
    Algorithm {
        particle: ParticleId,
        #[source]
        source: ActionError,
    },
}

// ---------------------------------------------------------------------------
// Action errors
// ---------------------------------------------------------------------------

/// An invalid call made by algorithm code through its particle handle.
///
/// Returned to the algorithm immediately; only if the activation callback
/// propagates it does the round roll back (as [`Conflict::Algorithm`]).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("cannot {action} during the {phase:?} phase")]
    WrongPhase { action: &'static str, phase: Phase },

    #[error("invalid movement: {reason}")]
    InvalidMovement { reason: String },

    #[error("label {label} out of range for a shape with {count} labels")]
    LabelOutOfRange { label: u8, count: u8 },

    #[error("no attribute named '{name}'")]
    NoSuchAttribute { name: String },

    #[error("attribute '{name}' already exists")]
    DuplicateAttribute { name: String },

    #[error("attribute name '{name}' is reserved")]
    ReservedAttribute { name: String },

    #[error("attributes can only be created while the particle is constructed")]
    AttributeOutsideConstructor { name: String },

    #[error("pin configuration does not fit the particle: {reason}")]
    IncompatiblePinConfiguration { reason: String },

    #[error(transparent)]
    Attribute(#[from] AttributeError),

    #[error(transparent)]
    Pin(#[from] PinError),

    /// A fault raised by the algorithm itself to abort its activation.
    #[error("algorithm fault: {0}")]
    Algorithm(String),
}

// ---------------------------------------------------------------------------
// Round outcomes
// ---------------------------------------------------------------------------

/// The result of simulating one round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// The round committed; all state now reflects `round`.
    Committed { round: Round },
    /// The round was rolled back; state is unchanged from before the call.
    Rejected { round: Round, conflict: Conflict },
}

impl RoundOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RoundOutcome::Committed { .. })
    }

    /// The round this outcome refers to.
    pub fn round(&self) -> Round {
        match self {
            RoundOutcome::Committed { round } => *round,
            RoundOutcome::Rejected { round, .. } => *round,
        }
    }

    pub fn conflict(&self) -> Option<&Conflict> {
        match self {
            RoundOutcome::Committed { .. } => None,
            RoundOutcome::Rejected { conflict, .. } => Some(conflict),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
