//! Named, typed, historied algorithm variables.
//!
//! Algorithms attach state to particles as attributes: a name, a value kind
//! fixed at creation, and a full per-round [`History`] of values. The engine
//! rolls attributes back together with the built-in particle state when a
//! round fails, so algorithm state can never drift ahead of the system.
//!
//! Two names are reserved for the built-in read-only views every particle
//! exposes: `"Chirality"` and `"Compass Dir"`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grid::Direction;
use crate::history::{History, HistoryError, HistorySnapshot, Round};
use crate::pins::PinConfiguration;

/// Attribute names claimed by the built-in particle views.
pub const RESERVED_ATTRIBUTE_NAMES: [&str; 2] = ["Chirality", "Compass Dir"];

/// True if `name` collides with a built-in attribute view.
pub fn is_reserved_name(name: &str) -> bool {
    RESERVED_ATTRIBUTE_NAMES.contains(&name)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributeError {
    #[error("attribute '{name}' holds {expected:?} values, not {actual:?}")]
    TypeMismatch { name: String, expected: AttrKind, actual: AttrKind },

    #[error(transparent)]
    History(#[from] HistoryError),
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// The kind of value an attribute holds, fixed when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    Int,
    Float,
    Bool,
    Str,
    Dir,
    EnumIdx,
    PinConfig,
}

/// One attribute value.
///
/// `Dir` carries an optional direction so "no direction yet" needs no
/// sentinel. `EnumIdx` stores the discriminant of an algorithm-side enum;
/// the engine only needs equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Dir(Option<Direction>),
    EnumIdx(u32),
    PinConfig(PinConfiguration),
}

impl AttrValue {
    pub fn kind(&self) -> AttrKind {
        match self {
            AttrValue::Int(_) => AttrKind::Int,
            AttrValue::Float(_) => AttrKind::Float,
            AttrValue::Bool(_) => AttrKind::Bool,
            AttrValue::Str(_) => AttrKind::Str,
            AttrValue::Dir(_) => AttrKind::Dir,
            AttrValue::EnumIdx(_) => AttrKind::EnumIdx,
            AttrValue::PinConfig(_) => AttrKind::PinConfig,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dir(&self) -> Option<Option<Direction>> {
        match self {
            AttrValue::Dir(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_enum_idx(&self) -> Option<u32> {
        match self {
            AttrValue::EnumIdx(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_pin_config(&self) -> Option<&PinConfiguration> {
        match self {
            AttrValue::PinConfig(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(v) => write!(f, "{v}"),
            AttrValue::Float(v) => write!(f, "{v}"),
            AttrValue::Bool(v) => write!(f, "{v}"),
            AttrValue::Str(v) => write!(f, "{v}"),
            AttrValue::Dir(Some(d)) => write!(f, "{d:?}"),
            AttrValue::Dir(None) => write!(f, "-"),
            AttrValue::EnumIdx(v) => write!(f, "#{v}"),
            AttrValue::PinConfig(c) => write!(f, "pins[{} sets]", c.set_count()),
        }
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// A named algorithm variable with its complete round history.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    kind: AttrKind,
    history: History<AttrValue>,
}

impl Attribute {
    /// Creates an attribute whose kind is taken from the initial value.
    pub fn new(name: impl Into<String>, value: AttrValue, round: Round) -> Attribute {
        Attribute { name: name.into(), kind: value.kind(), history: History::new(value, round) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AttrKind {
        self.kind
    }

    /// Records a value for `round`, enforcing the attribute's kind.
    pub fn record(&mut self, value: AttrValue, round: Round) -> Result<(), AttributeError> {
        if value.kind() != self.kind {
            return Err(AttributeError::TypeMismatch {
                name: self.name.clone(),
                expected: self.kind,
                actual: value.kind(),
            });
        }
        self.history.record(value, round)?;
        Ok(())
    }

    pub fn latest(&self) -> &AttrValue {
        self.history.latest()
    }

    pub fn value_at(&self, round: Round) -> Result<&AttrValue, HistoryError> {
        self.history.value_at(round)
    }

    pub fn history(&self) -> &History<AttrValue> {
        &self.history
    }

    pub(crate) fn history_mut(&mut self) -> &mut History<AttrValue> {
        &mut self.history
    }

    pub fn to_snapshot(&self) -> AttributeSnapshot {
        AttributeSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            history: self.history.to_snapshot(),
        }
    }

    pub fn from_snapshot(snapshot: AttributeSnapshot) -> Result<Attribute, AttributeError> {
        let AttributeSnapshot { name, kind, history } = snapshot;
        let history = History::from_snapshot(history)?;
        for value in history.to_snapshot().values.iter() {
            if value.kind() != kind {
                return Err(AttributeError::TypeMismatch {
                    name,
                    expected: kind,
                    actual: value.kind(),
                });
            }
        }
        Ok(Attribute { name, kind, history })
    }
}

/// Serializable mirror of an [`Attribute`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSnapshot {
    pub name: String,
    pub kind: AttrKind,
    pub history: HistorySnapshot<AttrValue>,
}

// ===========================================================================
// Tests
// ===========================================================================
