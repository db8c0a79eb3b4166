use serde::{Deserialize, Serialize};

use crate::define_entity;

define_entity!(ValueId);

/// What a value is, as far as the structurizer cares.
///
/// Host instructions and their operands are carried through opaquely; the
/// only values the structurizer manufactures itself are `Undef` placeholders
/// for unrepairable phi inputs and the constants feeding dispatch ladders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueKind {
    /// A host-defined value, identified by its display name.
    Opaque(String),
    /// Placeholder inserted when a phi input cannot possibly reach.
    Undef,
    /// Boolean constant (dispatch ladder selectors).
    Bool(bool),
    /// Integer constant (dispatch ladder selectors).
    Int(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    pub kind: ValueKind,
}

impl Value {
    pub fn opaque(name: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Opaque(name.into()),
        }
    }

    pub fn undef() -> Self {
        Self {
            kind: ValueKind::Undef,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self.kind, ValueKind::Undef)
    }
}
