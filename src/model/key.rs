//! Task and data identifiers as the scheduler spells them.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One positional qualifier of a composite key (usually a partition index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    Int(i64),
    Str(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(i) => write!(f, "{i}"),
            KeyPart::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<i64> for KeyPart { fn from(v: i64) -> Self { KeyPart::Int(v) } }
impl From<i32> for KeyPart { fn from(v: i32) -> Self { KeyPart::Int(v as i64) } }
impl From<usize> for KeyPart { fn from(v: usize) -> Self { KeyPart::Int(v as i64) } }
impl From<&str> for KeyPart { fn from(v: &str) -> Self { KeyPart::Str(v.to_owned()) } }
impl From<String> for KeyPart { fn from(v: String) -> Self { KeyPart::Str(v) } }

/// Opaque, hashable identifier of a task or data node.
///
/// Structural equality is what `Eq`/`Hash` implement. The looser
/// "same logical task" relation used for reconciliation only compares
/// [`Key::name`], see [`crate::normalize::ReconcileTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Scalar(String),
    Composite {
        name: String,
        parts: SmallVec<[KeyPart; 2]>,
    },
}

impl Key {
    pub fn scalar(name: impl Into<String>) -> Self {
        Key::Scalar(name.into())
    }

    pub fn composite(
        name: impl Into<String>,
        parts: impl IntoIterator<Item = impl Into<KeyPart>>,
    ) -> Self {
        Key::Composite {
            name: name.into(),
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// Leading name component. For scalar keys this is the whole key.
    pub fn name(&self) -> &str {
        match self {
            Key::Scalar(s) => s,
            Key::Composite { name, .. } => name,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Key::Composite { .. })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Scalar(s) => write!(f, "{s}"),
            Key::Composite { name, parts } => {
                write!(f, "('{name}'")?;
                for part in parts {
                    write!(f, ", {part}")?;
                }
                if parts.is_empty() {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<&str> for Key { fn from(v: &str) -> Self { Key::Scalar(v.to_owned()) } }
impl From<String> for Key { fn from(v: String) -> Self { Key::Scalar(v) } }
