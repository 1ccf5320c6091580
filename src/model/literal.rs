//! Literal values carried by data nodes and inline arguments.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A materialized value as it appears in a task specification.
///
/// Covers what the scheduler hands over without identity:
/// - Scalars: None, Bool, Int, Float, Str, Bytes
/// - Containers: List, Tuple, Map
/// - Anything else: Object, described by its type name and a textual repr
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Literal>),
    Tuple(Vec<Literal>),
    Map(BTreeMap<String, Literal>),
    Object { type_name: String, repr: String },
}

// ============================================================================
// Type names
// ============================================================================

impl Literal {
    /// Bare type name of the value (`int`, `list`, `numpy.ndarray`, ...).
    pub fn base_type(&self) -> &str {
        match self {
            Literal::None => "NoneType",
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "int",
            Literal::Float(_) => "float",
            Literal::Str(_) => "str",
            Literal::Bytes(_) => "bytes",
            Literal::List(_) => "list",
            Literal::Tuple(_) => "tuple",
            Literal::Map(_) => "dict",
            Literal::Object { type_name, .. } => type_name,
        }
    }

    /// Type name recorded on entities. With `rich` set, containers are
    /// described element-wise: lists by their first element, tuples by every
    /// element, empty containers as `list[()]` / `tuple[()]`.
    pub fn type_name(&self, rich: bool) -> String {
        if !rich {
            return self.base_type().to_owned();
        }
        match self {
            Literal::List(items) => match items.first() {
                None => "list[()]".to_owned(),
                Some(first) => format!("list[{}]", first.type_name(true)),
            },
            Literal::Tuple(items) if items.is_empty() => "tuple[()]".to_owned(),
            Literal::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(|i| i.type_name(true)).collect();
                format!("tuple[{}]", inner.join(", "))
            }
            other => other.base_type().to_owned(),
        }
    }

    /// Text stored in an entity's `value` attribute. Top-level strings are
    /// kept verbatim; everything else uses the repr form.
    pub fn render(&self) -> String {
        match self {
            Literal::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_none(&self) -> bool { matches!(self, Literal::None) }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            _ => None,
        }
    }
}

// ============================================================================
// Conversions (From impls)
// ============================================================================

impl From<bool> for Literal { fn from(v: bool) -> Self { Literal::Bool(v) } }
impl From<i32> for Literal { fn from(v: i32) -> Self { Literal::Int(v as i64) } }
impl From<i64> for Literal { fn from(v: i64) -> Self { Literal::Int(v) } }
/// Values above `i64::MAX` are kept as their decimal text.
impl From<u64> for Literal {
    fn from(v: u64) -> Self {
        i64::try_from(v).map(Literal::Int).unwrap_or_else(|_| Literal::Str(v.to_string()))
    }
}
impl From<f64> for Literal { fn from(v: f64) -> Self { Literal::Float(v) } }
impl From<String> for Literal { fn from(v: String) -> Self { Literal::Str(v) } }
impl From<&str> for Literal { fn from(v: &str) -> Self { Literal::Str(v.to_owned()) } }
impl<T: Into<Literal>> From<Vec<T>> for Literal {
    fn from(v: Vec<T>) -> Self { Literal::List(v.into_iter().map(Into::into).collect()) }
}
impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(v: Option<T>) -> Self { v.map(Into::into).unwrap_or(Literal::None) }
}

// ============================================================================
// Display (repr form)
// ============================================================================

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Literal]) -> fmt::Result {
    for (i, v) in items.iter().enumerate() {
        if i > 0 { write!(f, ", ")?; }
        write!(f, "{v}")?;
    }
    Ok(())
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::None => write!(f, "None"),
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Int(i) => write!(f, "{i}"),
            Literal::Float(v) if v.fract() == 0.0 && v.is_finite() => write!(f, "{v:.1}"),
            Literal::Float(v) => write!(f, "{v}"),
            Literal::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Literal::Bytes(b) => write!(f, "<bytes[{}]>", b.len()),
            Literal::List(l) => {
                write!(f, "[")?;
                write_seq(f, l)?;
                write!(f, "]")
            }
            Literal::Tuple(t) => {
                write!(f, "(")?;
                write_seq(f, t)?;
                if t.len() == 1 { write!(f, ",")?; }
                write!(f, ")")
            }
            Literal::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "'{k}': {v}")?;
                }
                write!(f, "}}")
            }
            Literal::Object { repr, .. } => write!(f, "{repr}"),
        }
    }
}
