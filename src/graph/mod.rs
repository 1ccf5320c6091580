//! # Provenance Graph
//!
//! W3C PROV shaped node and relation types, and the append-only
//! [`ProvGraph`] store that the tracker feeds one task at a time.
//!
//! | PROV term | Type | Created by |
//! |-----------|------|------------|
//! | Activity | [`Activity`] | `register_task` |
//! | Entity | [`Entity`] | `register_data`, `register_task`, `register_dependencies` |
//! | used | [`Relation::Used`] | `register_dependencies` |
//! | wasGeneratedBy | [`Relation::WasGeneratedBy`] | `register_task` |
//! | wasInformedBy | [`Relation::WasInformedBy`] | `register_dependencies`, `register_failure` |

pub mod store;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::Literal;

pub use store::ProvGraph;

/// Attribute bag of a node, ordered by name.
pub type PropertyMap = BTreeMap<String, Literal>;

// ============================================================================
// Nodes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Success,
    Failure,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Success => "success",
            Status::Failure => "failure",
        }
    }
}

/// One registered task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub attributes: PropertyMap,
}

impl Activity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Status::Pending,
            start_time: None,
            end_time: None,
            attributes: PropertyMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Literal> {
        self.attributes.get(key)
    }
}

/// One data item: a data node, a task's return value, or an inline argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub attributes: PropertyMap,
    /// Activity that generated this entity, if any. Set at most once.
    pub producer: Option<String>,
}

impl Entity {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), attributes: PropertyMap::new(), producer: None }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Literal> {
        self.attributes.get(key)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.get("is_error"), Some(Literal::Bool(true)))
    }
}

// ============================================================================
// Relations
// ============================================================================

/// A directed PROV relation between node ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "relation")]
pub enum Relation {
    Used { activity: String, entity: String, role: String },
    WasGeneratedBy { entity: String, activity: String },
    /// `informed` consumed something `informant` produced or was blamed on.
    WasInformedBy { informed: String, informant: String },
}

impl Relation {
    pub fn kind(&self) -> &'static str {
        match self {
            Relation::Used { .. } => "used",
            Relation::WasGeneratedBy { .. } => "wasGeneratedBy",
            Relation::WasInformedBy { .. } => "wasInformedBy",
        }
    }
}

// ============================================================================
// Workflow
// ============================================================================

/// The run as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub engine: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Entities crossing the workflow boundary, computed on close.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boundary {
    /// Consumed by some task, produced by none.
    pub inputs: Vec<String>,
    /// Produced by some task, consumed by none.
    pub outputs: Vec<String>,
}
