//! # task-prov: Provenance Graphs for Task-Graph Runs
//!
//! Reconstructs a W3C PROV document from the lifecycle notifications a
//! task-graph scheduler emits: which task ran which function, on which
//! inputs, producing which outputs, informed by which other tasks.
//!
//! ## Design Principles
//!
//! 1. **Adapter-agnostic core**: schedulers talk to [`GraphBuilder`] through
//!    [`TaskAccessor`]; nothing below the tracker knows a scheduler exists
//! 2. **Clean DTOs**: [`Key`], [`TaskSpec`], [`Value`] cross all boundaries
//! 3. **Best effort**: a task that cannot be documented is logged and skipped,
//!    never fatal to the run
//! 4. **Append-only graph**: nodes and edges are never removed, ids never reused
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use task_prov::{Arg, Callable, Config, GraphBuilder, Key, TaskSnapshot, TaskSpec, TaskState};
//!
//! # fn example() -> task_prov::Result<()> {
//! let tracker = GraphBuilder::new(Config::default().with_name("etl"));
//!
//! let spec = TaskSpec::new("inc-1", Callable::new("ops", "inc").with_params(["x"]))
//!     .arg(Arg::literal(1));
//! let key = Key::scalar("inc-1");
//! let task = TaskSnapshot::new(spec);
//!
//! tracker.on_transition(&key, TaskState::Released, TaskState::Waiting, &task);
//! tracker.on_transition(&key, TaskState::Waiting, TaskState::Processing, &task);
//! tracker.on_transition(&key, TaskState::Processing, TaskState::Memory, &task);
//!
//! // writes ./output/etl.json
//! tracker.on_close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! | Stage | Module | Description |
//! |-------|--------|-------------|
//! | Normalize | [`normalize`] | keys to node ids, key-spelling reconciliation |
//! | Resolve | [`resolve`] | argument trees to values, inline-task synthesis |
//! | Unwrap | [`wrapper`] | attribute fused subgraphs to the user function |
//! | Record | [`record`] | parameter binding, variadic folding, informants |
//! | Graph | [`graph`] | PROV activities, entities, relations |
//! | Export | [`export`] | PROV-JSON and PROV-N encoders |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod normalize;
pub mod resolve;
pub mod wrapper;
pub mod record;
pub mod graph;
pub mod export;
pub mod config;
pub mod tracker;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{
    Key, KeyPart, Literal, AliasRef, Arg, Callable, DataNode, Partial,
    RunSpec, TaskSpec, ParamValue, Params, Value, ValueSet,
};

pub use graph::{Activity, Entity, Relation, Status, Boundary, ProvGraph};
pub use record::TaskRecord;
pub use config::{Config, Format};
pub use export::{Exported, SerializeOptions};
pub use tracker::{GraphBuilder, TaskAccessor, TaskSnapshot, TaskState};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{task}: dependency {missing} not in view or registry")]
    Lookup { task: String, missing: String },

    #[error("Alias cycle: {0}")]
    AliasCycle(String),

    #[error("Cannot introspect parameters of {0}")]
    Introspection(String),

    #[error("Key collision on id {id}: {first} and {second}")]
    KeyCollision { id: String, first: String, second: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
