//! # Task Model
//!
//! Plain DTOs describing what the scheduler exposes (keys, run specs,
//! argument slots, literals) and what the resolver produces (values).
//! These types cross every boundary: adapter ↔ resolver ↔ graph ↔ export.
//!
//! Design rule: pure data, no I/O, no shared state, no registries here.

pub mod key;
pub mod literal;
pub mod spec;
pub mod value;

pub use key::{Key, KeyPart};
pub use literal::Literal;
pub use spec::{AliasRef, Arg, Callable, DataNode, Kwargs, Partial, RunSpec, TaskSpec};
pub use value::{ParamValue, Params, Value, ValueSet};
