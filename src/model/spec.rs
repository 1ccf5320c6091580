//! Raw run specifications as exposed by the scheduler.
//!
//! Every shape an argument slot can take is an explicit variant of [`Arg`];
//! the resolver matches on them exhaustively.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Key, Literal};
use crate::{Error, Result};

/// Keyword arguments in call-site order.
pub type Kwargs = Vec<(String, Arg)>;

// ============================================================================
// Callables
// ============================================================================

/// Identity of a callable: its name, defining module and, when the adapter
/// could determine them, its declared parameter names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Callable {
    pub name: String,
    pub module: String,
    pub params: Option<Vec<String>>,
}

impl Callable {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self { name: name.into(), module: module.into(), params: None }
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.params = Some(params.into_iter().map(Into::into).collect());
        self
    }

    /// `module.name`
    pub fn qualified_name(&self) -> String {
        if self.module.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.module, self.name)
        }
    }

    /// Declared parameter names, or an introspection error for opaque
    /// callables whose signature was not supplied.
    pub fn param_names(&self) -> Result<&[String]> {
        self.params
            .as_deref()
            .ok_or_else(|| Error::Introspection(self.qualified_name()))
    }

    pub fn is(&self, module: &str, name: &str) -> bool {
        self.module == module && self.name == name
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}>", self.qualified_name())
    }
}

/// A partial application: a function with pre-bound arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partial {
    pub func: Callable,
    pub args: Vec<Arg>,
    pub kwargs: Kwargs,
}

impl Partial {
    pub fn new(func: Callable) -> Self {
        Self { func, args: Vec::new(), kwargs: Vec::new() }
    }
}

// ============================================================================
// Argument slots
// ============================================================================

/// One raw argument slot of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg {
    Literal(Literal),
    /// "Whatever key K currently maps to."
    Ref(Key),
    Alias(AliasRef),
    Task(Box<TaskSpec>),
    Data(DataNode),
    /// Scheduler sequence wrapper; several producers may fan into it.
    List(Vec<Arg>),
    Tuple(Vec<Arg>),
    Dict(Kwargs),
    Callable(Callable),
    Partial(Box<Partial>),
}

impl Arg {
    pub fn literal(v: impl Into<Literal>) -> Self {
        Arg::Literal(v.into())
    }

    pub fn reference(key: impl Into<Key>) -> Self {
        Arg::Ref(key.into())
    }

    /// Best-effort literal rendering of a slot that carries no identity.
    pub fn to_literal(&self) -> Literal {
        match self {
            Arg::Literal(l) => l.clone(),
            Arg::Ref(k) => Literal::Object { type_name: "TaskRef".into(), repr: format!("TaskRef({k})") },
            Arg::Alias(a) => Literal::Object { type_name: "Alias".into(), repr: format!("Alias({})", a.target) },
            Arg::Task(t) => Literal::Object { type_name: "Task".into(), repr: t.to_string() },
            Arg::Data(d) => d.value.clone(),
            Arg::List(items) => Literal::List(items.iter().map(Arg::to_literal).collect()),
            Arg::Tuple(items) => Literal::Tuple(items.iter().map(Arg::to_literal).collect()),
            Arg::Dict(pairs) => Literal::Map(
                pairs.iter().map(|(k, v)| (k.clone(), v.to_literal())).collect(),
            ),
            Arg::Callable(c) => Literal::Object { type_name: "function".into(), repr: c.to_string() },
            Arg::Partial(p) => Literal::Object {
                type_name: "functools.partial".into(),
                repr: format!("functools.partial({})", p.func),
            },
        }
    }
}

impl From<Literal> for Arg { fn from(v: Literal) -> Self { Arg::Literal(v) } }
impl From<TaskSpec> for Arg { fn from(v: TaskSpec) -> Self { Arg::Task(Box::new(v)) } }
impl From<DataNode> for Arg { fn from(v: DataNode) -> Self { Arg::Data(v) } }
impl From<AliasRef> for Arg { fn from(v: AliasRef) -> Self { Arg::Alias(v) } }

// ============================================================================
// Run specifications
// ============================================================================

/// Work not yet or currently executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub key: Option<Key>,
    pub callable: Callable,
    pub args: Vec<Arg>,
    pub kwargs: Kwargs,
}

impl TaskSpec {
    pub fn new(key: impl Into<Key>, callable: Callable) -> Self {
        Self { key: Some(key.into()), callable, args: Vec::new(), kwargs: Vec::new() }
    }

    /// A task without a key of its own, e.g. an identity cast around an alias.
    pub fn anonymous(callable: Callable) -> Self {
        Self { key: None, callable, args: Vec::new(), kwargs: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, arg: impl Into<Arg>) -> Self {
        self.kwargs.push((name.into(), arg.into()));
        self
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(k) => write!(f, "<Task {k} {}(...)>", self.callable.name),
            None => write!(f, "<Task None {}(...)>", self.callable.name),
        }
    }
}

/// Already-materialized data with no producer task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataNode {
    pub key: Option<Key>,
    pub value: Literal,
    /// Declared type; falls back to the literal's own type when absent.
    pub typ: Option<String>,
}

impl DataNode {
    pub fn new(key: impl Into<Key>, value: impl Into<Literal>) -> Self {
        Self { key: Some(key.into()), value: value.into(), typ: None }
    }

    pub fn inline(value: impl Into<Literal>) -> Self {
        Self { key: None, value: value.into(), typ: None }
    }

    pub fn with_type(mut self, typ: impl Into<String>) -> Self {
        self.typ = Some(typ.into());
        self
    }

    pub fn type_name(&self, rich: bool) -> String {
        match &self.typ {
            Some(t) => t.clone(),
            None => self.value.type_name(rich),
        }
    }
}

/// A key with no value of its own, standing for `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AliasRef {
    pub key: Key,
    pub target: Key,
}

impl AliasRef {
    pub fn new(key: impl Into<Key>, target: impl Into<Key>) -> Self {
        Self { key: key.into(), target: target.into() }
    }
}

/// What the scheduler stores for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunSpec {
    Task(TaskSpec),
    Data(DataNode),
    Alias(AliasRef),
}

impl RunSpec {
    pub fn key(&self) -> Option<&Key> {
        match self {
            RunSpec::Task(t) => t.key.as_ref(),
            RunSpec::Data(d) => d.key.as_ref(),
            RunSpec::Alias(a) => Some(&a.key),
        }
    }

    pub fn as_task(&self) -> Option<&TaskSpec> {
        match self {
            RunSpec::Task(t) => Some(t),
            _ => None,
        }
    }
}

impl From<TaskSpec> for RunSpec { fn from(v: TaskSpec) -> Self { RunSpec::Task(v) } }
impl From<DataNode> for RunSpec { fn from(v: DataNode) -> Self { RunSpec::Data(v) } }
impl From<AliasRef> for RunSpec { fn from(v: AliasRef) -> Self { RunSpec::Alias(v) } }
