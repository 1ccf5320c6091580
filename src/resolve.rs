//! # Value Resolver
//!
//! Classifies one argument slot into a [`Value`] and follows indirection
//! chains to a terminal producer or literal.
//!
//! Lookups go through two maps: the per-task [`DependencyView`] supplied by
//! the adapter, then the run-wide [`Registry`] of everything seen so far.
//! Tasks that are only reachable as embedded arguments get a synthetic key
//! and are pushed onto the [`PendingQueue`]; the caller must register them
//! before the triggering task's registration is considered complete.

use hashbrown::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::model::*;
use crate::normalize::ReconcileTable;
use crate::{Error, Result};

/// Maximum number of indirections followed for one slot.
pub const MAX_INDIRECTIONS: usize = 64;

/// Locally visible keys of one task and the specs that satisfy them.
pub type DependencyView = HashMap<Key, RunSpec>;

/// Inline tasks discovered during resolution, waiting for registration.
pub type PendingQueue = Vec<(Key, TaskSpec)>;

// ============================================================================
// Registry
// ============================================================================

/// Cumulative map of every key seen so far in the run.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    specs: HashMap<Key, RunSpec>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// First registration wins; returns `false` if the key was known.
    pub fn insert(&mut self, key: Key, spec: RunSpec) -> bool {
        if self.specs.contains_key(&key) {
            return false;
        }
        self.specs.insert(key, spec);
        true
    }

    pub fn get(&self, key: &Key) -> Option<&RunSpec> {
        self.specs.get(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.specs.contains_key(key)
    }

    pub fn len(&self) -> usize { self.specs.len() }
    pub fn is_empty(&self) -> bool { self.specs.is_empty() }
}

// ============================================================================
// Resolver
// ============================================================================

/// Resolution context for the arguments of one task.
pub struct Resolver<'a> {
    task: &'a Key,
    deps: &'a DependencyView,
    registry: &'a Registry,
    reconcile: &'a ReconcileTable,
    pending: &'a mut PendingQueue,
}

/// A run spec or argument reached while resolving.
enum Node<'n> {
    Arg(&'n Arg),
    Spec(&'n RunSpec),
}

impl<'a> Resolver<'a> {
    /// `task` is the key of the task whose arguments are being resolved; it
    /// only appears in error reports.
    pub fn new(
        task: &'a Key,
        deps: &'a DependencyView,
        registry: &'a Registry,
        reconcile: &'a ReconcileTable,
        pending: &'a mut PendingQueue,
    ) -> Self {
        Self { task, deps, registry, reconcile, pending }
    }

    /// Resolves a single slot.
    pub fn resolve(&mut self, arg: &Arg) -> Result<Value> {
        self.resolve_node(Node::Arg(arg), 0)
    }

    /// Collects every leaf of arbitrarily nested sequence wrappers.
    pub fn resolve_list(&mut self, arg: &Arg) -> Result<ValueSet> {
        let mut out = ValueSet::new();
        self.collect(arg, &mut out)?;
        Ok(out)
    }

    fn collect(&mut self, arg: &Arg, out: &mut ValueSet) -> Result<()> {
        match arg {
            Arg::List(items) => {
                for item in items {
                    self.collect(item, out)?;
                }
            }
            other => {
                out.insert(self.resolve(other)?);
            }
        }
        Ok(())
    }

    /// Local view first with the raw target, then the registry under the
    /// target's canonical spelling.
    fn lookup(&self, target: &Key) -> Result<&'a RunSpec> {
        if let Some(spec) = self.deps.get(target) {
            return Ok(spec);
        }
        let canonical = self.reconcile.canonical(target);
        self.registry
            .get(canonical)
            .or_else(|| self.deps.get(canonical))
            .ok_or_else(|| Error::Lookup {
                task: self.task.to_string(),
                missing: target.to_string(),
            })
    }

    fn follow(&mut self, target: &Key, depth: usize) -> Result<Value> {
        if depth >= MAX_INDIRECTIONS {
            return Err(Error::AliasCycle(format!(
                "{}: more than {MAX_INDIRECTIONS} indirections at {target}",
                self.task
            )));
        }
        let spec = self.lookup(target)?;
        self.resolve_node(Node::Spec(spec), depth + 1)
    }

    fn resolve_node(&mut self, node: Node<'_>, depth: usize) -> Result<Value> {
        match node {
            Node::Arg(Arg::Ref(target)) => self.follow(target, depth),
            Node::Arg(Arg::Alias(alias)) | Node::Spec(RunSpec::Alias(alias)) => {
                self.follow(&alias.target, depth)
            }
            Node::Arg(Arg::Task(task)) => self.resolve_task(task, depth),
            Node::Spec(RunSpec::Task(task)) => self.resolve_task(task, depth),
            Node::Arg(Arg::Data(data)) | Node::Spec(RunSpec::Data(data)) => Ok(self.resolve_data(data)),
            Node::Arg(Arg::Literal(value)) => Ok(Value::Raw { value: value.clone() }),
            Node::Arg(
                other @ (Arg::List(_)
                | Arg::Tuple(_)
                | Arg::Dict(_)
                | Arg::Callable(_)
                | Arg::Partial(_)),
            ) => Ok(Value::Raw { value: other.to_literal() }),
        }
    }

    fn resolve_task(&mut self, task: &TaskSpec, depth: usize) -> Result<Value> {
        match &task.key {
            // identity cast around an alias: unwrap one level
            None => match task.args.as_slice() {
                [Arg::Alias(alias)] => self.follow(&alias.target, depth),
                [Arg::Ref(target)] => self.follow(target, depth),
                _ => Ok(self.synthesize(task)),
            },
            Some(key) => {
                let canonical = self.reconcile.canonical(key);
                if self.deps.contains_key(key)
                    || self.deps.contains_key(canonical)
                    || self.registry.contains(canonical)
                {
                    Ok(Value::Generated { producer: canonical.clone() })
                } else {
                    Ok(self.synthesize(task))
                }
            }
        }
    }

    /// The task was handed inline and never surfaced by the scheduler.
    fn synthesize(&mut self, task: &TaskSpec) -> Value {
        let key = Key::Scalar(format!("{}-{}", task.callable.name, Uuid::new_v4().simple()));
        debug!(task = %self.task, synthetic = %key, "inline task queued for registration");
        let mut spec = task.clone();
        spec.key = Some(key.clone());
        self.pending.push((key.clone(), spec));
        Value::Generated { producer: key }
    }

    fn resolve_data(&self, data: &DataNode) -> Value {
        match &data.key {
            Some(key) if self.registry.contains(self.reconcile.canonical(key)) => Value::Ready {
                key: self.reconcile.canonical(key).clone(),
                value: data.value.clone(),
            },
            _ => Value::Raw { value: data.value.clone() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inc() -> Callable {
        Callable::new("ops", "inc").with_params(["x"])
    }

    struct Fixture {
        deps: DependencyView,
        registry: Registry,
        reconcile: ReconcileTable,
        pending: PendingQueue,
        task: Key,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                deps: DependencyView::new(),
                registry: Registry::new(),
                reconcile: ReconcileTable::new(),
                pending: PendingQueue::new(),
                task: Key::scalar("consumer"),
            }
        }

        fn resolver(&mut self) -> Resolver<'_> {
            Resolver::new(&self.task, &self.deps, &self.registry, &self.reconcile, &mut self.pending)
        }
    }

    #[test]
    fn test_literal_is_raw() {
        let mut fx = Fixture::new();
        assert_eq!(fx.resolver().resolve(&Arg::literal(7)).unwrap(), Value::raw(7));
    }

    #[test]
    fn test_known_task_is_generated() {
        let mut fx = Fixture::new();
        let producer = TaskSpec::new("inc-1", inc()).arg(Arg::literal(1));
        fx.registry.insert(Key::scalar("inc-1"), producer.clone().into());
        let v = fx.resolver().resolve(&producer.into()).unwrap();
        assert_eq!(v, Value::generated("inc-1"));
        assert!(fx.pending.is_empty());
    }

    #[test]
    fn test_alias_chain_through_registry() {
        let mut fx = Fixture::new();
        fx.registry.insert("inc-1".into(), TaskSpec::new("inc-1", inc()).into());
        fx.registry.insert("a".into(), AliasRef::new("a", "inc-1").into());
        fx.deps.insert("b".into(), AliasRef::new("b", "a").into());
        let v = fx.resolver().resolve(&Arg::reference("b")).unwrap();
        assert_eq!(v, Value::generated("inc-1"));
    }

    #[test]
    fn test_alias_cycle_is_bounded() {
        let mut fx = Fixture::new();
        fx.registry.insert("a".into(), AliasRef::new("a", "b").into());
        fx.registry.insert("b".into(), AliasRef::new("b", "a").into());
        let err = fx.resolver().resolve(&Arg::reference("a")).unwrap_err();
        assert!(matches!(err, Error::AliasCycle(_)));
    }

    #[test]
    fn test_missing_target_is_lookup_failure() {
        let mut fx = Fixture::new();
        let err = fx.resolver().resolve(&Arg::reference("ghost")).unwrap_err();
        match err {
            Error::Lookup { task, missing } => {
                assert_eq!(task, "consumer");
                assert_eq!(missing, "ghost");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_anonymous_cast_unwraps_alias() {
        let mut fx = Fixture::new();
        fx.deps.insert("t".into(), TaskSpec::new("t", inc()).into());
        let cast = TaskSpec::anonymous(Callable::new("dask._task_spec", "_identity_cast"))
            .arg(AliasRef::new("tmp", "t"));
        let v = fx.resolver().resolve(&cast.into()).unwrap();
        assert_eq!(v, Value::generated("t"));
    }

    #[test]
    fn test_inline_task_is_synthesized() {
        let mut fx = Fixture::new();
        let inline = TaskSpec::new("never-seen", inc()).arg(Arg::literal(3));
        let v = fx.resolver().resolve(&inline.into()).unwrap();
        let producer = v.producer().cloned().unwrap();
        assert!(producer.name().starts_with("inc-"));
        assert_eq!(fx.pending.len(), 1);
        assert_eq!(fx.pending[0].0, producer);
        assert_eq!(fx.pending[0].1.key.as_ref(), Some(&producer));
    }

    #[test]
    fn test_data_node_ready_only_when_registered() {
        let mut fx = Fixture::new();
        let registered = DataNode::new("arr", vec![1, 2]);
        fx.registry.insert("arr".into(), registered.clone().into());
        assert_eq!(
            fx.resolver().resolve(&registered.into()).unwrap(),
            Value::ready("arr", vec![1, 2])
        );
        let embedded = DataNode::new("elsewhere", 5);
        assert_eq!(fx.resolver().resolve(&embedded.into()).unwrap(), Value::raw(5));
    }

    #[test]
    fn test_reconciled_target_found_in_registry() {
        let mut fx = Fixture::new();
        let canonical = Key::composite("sum", [0]);
        fx.registry.insert(canonical.clone(), TaskSpec::new(canonical.clone(), inc()).into());
        fx.reconcile.reconcile(&Key::scalar("sum"), &canonical);
        let v = fx.resolver().resolve(&Arg::reference("sum")).unwrap();
        assert_eq!(v, Value::generated(canonical));
    }

    #[test]
    fn test_nested_lists_flatten() {
        let mut fx = Fixture::new();
        fx.deps.insert("s1".into(), TaskSpec::new("s1", inc()).into());
        fx.deps.insert("s2".into(), TaskSpec::new("s2", inc()).into());
        let arg = Arg::List(vec![
            Arg::reference("s1"),
            Arg::List(vec![Arg::reference("s2"), Arg::List(vec![Arg::literal(4)])]),
        ]);
        let set = fx.resolver().resolve_list(&arg).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(&Value::generated("s1")));
        assert!(set.contains(&Value::generated("s2")));
        assert!(set.contains(&Value::raw(4)));
    }
}
