//! # Task Record Builder
//!
//! Turns one task's raw specification into a [`TaskRecord`]: every declared
//! parameter mapped to a resolved [`Value`] (or a set of them), plus the
//! distinct producers that informed the task.
//!
//! Building never fails as a whole. A parameter whose dependency cannot be
//! located is skipped with a warning and listed in
//! [`TaskRecord::unresolved`]; a callable without a known signature gets
//! positional names `arg_0, arg_1, ...`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::model::*;
use crate::normalize::ReconcileTable;
use crate::resolve::{DependencyView, PendingQueue, Registry, Resolver};
use crate::wrapper;

/// Provenance-ready description of one runnable task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub key: Key,
    pub group: String,
    pub callable: Callable,
    pub start_time: Option<DateTime<Utc>>,
    pub finish_time: Option<DateTime<Utc>>,
    pub params: Params,
    /// Distinct producers of any `Generated` value, in first-use order.
    pub informants: Vec<Key>,
    /// Parameters skipped because a reference could not be resolved.
    pub unresolved: Vec<String>,
    /// Created by the resolver for a task only seen as an inline argument.
    pub synthetic: bool,
}

impl TaskRecord {
    pub fn mark_started(&mut self, at: DateTime<Utc>) {
        self.start_time = Some(at);
    }

    pub fn mark_finished(&mut self, at: DateTime<Utc>) {
        self.finish_time = Some(at);
    }

    fn collect_informants(&mut self) {
        let mut informants: Vec<Key> = Vec::new();
        for (_, param) in self.params.iter() {
            for producer in param.values().filter_map(Value::producer) {
                if producer != &self.key && !informants.contains(producer) {
                    informants.push(producer.clone());
                }
            }
        }
        self.informants = informants;
    }
}

// ============================================================================
// RecordBuilder
// ============================================================================

/// Builds records against the run-wide registry and reconciliation table.
/// Inline tasks found while resolving land in `pending`.
pub struct RecordBuilder<'a> {
    registry: &'a Registry,
    reconcile: &'a mut ReconcileTable,
    pending: &'a mut PendingQueue,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(
        registry: &'a Registry,
        reconcile: &'a mut ReconcileTable,
        pending: &'a mut PendingQueue,
    ) -> Self {
        Self { registry, reconcile, pending }
    }

    /// Builds the record of the task observed under `key`.
    pub fn build(
        &mut self,
        key: &Key,
        spec: &TaskSpec,
        group: impl Into<String>,
        deps: &DependencyView,
    ) -> TaskRecord {
        // the view may spell a dependency differently from its own spec
        for (view_key, dep) in deps {
            if let Some(spec_key) = dep.key() {
                if spec_key != view_key {
                    self.reconcile.reconcile(spec_key, view_key);
                }
            }
        }

        let target = wrapper::unwrap(spec, self.registry, self.reconcile);
        if let Some(inner) = &target.inner {
            if inner != key && self.reconcile.reconcile(inner, key) {
                debug!(task = %key, inner = %inner, "fused task reconciled");
            }
        }

        let record_key = self.reconcile.canonical(key).clone();
        let mut record = TaskRecord {
            key: record_key.clone(),
            group: group.into(),
            callable: target.callable.clone(),
            start_time: None,
            finish_time: None,
            params: Params::new(),
            informants: Vec::new(),
            unresolved: Vec::new(),
            synthetic: false,
        };

        let names: Vec<String> = match target.callable.param_names() {
            Ok(names) => names.to_vec(),
            Err(err) => {
                debug!(task = %record_key, %err, "falling back to positional names");
                positional_names(0, target.args.len())
            }
        };

        let mut resolver = Resolver::new(&record_key, deps, self.registry, self.reconcile, self.pending);

        for (name, arg) in names.iter().zip(&target.args) {
            resolve_param(&mut resolver, &mut record, name, arg);
        }

        if target.args.len() > names.len() {
            let extra = &target.args[names.len()..];
            match names.last() {
                Some(last) => fold_variadic(&mut resolver, &mut record, last, extra),
                None => {
                    // nothing to fold into
                    let extra_names = positional_names(0, extra.len());
                    for (name, arg) in extra_names.iter().zip(extra) {
                        resolve_param(&mut resolver, &mut record, name, arg);
                    }
                }
            }
        }

        for (name, arg) in &target.kwargs {
            resolve_param(&mut resolver, &mut record, name, arg);
        }

        record.collect_informants();
        record
    }

    /// Builds the record of a task synthesized by the resolver. Such tasks
    /// have no dependency view of their own and are grouped by callable.
    pub fn build_synthetic(&mut self, key: &Key, spec: &TaskSpec) -> TaskRecord {
        let mut record = self.build(key, spec, spec.callable.name.clone(), &DependencyView::new());
        record.synthetic = true;
        record
    }
}

fn positional_names(from: usize, count: usize) -> Vec<String> {
    (from..from + count).map(|i| format!("arg_{i}")).collect()
}

fn resolve_param(resolver: &mut Resolver<'_>, record: &mut TaskRecord, name: &str, arg: &Arg) {
    let resolved = match arg {
        Arg::List(_) => resolver.resolve_list(arg).map(ParamValue::Many),
        other => resolver.resolve(other).map(ParamValue::One),
    };
    match resolved {
        Ok(value) => record.params.insert(name, value),
        Err(err) => {
            warn!(task = %record.key, param = name, %err, "parameter skipped");
            record.unresolved.push(name.to_owned());
        }
    }
}

/// Surplus positional args join the value already bound to the last named
/// parameter in one set.
fn fold_variadic(resolver: &mut Resolver<'_>, record: &mut TaskRecord, last: &str, extra: &[Arg]) {
    let mut set = record
        .params
        .remove(last)
        .map(ParamValue::into_set)
        .unwrap_or_default();

    for arg in extra {
        let resolved = match arg {
            Arg::List(_) => resolver.resolve_list(arg),
            other => resolver.resolve(other).map(|v| std::iter::once(v).collect()),
        };
        match resolved {
            Ok(values) => set.extend(values),
            Err(err) => {
                warn!(task = %record.key, param = last, %err, "variadic member skipped");
                if !record.unresolved.iter().any(|n| n == last) {
                    record.unresolved.push(last.to_owned());
                }
            }
        }
    }

    record.params.insert(last, ParamValue::Many(set));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn add() -> Callable {
        Callable::new("ops", "add").with_params(["a", "b"])
    }

    fn build(key: &str, spec: &TaskSpec, deps: &DependencyView, registry: &Registry) -> (TaskRecord, PendingQueue) {
        let mut reconcile = ReconcileTable::new();
        let mut pending = PendingQueue::new();
        let record = RecordBuilder::new(registry, &mut reconcile, &mut pending)
            .build(&Key::scalar(key), spec, "add", deps);
        (record, pending)
    }

    #[test]
    fn test_variadic_fold() {
        let spec = TaskSpec::new("f-1", add())
            .arg(Arg::literal(1))
            .arg(Arg::literal(2))
            .arg(Arg::literal(3));
        let (record, _) = build("f-1", &spec, &DependencyView::new(), &Registry::new());

        assert_eq!(record.params.get("a"), Some(&ParamValue::One(Value::raw(1))));
        let b = record.params.get("b").and_then(ParamValue::as_set).unwrap();
        assert_eq!(b.len(), 2);
        assert!(b.contains(&Value::raw(2)) && b.contains(&Value::raw(3)));
    }

    #[test]
    fn test_positional_fallback() {
        let spec = TaskSpec::new("sum-1", Callable::new("builtins", "sum"))
            .arg(Arg::literal(1))
            .arg(Arg::literal(2));
        let (record, _) = build("sum-1", &spec, &DependencyView::new(), &Registry::new());
        let names: Vec<_> = record.params.names().collect();
        assert_eq!(names, ["arg_0", "arg_1"]);
    }

    #[test]
    fn test_kwargs_and_informants() {
        let mut deps = DependencyView::new();
        deps.insert("x".into(), TaskSpec::new("x", add()).into());
        deps.insert("y".into(), TaskSpec::new("y", add()).into());
        let spec = TaskSpec::new("z", add())
            .arg(Arg::reference("x"))
            .kwarg("b", Arg::reference("y"))
            .kwarg("c", Arg::reference("x"));
        let (record, pending) = build("z", &spec, &deps, &Registry::new());

        assert_eq!(record.informants, vec![Key::scalar("x"), Key::scalar("y")]);
        assert_eq!(record.params.get("b"), Some(&ParamValue::One(Value::generated("y"))));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_missing_dependency_skips_only_that_parameter() {
        let spec = TaskSpec::new("z", add())
            .arg(Arg::reference("ghost"))
            .arg(Arg::literal(2));
        let (record, _) = build("z", &spec, &DependencyView::new(), &Registry::new());
        assert_eq!(record.unresolved, vec!["a".to_string()]);
        assert!(record.params.get("a").is_none());
        assert_eq!(record.params.get("b"), Some(&ParamValue::One(Value::raw(2))));
    }

    #[test]
    fn test_fan_in_list_param() {
        let mut deps = DependencyView::new();
        deps.insert("s1".into(), TaskSpec::new("s1", add()).into());
        deps.insert("s2".into(), TaskSpec::new("s2", add()).into());
        let spec = TaskSpec::new("total", Callable::new("builtins", "sum").with_params(["values"]))
            .arg(Arg::List(vec![Arg::reference("s1"), Arg::reference("s2")]));
        let (record, _) = build("total", &spec, &deps, &Registry::new());

        let values = record.params.get("values").and_then(ParamValue::as_set).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(record.informants.len(), 2);
    }

    #[test]
    fn test_inline_task_lands_in_pending() {
        let inner = TaskSpec::new("hidden", Callable::new("ops", "neg").with_params(["v"])).arg(Arg::literal(1));
        let spec = TaskSpec::new("outer", add()).arg(inner).arg(Arg::literal(2));
        let (record, pending) = build("outer", &spec, &DependencyView::new(), &Registry::new());
        assert_eq!(pending.len(), 1);
        assert_eq!(record.informants, vec![pending[0].0.clone()]);
    }

    #[test]
    fn test_dependency_view_spelling_is_reconciled() {
        let registry = Registry::new();
        let mut reconcile = ReconcileTable::new();
        let mut pending = PendingQueue::new();
        let view_key = Key::composite("load", [0]);
        let mut deps = DependencyView::new();
        deps.insert(view_key.clone(), TaskSpec::new("load", add()).into());

        let spec = TaskSpec::new("use", add()).arg(Arg::reference("load"));
        let record = RecordBuilder::new(&registry, &mut reconcile, &mut pending)
            .build(&Key::scalar("use"), &spec, "use", &deps);

        assert_eq!(reconcile.canonical(&Key::scalar("load")), &view_key);
        assert_eq!(record.params.get("a"), Some(&ParamValue::One(Value::generated(view_key))));
    }
}
