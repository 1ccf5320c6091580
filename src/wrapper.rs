//! Recovers the logical operation hidden behind the scheduler's
//! "execute fused subgraph" dispatch shim.

use tracing::warn;

use crate::model::*;
use crate::normalize::ReconcileTable;
use crate::resolve::Registry;

/// Module of the fused-subgraph wrapper.
pub const WRAPPER_MODULE: &str = "dask._task_spec";
/// Name of the fused-subgraph wrapper.
pub const WRAPPER_NAME: &str = "_execute_subgraph";

/// Callable, arguments and keyword arguments to attribute a task to.
#[derive(Debug, Clone, PartialEq)]
pub struct Unwrapped {
    pub callable: Callable,
    pub args: Vec<Arg>,
    pub kwargs: Kwargs,
    /// Key of the inner task when the payload named one.
    pub inner: Option<Key>,
}

impl Unwrapped {
    fn identity(spec: &TaskSpec) -> Self {
        Self {
            callable: spec.callable.clone(),
            args: spec.args.clone(),
            kwargs: spec.kwargs.clone(),
            inner: None,
        }
    }
}

pub fn is_wrapper(spec: &TaskSpec) -> bool {
    spec.callable.is(WRAPPER_MODULE, WRAPPER_NAME)
}

/// Unwraps `spec` when it is a wrapper; otherwise returns it unchanged.
pub fn unwrap(spec: &TaskSpec, registry: &Registry, reconcile: &ReconcileTable) -> Unwrapped {
    if !is_wrapper(spec) {
        return Unwrapped::identity(spec);
    }
    // the wrapper always takes exactly one payload argument
    let Some(payload) = spec.args.first() else {
        return Unwrapped::identity(spec);
    };

    match payload {
        Arg::Tuple(items) => match items.split_first() {
            Some((head, rest)) => unwrap_tuple(spec, head, rest, registry, reconcile),
            None => Unwrapped::identity(spec),
        },
        Arg::Callable(func) => Unwrapped {
            callable: func.clone(),
            args: Vec::new(),
            kwargs: Vec::new(),
            inner: None,
        },
        Arg::Partial(partial) => apply_partial(partial, &[]),
        _ => Unwrapped::identity(spec),
    }
}

fn unwrap_tuple(
    spec: &TaskSpec,
    head: &Arg,
    rest: &[Arg],
    registry: &Registry,
    reconcile: &ReconcileTable,
) -> Unwrapped {
    let key = match head {
        Arg::Literal(Literal::Str(s)) => Key::Scalar(s.clone()),
        Arg::Ref(k) => k.clone(),
        Arg::Partial(partial) => return apply_partial(partial, rest),
        Arg::Callable(func) => {
            return Unwrapped {
                callable: func.clone(),
                args: rest.to_vec(),
                kwargs: Vec::new(),
                inner: None,
            };
        }
        _ => return Unwrapped::identity(spec),
    };

    match registry.get(reconcile.canonical(&key)).and_then(RunSpec::as_task) {
        Some(inner) => Unwrapped {
            callable: inner.callable.clone(),
            args: inner.args.clone(),
            kwargs: inner.kwargs.clone(),
            inner: Some(inner.key.clone().unwrap_or(key)),
        },
        None => {
            warn!(wrapper = ?spec.key, inner = %key, "fused task not found, keeping wrapper");
            Unwrapped::identity(spec)
        }
    }
}

/// Pre-bound arguments first, then call-site overrides: dict overrides merge
/// into kwargs, sequence overrides are appended to args.
fn apply_partial(partial: &Partial, overrides: &[Arg]) -> Unwrapped {
    let mut args = partial.args.clone();
    let mut kwargs = partial.kwargs.clone();

    for extra in overrides {
        match extra {
            Arg::Dict(pairs) => {
                for (name, value) in pairs {
                    merge_kwarg(&mut kwargs, name, value.clone());
                }
            }
            Arg::Literal(Literal::Map(map)) => {
                for (name, value) in map {
                    merge_kwarg(&mut kwargs, name, Arg::Literal(value.clone()));
                }
            }
            Arg::Tuple(items) | Arg::List(items) => args.extend(items.iter().cloned()),
            Arg::Literal(Literal::Tuple(items) | Literal::List(items)) => {
                args.extend(items.iter().cloned().map(Arg::Literal));
            }
            other => args.push(other.clone()),
        }
    }

    Unwrapped { callable: partial.func.clone(), args, kwargs, inner: None }
}

fn merge_kwarg(kwargs: &mut Kwargs, name: &str, value: Arg) {
    match kwargs.iter_mut().find(|(n, _)| n == name) {
        Some((_, slot)) => *slot = value,
        None => kwargs.push((name.to_owned(), value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wrapper(key: &str, payload: Arg) -> TaskSpec {
        TaskSpec::new(key, Callable::new(WRAPPER_MODULE, WRAPPER_NAME)).arg(payload)
    }

    #[test]
    fn test_plain_task_is_untouched() {
        let spec = TaskSpec::new("inc-1", Callable::new("ops", "inc")).arg(Arg::literal(1));
        assert!(!is_wrapper(&spec));
        let out = unwrap(&spec, &Registry::new(), &ReconcileTable::new());
        assert_eq!(out.callable.name, "inc");
        assert_eq!(out.args, vec![Arg::literal(1)]);
    }

    #[test]
    fn test_key_head_dereferences_registry() {
        let mut registry = Registry::new();
        let inner = TaskSpec::new("add-7", Callable::new("ops", "add"))
            .arg(Arg::literal(1))
            .kwarg("y", Arg::literal(2));
        registry.insert("add-7".into(), inner.into());

        let spec = wrapper("add-7-fused", Arg::Tuple(vec![Arg::literal("add-7")]));
        let out = unwrap(&spec, &registry, &ReconcileTable::new());
        assert_eq!(out.callable.name, "add");
        assert_eq!(out.args, vec![Arg::literal(1)]);
        assert_eq!(out.kwargs, vec![("y".to_string(), Arg::literal(2))]);
        assert_eq!(out.inner, Some(Key::scalar("add-7")));
    }

    #[test]
    fn test_partial_head_merges_overrides() {
        let mut partial = Partial::new(Callable::new("numpy", "clip").with_params(["a", "a_min", "a_max"]));
        partial.args.push(Arg::literal(0));
        partial.kwargs.push(("a_max".into(), Arg::literal(10)));

        let kw = wrapper(
            "clip-1",
            Arg::Tuple(vec![
                Arg::Partial(Box::new(partial.clone())),
                Arg::Dict(vec![("a_max".into(), Arg::literal(5)), ("out".into(), Arg::literal(1))]),
            ]),
        );
        let out = unwrap(&kw, &Registry::new(), &ReconcileTable::new());
        assert_eq!(out.callable.name, "clip");
        assert_eq!(out.args, vec![Arg::literal(0)]);
        assert_eq!(
            out.kwargs,
            vec![("a_max".to_string(), Arg::literal(5)), ("out".to_string(), Arg::literal(1))]
        );

        let pos = wrapper(
            "clip-2",
            Arg::Tuple(vec![
                Arg::Partial(Box::new(partial)),
                Arg::Tuple(vec![Arg::literal(1), Arg::literal(2)]),
            ]),
        );
        let out = unwrap(&pos, &Registry::new(), &ReconcileTable::new());
        assert_eq!(out.args, vec![Arg::literal(0), Arg::literal(1), Arg::literal(2)]);
    }

    #[test]
    fn test_non_callable_payload_keeps_wrapper() {
        let spec = wrapper("w", Arg::literal(42));
        let out = unwrap(&spec, &Registry::new(), &ReconcileTable::new());
        assert!(out.callable.is(WRAPPER_MODULE, WRAPPER_NAME));
        assert_eq!(out.args, vec![Arg::literal(42)]);
    }

    #[test]
    fn test_missing_inner_key_keeps_wrapper() {
        let spec = wrapper("w", Arg::Tuple(vec![Arg::literal("gone")]));
        let out = unwrap(&spec, &Registry::new(), &ReconcileTable::new());
        assert_eq!(out.callable.name, WRAPPER_NAME);
        assert_eq!(out.inner, None);
    }
}
