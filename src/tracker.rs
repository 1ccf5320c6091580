//! # Lifecycle Tracker
//!
//! [`GraphBuilder`] is the per-run controller: the scheduler adapter feeds it
//! one notification per task state transition and closes it when the run
//! ends. It owns every piece of shared state (registry, reconciliation
//! table, graph) behind a single lock, so notifications may arrive from any
//! thread but are applied one at a time.
//!
//! | New state | Effect |
//! |-----------|--------|
//! | first sight | register data node, or build and register the task record |
//! | `Processing` | record the start time |
//! | `Memory` | finish time, dependencies, success |
//! | `Erred` | finish time, dependencies, failure (re-export if already closed) |
//!
//! Per-key ordering is the adapter's responsibility. Errors raised while
//! handling one notification are logged and never reach the adapter.

use std::str::FromStr;

use chrono::Utc;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::export::{Exported, SerializeOptions};
use crate::graph::ProvGraph;
use crate::model::*;
use crate::normalize::ReconcileTable;
use crate::record::{RecordBuilder, TaskRecord};
use crate::resolve::{DependencyView, PendingQueue, Registry};
use crate::{Error, Result};

// ============================================================================
// Inbound interface
// ============================================================================

/// Scheduler-side task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Released,
    Waiting,
    NoWorker,
    Queued,
    Processing,
    Memory,
    Erred,
    Forgotten,
}

impl FromStr for TaskState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "released" => TaskState::Released,
            "waiting" => TaskState::Waiting,
            "no-worker" => TaskState::NoWorker,
            "queued" => TaskState::Queued,
            "processing" => TaskState::Processing,
            "memory" => TaskState::Memory,
            "erred" => TaskState::Erred,
            "forgotten" => TaskState::Forgotten,
            other => return Err(Error::Config(format!("unknown task state '{other}'"))),
        })
    }
}

/// What the adapter can tell about one task at transition time.
pub trait TaskAccessor {
    /// Run specification: a task, a data node or an alias.
    fn run_spec(&self) -> Option<&RunSpec>;

    /// Locally visible dependency keys and the specs satisfying them.
    fn dependencies(&self) -> DependencyView;

    /// Declared group label.
    fn group(&self) -> String;

    /// Type of the produced value, once in memory.
    fn result_type(&self) -> Option<String> { None }

    /// Size of the produced value in bytes, once in memory.
    fn nbytes(&self) -> Option<u64> { None }

    fn exception_text(&self) -> Option<String> { None }

    /// Task the scheduler blames for an error.
    fn exception_blame(&self) -> Option<Key> { None }

    fn traceback(&self) -> Option<String> { None }
}

/// Owned snapshot of a task, for adapters that copy scheduler state out.
#[derive(Debug, Clone, Default)]
pub struct TaskSnapshot {
    pub run_spec: Option<RunSpec>,
    pub dependencies: DependencyView,
    pub group: String,
    pub result_type: Option<String>,
    pub nbytes: Option<u64>,
    pub exception_text: Option<String>,
    pub exception_blame: Option<Key>,
    pub traceback: Option<String>,
}

impl TaskSnapshot {
    pub fn new(spec: impl Into<RunSpec>) -> Self {
        let spec = spec.into();
        let group = spec.key().map(|k| k.name().to_owned()).unwrap_or_default();
        Self { run_spec: Some(spec), group, ..Default::default() }
    }

    pub fn with_dependency(mut self, key: impl Into<Key>, spec: impl Into<RunSpec>) -> Self {
        self.dependencies.insert(key.into(), spec.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_result(mut self, dtype: impl Into<String>, nbytes: u64) -> Self {
        self.result_type = Some(dtype.into());
        self.nbytes = Some(nbytes);
        self
    }

    pub fn with_exception(mut self, text: impl Into<String>, blame: Option<Key>, traceback: Option<String>) -> Self {
        self.exception_text = Some(text.into());
        self.exception_blame = blame;
        self.traceback = traceback;
        self
    }
}

impl TaskAccessor for TaskSnapshot {
    fn run_spec(&self) -> Option<&RunSpec> { self.run_spec.as_ref() }
    fn dependencies(&self) -> DependencyView { self.dependencies.clone() }
    fn group(&self) -> String { self.group.clone() }
    fn result_type(&self) -> Option<String> { self.result_type.clone() }
    fn nbytes(&self) -> Option<u64> { self.nbytes }
    fn exception_text(&self) -> Option<String> { self.exception_text.clone() }
    fn exception_blame(&self) -> Option<Key> { self.exception_blame.clone() }
    fn traceback(&self) -> Option<String> { self.traceback.clone() }
}

// ============================================================================
// GraphBuilder
// ============================================================================

/// Per-run provenance controller.
pub struct GraphBuilder {
    state: Mutex<TrackerState>,
}

struct TrackerState {
    config: Config,
    registry: Registry,
    reconcile: ReconcileTable,
    graph: ProvGraph,
    /// Keys already handled on first sight; a task can enter `waiting` twice.
    seen: HashSet<Key>,
    /// Records by the key the scheduler reported them under.
    records: HashMap<Key, TaskRecord>,
    closed: bool,
    last_export: Option<Exported>,
}

impl GraphBuilder {
    pub fn new(config: Config) -> Self {
        let graph = ProvGraph::new(config.name.clone(), config.rich_types);
        Self {
            state: Mutex::new(TrackerState {
                config,
                registry: Registry::new(),
                reconcile: ReconcileTable::new(),
                graph,
                seen: HashSet::new(),
                records: HashMap::new(),
                closed: false,
                last_export: None,
            }),
        }
    }

    /// Applies one lifecycle notification. Never fails: problems are logged
    /// and the run continues with a partial graph.
    pub fn on_transition(&self, key: &Key, previous: TaskState, new: TaskState, task: &dyn TaskAccessor) {
        let mut state = self.state.lock();
        if let Err(err) = state.transition(key, new, task) {
            warn!(task = %key, ?previous, ?new, %err, "transition not recorded");
        }
    }

    /// Computes the workflow boundary and exports the document per config.
    /// Returns the document text when no destination is configured.
    pub fn on_close(&self) -> Result<Exported> {
        let mut state = self.state.lock();
        if state.closed {
            warn!(workflow = %state.graph.workflow().id, "workflow already closed, exporting again");
        }
        state.closed = true;
        state.graph.close_workflow();
        state.export()
    }

    /// Records that `observed` names the same logical task as `canonical`.
    pub fn reconcile(&self, observed: &Key, canonical: &Key) -> bool {
        self.state.lock().reconcile.reconcile(observed, canonical)
    }

    /// Runs `f` against the graph under the lock. The lock is not
    /// reentrant: calling any other `GraphBuilder` method from `f` deadlocks.
    pub fn with_graph<R>(&self, f: impl FnOnce(&ProvGraph) -> R) -> R {
        f(&self.state.lock().graph)
    }

    /// Record of the task reported under `key`.
    pub fn record(&self, key: &Key) -> Option<TaskRecord> {
        self.state.lock().records.get(key).cloned()
    }

    /// Records of tasks synthesized from inline arguments.
    pub fn synthetic_records(&self) -> Vec<TaskRecord> {
        self.state.lock().records.values().filter(|r| r.synthetic).cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Result of the most recent export.
    pub fn last_export(&self) -> Option<Exported> {
        self.state.lock().last_export.clone()
    }

    pub fn config(&self) -> Config {
        self.state.lock().config.clone()
    }
}

impl TrackerState {
    fn transition(&mut self, key: &Key, new: TaskState, task: &dyn TaskAccessor) -> Result<()> {
        if matches!(new, TaskState::Released | TaskState::Forgotten) {
            return Ok(());
        }
        if !self.seen.contains(key) {
            self.first_sight(key, task)?;
        }

        let now = Utc::now();
        match new {
            TaskState::Processing => {
                if let Some(record) = self.records.get_mut(key) {
                    record.mark_started(now);
                }
            }
            TaskState::Memory => {
                let Some(record) = self.records.get_mut(key) else {
                    return Ok(());
                };
                record.mark_finished(now);
                let record = record.clone();
                self.graph.register_dependencies(&record);
                self.graph.register_success(&record, task.result_type().as_deref(), task.nbytes())?;
                debug!(task = %key, "success recorded");
            }
            TaskState::Erred => {
                let Some(record) = self.records.get_mut(key) else {
                    return Ok(());
                };
                record.mark_finished(now);
                let record = record.clone();
                let traceback = if self.config.keep_stacktrace { task.traceback() } else { None };
                let blamed = task.exception_blame().map(|k| self.reconcile.canonical(&k).clone());
                self.graph.register_dependencies(&record);
                self.graph.register_failure(
                    &record,
                    task.exception_text().as_deref(),
                    traceback.as_deref(),
                    blamed.as_ref(),
                )?;
                debug!(task = %key, "failure recorded");

                // errors can surface after the run was closed
                if self.closed {
                    info!(task = %key, "late failure, exporting again");
                    self.graph.close_workflow();
                    self.export()?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn first_sight(&mut self, key: &Key, task: &dyn TaskAccessor) -> Result<()> {
        self.seen.insert(key.clone());
        let spec = task
            .run_spec()
            .ok_or_else(|| Error::NotFound(format!("run spec of {key}")))?;
        self.registry.insert(key.clone(), spec.clone());

        match spec {
            RunSpec::Data(node) => {
                let mut node = node.clone();
                node.key.get_or_insert_with(|| key.clone());
                self.graph.register_data(&node)?;
            }
            RunSpec::Task(spec) => {
                let deps = task.dependencies();
                let mut pending = PendingQueue::new();
                let record = RecordBuilder::new(&self.registry, &mut self.reconcile, &mut pending)
                    .build(key, spec, task.group(), &deps);
                self.graph.register_task(&record);
                self.records.insert(key.clone(), record);
                self.drain(pending);
            }
            RunSpec::Alias(alias) => {
                debug!(alias = %key, target = %alias.target, "alias registered");
            }
        }
        Ok(())
    }

    /// Registers every task synthesized while resolving, including tasks
    /// discovered while resolving those. Activities come first so informant
    /// edges between synthetic tasks can be drawn.
    fn drain(&mut self, mut queue: PendingQueue) {
        let mut built = Vec::new();
        while !queue.is_empty() {
            for (key, spec) in std::mem::take(&mut queue) {
                self.registry.insert(key.clone(), RunSpec::Task(spec.clone()));
                let record = RecordBuilder::new(&self.registry, &mut self.reconcile, &mut queue)
                    .build_synthetic(&key, &spec);
                self.graph.register_task(&record);
                self.seen.insert(key.clone());
                built.push(key.clone());
                self.records.insert(key, record);
            }
        }
        for key in built {
            if let Some(record) = self.records.get(&key) {
                self.graph.register_dependencies(record);
            }
        }
    }

    fn export(&mut self) -> Result<Exported> {
        let exported = self.graph.serialize(
            self.config.destination.as_deref(),
            self.config.format,
            &SerializeOptions::default(),
        )?;
        self.last_export = Some(exported.clone());
        Ok(exported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_parsing() {
        assert_eq!("no-worker".parse::<TaskState>().unwrap(), TaskState::NoWorker);
        assert_eq!("erred".parse::<TaskState>().unwrap(), TaskState::Erred);
        assert!("running".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_waiting_twice_registers_once() {
        let tracker = GraphBuilder::new(Config::default().with_destination(None::<&str>));
        let spec = TaskSpec::new("inc-1", Callable::new("ops", "inc").with_params(["x"])).arg(Arg::literal(1));
        let snap = TaskSnapshot::new(spec);
        let key = Key::scalar("inc-1");
        tracker.on_transition(&key, TaskState::Released, TaskState::Waiting, &snap);
        tracker.on_transition(&key, TaskState::Released, TaskState::Waiting, &snap);
        tracker.with_graph(|g| {
            assert_eq!(g.activities().len(), 1);
            assert_eq!(g.entities().len(), 1);
        });
    }

    #[test]
    fn test_missing_run_spec_does_not_abort() {
        let tracker = GraphBuilder::new(Config::default().with_destination(None::<&str>));
        tracker.on_transition(&Key::scalar("ghost"), TaskState::Released, TaskState::Waiting, &TaskSnapshot::default());
        assert!(tracker.record(&Key::scalar("ghost")).is_none());
    }
}
