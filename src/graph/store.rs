//! In-memory provenance graph.
//!
//! Nodes live in insertion-ordered vectors with id indexes, so exported
//! documents list them in the order the run discovered them.
//!
//! ## Invariants
//!
//! - One activity and one `{id}.return_value` entity per task id.
//! - An entity has at most one producer.
//! - Append-only: nodes and relations are never removed, registering again
//!   only refreshes attributes.

use chrono::Utc;
use hashbrown::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::*;
use crate::model::{DataNode, Key, Literal, ParamValue, Value};
use crate::normalize::KeyNormalizer;
use crate::record::TaskRecord;
use crate::{Error, Result};

/// Engine recorded on the workflow node.
pub const ENGINE: &str = "dask";

const RETURN_VALUE: &str = "return_value";

/// Id of the entity holding the return value of activity `activity_id`.
pub fn return_value_id(activity_id: &str) -> String {
    format!("{activity_id}.{RETURN_VALUE}")
}

#[derive(Debug, Default)]
struct OrderedSet {
    items: Vec<String>,
    index: HashSet<String>,
}

impl OrderedSet {
    fn insert(&mut self, item: &str) {
        if self.index.insert(item.to_owned()) {
            self.items.push(item.to_owned());
        }
    }

    fn contains(&self, item: &str) -> bool {
        self.index.contains(item)
    }

    fn difference(&self, other: &OrderedSet) -> Vec<String> {
        self.items.iter().filter(|i| !other.contains(i)).cloned().collect()
    }
}

// ============================================================================
// ProvGraph
// ============================================================================

/// Append-only store of activities, entities and their relations for one run.
#[derive(Debug)]
pub struct ProvGraph {
    workflow: Workflow,
    rich_types: bool,
    normalizer: KeyNormalizer,
    activities: Vec<Activity>,
    activity_index: HashMap<String, usize>,
    entities: Vec<Entity>,
    entity_index: HashMap<String, usize>,
    relations: Vec<Relation>,
    relation_index: HashSet<Relation>,
    /// Every entity some task used.
    consumed: OrderedSet,
    /// Every task return value.
    produced: OrderedSet,
    boundary: Option<Boundary>,
    closed: bool,
}

impl ProvGraph {
    /// `rich_types` records container types element-wise (`list[int]`).
    pub fn new(name: impl Into<String>, rich_types: bool) -> Self {
        Self {
            workflow: Workflow {
                id: Uuid::new_v4().to_string(),
                name: name.into(),
                engine: ENGINE.to_owned(),
                start_time: Utc::now(),
                end_time: None,
            },
            rich_types,
            normalizer: KeyNormalizer::new(),
            activities: Vec::new(),
            activity_index: HashMap::new(),
            entities: Vec::new(),
            entity_index: HashMap::new(),
            relations: Vec::new(),
            relation_index: HashSet::new(),
            consumed: OrderedSet::default(),
            produced: OrderedSet::default(),
            boundary: None,
            closed: false,
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Upserts the entity of a data node and sets its value and type.
    pub fn register_data(&mut self, node: &DataNode) -> Result<String> {
        let key = node
            .key
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("key of data node {}", node.value)))?;
        let id = self.normalizer.id(key);
        let typ = node.type_name(self.rich_types);
        let entity = self.upsert_entity(&id);
        entity.attributes.insert("value".into(), Literal::Str(node.value.render()));
        entity.attributes.insert("type".into(), Literal::Str(typ));
        Ok(id)
    }

    /// Upserts the activity of a task and its return-value entity. Calling it
    /// again for the same key only refreshes attributes.
    pub fn register_task(&mut self, info: &TaskRecord) -> String {
        let id = self.normalizer.id(&info.key);

        let activity = self.upsert_activity(&id);
        let attrs = &mut activity.attributes;
        attrs.insert("group".into(), Literal::Str(info.group.clone()));
        attrs.insert("module".into(), Literal::Str(info.callable.module.clone()));
        attrs.insert("name".into(), Literal::Str(info.callable.qualified_name()));
        attrs.insert("nice_name".into(), Literal::Str(info.callable.name.clone()));
        if info.synthetic {
            attrs.insert("synthetic".into(), Literal::Bool(true));
        }

        let result_id = return_value_id(&id);
        let result = self.upsert_entity(&result_id);
        match &result.producer {
            None => result.producer = Some(id.clone()),
            Some(other) if *other != id => {
                warn!(entity = %result_id, producer = %other, claimed_by = %id, "entity already has a producer");
                return id;
            }
            Some(_) => {}
        }
        self.add_relation(Relation::WasGeneratedBy { entity: result_id.clone(), activity: id.clone() });
        self.produced.insert(&result_id);
        id
    }

    /// Adds a `used` edge per resolved parameter value and a `wasInformedBy`
    /// edge per informant. Missing nodes are logged and skipped.
    pub fn register_dependencies(&mut self, info: &TaskRecord) {
        let id = self.normalizer.id(&info.key);
        if !self.activity_index.contains_key(&id) {
            warn!(task = %info.key, "dependencies of an unregistered task skipped");
            return;
        }

        for (name, param) in info.params.iter() {
            match param {
                ParamValue::One(value) => self.use_value(&id, name, value, None),
                ParamValue::Many(set) => {
                    for (i, value) in set.iter().enumerate() {
                        self.use_value(&id, name, value, Some(i));
                    }
                }
            }
        }

        for informant in &info.informants {
            let informant_id = self.normalizer.id(informant);
            if self.activity_index.contains_key(&informant_id) {
                self.add_relation(Relation::WasInformedBy { informed: id.clone(), informant: informant_id });
            } else {
                warn!(task = %info.key, informant = %informant, "missing informant activity");
            }
        }
    }

    fn use_value(&mut self, activity: &str, name: &str, value: &Value, index: Option<usize>) {
        let entity_id = match value {
            Value::Raw { value } => {
                let id = match index {
                    // a parameter literally named `return_value` must not shadow the result
                    None if name == RETURN_VALUE => format!("{activity}.arg.{name}"),
                    None => format!("{activity}.{name}"),
                    Some(i) => format!("{activity}.{name}.{i}"),
                };
                let typ = value.type_name(self.rich_types);
                let entity = self.upsert_entity(&id);
                entity.attributes.insert("value".into(), Literal::Str(value.render()));
                entity.attributes.insert("type".into(), Literal::Str(typ));
                id
            }
            Value::Ready { key, value } => {
                let id = self.normalizer.id(key);
                if !self.entity_index.contains_key(&id) {
                    debug!(entity = %id, "ready value without entity, registering inline");
                    let typ = value.type_name(self.rich_types);
                    let entity = self.upsert_entity(&id);
                    entity.attributes.insert("value".into(), Literal::Str(value.render()));
                    entity.attributes.insert("type".into(), Literal::Str(typ));
                }
                id
            }
            Value::Generated { producer } => {
                let id = return_value_id(&self.normalizer.id(producer));
                if !self.entity_index.contains_key(&id) {
                    warn!(activity, param = name, producer = %producer, "missing entity for generated value");
                    return;
                }
                id
            }
        };

        self.add_relation(Relation::Used {
            activity: activity.to_owned(),
            entity: entity_id.clone(),
            role: name.to_owned(),
        });
        self.consumed.insert(&entity_id);
    }

    /// Marks the task successful and records what it produced. `dtype` and
    /// `nbytes` are attached only when both are known.
    pub fn register_success(&mut self, info: &TaskRecord, dtype: Option<&str>, nbytes: Option<u64>) -> Result<()> {
        let id = self.finish_activity(info, Status::Success)?;
        let result = self.result_mut(&id)?;
        if let (Some(dtype), Some(nbytes)) = (dtype, nbytes) {
            result.attributes.insert("dtype".into(), Literal::Str(dtype.to_owned()));
            result.attributes.insert("nbytes".into(), Literal::from(nbytes));
        }
        Ok(())
    }

    /// Marks the task failed and records the exception on its return value.
    /// A blamed task other than the failing one informs the failing activity.
    pub fn register_failure(
        &mut self,
        info: &TaskRecord,
        exception_text: Option<&str>,
        traceback: Option<&str>,
        blamed: Option<&Key>,
    ) -> Result<()> {
        let id = self.finish_activity(info, Status::Failure)?;

        let mut attrs = PropertyMap::new();
        attrs.insert("is_error".into(), Literal::Bool(true));
        if let Some(text) = exception_text {
            attrs.insert("exception_text".into(), Literal::Str(text.to_owned()));
        }
        if let Some(tb) = traceback {
            attrs.insert("traceback".into(), Literal::Str(tb.to_owned()));
        }

        if let Some(blamed) = blamed {
            let blamed_id = self.normalizer.id(blamed);
            if blamed_id != id {
                attrs.insert("blamed_task".into(), Literal::Str(blamed_id.clone()));
                if self.activity_index.contains_key(&blamed_id) {
                    self.add_relation(Relation::WasInformedBy { informed: id.clone(), informant: blamed_id });
                } else {
                    warn!(task = %info.key, blamed = %blamed, "blamed task has no activity");
                }
            }
        }

        self.result_mut(&id)?.attributes = attrs;
        Ok(())
    }

    fn finish_activity(&mut self, info: &TaskRecord, status: Status) -> Result<String> {
        let id = self.normalizer.id(&info.key);
        let activity = self
            .activity_index
            .get(&id)
            .map(|&i| &mut self.activities[i])
            .ok_or_else(|| Error::NotFound(format!("activity {id}")))?;
        activity.status = status;
        activity.start_time = info.start_time;
        activity.end_time = info.finish_time;
        Ok(id)
    }

    fn result_mut(&mut self, activity_id: &str) -> Result<&mut Entity> {
        let result_id = return_value_id(activity_id);
        self.entity_index
            .get(&result_id)
            .map(|&i| &mut self.entities[i])
            .ok_or_else(|| Error::NotFound(format!("entity {result_id}")))
    }

    /// Computes the workflow boundary: entities consumed but never produced
    /// are inputs, entities produced but never consumed are outputs. Calling
    /// it again after late registrations recomputes from the current state.
    pub fn close_workflow(&mut self) -> &Boundary {
        if self.closed {
            debug!(workflow = %self.workflow.id, "recomputing boundary of a closed workflow");
        }
        let boundary = Boundary {
            inputs: self.consumed.difference(&self.produced),
            outputs: self.produced.difference(&self.consumed),
        };
        info!(
            workflow = %self.workflow.id,
            inputs = boundary.inputs.len(),
            outputs = boundary.outputs.len(),
            "workflow closed"
        );
        self.workflow.end_time = Some(Utc::now());
        self.closed = true;
        self.boundary.insert(boundary)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn upsert_activity(&mut self, id: &str) -> &mut Activity {
        let idx = match self.activity_index.get(id) {
            Some(&i) => i,
            None => {
                self.activities.push(Activity::new(id));
                self.activity_index.insert(id.to_owned(), self.activities.len() - 1);
                self.activities.len() - 1
            }
        };
        &mut self.activities[idx]
    }

    fn upsert_entity(&mut self, id: &str) -> &mut Entity {
        let idx = match self.entity_index.get(id) {
            Some(&i) => i,
            None => {
                self.entities.push(Entity::new(id));
                self.entity_index.insert(id.to_owned(), self.entities.len() - 1);
                self.entities.len() - 1
            }
        };
        &mut self.entities[idx]
    }

    fn add_relation(&mut self, relation: Relation) -> bool {
        if self.relation_index.contains(&relation) {
            return false;
        }
        self.relation_index.insert(relation.clone());
        self.relations.push(relation);
        true
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn workflow(&self) -> &Workflow { &self.workflow }
    pub fn activities(&self) -> &[Activity] { &self.activities }
    pub fn entities(&self) -> &[Entity] { &self.entities }
    pub fn relations(&self) -> &[Relation] { &self.relations }
    pub fn boundary(&self) -> Option<&Boundary> { self.boundary.as_ref() }
    pub fn is_closed(&self) -> bool { self.closed }
    pub fn rich_types(&self) -> bool { self.rich_types }

    /// Key collisions seen while normalizing ids.
    pub fn collisions(&self) -> &[Error] {
        self.normalizer.collisions()
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activity_index.get(id).map(|&i| &self.activities[i])
    }

    pub fn entity(&self, id: &str) -> Option<&Entity> {
        self.entity_index.get(id).map(|&i| &self.entities[i])
    }

    /// Activity registered for `key`.
    pub fn activity_for(&self, key: &Key) -> Option<&Activity> {
        self.activity(&crate::normalize::normalize(key))
    }

    /// Return-value entity of the task registered for `key`.
    pub fn result_for(&self, key: &Key) -> Option<&Entity> {
        self.entity(&return_value_id(&crate::normalize::normalize(key)))
    }

    /// `(role, entity id)` of every `used` edge leaving `activity`.
    pub fn used_by<'g>(&'g self, activity: &'g str) -> impl Iterator<Item = (&'g str, &'g str)> + 'g {
        self.relations.iter().filter_map(move |r| match r {
            Relation::Used { activity: a, entity, role } if a == activity => Some((role.as_str(), entity.as_str())),
            _ => None,
        })
    }

    /// Activities that informed `activity`.
    pub fn informants_of<'g>(&'g self, activity: &'g str) -> impl Iterator<Item = &'g str> + 'g {
        self.relations.iter().filter_map(move |r| match r {
            Relation::WasInformedBy { informed, informant } if informed == activity => Some(informant.as_str()),
            _ => None,
        })
    }

    pub fn count(&self, kind: &str) -> usize {
        self.relations.iter().filter(|r| r.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Callable, Params, ValueSet};
    use pretty_assertions::assert_eq;

    fn record(key: &str, params: Params, informants: &[&str]) -> TaskRecord {
        TaskRecord {
            key: Key::scalar(key),
            group: key.split('-').next().unwrap_or(key).to_owned(),
            callable: Callable::new("ops", "f").with_params(["x"]),
            start_time: None,
            finish_time: None,
            params,
            informants: informants.iter().map(|k| Key::scalar(*k)).collect(),
            unresolved: Vec::new(),
            synthetic: false,
        }
    }

    #[test]
    fn test_register_task_is_idempotent() {
        let mut g = ProvGraph::new("wf", false);
        let info = record("inc-1", Params::new(), &[]);
        let a = g.register_task(&info);
        let b = g.register_task(&info);
        assert_eq!(a, b);
        assert_eq!(g.activities().len(), 1);
        assert_eq!(g.entities().len(), 1);
        assert_eq!(g.count("wasGeneratedBy"), 1);
        assert_eq!(g.entity("inc-1.return_value").unwrap().producer.as_deref(), Some("inc-1"));
    }

    #[test]
    fn test_fan_in_literals_get_distinct_entities() {
        let mut g = ProvGraph::new("wf", true);
        let mut params = Params::new();
        params.insert("xs", [Value::raw(1), Value::raw(vec![2, 3])].into_iter().collect::<ValueSet>());
        let info = record("sum-1", params, &[]);
        g.register_task(&info);
        g.register_dependencies(&info);

        let used: Vec<_> = g.used_by("sum-1").collect();
        assert_eq!(used, vec![("xs", "sum-1.xs.0"), ("xs", "sum-1.xs.1")]);
        assert_eq!(g.entity("sum-1.xs.1").unwrap().get("type"), Some(&Literal::from("list[int]")));
    }

    #[test]
    fn test_return_value_parameter_does_not_shadow_result() {
        let mut g = ProvGraph::new("wf", false);
        let mut params = Params::new();
        params.insert("return_value", Value::raw(7));
        let info = record("f-1", params, &[]);
        g.register_task(&info);
        g.register_dependencies(&info);

        let used: Vec<_> = g.used_by("f-1").collect();
        assert_eq!(used, vec![("return_value", "f-1.arg.return_value")]);
        let result = g.entity("f-1.return_value").unwrap();
        assert_eq!(result.get("value"), None);
        assert_eq!(result.producer.as_deref(), Some("f-1"));

        let boundary = g.close_workflow().clone();
        assert_eq!(boundary.inputs, vec!["f-1.arg.return_value".to_string()]);
        assert_eq!(boundary.outputs, vec!["f-1.return_value".to_string()]);
    }

    #[test]
    fn test_missing_producer_is_skipped() {
        let mut g = ProvGraph::new("wf", false);
        let mut params = Params::new();
        params.insert("x", Value::generated("ghost"));
        let info = record("f-1", params, &["ghost"]);
        g.register_task(&info);
        g.register_dependencies(&info);
        assert_eq!(g.count("used"), 0);
        assert_eq!(g.count("wasInformedBy"), 0);
    }

    #[test]
    fn test_success_requires_registration() {
        let mut g = ProvGraph::new("wf", false);
        let info = record("f-1", Params::new(), &[]);
        assert!(matches!(g.register_success(&info, None, None), Err(Error::NotFound(_))));
        g.register_task(&info);
        g.register_success(&info, Some("int"), Some(28)).unwrap();
        let result = g.entity("f-1.return_value").unwrap();
        assert_eq!(result.get("nbytes"), Some(&Literal::Int(28)));
        assert_eq!(g.activity("f-1").unwrap().status, Status::Success);
    }

    #[test]
    fn test_data_registration_sets_type() {
        let mut g = ProvGraph::new("wf", false);
        let id = g.register_data(&DataNode::new("arr-1", vec![1, 2]).with_type("numpy.ndarray")).unwrap();
        assert_eq!(id, "arr-1");
        let e = g.entity("arr-1").unwrap();
        assert_eq!(e.get("type"), Some(&Literal::from("numpy.ndarray")));
        assert_eq!(e.get("value"), Some(&Literal::from("[1, 2]")));
        assert!(g.register_data(&DataNode::inline(3)).is_err());
    }
}
