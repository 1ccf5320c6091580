//! Provenance document export.
//!
//! Encodes a [`ProvGraph`] in one of the W3C PROV exchange notations and
//! either writes it under a destination directory or hands it back as text.
//!
//! ```text
//! ProvGraph → Encoder (PROV-JSON | PROV-N) → {destination}/{name}.{ext}
//!                                          → String (no destination)
//! ```
//!
//! Export is read-only: encoding never mutates the graph.

use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value as Json};
use tracing::info;

use crate::config::Format;
use crate::graph::{Activity, Entity, PropertyMap, ProvGraph, Relation};
use crate::model::Literal;
use crate::Result;

/// Namespace prefix used for every node id.
pub const PREFIX: &str = "task";
pub const NAMESPACE: &str = "urn:task-prov:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Indented output (PROV-JSON only).
    pub pretty: bool,
}

impl Default for SerializeOptions {
    fn default() -> Self {
        Self { pretty: true }
    }
}

/// Where a serialized document ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exported {
    File(PathBuf),
    Document(String),
}

impl Exported {
    pub fn document(&self) -> Option<&str> {
        match self {
            Exported::Document(doc) => Some(doc),
            Exported::File(_) => None,
        }
    }
}

// ============================================================================
// Encoder trait
// ============================================================================

/// Turns a graph into one exchange notation.
pub trait Encoder {
    fn format(&self) -> Format;

    fn encode(&self, graph: &ProvGraph, options: &SerializeOptions, writer: &mut dyn Write) -> Result<()>;
}

pub fn encoder(format: Format) -> &'static dyn Encoder {
    match format {
        Format::Json => &ProvJson,
        Format::ProvN => &ProvN,
    }
}

impl ProvGraph {
    /// Encodes the graph. With a destination directory the document is
    /// written to `{destination}/{workflow name}.{ext}`, otherwise it is
    /// returned as text.
    pub fn serialize(
        &self,
        destination: Option<&Path>,
        format: Format,
        options: &SerializeOptions,
    ) -> Result<Exported> {
        let encoder = encoder(format);
        match destination {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}.{}", self.workflow().name, format.extension()));
                let mut file = fs::File::create(&path)?;
                encoder.encode(self, options, &mut file)?;
                file.flush()?;
                info!(path = %path.display(), "provenance document written");
                Ok(Exported::File(path))
            }
            None => {
                let mut buf = Vec::new();
                encoder.encode(self, options, &mut buf)?;
                Ok(Exported::Document(String::from_utf8_lossy(&buf).into_owned()))
            }
        }
    }
}

fn qualified(id: &str) -> String {
    format!("{PREFIX}:{id}")
}

// ============================================================================
// PROV-JSON
// ============================================================================

pub struct ProvJson;

impl ProvJson {
    fn literal(value: &Literal) -> Json {
        match value {
            Literal::None => Json::Null,
            Literal::Bool(b) => Json::Bool(*b),
            Literal::Int(i) => json!(i),
            Literal::Float(f) => json!(f),
            Literal::Str(s) => Json::String(s.clone()),
            other => Json::String(other.render()),
        }
    }

    fn attributes(attrs: &PropertyMap, out: &mut Map<String, Json>) {
        for (k, v) in attrs {
            out.insert(k.clone(), Self::literal(v));
        }
    }

    fn activity(activity: &Activity) -> Json {
        let mut out = Map::new();
        if let Some(start) = activity.start_time {
            out.insert("prov:startTime".into(), Json::String(start.to_rfc3339()));
        }
        if let Some(end) = activity.end_time {
            out.insert("prov:endTime".into(), Json::String(end.to_rfc3339()));
        }
        out.insert("status".into(), Json::String(activity.status.as_str().into()));
        Self::attributes(&activity.attributes, &mut out);
        Json::Object(out)
    }

    fn entity(entity: &Entity) -> Json {
        let mut out = Map::new();
        Self::attributes(&entity.attributes, &mut out);
        Json::Object(out)
    }

    /// Builds the PROV-JSON document.
    pub fn document(graph: &ProvGraph) -> Json {
        let wf = graph.workflow();

        let mut workflow = Map::new();
        workflow.insert("prov:type".into(), json!("workflow"));
        workflow.insert("prov:label".into(), json!(wf.name));
        workflow.insert("prov:startTime".into(), json!(wf.start_time.to_rfc3339()));
        if let Some(end) = wf.end_time {
            workflow.insert("prov:endTime".into(), json!(end.to_rfc3339()));
        }
        workflow.insert("engine".into(), json!(wf.engine));
        workflow.insert("tasks".into(), json!(graph.activities().len()));
        if let Some(boundary) = graph.boundary() {
            let ids = |ids: &[String]| ids.iter().map(|i| qualified(i)).collect::<Vec<_>>();
            workflow.insert("inputs".into(), json!(ids(&boundary.inputs)));
            workflow.insert("outputs".into(), json!(ids(&boundary.outputs)));
        }

        let mut activities = Map::new();
        activities.insert(qualified(&wf.id), Json::Object(workflow));
        for activity in graph.activities() {
            activities.insert(qualified(&activity.id), Self::activity(activity));
        }

        let mut entities = Map::new();
        for entity in graph.entities() {
            entities.insert(qualified(&entity.id), Self::entity(entity));
        }

        let mut used = Map::new();
        let mut generated = Map::new();
        let mut informed = Map::new();
        for relation in graph.relations() {
            match relation {
                Relation::Used { activity, entity, role } => {
                    let id = format!("_:u{}", used.len() + 1);
                    used.insert(id, json!({
                        "prov:activity": qualified(activity),
                        "prov:entity": qualified(entity),
                        "prov:role": role,
                    }));
                }
                Relation::WasGeneratedBy { entity, activity } => {
                    let id = format!("_:g{}", generated.len() + 1);
                    generated.insert(id, json!({
                        "prov:entity": qualified(entity),
                        "prov:activity": qualified(activity),
                    }));
                }
                Relation::WasInformedBy { informed: a, informant } => {
                    let id = format!("_:i{}", informed.len() + 1);
                    informed.insert(id, json!({
                        "prov:informed": qualified(a),
                        "prov:informant": qualified(informant),
                    }));
                }
            }
        }

        json!({
            "prefix": { PREFIX: NAMESPACE },
            "activity": activities,
            "entity": entities,
            "used": used,
            "wasGeneratedBy": generated,
            "wasInformedBy": informed,
        })
    }
}

impl Encoder for ProvJson {
    fn format(&self) -> Format { Format::Json }

    fn encode(&self, graph: &ProvGraph, options: &SerializeOptions, writer: &mut dyn Write) -> Result<()> {
        let doc = Self::document(graph);
        if options.pretty {
            serde_json::to_writer_pretty(&mut *writer, &doc)?;
        } else {
            serde_json::to_writer(&mut *writer, &doc)?;
        }
        writeln!(writer)?;
        Ok(())
    }
}

// ============================================================================
// PROV-N
// ============================================================================

pub struct ProvN;

impl ProvN {
    fn literal(value: &Literal) -> String {
        match value {
            Literal::Int(i) => format!("{i}"),
            Literal::Float(f) => format!("\"{f}\" %% xsd:double"),
            Literal::Bool(b) => format!("\"{b}\" %% xsd:boolean"),
            other => format!("\"{}\"", other.render().replace('\\', "\\\\").replace('"', "\\\"")),
        }
    }

    fn attributes(pairs: impl IntoIterator<Item = (String, String)>) -> String {
        let inner: Vec<String> = pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        if inner.is_empty() {
            String::new()
        } else {
            format!(", [{}]", inner.join(", "))
        }
    }

    fn bag(attrs: &PropertyMap) -> impl Iterator<Item = (String, String)> + '_ {
        attrs.iter().map(|(k, v)| (format!("{PREFIX}:{k}"), Self::literal(v)))
    }

    /// Builds the PROV-N document.
    pub fn document(graph: &ProvGraph) -> String {
        let mut out = String::new();
        let wf = graph.workflow();
        let time = |t: Option<chrono::DateTime<chrono::Utc>>| t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".into());

        // writing into a String cannot fail
        let _ = writeln!(out, "document");
        let _ = writeln!(out, "  prefix {PREFIX} <{NAMESPACE}>");

        let mut wf_attrs = vec![
            ("prov:type".to_owned(), "\"workflow\"".to_owned()),
            ("prov:label".to_owned(), Self::literal(&Literal::Str(wf.name.clone()))),
            (format!("{PREFIX}:engine"), Self::literal(&Literal::Str(wf.engine.clone()))),
        ];
        if let Some(boundary) = graph.boundary() {
            for input in &boundary.inputs {
                wf_attrs.push((format!("{PREFIX}:input"), format!("'{}'", qualified(input))));
            }
            for output in &boundary.outputs {
                wf_attrs.push((format!("{PREFIX}:output"), format!("'{}'", qualified(output))));
            }
        }
        let _ = writeln!(
            out,
            "  activity({}, {}, {}{})",
            qualified(&wf.id),
            wf.start_time.to_rfc3339(),
            time(wf.end_time),
            Self::attributes(wf_attrs),
        );

        for activity in graph.activities() {
            let status = std::iter::once((format!("{PREFIX}:status"), format!("\"{}\"", activity.status.as_str())));
            let _ = writeln!(
                out,
                "  activity({}, {}, {}{})",
                qualified(&activity.id),
                time(activity.start_time),
                time(activity.end_time),
                Self::attributes(status.chain(Self::bag(&activity.attributes))),
            );
        }

        for entity in graph.entities() {
            let _ = writeln!(out, "  entity({}{})", qualified(&entity.id), Self::attributes(Self::bag(&entity.attributes)));
        }

        for relation in graph.relations() {
            let _ = match relation {
                Relation::Used { activity, entity, role } => writeln!(
                    out,
                    "  used({}, {}, -, [prov:role=\"{role}\"])",
                    qualified(activity),
                    qualified(entity)
                ),
                Relation::WasGeneratedBy { entity, activity } => {
                    writeln!(out, "  wasGeneratedBy({}, {}, -)", qualified(entity), qualified(activity))
                }
                Relation::WasInformedBy { informed, informant } => {
                    writeln!(out, "  wasInformedBy({}, {})", qualified(informed), qualified(informant))
                }
            };
        }

        let _ = writeln!(out, "endDocument");
        out
    }
}

impl Encoder for ProvN {
    fn format(&self) -> Format { Format::ProvN }

    fn encode(&self, graph: &ProvGraph, _options: &SerializeOptions, writer: &mut dyn Write) -> Result<()> {
        writer.write_all(Self::document(graph).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_literal() {
        assert_eq!(ProvJson::literal(&Literal::Int(3)), json!(3));
        assert_eq!(ProvJson::literal(&Literal::from("a")), json!("a"));
        assert_eq!(ProvJson::literal(&Literal::from(vec![1, 2])), json!("[1, 2]"));
        assert_eq!(ProvJson::literal(&Literal::None), Json::Null);
    }

    #[test]
    fn test_provn_literal_escapes_quotes() {
        assert_eq!(ProvN::literal(&Literal::from("say \"hi\"")), "\"say \\\"hi\\\"\"");
        assert_eq!(ProvN::literal(&Literal::Bool(true)), "\"true\" %% xsd:boolean");
    }

    #[test]
    fn test_encoder_lookup() {
        assert_eq!(encoder(Format::Json).format(), Format::Json);
        assert_eq!(encoder(Format::ProvN).format(), Format::ProvN);
    }

    #[test]
    fn test_empty_graph_documents() {
        let graph = ProvGraph::new("empty", false);
        let doc = ProvJson::document(&graph);
        assert_eq!(doc["activity"].as_object().map(|m| m.len()), Some(1));
        assert!(doc["entity"].as_object().unwrap().is_empty());

        let text = ProvN::document(&graph);
        assert!(text.starts_with("document\n"));
        assert!(text.trim_end().ends_with("endDocument"));
    }
}
