//! End-to-end tests for document export: file layout, PROV-JSON structure
//! and PROV-N text.

use task_prov::{
    Arg, Callable, Config, DataNode, Exported, Format, GraphBuilder, Key, TaskSnapshot, TaskSpec,
    TaskState,
};

fn populate(t: &GraphBuilder) {
    let data = DataNode::new("x", vec![1i64, 2, 3]);
    t.on_transition(&Key::scalar("x"), TaskState::Released, TaskState::Memory, &TaskSnapshot::new(data.clone()));

    let key = Key::scalar("sum-1");
    let spec = TaskSpec::new("sum-1", Callable::new("builtins", "sum").with_params(["values"]))
        .arg(Arg::reference("x"));
    let snapshot = TaskSnapshot::new(spec).with_dependency("x", data).with_result("int", 28);
    t.on_transition(&key, TaskState::Released, TaskState::Waiting, &snapshot);
    t.on_transition(&key, TaskState::Waiting, TaskState::Processing, &snapshot);
    t.on_transition(&key, TaskState::Processing, TaskState::Memory, &snapshot);
}

// ============================================================================
// 1. PROV-JSON file under the destination directory
// ============================================================================

#[test]
fn test_json_written_to_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("prov");
    let t = GraphBuilder::new(Config::default().with_name("etl").with_destination(Some(&dest)));
    populate(&t);

    let exported = t.on_close().unwrap();
    let path = dest.join("etl.json");
    assert_eq!(exported, Exported::File(path.clone()));

    let text = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(doc["prefix"]["task"], "urn:task-prov:");
    assert_eq!(doc["activity"]["task:sum-1"]["status"], "success");
    assert_eq!(doc["activity"]["task:sum-1"]["name"], "builtins.sum");
    assert_eq!(doc["entity"]["task:x"]["type"], "list");
    assert_eq!(doc["entity"]["task:x"]["value"], "[1, 2, 3]");
    assert_eq!(doc["entity"]["task:sum-1.return_value"]["nbytes"], 28);

    let workflow = doc["activity"]
        .as_object()
        .unwrap()
        .values()
        .find(|a| a["prov:type"] == "workflow")
        .unwrap();
    assert_eq!(workflow["prov:label"], "etl");
    assert_eq!(workflow["engine"], "dask");
    assert_eq!(workflow["inputs"], serde_json::json!(["task:x"]));
    assert_eq!(workflow["outputs"], serde_json::json!(["task:sum-1.return_value"]));

    let used = doc["used"].as_object().unwrap();
    assert_eq!(used.len(), 1);
    assert_eq!(used["_:u1"]["prov:role"], "values");
    assert_eq!(doc["wasGeneratedBy"].as_object().unwrap().len(), 1);
}

// ============================================================================
// 2. Rich types name container elements
// ============================================================================

#[test]
fn test_rich_types_in_document() {
    let t = GraphBuilder::new(Config::default().with_destination(None::<&str>).with_rich_types(true));
    populate(&t);

    let exported = t.on_close().unwrap();
    let doc: serde_json::Value = serde_json::from_str(exported.document().unwrap()).unwrap();
    assert_eq!(doc["entity"]["task:x"]["type"], "list[int]");
}

// ============================================================================
// 3. PROV-N text
// ============================================================================

#[test]
fn test_provn_document() {
    let dir = tempfile::tempdir().unwrap();
    let t = GraphBuilder::new(
        Config::default()
            .with_name("etl")
            .with_destination(Some(dir.path()))
            .with_format(Format::ProvN),
    );
    populate(&t);
    t.on_close().unwrap();

    let text = std::fs::read_to_string(dir.path().join("etl.provn")).unwrap();
    assert!(text.starts_with("document\n"));
    assert!(text.trim_end().ends_with("endDocument"));
    assert!(text.contains("prefix task <urn:task-prov:>"));
    assert!(text.contains("activity(task:sum-1"));
    assert!(text.contains("used(task:sum-1, task:x"));
    assert!(text.contains("wasGeneratedBy(task:sum-1.return_value, task:sum-1"));
}

// ============================================================================
// 4. Closing twice exports again
// ============================================================================

#[test]
fn test_second_close_exports_again() {
    let t = GraphBuilder::new(Config::default().with_destination(None::<&str>));
    populate(&t);

    let first = t.on_close().unwrap();
    let second = t.on_close().unwrap();
    assert!(first.document().is_some() && second.document().is_some());
    assert!(t.is_closed());
}
