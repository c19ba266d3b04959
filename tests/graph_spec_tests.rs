//! Graphs built from YAML and JSON definitions through the registries.

mod common;

use rivulet_components::{transform_fn, CollectHandle, ResultCode, TransformError, TransformOutcome};
use rivulet_core::value::Value;
use rivulet_exec::{ComponentRegistry, GraphError, GraphSpec, TransformRegistry};

const SORT_AND_FILTER: &str = r#"
config:
  spill_dir: "memory://graph-spec"
  edge_capacity: 2
metadata:
  people:
    name: people
    fields:
      - { name: id,   type: long }
      - { name: name, type: string }
components:
  - id: src
    type: GENERATOR
    attrs:
      records: [[3, "cid"], [1, "ann"], [4, "dee"], [2, "bob"]]
  - { id: sort,   type: SORT,       attrs: { key: "id(d)" } }
  - { id: filter, type: EXT_FILTER, attrs: { predicate: "id > 1" } }
  - { id: kept,   type: COLLECT,    attrs: { handle: kept } }
  - { id: gone,   type: COLLECT,    attrs: { handle: gone }, phase: 1 }
edges:
  - { from: src,        to: sort,   metadata: people }
  - { from: "sort:0",   to: filter, metadata: people }
  - { from: "filter:0", to: kept,   metadata: people }
  - { from: "filter:1", to: gone,   metadata: people }
"#;

fn sinks(names: &[&str]) -> (TransformRegistry, Vec<CollectHandle>) {
    let mut transforms = TransformRegistry::new();
    let handles = names
        .iter()
        .map(|name| {
            let handle = CollectHandle::new();
            transforms.register_sink(name, handle.clone());
            handle
        })
        .collect();
    (transforms, handles)
}

#[test]
fn yaml_graph_runs_end_to_end() {
    common::init_logging();
    let (transforms, handles) = sinks(&["kept", "gone"]);
    let spec = GraphSpec::from_yaml(SORT_AND_FILTER).expect("yaml");
    let graph = spec
        .build(&ComponentRegistry::with_builtins(), &transforms)
        .expect("build");
    assert_eq!(graph.len(), 5);
    let result = common::run_ok(graph);

    assert_eq!(common::column(&handles[0].records(), "id"), vec![4, 3, 2]);
    assert_eq!(common::column(&handles[1].records(), "id"), vec![1]);
    assert_eq!(result.component("gone").expect("status").phase, 1);
}

#[test]
fn json_graph_aggregates() {
    common::init_logging();
    let json = r#"{
        "config": { "spill_dir": "memory://graph-spec-json" },
        "metadata": {
            "in":  { "name": "in",  "fields": [ { "name": "group", "type": "string" },
                                                { "name": "value", "type": "long" } ] },
            "out": { "name": "out", "fields": [ { "name": "group", "type": "string" },
                                                { "name": "total", "type": "long" },
                                                { "name": "n",     "type": "long" } ] }
        },
        "components": [
            { "id": "src", "type": "GENERATOR",
              "attrs": { "records": [["A", 1], ["A", 3], ["B", 2]] } },
            { "id": "agg", "type": "AGGREGATE",
              "attrs": { "key": "group", "mapping": ["total:=sum(value)", "n:=count()"] } },
            { "id": "out", "type": "COLLECT", "attrs": { "handle": "out" } }
        ],
        "edges": [
            { "from": "src:0", "to": "agg:0", "metadata": "in" },
            { "from": "agg:0", "to": "out:0", "metadata": "out" }
        ]
    }"#;
    let (transforms, handles) = sinks(&["out"]);
    let graph = GraphSpec::from_json(json)
        .expect("json")
        .build(&ComponentRegistry::default(), &transforms)
        .expect("build");
    common::run_ok(graph);

    let rows: Vec<(String, i64, i64)> = handles[0]
        .records()
        .iter()
        .map(|r| {
            (
                common::str_at(r, "group").unwrap_or_default().to_string(),
                common::long_at(r, "total"),
                common::long_at(r, "n"),
            )
        })
        .collect();
    assert_eq!(rows, vec![("A".into(), 4, 2), ("B".into(), 2, 1)]);
}

#[test]
fn registered_transforms_are_found_by_name() {
    common::init_logging();
    let yaml = r#"
config: { spill_dir: "memory://graph-spec-transform" }
metadata:
  people:
    name: people
    fields:
      - { name: id,   type: long }
      - { name: name, type: string }
components:
  - { id: src,   type: GENERATOR, attrs: { records: [[1, "ann"], [2, "bob"]] } }
  - { id: upper, type: REFORMAT,  attrs: { transform: shout } }
  - { id: out,   type: COLLECT,   attrs: { handle: out } }
edges:
  - { from: src,   to: upper, metadata: people }
  - { from: upper, to: out,   metadata: people }
"#;
    let (mut transforms, handles) = sinks(&["out"]);
    transforms.register_transform("shout", || {
        Box::new(transform_fn(|inputs, outputs| {
            let rec = inputs[0].ok_or_else(|| TransformError::failed("no input"))?;
            outputs[0].copy_fields_by_name(rec)?;
            let name = common::str_at(rec, "name").unwrap_or_default().to_uppercase();
            outputs[0].set_by_name("name", Value::from(name))?;
            Ok(TransformOutcome::All)
        }))
    });
    let graph = GraphSpec::from_yaml(yaml)
        .expect("yaml")
        .build(&ComponentRegistry::with_builtins(), &transforms)
        .expect("build");
    common::run_ok(graph);

    let names: Vec<String> = handles[0]
        .records()
        .iter()
        .filter_map(|r| common::str_at(r, "name").map(str::to_string))
        .collect();
    assert_eq!(names, ["ANN", "BOB"]);
}

fn one_component(kind: &str, attrs: &str) -> GraphSpec {
    let yaml = format!(
        r#"
config: {{ spill_dir: "memory://graph-spec-errors" }}
components:
  - {{ id: broken, type: {kind}, attrs: {attrs} }}
"#
    );
    GraphSpec::from_yaml(&yaml).expect("yaml")
}

#[test]
fn unknown_types_and_bad_attributes_fail_the_build() {
    let registry = ComponentRegistry::with_builtins();
    let transforms = TransformRegistry::new();

    let err = one_component("TELEPORT", "{}")
        .build(&registry, &transforms)
        .err()
        .expect("unknown type");
    assert!(matches!(err, GraphError::UnknownType(ref t) if t == "TELEPORT"), "{err}");

    let err = one_component("SORT", "{}")
        .build(&registry, &transforms)
        .err()
        .expect("sort without key");
    match err {
        GraphError::Component { id, kind, .. } => {
            assert_eq!(id, "broken");
            assert_eq!(kind, "SORT");
        }
        other => panic!("unexpected error {other}"),
    }

    let err = one_component("REFORMAT", "{ transform: missing }")
        .build(&registry, &transforms)
        .err()
        .expect("unknown transform");
    assert!(err.to_string().contains("unknown transform 'missing'"), "{err}");
}

#[test]
fn definitions_load_from_files() {
    common::init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let yaml_path = dir.path().join("graph.yaml");
    std::fs::write(&yaml_path, SORT_AND_FILTER).expect("write yaml");
    let spec = GraphSpec::from_path(&yaml_path).expect("load yaml");
    assert_eq!(spec.components.len(), 5);

    let json_path = dir.path().join("graph.json");
    std::fs::write(&json_path, serde_json::to_string(&spec).expect("to json")).expect("write json");
    let reloaded = GraphSpec::from_path(&json_path).expect("load json");
    assert_eq!(reloaded.edges.len(), spec.edges.len());

    let (transforms, handles) = sinks(&["kept", "gone"]);
    let graph = reloaded
        .build(&ComponentRegistry::with_builtins(), &transforms)
        .expect("build");
    let result = common::run(graph);
    assert_eq!(result.code, ResultCode::Ok);
    assert_eq!(handles[0].len() + handles[1].len(), 4);
}
