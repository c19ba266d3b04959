//! Helpers shared by the integration tests: layouts, in-memory sources,
//! collecting sinks and graph runners.

#![allow(dead_code)]

use std::sync::Arc;

use rivulet_components::{
    generate_fn, Collect, CollectHandle, Generator, TransformError, TransformOutcome,
};
use rivulet_core::config::EngineConfig;
use rivulet_core::record::DataRecord;
use rivulet_core::schema::{DataType, FieldMetadata, RecordMetadata};
use rivulet_core::value::Value;
use rivulet_exec::{Graph, GraphResult};

pub fn init_logging() {
    // a subscriber may already be installed by another test
    let _ = rivulet_exec::init_tracing(Some("warn"));
}

/// Spill to memory, small edges so backpressure is exercised.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        spill_dir: "memory://rivulet-tests".into(),
        edge_capacity: 4,
        poll_interval_ms: 5,
        ..EngineConfig::default()
    }
}

pub fn graph() -> Graph {
    graph_with(test_config())
}

pub fn graph_with(config: EngineConfig) -> Graph {
    init_logging();
    Graph::with_config(config).expect("graph context")
}

pub fn layout(name: &str, fields: &[(&str, DataType)]) -> Arc<RecordMetadata> {
    Arc::new(RecordMetadata::new(
        name,
        fields
            .iter()
            .map(|(n, t)| FieldMetadata::new(*n, *t))
            .collect(),
    ))
}

/// `(id: long, name: string)`
pub fn people() -> Arc<RecordMetadata> {
    layout("people", &[("id", DataType::Long), ("name", DataType::String)])
}

/// `(id: long, city: string)`
pub fn cities() -> Arc<RecordMetadata> {
    layout("cities", &[("id", DataType::Long), ("city", DataType::String)])
}

/// `(id: long, name: string, city: string)`
pub fn joined() -> Arc<RecordMetadata> {
    layout(
        "joined",
        &[
            ("id", DataType::Long),
            ("name", DataType::String),
            ("city", DataType::String),
        ],
    )
}

/// A source emitting `rows` in order on every output.
pub fn source(rows: Vec<Vec<Value>>) -> Generator {
    let mut rows = rows.into_iter();
    Generator::new(Box::new(generate_fn(move |out: &mut [DataRecord]| {
        let Some(row) = rows.next() else {
            return Ok(None);
        };
        for rec in out.iter_mut() {
            for (i, v) in row.iter().enumerate() {
                rec.set(i, v.clone())?;
            }
        }
        Ok::<_, TransformError>(Some(TransformOutcome::All))
    })))
}

/// Rows of `(id, name)` pairs.
pub fn pairs(rows: &[(i64, &str)]) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|(id, s)| vec![Value::Long(*id), Value::from(*s)])
        .collect()
}

/// Single-field rows of longs.
pub fn longs(values: &[i64]) -> Vec<Vec<Value>> {
    values.iter().map(|v| vec![Value::Long(*v)]).collect()
}

pub fn sink() -> (Collect, CollectHandle) {
    let handle = CollectHandle::new();
    (Collect::new(handle.clone()), handle)
}

/// Run and return the result; panics only if the graph cannot start.
pub fn run(graph: Graph) -> GraphResult {
    graph.run().expect("graph starts")
}

pub fn run_ok(graph: Graph) -> GraphResult {
    let result = run(graph);
    assert!(
        result.is_ok(),
        "graph failed: {:?}",
        result.failure()
    );
    result
}

pub fn long_at(rec: &DataRecord, field: &str) -> i64 {
    rec.field(field)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("field '{field}' is not a long in {rec:?}"))
}

pub fn str_at<'a>(rec: &'a DataRecord, field: &str) -> Option<&'a str> {
    rec.field(field).and_then(Value::as_str)
}

/// Field `field` of every record, as longs.
pub fn column(records: &[DataRecord], field: &str) -> Vec<i64> {
    records.iter().map(|r| long_at(r, field)).collect()
}

/// Records rendered as their value lists, sorted, for multiset comparison.
pub fn multiset(records: &[DataRecord]) -> Vec<String> {
    let mut rows: Vec<String> = records
        .iter()
        .map(|r| {
            r.values()
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect();
    rows.sort();
    rows
}
