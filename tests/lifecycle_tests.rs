//! End-of-stream, failure policy, cancellation and phases.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rivulet_components::{
    generate_fn, transform_fn, Component, ComponentError, Generator, InitContext, LookupTable,
    Ports, Reformat, ResultCode, RunContext, SimpleCopy, TransformError, TransformOutcome, Trash,
};
use rivulet_core::key::{KeyField, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::schema::DataType;
use rivulet_core::value::Value;
use rivulet_exec::Graph;

use common::{cities, people};

#[derive(Clone, Copy)]
enum Failure {
    Fatal,
    Panic,
}

/// Passes `after` records through, then fails.
struct FailAfter {
    after: usize,
    failure: Failure,
}

impl Component for FailAfter {
    fn type_tag(&self) -> &'static str {
        "FAIL_AFTER"
    }

    fn init(&mut self, ctx: &InitContext<'_>) -> rivulet_components::Result<()> {
        ctx.require_inputs(1, Some(1))?;
        ctx.require_outputs(1, Some(1))
    }

    fn run(&mut self, ports: &mut Ports, ctx: &RunContext) -> rivulet_components::Result<()> {
        let mut input = ports.take_input(0)?;
        let mut bytes = Vec::new();
        let mut passed = 0;
        while input.read_direct(&mut bytes)? {
            ctx.checkpoint()?;
            if passed == self.after {
                match self.failure {
                    Failure::Fatal => return Err(ComponentError::fatal("broken invariant")),
                    Failure::Panic => panic!("component bug"),
                }
            }
            ports.output(0)?.write_direct(&bytes)?;
            passed += 1;
        }
        Ok(())
    }
}

fn ids(n: i64) -> Vec<(i64, &'static str)> {
    (1..=n).map(|i| (i, "x")).collect()
}

/// src -> FailAfter -> out
fn failing_graph(graph: &mut Graph, failure: Failure) -> rivulet_components::CollectHandle {
    graph.add("src", common::source(common::pairs(&ids(20)))).expect("add");
    graph.add("fail", FailAfter { after: 2, failure }).expect("add");
    let (sink, handle) = common::sink();
    graph.add("out", sink).expect("add");
    graph.connect(("src", 0), ("fail", 0), people()).expect("edge");
    graph.connect(("fail", 0), ("out", 0), people()).expect("edge");
    handle
}

#[test]
fn every_edge_sees_exactly_one_eof() {
    let mut g = common::graph();
    g.add("src", common::source(common::pairs(&ids(50)))).expect("add");
    g.add("copy", SimpleCopy).expect("add");
    g.add("trash", Trash).expect("add");
    let (sink, handle) = common::sink();
    g.add("out", sink).expect("add");
    g.connect(("src", 0), ("copy", 0), people()).expect("edge");
    g.connect(("copy", 0), ("trash", 0), people()).expect("edge");
    g.connect(("copy", 1), ("out", 0), people()).expect("edge");
    let result = common::run_ok(g);

    assert_eq!(handle.len(), 50);
    assert_eq!(result.edges.len(), 3);
    for edge in &result.edges {
        assert_eq!(edge.counts.eofs, 1, "{} -> {}", edge.from, edge.to);
        assert_eq!(edge.counts.records, 50, "{} -> {}", edge.from, edge.to);
    }
    assert!(result.components.iter().all(|c| c.code == ResultCode::Ok));
}

#[test]
fn empty_graph_is_ok() {
    let result = common::run(common::graph());
    assert_eq!(result.code, ResultCode::Ok);
    assert!(result.components.is_empty());
}

#[test]
fn transform_error_closes_outputs_and_keeps_partial_output() {
    let mut g = common::graph();
    g.add("src", common::source(common::pairs(&ids(10)))).expect("add");
    let transform = transform_fn(|inputs, outputs| {
        let rec = inputs[0].ok_or_else(|| TransformError::failed("no input"))?;
        if common::long_at(rec, "id") == 3 {
            return Err(TransformError::failed("id 3 is not allowed"));
        }
        outputs[0].copy_fields_by_name(rec)?;
        Ok(TransformOutcome::All)
    });
    g.add("reformat", Reformat::new(Box::new(transform))).expect("add");
    let (sink, handle) = common::sink();
    g.add("out", sink).expect("add");
    g.connect(("src", 0), ("reformat", 0), people()).expect("edge");
    g.connect(("reformat", 0), ("out", 0), people()).expect("edge");
    let result = common::run(g);

    assert_eq!(result.code, ResultCode::Error);
    let reformat = result.component("reformat").expect("status");
    assert_eq!(reformat.code, ResultCode::Error);
    let msg = reformat.message.as_deref().unwrap_or_default();
    assert!(msg.contains("id 3 is not allowed"), "{msg}");

    // downstream saw a clean end of a short stream
    assert_eq!(result.component("out").expect("sink").code, ResultCode::Ok);
    assert_eq!(common::column(&handle.records(), "id"), vec![1, 2]);
    assert_eq!(result.edge("reformat:0", "out:0").expect("edge").counts.eofs, 1);
}

#[test]
fn fatal_error_leaves_outputs_open_and_stops_the_graph() {
    let mut g = common::graph();
    failing_graph(&mut g, Failure::Fatal);
    let result = common::run(g);

    assert_eq!(result.code, ResultCode::FatalError);
    let failed = result.failure().expect("failure");
    assert_eq!(failed.id, "fail");
    assert!(failed.message.as_deref().unwrap_or_default().contains("broken invariant"));
    assert_eq!(result.edge("fail:0", "out:0").expect("edge").counts.eofs, 0);
    assert_eq!(result.component("out").expect("sink").code, ResultCode::Stopped);
}

#[test]
fn fatal_error_can_close_outputs() {
    let mut config = common::test_config();
    config.close_ports_on_fatal = true;
    let mut g = common::graph_with(config);
    failing_graph(&mut g, Failure::Fatal);
    let result = common::run(g);

    assert_eq!(result.code, ResultCode::FatalError);
    assert_eq!(result.edge("fail:0", "out:0").expect("edge").counts.eofs, 1);
}

#[test]
fn a_panic_is_reported_as_fatal() {
    let mut g = common::graph();
    failing_graph(&mut g, Failure::Panic);
    let result = common::run(g);

    let failed = result.component("fail").expect("status");
    assert_eq!(failed.code, ResultCode::FatalError);
    let msg = failed.message.as_deref().unwrap_or_default();
    assert!(msg.starts_with("panicked"), "{msg}");
    assert!(msg.contains("component bug"), "{msg}");
    assert_eq!(result.code, ResultCode::FatalError);
}

#[test]
fn cancelling_stops_every_component() {
    let mut g = common::graph();
    let mut n = 0i64;
    let endless = Generator::new(Box::new(generate_fn(move |out: &mut [DataRecord]| {
        n += 1;
        for rec in out.iter_mut() {
            rec.set(0, n)?;
        }
        Ok::<_, TransformError>(Some(TransformOutcome::All))
    })));
    let numbers = common::layout("numbers", &[("n", DataType::Long)]);
    g.add("endless", endless).expect("add");
    g.add("copy", SimpleCopy).expect("add");
    g.add("trash", Trash).expect("add");
    g.connect(("endless", 0), ("copy", 0), Arc::clone(&numbers)).expect("edge");
    g.connect(("copy", 0), ("trash", 0), numbers).expect("edge");

    let token = g.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        token.cancel();
    });
    let result = common::run(g);
    canceller.join().expect("canceller");

    assert_eq!(result.code, ResultCode::Stopped);
    for status in &result.components {
        assert_eq!(status.code, ResultCode::Stopped, "{}", status.id);
    }
    // stopped components still end their outputs
    assert_eq!(result.edges.len(), 2);
    for edge in &result.edges {
        assert_eq!(edge.counts.eofs, 1, "{} -> {}", edge.from, edge.to);
    }
}

#[test]
fn cancelling_a_long_chain_delivers_every_eof() {
    // capacity 1 keeps every edge full when the token fires
    let mut config = common::test_config();
    config.edge_capacity = 1;
    let mut g = common::graph_with(config);
    let mut n = 0i64;
    let endless = Generator::new(Box::new(generate_fn(move |out: &mut [DataRecord]| {
        n += 1;
        for rec in out.iter_mut() {
            rec.set(0, n)?;
        }
        Ok::<_, TransformError>(Some(TransformOutcome::All))
    })));
    let numbers = common::layout("numbers", &[("n", DataType::Long)]);
    g.add("endless", endless).expect("add");
    g.add("copy1", SimpleCopy).expect("add");
    g.add("copy2", SimpleCopy).expect("add");
    g.add("copy3", SimpleCopy).expect("add");
    g.add("trash", Trash).expect("add");
    g.connect(("endless", 0), ("copy1", 0), Arc::clone(&numbers)).expect("edge");
    g.connect(("copy1", 0), ("copy2", 0), Arc::clone(&numbers)).expect("edge");
    g.connect(("copy2", 0), ("copy3", 0), Arc::clone(&numbers)).expect("edge");
    g.connect(("copy3", 0), ("trash", 0), numbers).expect("edge");

    let token = g.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        token.cancel();
    });
    let result = common::run(g);
    canceller.join().expect("canceller");

    assert_eq!(result.code, ResultCode::Stopped);
    assert_eq!(result.edges.len(), 4);
    assert!(result.edges.iter().all(|e| e.counts.eofs == 1));
}

#[test]
fn cross_phase_edges_buffer_the_whole_stream() {
    // capacity 4 would block a bounded edge long before 100 records
    let mut g = common::graph();
    g.add("src", common::source(common::pairs(&ids(100)))).expect("add");
    let (sink, handle) = common::sink();
    g.add_in_phase("out", 1, sink).expect("add");
    g.connect(("src", 0), ("out", 0), people()).expect("edge");
    let result = common::run_ok(g);

    assert_eq!(handle.len(), 100);
    assert_eq!(result.component("src").expect("src").phase, 0);
    assert_eq!(result.component("out").expect("out").phase, 1);
}

#[test]
fn a_failed_phase_skips_later_phases() {
    let mut g = common::graph();
    failing_graph(&mut g, Failure::Fatal);
    g.add_in_phase("later", 1, common::source(common::pairs(&ids(3)))).expect("add");
    let (sink, handle) = common::sink();
    g.add_in_phase("later_out", 1, sink).expect("add");
    g.connect(("later", 0), ("later_out", 0), people()).expect("edge");
    let result = common::run(g);

    assert_eq!(result.code, ResultCode::FatalError);
    assert_eq!(result.component("later").expect("status").code, ResultCode::NotRun);
    assert_eq!(result.component("later_out").expect("status").code, ResultCode::NotRun);
    assert!(handle.is_empty());
}

#[test]
fn transforms_share_lookups_and_sequences() {
    let mut g = common::graph();
    let context = Arc::clone(g.context());

    let table_key = RecordKey::new(&cities(), &[KeyField::asc("id")]).expect("key");
    let rows = [(1, "oslo"), (2, "rome")].map(|(id, city)| {
        DataRecord::from_values(cities(), vec![Value::Long(id), Value::from(city)]).expect("row")
    });
    context.register_lookup("cities", LookupTable::from_records(table_key, rows));
    context.define_sequence("seq", 100, 10);

    let enriched = common::layout(
        "enriched",
        &[
            ("seq", DataType::Long),
            ("name", DataType::String),
            ("city", DataType::String),
        ],
    );
    let shared = Arc::clone(&context);
    let transform = transform_fn(move |inputs, outputs| {
        let rec = inputs[0].ok_or_else(|| TransformError::failed("no input"))?;
        let id = rec.field("id").cloned().unwrap_or(Value::Null);
        let city = shared
            .lookup("cities")
            .and_then(|t| t.get_values(&[id]).and_then(|r| r.field("city").cloned()))
            .unwrap_or(Value::Null);
        let seq = shared
            .next_value("seq")
            .map_err(|e| TransformError::failed(e.to_string()))?;
        let out = &mut outputs[0];
        out.set_by_name("seq", seq)?;
        out.set_by_name("name", rec.field("name").cloned().unwrap_or(Value::Null))?;
        out.set_by_name("city", city)?;
        Ok(TransformOutcome::All)
    });

    g.add("src", common::source(common::pairs(&[(1, "ann"), (3, "bob"), (2, "cid")])))
        .expect("add");
    g.add("enrich", Reformat::new(Box::new(transform))).expect("add");
    let (sink, handle) = common::sink();
    g.add("out", sink).expect("add");
    g.connect(("src", 0), ("enrich", 0), people()).expect("edge");
    g.connect(("enrich", 0), ("out", 0), enriched).expect("edge");
    common::run_ok(g);

    let records = handle.records();
    assert_eq!(common::column(&records, "seq"), vec![100, 110, 120]);
    let cities: Vec<Option<&str>> = records.iter().map(|r| common::str_at(r, "city")).collect();
    assert_eq!(cities, vec![Some("oslo"), None, Some("rome")]);
    assert_eq!(context.next_value("seq").expect("seq"), 130);
}
