//! Fan-out by round-robin, hash and range.

mod common;

use std::collections::HashMap;

use rivulet_components::{CollectHandle, Partition, PartitionFunction};
use rivulet_core::key::{KeyField, RecordKey};
use rivulet_core::record::DataRecord;
use rivulet_core::schema::DataType;
use rivulet_exec::Graph;

fn numbers() -> std::sync::Arc<rivulet_core::schema::RecordMetadata> {
    common::layout("numbers", &[("n", DataType::Long)])
}

/// source -> partition -> `outputs` collecting sinks
fn fan_out(partition: Partition, input: &[i64], outputs: usize) -> (Graph, Vec<CollectHandle>) {
    let mut g = common::graph();
    g.add("src", common::source(common::longs(input))).expect("add source");
    g.add("part", partition).expect("add partition");
    g.connect(("src", 0), ("part", 0), numbers()).expect("edge");
    let mut handles = Vec::new();
    for port in 0..outputs {
        let id = format!("out{port}");
        let (sink, handle) = common::sink();
        g.add(&id, sink).expect("add sink");
        g.connect(("part", port), (&id, 0), numbers()).expect("edge");
        handles.push(handle);
    }
    (g, handles)
}

fn values(handle: &CollectHandle) -> Vec<i64> {
    common::column(&handle.records(), "n")
}

#[test]
fn round_robin_is_fair_and_keeps_relative_order() {
    let input: Vec<i64> = (0..30).collect();
    let (g, outs) = fan_out(Partition::round_robin(), &input, 3);
    common::run_ok(g);

    for (port, out) in outs.iter().enumerate() {
        let got = values(out);
        assert_eq!(got.len(), 10, "port {port}");
        let expected: Vec<i64> = input.iter().copied().skip(port).step_by(3).collect();
        assert_eq!(got, expected, "port {port}");
    }
}

#[test]
fn range_partition_of_sorted_input_is_monotonic() {
    let input: Vec<i64> = (-5..25).collect();
    let bounds = vec!["0".to_string(), "10".to_string(), "20".to_string()];
    let partition = Partition::range(vec![KeyField::asc("n")], bounds);
    let (g, outs) = fan_out(partition, &input, 3);
    common::run_ok(g);

    let mut port_of = HashMap::new();
    for (port, out) in outs.iter().enumerate() {
        for v in values(out) {
            port_of.insert(v, port);
        }
    }
    let ports: Vec<usize> = input.iter().map(|v| port_of[v]).collect();
    assert!(ports.windows(2).all(|w| w[0] <= w[1]), "{ports:?}");

    // inclusive upper bounds, overflow to the last port
    assert_eq!(port_of[&0], 0);
    assert_eq!(port_of[&1], 1);
    assert_eq!(port_of[&10], 1);
    assert_eq!(port_of[&20], 2);
    assert_eq!(port_of[&24], 2);
}

#[test]
fn range_partition_with_an_overflow_port() {
    let input = [1, 5, 6, 50];
    let bounds = vec!["5".to_string()];
    let partition = Partition::range(vec![KeyField::asc("n")], bounds);
    let (g, outs) = fan_out(partition, &input, 2);
    common::run_ok(g);
    assert_eq!(values(&outs[0]), vec![1, 5]);
    assert_eq!(values(&outs[1]), vec![6, 50]);
}

#[test]
fn hash_partition_routes_equal_keys_together() {
    let input: Vec<i64> = (0..40).map(|i| i % 7).collect();
    let (g, outs) = fan_out(Partition::hash(vec![KeyField::asc("n")]), &input, 4);
    common::run_ok(g);

    let mut seen: HashMap<i64, usize> = HashMap::new();
    let mut total = 0;
    for (port, out) in outs.iter().enumerate() {
        for v in values(out) {
            total += 1;
            let first = *seen.entry(v).or_insert(port);
            assert_eq!(first, port, "key {v} went to two ports");
        }
    }
    assert_eq!(total, input.len());
}

/// Routes even numbers to port 0 and odd ones to port 1.
#[derive(Default)]
struct Parity {
    field: usize,
}

impl PartitionFunction for Parity {
    fn init(
        &mut self,
        outputs: usize,
        key: Option<&RecordKey>,
    ) -> rivulet_components::Result<()> {
        assert_eq!(outputs, 2);
        self.field = key.map(|k| k.field_indices()[0]).unwrap_or(0);
        Ok(())
    }

    fn port(&mut self, record: &DataRecord) -> rivulet_components::Result<usize> {
        let v = record.get(self.field).and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(v.rem_euclid(2) as usize)
    }
}

#[test]
fn custom_partition_function() {
    let partition = Partition::new(Some(vec![KeyField::asc("n")]), Box::<Parity>::default());
    let (g, outs) = fan_out(partition, &[1, 2, 3, 4, 5], 2);
    common::run_ok(g);
    assert_eq!(values(&outs[0]), vec![2, 4]);
    assert_eq!(values(&outs[1]), vec![1, 3, 5]);
}

#[test]
fn unwired_output_slots_are_rejected_at_init() {
    let mut g = common::graph();
    g.add("src", common::source(common::longs(&[1]))).expect("add");
    g.add("part", Partition::round_robin()).expect("add");
    let (sink, _) = common::sink();
    g.add("out", sink).expect("add");
    g.connect(("src", 0), ("part", 0), numbers()).expect("edge");
    g.connect(("part", 1), ("out", 0), numbers()).expect("edge");
    let err = g.run().err().expect("gap at port 0");
    assert!(err.to_string().contains("part"), "{err}");
}
