//! Spill segments, sorted runs and the external sort that uses them.

mod common;

use std::path::Path;
use std::sync::Arc;

use rivulet_components::{Sort, Trash};
use rivulet_core::id::SpillId;
use rivulet_core::key::KeyField;
use rivulet_core::schema::DataType;
use rivulet_io::{FsStorage, MemoryStorage};
use rivulet_mem::error::Error as MemError;
use rivulet_mem::spill::HEADER_LEN;
use rivulet_mem::{Codec, MemoryBudgetImpl, RunMeta, RunReader, RunWriter, SpillManager};

fn manager(storage: &MemoryStorage, codec: Codec) -> SpillManager {
    SpillManager::new(
        Arc::new(storage.clone()),
        codec,
        "memory://spill-tests".into(),
        SpillId::new(7),
    )
}

fn write_run(mgr: &SpillManager, records: &[Vec<u8>]) -> RunMeta {
    let mut writer = RunWriter::new(mgr, 64);
    for rec in records {
        writer.push(rec).expect("push");
    }
    writer.finish().expect("finish")
}

fn sample_records() -> Vec<Vec<u8>> {
    (0..100u32)
        .map(|i| format!("record-{i:04}-{}", "x".repeat((i % 13) as usize)).into_bytes())
        .collect()
}

fn read_all(mgr: &SpillManager, meta: RunMeta) -> Result<Vec<Vec<u8>>, MemError> {
    let budget = MemoryBudgetImpl::new(1 << 20);
    let mut reader = RunReader::new(meta);
    let mut out = Vec::new();
    let mut buf = Vec::new();
    while reader.next(mgr, &budget, &mut buf)? {
        out.push(buf.clone());
    }
    Ok(out)
}

#[test]
fn runs_read_back_in_write_order() {
    let storage = MemoryStorage::new();
    let mgr = manager(&storage, Codec::None);
    let records = sample_records();
    let meta = write_run(&mgr, &records);

    assert_eq!(meta.records, 100);
    assert!(meta.blocks.len() > 1, "64 byte blocks should split the run");
    assert!(meta.blocks[0].path.ends_with("spill7_run0_blk0.seg"), "{}", meta.blocks[0].path);
    assert_eq!(storage.len(), meta.blocks.len());
    assert_eq!(read_all(&mgr, meta).expect("read"), records);
}

#[test]
fn a_flipped_byte_fails_the_checksum() {
    let storage = MemoryStorage::new();
    let mgr = manager(&storage, Codec::None);
    let meta = write_run(&mgr, &sample_records());
    assert!(storage.corrupt(&meta.blocks[1].path, HEADER_LEN + 3));

    match read_all(&mgr, meta) {
        Err(MemError::ChecksumMismatch(segment)) => assert_eq!(segment, "spill7_run0_blk1"),
        other => panic!("expected a checksum mismatch, got {other:?}"),
    }
}

#[test]
fn discarded_runs_and_dropped_managers_leave_nothing_behind() {
    let storage = MemoryStorage::new();
    {
        let mgr = manager(&storage, Codec::None);
        let first = write_run(&mgr, &sample_records());
        let _second = write_run(&mgr, &sample_records());
        let blocks = first.blocks.len();
        let before = storage.len();
        RunReader::new(first).discard(&mgr).expect("discard");
        assert_eq!(storage.len(), before - blocks);
    }
    assert!(storage.is_empty());
}

#[cfg(feature = "zstd")]
#[test]
fn zstd_segments_round_trip() {
    let storage = MemoryStorage::new();
    let mgr = manager(&storage, Codec::parse("zstd").expect("codec"));
    let records = sample_records();
    let meta = write_run(&mgr, &records);
    assert_eq!(read_all(&mgr, meta).expect("read"), records);
}

#[cfg(feature = "lz4")]
#[test]
fn lz4_segments_round_trip() {
    let storage = MemoryStorage::new();
    let mgr = manager(&storage, Codec::parse("lz4").expect("codec"));
    let records = sample_records();
    let meta = write_run(&mgr, &records);
    assert_eq!(read_all(&mgr, meta).expect("read"), records);
}

/// 0..n in a scrambled but deterministic order.
fn scrambled(n: i64) -> Vec<i64> {
    (0..n).map(|i| (i * 37) % n).collect()
}

fn sort_graph(config: rivulet_core::config::EngineConfig, input: &[i64], key: KeyField) -> (rivulet_exec::GraphResult, Vec<i64>) {
    let numbers = common::layout("numbers", &[("n", DataType::Long)]);
    let mut g = common::graph_with(config);
    g.add("src", common::source(common::longs(input))).expect("add");
    g.add("sort", Sort::new(vec![key])).expect("add");
    let (sink, handle) = common::sink();
    g.add("out", sink).expect("add");
    g.connect(("src", 0), ("sort", 0), Arc::clone(&numbers)).expect("edge");
    g.connect(("sort", 0), ("out", 0), numbers).expect("edge");
    let result = common::run_ok(g);
    let values = common::column(&handle.records(), "n");
    (result, values)
}

#[test]
fn sort_merges_spilled_runs() {
    let mut config = common::test_config();
    config.sort_buffer_records = 16;
    config.sort_merge_fan_in = 2;
    let input = scrambled(500);

    let (result, sorted) = sort_graph(config.clone(), &input, KeyField::asc("n"));
    assert_eq!(sorted, (0..500).collect::<Vec<_>>());
    assert!(result.memory.spill_events > 0);

    let (_, desc) = sort_graph(config, &input, KeyField::desc("n"));
    assert_eq!(desc, (0..500).rev().collect::<Vec<_>>());
}

#[test]
fn in_memory_sort_does_not_spill() {
    let (result, sorted) = sort_graph(common::test_config(), &scrambled(50), KeyField::asc("n"));
    assert_eq!(sorted, (0..50).collect::<Vec<_>>());
    assert_eq!(result.memory.spill_events, 0);
}

fn segment_files(dir: &Path) -> Vec<String> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(segment_files(&path));
        } else if path.extension().is_some_and(|e| e == "seg") {
            found.push(path.display().to_string());
        }
    }
    found
}

#[test]
fn sort_on_disk_cleans_up_its_segments() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = common::test_config();
    config.spill_dir = dir.path().to_string_lossy().into_owned();
    config.sort_buffer_records = 10;
    let (result, sorted) = sort_graph(config, &scrambled(200), KeyField::asc("n"));

    assert_eq!(sorted, (0..200).collect::<Vec<_>>());
    assert!(result.memory.spilled_bytes > 0);
    assert!(segment_files(dir.path()).is_empty(), "{:?}", segment_files(dir.path()));
}

#[test]
fn sorted_input_feeds_a_sink_with_no_outputs() {
    let numbers = common::layout("numbers", &[("n", DataType::Long)]);
    let mut g = common::graph();
    g.add("src", common::source(common::longs(&scrambled(30)))).expect("add");
    g.add("sort", Sort::new(vec![KeyField::asc("n")])).expect("add");
    g.add("trash", Trash).expect("add");
    g.connect(("src", 0), ("sort", 0), Arc::clone(&numbers)).expect("edge");
    g.connect(("sort", 0), ("trash", 0), numbers).expect("edge");
    let result = common::run_ok(g);
    assert_eq!(result.edge("sort:0", "trash:0").expect("edge").counts.records, 30);
}

#[test]
fn fs_storage_writes_real_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("spill").to_string_lossy().into_owned();
    let mgr = SpillManager::new(Arc::new(FsStorage::new()), Codec::None, root, SpillId::new(1));
    let records = sample_records();
    let meta = write_run(&mgr, &records);
    assert!(Path::new(&meta.blocks[0].path).exists());
    assert_eq!(read_all(&mgr, meta).expect("read"), records);
    drop(mgr);
    assert!(segment_files(dir.path()).is_empty());
}
