//! Benchmarks for record-write throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use recfile::attr::{SAMPLE_IP, SAMPLE_PERIOD, SAMPLE_TID, SAMPLE_TIME};
use recfile::record::{RawRecord, SampleRecord, RECORD_TYPE_USER_START};
use recfile::{AttrWithIds, EventAttr, EventRecord, RecordFileWriter};
use tempfile::tempdir;

fn test_attr() -> EventAttr {
    let mut attr = EventAttr::new();
    attr.sample_type = SAMPLE_IP | SAMPLE_TID | SAMPLE_TIME | SAMPLE_PERIOD;
    attr
}

fn benchmark_small_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_sample_records");

    for count in [1_000u64, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let dir = tempdir().unwrap();
            b.iter(|| {
                let path = dir.path().join("bench.data");
                let mut writer = RecordFileWriter::create(&path).unwrap();
                writer
                    .write_attr_section(&[AttrWithIds {
                        attr: test_attr(),
                        ids: vec![0],
                    }])
                    .unwrap();

                for i in 0..count {
                    let record = EventRecord::Sample(SampleRecord {
                        ip: 0x7000_0000 + i,
                        pid: 42,
                        tid: 42,
                        time: i,
                        period: 4000,
                        ..Default::default()
                    });
                    writer.write_record(black_box(&record)).unwrap();
                }

                writer.begin_feature_writing(0).unwrap();
                writer.end_feature_writing().unwrap();
                writer.close().unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_split_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_split_record");

    for size in [128usize * 1024, 1024 * 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = tempdir().unwrap();
            let record = EventRecord::Raw(RawRecord {
                record_type: RECORD_TYPE_USER_START + 1,
                data: vec![0x5a; size],
            });
            b.iter(|| {
                let path = dir.path().join("bench.data");
                let mut writer = RecordFileWriter::create(&path).unwrap();
                writer
                    .write_attr_section(&[AttrWithIds {
                        attr: test_attr(),
                        ids: vec![0],
                    }])
                    .unwrap();
                writer.write_record(black_box(&record)).unwrap();
                writer.begin_feature_writing(0).unwrap();
                writer.end_feature_writing().unwrap();
                writer.close().unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_small_records, benchmark_split_records);
criterion_main!(benches);
