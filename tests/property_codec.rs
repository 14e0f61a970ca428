//! Property-based tests for the wire codecs
//!
//! Uses proptest to verify codec invariants hold across many random inputs.

use std::collections::HashMap;

use proptest::prelude::*;
use recfile::attr::{SAMPLE_CPU, SAMPLE_IP, SAMPLE_PERIOD, SAMPLE_TID, SAMPLE_TIME};
use recfile::feature::{
    meta_info_bytes, parse_cmdline, parse_meta_info, string_with_length_bytes, cmdline_bytes,
};
use recfile::record::{
    RawRecord, RecordHeader, SampleRecord, RECORD_HEADER_SIZE, RECORD_TYPE_USER_START,
};
use recfile::{AttrWithIds, EventAttr, EventRecord, RecordFileReader, RecordFileWriter,
    RECORD_SIZE_LIMIT};
use tempfile::tempdir;

proptest! {
    #[test]
    fn prop_string_length_field_is_padded_size(s in "[ -~]{0,200}") {
        let bytes = string_with_length_bytes(&s);
        let unpadded = s.len() + 1;
        let padded = (unpadded + 63) / 64 * 64;

        let len_field = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        prop_assert_eq!(len_field as usize, padded);
        prop_assert_eq!(bytes.len(), 4 + padded);
        // Everything past the terminator is zero padding.
        prop_assert!(bytes[4 + s.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn prop_cmdline_round_trips(
        args in prop::collection::vec("[ -~]{0,40}", 0..8)
    ) {
        let blob = cmdline_bytes(&args);
        prop_assert_eq!(parse_cmdline(&blob).unwrap(), args);
    }

    #[test]
    fn prop_meta_info_round_trips_sorted(
        entries in prop::collection::hash_map("[a-z_]{1,16}", "[ -~]{0,24}", 0..10)
    ) {
        let info: HashMap<String, String> = entries;
        let blob = meta_info_bytes(&info);
        let parsed = parse_meta_info(&blob).unwrap();

        prop_assert_eq!(parsed.len(), info.len());
        for (k, v) in &info {
            prop_assert_eq!(&parsed[k], v);
        }
        // Re-encoding the parsed map reproduces the same bytes.
        let reparsed: HashMap<String, String> = parsed.into_iter().collect();
        prop_assert_eq!(blob, meta_info_bytes(&reparsed));
    }

    #[test]
    fn prop_record_header_round_trips(
        kernel_type in 1u32..100,
        kernel_size in 8u32..=65535,
        user_offset in 0u32..1000,
        user_size in 8u32..100_000_000,
    ) {
        let kernel = RecordHeader::new(kernel_type, kernel_size);
        prop_assert_eq!(RecordHeader::parse(&kernel.to_bytes()).unwrap(), kernel);

        let user = RecordHeader::new(RECORD_TYPE_USER_START + user_offset, user_size);
        prop_assert_eq!(RecordHeader::parse(&user.to_bytes()).unwrap(), user);
    }

    #[test]
    fn prop_sample_round_trips(
        ip in any::<u64>(),
        pid in any::<u32>(),
        tid in any::<u32>(),
        time in any::<u64>(),
        cpu in any::<u32>(),
        period in any::<u64>(),
    ) {
        let mut attr = EventAttr::new();
        attr.sample_type =
            SAMPLE_IP | SAMPLE_TID | SAMPLE_TIME | SAMPLE_CPU | SAMPLE_PERIOD;

        let record = EventRecord::Sample(SampleRecord {
            ip,
            pid,
            tid,
            time,
            cpu,
            period,
            ..Default::default()
        });
        let bytes = record.to_bytes(&attr);
        prop_assert_eq!(EventRecord::parse(&attr, &bytes).unwrap(), record);
    }
}

proptest! {
    // Each case writes a real file; keep the case count moderate.
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_split_reassembly_is_exact(total_size in 65_536usize..200_000) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prop-split.data");

        let payload: Vec<u8> = (0..total_size - RECORD_HEADER_SIZE)
            .map(|i| (i % 253) as u8)
            .collect();
        let record = EventRecord::Raw(RawRecord {
            record_type: RECORD_TYPE_USER_START + 9,
            data: payload,
        });

        let mut writer = RecordFileWriter::create(&path).unwrap();
        writer
            .write_attr_section(&[AttrWithIds { attr: EventAttr::new(), ids: vec![0] }])
            .unwrap();
        writer.write_record(&record).unwrap();

        let chunk_payload = RECORD_SIZE_LIMIT - RECORD_HEADER_SIZE;
        let chunks = (total_size + chunk_payload - 1) / chunk_payload;
        prop_assert_eq!(
            writer.data_section_size(),
            (total_size + (chunks + 1) * RECORD_HEADER_SIZE) as u64
        );

        writer.begin_feature_writing(0).unwrap();
        writer.end_feature_writing().unwrap();
        writer.close().unwrap();

        let mut reader = RecordFileReader::open(&path).unwrap();
        let mut merged = Vec::new();
        reader.for_each_merged_record(|rec| merged.push(rec.clone())).unwrap();
        prop_assert_eq!(merged, vec![record]);
    }
}
