//! Container write session.
//!
//! [`RecordFileWriter`] owns the output file for its whole lifetime and
//! drives a fixed protocol:
//!
//! 1. [`create`](RecordFileWriter::create) the file
//! 2. [`write_attr_section`](RecordFileWriter::write_attr_section)
//! 3. zero or more [`write_record`](RecordFileWriter::write_record) calls
//! 4. [`begin_feature_writing`](RecordFileWriter::begin_feature_writing)
//! 5. zero or more complete feature writes
//! 6. [`end_feature_writing`](RecordFileWriter::end_feature_writing)
//! 7. [`close`](RecordFileWriter::close)
//!
//! The file header at offset 0 is only written during `close`, once every
//! section extent is known; until then the header region holds zeros. A
//! writer dropped before a successful `close` deletes the partial file so
//! an incomplete container never looks complete.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::attr::{AttrWithIds, EventAttr};
use crate::error::{RecordFileError, Result};
use crate::feature::{
    cmdline_bytes, meta_info_bytes, string_with_length_bytes, BuildIdRecord, FeatureId,
    ModuleSymbols,
};
use crate::header::{FileHeader, SectionDesc, FILE_HEADER_SIZE, SECTION_DESC_SIZE};
use crate::io::RecordFile;
use crate::record::{
    EventRecord, RecordHeader, RECORD_HEADER_SIZE, RECORD_SIZE_LIMIT, RECORD_SPLIT,
    RECORD_SPLIT_END, RECORD_TYPE_USER_START,
};

pub struct RecordFileWriter {
    path: PathBuf,
    file: Option<RecordFile>,

    attr_section: SectionDesc,
    data_section_offset: u64,
    data_section_size: u64,

    feature_section_offset: u64,
    feature_count_reserved: usize,
    features_open: bool,
    features: BTreeMap<FeatureId, SectionDesc>,

    /// First attribute, retained for record decoding.
    event_attr: Option<EventAttr>,
}

impl RecordFileWriter {
    /// Create a writer owning a fresh (truncated) container file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = RecordFile::create(&path)?;
        Ok(RecordFileWriter {
            path,
            file: Some(file),
            attr_section: SectionDesc::default(),
            data_section_offset: 0,
            data_section_size: 0,
            feature_section_offset: 0,
            feature_count_reserved: 0,
            features_open: false,
            features: BTreeMap::new(),
            event_attr: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written to the data section so far.
    pub fn data_section_size(&self) -> u64 {
        self.data_section_size
    }

    fn file(&mut self) -> Result<&mut RecordFile> {
        self.file
            .as_mut()
            .ok_or(RecordFileError::OutOfOrder("writer is closed"))
    }

    /// Write the attribute section: the concatenated id arrays, then one
    /// fixed-size attribute record per attribute pointing at its slice of
    /// the id section.
    ///
    /// Must be the first write; it also fixes the data-section start.
    pub fn write_attr_section(&mut self, attrs: &[AttrWithIds]) -> Result<()> {
        if attrs.is_empty() {
            return Err(RecordFileError::EmptyAttrs);
        }
        if self.event_attr.is_some() {
            return Err(RecordFileError::OutOfOrder(
                "attribute section already written",
            ));
        }

        let file = self.file()?;

        // Skip the file header region; it is written last.
        file.seek(FILE_HEADER_SIZE as u64)?;

        // Id section.
        let mut id_section_offset = file.position();
        for attr_ids in attrs {
            let mut bytes = Vec::with_capacity(attr_ids.ids.len() * 8);
            for id in &attr_ids.ids {
                bytes.extend_from_slice(&id.to_le_bytes());
            }
            file.write(&bytes)?;
        }

        // Attribute records, each chaining through the id section.
        let attr_section_offset = file.position();
        for attr_ids in attrs {
            let ids_size = attr_ids.ids.len() as u64 * 8;
            let mut bytes = attr_ids.attr.to_bytes();
            bytes.extend_from_slice(
                &SectionDesc {
                    offset: id_section_offset,
                    size: ids_size,
                }
                .to_bytes(),
            );
            id_section_offset += ids_size;
            file.write(&bytes)?;
        }

        let data_section_offset = file.position();
        self.attr_section = SectionDesc {
            offset: attr_section_offset,
            size: data_section_offset - attr_section_offset,
        };
        self.data_section_offset = data_section_offset;
        self.event_attr = Some(attrs[0].attr);
        Ok(())
    }

    /// Write one event record to the data section.
    ///
    /// Records whose encoded size exceeds [`RECORD_SIZE_LIMIT`] never
    /// appear as a single wire unit: user-range records are fragmented
    /// into a sequence of SPLIT chunks terminated by a header-only
    /// SPLIT_END, covering the record's full binary image. Fragmenting a
    /// kernel-native record type is an error.
    pub fn write_record(&mut self, record: &EventRecord) -> Result<()> {
        let attr = self
            .event_attr
            .ok_or(RecordFileError::OutOfOrder("attribute section not written"))?;
        if self.features_open {
            return Err(RecordFileError::OutOfOrder(
                "record writes must precede feature writing",
            ));
        }

        let bytes = record.to_bytes(&attr);
        if bytes.len() <= RECORD_SIZE_LIMIT {
            return self.write_data(&bytes);
        }

        if record.record_type() < RECORD_TYPE_USER_START {
            return Err(RecordFileError::RecordNotSplittable {
                record_type: record.record_type(),
                size: bytes.len(),
            });
        }

        const CHUNK_PAYLOAD: usize = RECORD_SIZE_LIMIT - RECORD_HEADER_SIZE;
        let mut left = bytes.as_slice();
        while !left.is_empty() {
            let take = left.len().min(CHUNK_PAYLOAD);
            let header = RecordHeader::new(RECORD_SPLIT, (RECORD_HEADER_SIZE + take) as u32);
            self.write_data(&header.to_bytes())?;
            self.write_data(&left[..take])?;
            left = &left[take..];
        }
        let end = RecordHeader::new(RECORD_SPLIT_END, RECORD_HEADER_SIZE as u32);
        self.write_data(&end.to_bytes())
    }

    fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        self.file()?.write(bytes)?;
        self.data_section_size += bytes.len() as u64;
        Ok(())
    }

    /// Stream the data section back through `callback` as decoded records.
    ///
    /// Raw iteration only: SPLIT/SPLIT_END sequences are surfaced as-is,
    /// reassembly is a decoding-layer concern. Decoding uses the retained
    /// first attribute.
    pub fn read_data_section<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&EventRecord),
    {
        let attr = self
            .event_attr
            .ok_or(RecordFileError::OutOfOrder("attribute section not written"))?;
        let data_offset = self.data_section_offset;
        let data_size = self.data_section_size;

        let file = self.file()?;
        file.seek(data_offset)?;

        let mut read_pos: u64 = 0;
        let mut header_buf = [0u8; RECORD_HEADER_SIZE];
        while read_pos < data_size {
            file.read_exact(&mut header_buf)?;
            let header = RecordHeader::parse(&header_buf)?;
            if (header.size as usize) < RECORD_HEADER_SIZE {
                return Err(RecordFileError::Truncated(read_pos as usize));
            }

            let mut record_buf = vec![0u8; header.size as usize];
            record_buf[..RECORD_HEADER_SIZE].copy_from_slice(&header_buf);
            file.read_exact(&mut record_buf[RECORD_HEADER_SIZE..])?;
            read_pos += header.size as u64;

            let record = EventRecord::parse(&attr, &record_buf)?;
            callback(&record);
        }
        Ok(())
    }

    /// Open the feature section: fix its start at the current end of the
    /// data section and reserve index space for `reserved_count` entries,
    /// zero-filled for now and rewritten by
    /// [`end_feature_writing`](RecordFileWriter::end_feature_writing).
    ///
    /// `reserved_count` is a hard ceiling on the number of distinct
    /// features that may subsequently be begun.
    pub fn begin_feature_writing(&mut self, reserved_count: usize) -> Result<()> {
        if self.event_attr.is_none() {
            return Err(RecordFileError::OutOfOrder("attribute section not written"));
        }
        if self.features_open {
            return Err(RecordFileError::OutOfOrder("feature writing already begun"));
        }

        self.feature_section_offset = self.data_section_offset + self.data_section_size;
        self.feature_count_reserved = reserved_count;
        self.features_open = true;

        let offset = self.feature_section_offset;
        let file = self.file()?;
        file.seek(offset)?;
        file.write(&vec![0u8; reserved_count * SECTION_DESC_SIZE])
    }

    fn feature_begin(&mut self, feature: FeatureId) -> Result<()> {
        if !self.features_open {
            return Err(RecordFileError::OutOfOrder("feature writing not begun"));
        }
        if !self.features.contains_key(&feature) {
            if self.features.len() >= self.feature_count_reserved {
                return Err(RecordFileError::FeatureLimitExceeded {
                    reserved: self.feature_count_reserved,
                    requested: feature.0,
                });
            }
            let offset = self.file()?.position();
            self.features.insert(feature, SectionDesc { offset, size: 0 });
        }
        Ok(())
    }

    fn feature_end(&mut self, feature: FeatureId) -> Result<()> {
        let position = self.file()?.position();
        let entry = self
            .features
            .get_mut(&feature)
            .ok_or(RecordFileError::FeatureNotStarted(feature.0))?;
        entry.size = position - entry.offset;
        Ok(())
    }

    /// Write one feature blob from pre-encoded bytes.
    ///
    /// Calling this again for the same feature appends to its blob; the
    /// extent is measured from the first begin to the last end.
    pub fn write_feature(&mut self, feature: FeatureId, data: &[u8]) -> Result<()> {
        self.feature_begin(feature)?;
        self.file()?.write(data)?;
        self.feature_end(feature)
    }

    /// Write the build-id feature: the concatenated records' binary forms.
    pub fn write_build_id_feature(&mut self, records: &[BuildIdRecord]) -> Result<()> {
        self.feature_begin(FeatureId::BUILD_ID)?;
        for record in records {
            let bytes = record.to_bytes();
            self.file()?.write(&bytes)?;
        }
        self.feature_end(FeatureId::BUILD_ID)
    }

    /// Write a single length-prefixed padded string feature.
    pub fn write_string_feature(&mut self, feature: FeatureId, value: &str) -> Result<()> {
        self.write_feature(feature, &string_with_length_bytes(value))
    }

    /// Write the command-line feature.
    pub fn write_cmdline_feature(&mut self, cmdline: &[String]) -> Result<()> {
        self.write_feature(FeatureId::CMDLINE, &cmdline_bytes(cmdline))
    }

    /// Write the branch-stack marker: presence only, zero-length payload.
    pub fn write_branch_stack_feature(&mut self) -> Result<()> {
        self.feature_begin(FeatureId::BRANCH_STACK)?;
        self.feature_end(FeatureId::BRANCH_STACK)
    }

    /// Write the per-module symbol tables for every module selected for
    /// persistence. Modules without a dump id are skipped entirely.
    pub fn write_file_features(&mut self, modules: &[ModuleSymbols]) -> Result<()> {
        for module in modules {
            if !module.has_dump_id() {
                continue;
            }
            self.write_feature(FeatureId::FILE, &module.feature_block())?;
        }
        Ok(())
    }

    /// Write the key/value meta-info feature, sorted by key.
    pub fn write_meta_info_feature(&mut self, info: &HashMap<String, String>) -> Result<()> {
        self.write_feature(FeatureId::META_INFO, &meta_info_bytes(info))
    }

    /// Fill the reserved feature index: one section descriptor per begun
    /// feature, in ascending feature-id order.
    pub fn end_feature_writing(&mut self) -> Result<()> {
        if !self.features_open {
            return Err(RecordFileError::OutOfOrder("feature writing not begun"));
        }
        // Begin-time checks make this unreachable; re-verify before the
        // index is committed anyway.
        if self.features.len() > self.feature_count_reserved {
            return Err(RecordFileError::FeatureLimitExceeded {
                reserved: self.feature_count_reserved,
                requested: self
                    .features
                    .keys()
                    .next_back()
                    .map(|id| id.0)
                    .unwrap_or_default(),
            });
        }

        let offset = self.feature_section_offset;
        let descs: Vec<u8> = self
            .features
            .values()
            .flat_map(|sec| sec.to_bytes())
            .collect();

        let file = self.file()?;
        file.seek(offset)?;
        file.write(&descs)?;
        self.features_open = false;
        Ok(())
    }

    fn write_file_header(&mut self) -> Result<()> {
        let mut header = FileHeader::new();
        header.attrs = self.attr_section;
        header.data = SectionDesc {
            offset: self.data_section_offset,
            size: self.data_section_size,
        };
        for feature in self.features.keys() {
            header.set_feature(*feature);
        }

        let bytes = header.to_bytes();
        let file = self.file()?;
        file.seek(0)?;
        file.write(&bytes)
    }

    /// Finalize the header and release the file.
    ///
    /// The header write is always the last write. If finalizing fails the
    /// partial container is deleted and the failure reported; if the
    /// header went down but releasing the file failed, that is reported
    /// as [`RecordFileError::CloseFailed`] so callers can tell the two
    /// apart. A successfully closed container is never deleted.
    pub fn close(mut self) -> Result<()> {
        match self.write_file_header() {
            Ok(()) => {
                let sync_result = self.file()?.sync();
                drop(self.file.take());
                match sync_result {
                    Ok(()) => {
                        tracing::debug!("finalized container {}", self.path.display());
                        Ok(())
                    }
                    Err(RecordFileError::Io(e)) => Err(RecordFileError::CloseFailed(e)),
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                drop(self.file.take());
                if let Err(remove_err) = fs::remove_file(&self.path) {
                    tracing::warn!(
                        "failed to remove unfinalized container {}: {}",
                        self.path.display(),
                        remove_err
                    );
                }
                Err(e)
            }
        }
    }
}

impl Drop for RecordFileWriter {
    fn drop(&mut self) {
        // An abandoned session must not leave a file that looks complete.
        if let Some(file) = self.file.take() {
            drop(file);
            match fs::remove_file(&self.path) {
                Ok(()) => {
                    tracing::debug!("removed abandoned container {}", self.path.display());
                }
                Err(e) => {
                    tracing::warn!(
                        "failed to remove abandoned container {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}
