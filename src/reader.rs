//! Read side: re-open a finalized container and stream it back.
//!
//! The reader is deliberately minimal: enough to verify a freshly written
//! container and to feed downstream analysis tooling. It validates the
//! header, loads the attribute records and the feature index up front, and
//! then iterates the data section on demand.

use std::collections::BTreeMap;
use std::path::Path;

use crate::attr::{AttrWithIds, EventAttr, ATTR_SIZE, FILE_ATTR_SIZE};
use crate::error::{RecordFileError, Result};
use crate::feature::{
    parse_cmdline, parse_meta_info, BuildIdRecord, FeatureId, FileFeatureEntry,
};
use crate::header::{FileHeader, SectionDesc, FILE_HEADER_SIZE, SECTION_DESC_SIZE};
use crate::io::RecordFile;
use crate::record::{
    EventRecord, RecordHeader, RECORD_HEADER_SIZE, RECORD_SPLIT, RECORD_SPLIT_END,
};

pub struct RecordFileReader {
    file: RecordFile,
    header: FileHeader,
    attrs: Vec<AttrWithIds>,
    features: BTreeMap<FeatureId, SectionDesc>,
}

impl RecordFileReader {
    /// Open and validate a finalized container.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = RecordFile::open(path)?;

        let mut header_buf = [0u8; FILE_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        let header = FileHeader::from_bytes(&header_buf)?;

        let attrs = Self::read_attrs(&mut file, &header)?;
        let features = Self::read_feature_index(&mut file, &header)?;

        Ok(RecordFileReader {
            file,
            header,
            attrs,
            features,
        })
    }

    fn read_attrs(file: &mut RecordFile, header: &FileHeader) -> Result<Vec<AttrWithIds>> {
        let count = (header.attrs.size / FILE_ATTR_SIZE as u64) as usize;
        let mut records = Vec::with_capacity(count);

        file.seek(header.attrs.offset)?;
        let mut buf = vec![0u8; count * FILE_ATTR_SIZE];
        file.read_exact(&mut buf)?;
        for chunk in buf.chunks_exact(FILE_ATTR_SIZE) {
            let attr = EventAttr::from_bytes(&chunk[..ATTR_SIZE])?;
            let ids_section = SectionDesc::from_bytes(&chunk[ATTR_SIZE..])?;
            records.push((attr, ids_section));
        }

        let mut attrs = Vec::with_capacity(count);
        for (attr, ids_section) in records {
            file.seek(ids_section.offset)?;
            let mut ids_buf = vec![0u8; ids_section.size as usize];
            file.read_exact(&mut ids_buf)?;
            let ids = ids_buf
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect();
            attrs.push(AttrWithIds { attr, ids });
        }
        Ok(attrs)
    }

    fn read_feature_index(
        file: &mut RecordFile,
        header: &FileHeader,
    ) -> Result<BTreeMap<FeatureId, SectionDesc>> {
        let ids = header.feature_ids();
        let mut features = BTreeMap::new();

        // The index sits at the start of the feature section, one
        // descriptor per present feature in ascending identifier order.
        file.seek(header.data.end())?;
        let mut buf = vec![0u8; ids.len() * SECTION_DESC_SIZE];
        file.read_exact(&mut buf)?;
        for (id, chunk) in ids.iter().zip(buf.chunks_exact(SECTION_DESC_SIZE)) {
            features.insert(*id, SectionDesc::from_bytes(chunk)?);
        }
        Ok(features)
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn attrs(&self) -> &[AttrWithIds] {
        &self.attrs
    }

    /// Features present in the container, ascending identifier order.
    pub fn feature_ids(&self) -> Vec<FeatureId> {
        self.features.keys().copied().collect()
    }

    pub fn has_feature(&self, feature: FeatureId) -> bool {
        self.features.contains_key(&feature)
    }

    pub fn feature_desc(&self, feature: FeatureId) -> Option<SectionDesc> {
        self.features.get(&feature).copied()
    }

    /// Raw payload of one feature blob, or `None` if absent.
    pub fn feature_data(&mut self, feature: FeatureId) -> Result<Option<Vec<u8>>> {
        let desc = match self.features.get(&feature) {
            Some(desc) => *desc,
            None => return Ok(None),
        };
        self.file.seek(desc.offset)?;
        let mut buf = vec![0u8; desc.size as usize];
        self.file.read_exact(&mut buf)?;
        Ok(Some(buf))
    }

    /// Decoded build-id feature, or `None` if absent.
    pub fn build_ids(&mut self) -> Result<Option<Vec<BuildIdRecord>>> {
        match self.feature_data(FeatureId::BUILD_ID)? {
            Some(data) => Ok(Some(BuildIdRecord::parse_all(&data)?)),
            None => Ok(None),
        }
    }

    /// Decoded command-line feature, or `None` if absent.
    pub fn cmdline(&mut self) -> Result<Option<Vec<String>>> {
        match self.feature_data(FeatureId::CMDLINE)? {
            Some(data) => Ok(Some(parse_cmdline(&data)?)),
            None => Ok(None),
        }
    }

    /// Decoded meta-info feature, or `None` if absent.
    pub fn meta_info(&mut self) -> Result<Option<BTreeMap<String, String>>> {
        match self.feature_data(FeatureId::META_INFO)? {
            Some(data) => Ok(Some(parse_meta_info(&data)?)),
            None => Ok(None),
        }
    }

    /// Decoded per-module symbol tables, or `None` if absent.
    pub fn file_features(&mut self) -> Result<Option<Vec<FileFeatureEntry>>> {
        match self.feature_data(FeatureId::FILE)? {
            Some(data) => Ok(Some(FileFeatureEntry::parse_all(&data)?)),
            None => Ok(None),
        }
    }

    fn decode_attr(&self) -> Result<EventAttr> {
        self.attrs
            .first()
            .map(|a| a.attr)
            .ok_or(RecordFileError::EmptyAttrs)
    }

    fn for_each_raw<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let data = self.header.data;
        self.file.seek(data.offset)?;

        let mut read_pos: u64 = 0;
        let mut header_buf = [0u8; RECORD_HEADER_SIZE];
        while read_pos < data.size {
            self.file.read_exact(&mut header_buf)?;
            let header = RecordHeader::parse(&header_buf)?;
            if (header.size as usize) < RECORD_HEADER_SIZE {
                return Err(RecordFileError::Truncated(read_pos as usize));
            }

            let mut record_buf = vec![0u8; header.size as usize];
            record_buf[..RECORD_HEADER_SIZE].copy_from_slice(&header_buf);
            self.file.read_exact(&mut record_buf[RECORD_HEADER_SIZE..])?;
            read_pos += header.size as u64;

            f(&record_buf)?;
        }
        Ok(())
    }

    /// Stream the data section as decoded records, raw wire order.
    ///
    /// SPLIT/SPLIT_END fragments are surfaced verbatim (as
    /// [`EventRecord::Raw`]); use
    /// [`for_each_merged_record`](RecordFileReader::for_each_merged_record)
    /// to see reassembled records instead.
    pub fn for_each_record<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&EventRecord),
    {
        let attr = self.decode_attr()?;
        self.for_each_raw(|bytes| {
            let record = EventRecord::parse(&attr, bytes)?;
            callback(&record);
            Ok(())
        })
    }

    /// Stream the data section with split sequences reassembled: SPLIT
    /// payloads are concatenated in emission order until SPLIT_END, then
    /// reinterpreted as the original oversized record.
    pub fn for_each_merged_record<F>(&mut self, mut callback: F) -> Result<()>
    where
        F: FnMut(&EventRecord),
    {
        let attr = self.decode_attr()?;
        let mut pending: Option<Vec<u8>> = None;

        self.for_each_raw(|bytes| {
            let header = RecordHeader::parse(bytes)?;
            match header.record_type {
                RECORD_SPLIT => {
                    pending
                        .get_or_insert_with(Vec::new)
                        .extend_from_slice(&bytes[RECORD_HEADER_SIZE..]);
                    Ok(())
                }
                RECORD_SPLIT_END => {
                    let merged = pending
                        .take()
                        .ok_or(RecordFileError::MalformedSplit("end marker without chunks"))?;
                    let record = EventRecord::parse(&attr, &merged)?;
                    callback(&record);
                    Ok(())
                }
                _ if pending.is_some() => {
                    Err(RecordFileError::MalformedSplit("chunk sequence interrupted"))
                }
                _ => {
                    let record = EventRecord::parse(&attr, bytes)?;
                    callback(&record);
                    Ok(())
                }
            }
        })?;

        if pending.is_some() {
            return Err(RecordFileError::MalformedSplit("chunk sequence not terminated"));
        }
        Ok(())
    }
}
