//! Feature blobs: optional, variably-sized metadata sections indexed by a
//! small integer identifier.
//!
//! Feature payloads are written after the data section; a fixed-size index
//! of section descriptors is reserved ahead of them and filled in once all
//! blobs are known. This module holds the identifier namespace and the
//! payload codecs; the bracketing protocol lives in the writer.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{RecordFileError, Result};
use crate::record::{align_up, put_cstr, ByteReader, RecordHeader, RECORD_BUILD_ID};

/// Padding granularity for length-prefixed strings.
pub const STRING_ALIGN: usize = 64;

/// Identifies one feature blob. The namespace is a closed set; ids above
/// it are rejected by the 256-bit presence bitmap, not by this type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub u8);

impl FeatureId {
    /// Build-id list: one record per module observed in the trace.
    pub const BUILD_ID: Self = Self(2);

    /// Command line the profiler was invoked with.
    pub const CMDLINE: Self = Self(11);

    /// Presence-only marker: samples carry branch stacks.
    pub const BRANCH_STACK: Self = Self(15);

    /// Per-module symbol tables.
    pub const FILE: Self = Self(128);

    /// Key/value metadata map.
    pub const META_INFO: Self = Self(129);

    pub const fn as_str(self) -> Option<&'static str> {
        match self.0 {
            2 => Some("BuildId"),
            11 => Some("Cmdline"),
            15 => Some("BranchStack"),
            128 => Some("File"),
            129 => Some("MetaInfo"),
            _ => None,
        }
    }
}

impl From<u8> for FeatureId {
    fn from(val: u8) -> Self {
        Self(val)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(s) = self.as_str() {
            f.pad(s)
        } else {
            self.0.fmt(f)
        }
    }
}

/// A module build id captured at record time.
///
/// Serialized as a kernel-range record: header, pid, 24-byte id field
/// (20 id bytes plus zero padding), NUL-terminated path, the whole record
/// padded to an 8-byte boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildIdRecord {
    pub pid: i32,
    pub build_id: [u8; 20],
    pub path: String,
}

impl BuildIdRecord {
    pub fn to_bytes(&self) -> Vec<u8> {
        let size = align_up(
            crate::record::RECORD_HEADER_SIZE + 4 + 24 + self.path.len() + 1,
            8,
        );
        let mut buf = Vec::with_capacity(size);
        RecordHeader::new(RECORD_BUILD_ID, size as u32).write_to(&mut buf);
        buf.extend_from_slice(&self.pid.to_le_bytes());
        buf.extend_from_slice(&self.build_id);
        buf.extend_from_slice(&[0u8; 4]);
        put_cstr(&mut buf, &self.path);
        buf.resize(size, 0);
        buf
    }

    /// Parse a concatenation of build-id records, e.g. a whole feature blob.
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<BuildIdRecord>> {
        let mut records = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let header = RecordHeader::parse(&bytes[pos..])?;
            let end = pos + header.size as usize;
            if header.size as usize <= crate::record::RECORD_HEADER_SIZE || end > bytes.len() {
                return Err(RecordFileError::Truncated(pos));
            }
            let mut reader = ByteReader::new(&bytes[pos + crate::record::RECORD_HEADER_SIZE..end]);
            let pid = reader.read_u32()? as i32;
            let mut build_id = [0u8; 20];
            build_id.copy_from_slice(reader.read_bytes(20)?);
            reader.read_bytes(4)?;
            let path = reader.read_cstr()?;
            records.push(BuildIdRecord {
                pid,
                build_id,
                path,
            });
            pos = end;
        }
        Ok(records)
    }
}

/// What kind of object a module path refers to.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
    Kernel = 0,
    KernelModule = 1,
    ElfFile = 2,
    DexFile = 3,
}

impl ModuleType {
    /// Parse a module type from its wire value.
    ///
    /// Unknown values default to `ElfFile` for forward compatibility.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Kernel,
            1 => Self::KernelModule,
            3 => Self::DexFile,
            _ => Self::ElfFile,
        }
    }
}

/// A resolved symbol within a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub addr: u64,
    pub len: u32,
    pub name: String,

    /// Set when the symbol was selected for persistence; unselected
    /// symbols never reach the wire.
    pub dump_id: Option<u32>,
}

impl Symbol {
    pub fn has_dump_id(&self) -> bool {
        self.dump_id.is_some()
    }
}

/// A module with its resolved symbols, as handed over by the symbol
/// resolution collaborator.
#[derive(Debug, Clone)]
pub struct ModuleSymbols {
    pub path: String,
    pub module_type: ModuleType,
    pub min_vaddr: u64,

    /// Set when the module was referenced by any sample.
    pub dump_id: Option<u32>,

    pub symbols: Vec<Symbol>,
}

impl ModuleSymbols {
    pub fn has_dump_id(&self) -> bool {
        self.dump_id.is_some()
    }

    /// The symbols selected for persistence, sorted ascending by address.
    ///
    /// Dumping every resolved symbol would bloat the container when a
    /// module has many symbols that no sample ever hit.
    pub fn dump_symbols(&self) -> Vec<&Symbol> {
        let mut selected: Vec<&Symbol> = self.symbols.iter().filter(|s| s.has_dump_id()).collect();
        selected.sort_by(|a, b| a.addr.cmp(&b.addr).then_with(|| a.name.cmp(&b.name)));
        selected
    }

    /// Encode this module's symbol-table block for the file feature.
    ///
    /// Layout: u32 block length (excluding the length field itself),
    /// NUL path, u32 module type, u64 minimum vaddr, u32 symbol count,
    /// then per symbol: u64 addr, u32 len, NUL name.
    pub fn feature_block(&self) -> Vec<u8> {
        let symbols = self.dump_symbols();
        let mut size = self.path.len() + 1 + 4 * 2 + 8 + symbols.len() * (8 + 4);
        for symbol in &symbols {
            size += symbol.name.len() + 1;
        }

        let mut buf = Vec::with_capacity(4 + size);
        buf.extend_from_slice(&(size as u32).to_le_bytes());
        put_cstr(&mut buf, &self.path);
        buf.extend_from_slice(&(self.module_type as u32).to_le_bytes());
        buf.extend_from_slice(&self.min_vaddr.to_le_bytes());
        buf.extend_from_slice(&(symbols.len() as u32).to_le_bytes());
        for symbol in &symbols {
            buf.extend_from_slice(&symbol.addr.to_le_bytes());
            buf.extend_from_slice(&symbol.len.to_le_bytes());
            put_cstr(&mut buf, &symbol.name);
        }
        debug_assert_eq!(buf.len(), 4 + size);
        buf
    }
}

/// One parsed per-module block of the file feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFeatureEntry {
    pub path: String,
    pub module_type: ModuleType,
    pub min_vaddr: u64,
    pub symbols: Vec<Symbol>,
}

impl FileFeatureEntry {
    /// Parse a whole file-feature blob into its per-module entries.
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<FileFeatureEntry>> {
        let mut entries = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let mut reader = ByteReader::new(&bytes[pos..]);
            let block_len = reader.read_u32()? as usize;
            let end = pos + 4 + block_len;
            if end > bytes.len() {
                return Err(RecordFileError::Truncated(pos));
            }
            let mut block = ByteReader::new(&bytes[pos + 4..end]);
            let path = block.read_cstr()?;
            let module_type = ModuleType::from_u32(block.read_u32()?);
            let min_vaddr = block.read_u64()?;
            let symbol_count = block.read_u32()? as usize;
            let mut symbols = Vec::with_capacity(symbol_count);
            for _ in 0..symbol_count {
                let addr = block.read_u64()?;
                let len = block.read_u32()?;
                let name = block.read_cstr()?;
                symbols.push(Symbol {
                    addr,
                    len,
                    name,
                    dump_id: None,
                });
            }
            entries.push(FileFeatureEntry {
                path,
                module_type,
                min_vaddr,
                symbols,
            });
            pos = end;
        }
        Ok(entries)
    }
}

/// Encode a length-prefixed padded string.
///
/// The u32 length field holds the string's byte length including the NUL
/// terminator, rounded up to the next multiple of [`STRING_ALIGN`]; the
/// bytes that follow are the string, the terminator, and zero padding out
/// to that rounded length.
pub fn string_with_length_bytes(s: &str) -> Vec<u8> {
    let padded = align_up(s.len() + 1, STRING_ALIGN);
    let mut buf = Vec::with_capacity(4 + padded);
    buf.extend_from_slice(&(padded as u32).to_le_bytes());
    put_cstr(&mut buf, s);
    buf.resize(4 + padded, 0);
    buf
}

pub(crate) fn read_string_with_length(reader: &mut ByteReader) -> Result<String> {
    let padded = reader.read_u32()? as usize;
    let bytes = reader.read_bytes(padded)?;
    let mut field = ByteReader::new(bytes);
    field.read_cstr()
}

/// Encode the command-line feature payload: argument count, then each
/// argument as a length-prefixed padded string.
pub fn cmdline_bytes(args: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(args.len() as u32).to_le_bytes());
    for arg in args {
        buf.extend_from_slice(&string_with_length_bytes(arg));
    }
    buf
}

pub fn parse_cmdline(bytes: &[u8]) -> Result<Vec<String>> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u32()? as usize;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(read_string_with_length(&mut reader)?);
    }
    Ok(args)
}

/// Encode the meta-info feature payload: NUL-terminated key/value pairs.
///
/// Pairs are sorted by key so identical logical input always produces
/// identical bytes.
pub fn meta_info_bytes(info: &HashMap<String, String>) -> Vec<u8> {
    let mut keys: Vec<&String> = info.keys().collect();
    keys.sort();

    let mut buf = Vec::new();
    for key in keys {
        put_cstr(&mut buf, key);
        put_cstr(&mut buf, &info[key]);
    }
    buf
}

pub fn parse_meta_info(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    let mut reader = ByteReader::new(bytes);
    let mut info = BTreeMap::new();
    while reader.remaining() > 0 {
        let key = reader.read_cstr()?;
        let value = reader.read_cstr()?;
        info.insert(key, value);
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_id_names() {
        assert_eq!(FeatureId::BUILD_ID.as_str(), Some("BuildId"));
        assert_eq!(FeatureId(200).as_str(), None);
        assert_eq!(format!("{}", FeatureId::META_INFO), "MetaInfo");
        assert_eq!(format!("{}", FeatureId(7)), "7");
    }

    #[test]
    fn test_build_id_record_round_trip() {
        let record = BuildIdRecord {
            pid: -1,
            build_id: [0xab; 20],
            path: "/system/lib64/libart.so".to_string(),
        };
        let bytes = record.to_bytes();
        assert_eq!(bytes.len() % 8, 0);

        let parsed = BuildIdRecord::parse_all(&bytes).unwrap();
        assert_eq!(parsed, vec![record]);
    }

    #[test]
    fn test_build_id_parse_concatenation() {
        let a = BuildIdRecord {
            pid: 1,
            build_id: [1; 20],
            path: "/a.so".to_string(),
        };
        let b = BuildIdRecord {
            pid: 2,
            build_id: [2; 20],
            path: "/usr/lib/b.so".to_string(),
        };
        let mut blob = a.to_bytes();
        blob.extend_from_slice(&b.to_bytes());

        assert_eq!(BuildIdRecord::parse_all(&blob).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_string_with_length_padding() {
        let bytes = string_with_length_bytes("record");
        // "record" + NUL is 7 bytes, rounded up to 64.
        assert_eq!(&bytes[0..4], &64u32.to_le_bytes());
        assert_eq!(bytes.len(), 4 + 64);
        assert_eq!(&bytes[4..10], b"record");
        assert!(bytes[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_string_with_length_boundary() {
        // 63 chars + NUL = 64: exactly one padding unit, no slack.
        let s = "a".repeat(63);
        let bytes = string_with_length_bytes(&s);
        assert_eq!(&bytes[0..4], &64u32.to_le_bytes());
        assert_eq!(bytes.len(), 4 + 64);

        // 64 chars + NUL = 65: rounds to 128.
        let s = "a".repeat(64);
        let bytes = string_with_length_bytes(&s);
        assert_eq!(&bytes[0..4], &128u32.to_le_bytes());
        assert_eq!(bytes.len(), 4 + 128);
    }

    #[test]
    fn test_cmdline_round_trip() {
        let args: Vec<String> = ["sampler", "record", "-o", "out.data"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let blob = cmdline_bytes(&args);
        assert_eq!(parse_cmdline(&blob).unwrap(), args);
    }

    #[test]
    fn test_meta_info_sorted_by_key() {
        let mut info = HashMap::new();
        info.insert("version".to_string(), "0.3.1".to_string());
        info.insert("arch".to_string(), "aarch64".to_string());
        info.insert("clock".to_string(), "monotonic".to_string());

        let blob = meta_info_bytes(&info);
        let mut expected = Vec::new();
        for (k, v) in [
            ("arch", "aarch64"),
            ("clock", "monotonic"),
            ("version", "0.3.1"),
        ] {
            put_cstr(&mut expected, k);
            put_cstr(&mut expected, v);
        }
        assert_eq!(blob, expected);

        let parsed = parse_meta_info(&blob).unwrap();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["arch"], "aarch64");
    }

    #[test]
    fn test_dump_symbols_filters_and_sorts() {
        let module = ModuleSymbols {
            path: "/vendor/lib/libfoo.so".to_string(),
            module_type: ModuleType::ElfFile,
            min_vaddr: 0x1000,
            dump_id: Some(0),
            symbols: vec![
                Symbol {
                    addr: 0x3000,
                    len: 16,
                    name: "later".to_string(),
                    dump_id: Some(1),
                },
                Symbol {
                    addr: 0x2000,
                    len: 32,
                    name: "skipped".to_string(),
                    dump_id: None,
                },
                Symbol {
                    addr: 0x1000,
                    len: 64,
                    name: "earlier".to_string(),
                    dump_id: Some(0),
                },
            ],
        };

        let dumped = module.dump_symbols();
        assert_eq!(dumped.len(), 2);
        assert_eq!(dumped[0].name, "earlier");
        assert_eq!(dumped[1].name, "later");
    }

    #[test]
    fn test_file_feature_block_round_trip() {
        let module = ModuleSymbols {
            path: "/apex/lib64/bionic/libc.so".to_string(),
            module_type: ModuleType::ElfFile,
            min_vaddr: 0x4000,
            dump_id: Some(0),
            symbols: vec![
                Symbol {
                    addr: 0x4100,
                    len: 48,
                    name: "read".to_string(),
                    dump_id: Some(0),
                },
                Symbol {
                    addr: 0x4200,
                    len: 96,
                    name: "write".to_string(),
                    dump_id: Some(1),
                },
            ],
        };

        let entries = FileFeatureEntry::parse_all(&module.feature_block()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, module.path);
        assert_eq!(entries[0].module_type, ModuleType::ElfFile);
        assert_eq!(entries[0].min_vaddr, 0x4000);
        assert_eq!(entries[0].symbols.len(), 2);
        assert_eq!(entries[0].symbols[0].name, "read");
        assert_eq!(entries[0].symbols[1].addr, 0x4200);
    }

    #[test]
    fn test_module_type_unknown_falls_back() {
        assert_eq!(ModuleType::from_u32(99), ModuleType::ElfFile);
        assert_eq!(ModuleType::from_u32(0), ModuleType::Kernel);
        assert_eq!(ModuleType::from_u32(3), ModuleType::DexFile);
    }
}
