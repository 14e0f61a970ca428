//! Event records and their wire codec.
//!
//! Every record starts with a common 8-byte header carrying a type tag and
//! the record's total encoded size. Kernel-range types (below
//! [`RECORD_TYPE_USER_START`]) keep the native header layout with a 16-bit
//! size field; user-range types widen the size field to 32 bits so a record
//! may exceed the 65 535-byte wire limit in memory before being fragmented
//! by the writer's split protocol.

use crate::attr::{
    EventAttr, SAMPLE_ADDR, SAMPLE_CALLCHAIN, SAMPLE_CPU, SAMPLE_ID, SAMPLE_IP, SAMPLE_PERIOD,
    SAMPLE_TID, SAMPLE_TIME,
};
use crate::error::{RecordFileError, Result};

pub const RECORD_HEADER_SIZE: usize = 8;

/// Largest record that may appear as a single wire unit.
pub const RECORD_SIZE_LIMIT: usize = 65535;

// Kernel-native record types.
pub const RECORD_MMAP: u32 = 1;
pub const RECORD_LOST: u32 = 2;
pub const RECORD_COMM: u32 = 3;
pub const RECORD_EXIT: u32 = 4;
pub const RECORD_FORK: u32 = 7;
pub const RECORD_SAMPLE: u32 = 9;
pub const RECORD_BUILD_ID: u32 = 67;

// User-range record types. Only types in this range may be fragmented.
pub const RECORD_TYPE_USER_START: u32 = 32768;
pub const RECORD_SPLIT: u32 = 32769;
pub const RECORD_SPLIT_END: u32 = 32770;

pub(crate) fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) / alignment * alignment
}

pub(crate) fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Common record header: type tag plus total encoded size.
///
/// Kernel-range types serialize as `{type: u32, misc: u16, size: u16}`,
/// user-range types as `{type: u32, size: u32}`. Both images are 8 bytes,
/// and on the wire they coincide whenever `misc == 0` and the size fits 16
/// bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub record_type: u32,
    pub misc: u16,
    pub size: u32,
}

impl RecordHeader {
    pub fn new(record_type: u32, size: u32) -> Self {
        RecordHeader {
            record_type,
            misc: 0,
            size,
        }
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.record_type.to_le_bytes());
        if self.record_type < RECORD_TYPE_USER_START {
            buf.extend_from_slice(&self.misc.to_le_bytes());
            buf.extend_from_slice(&(self.size as u16).to_le_bytes());
        } else {
            buf.extend_from_slice(&self.size.to_le_bytes());
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE);
        self.write_to(&mut buf);
        buf
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_SIZE {
            return Err(RecordFileError::Truncated(bytes.len()));
        }
        let record_type = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if record_type < RECORD_TYPE_USER_START {
            Ok(RecordHeader {
                record_type,
                misc: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
                size: u16::from_le_bytes(bytes[6..8].try_into().unwrap()) as u32,
            })
        } else {
            Ok(RecordHeader {
                record_type,
                misc: 0,
                size: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            })
        }
    }
}

/// Little-endian decode cursor over a record's payload bytes.
pub(crate) struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteReader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(RecordFileError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Read a NUL-terminated string, consuming the terminator.
    pub fn read_cstr(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(RecordFileError::Truncated(self.data.len()))?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }
}

/// A module mapping event: which file was mapped where in a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmapRecord {
    pub pid: u32,
    pub tid: u32,
    pub addr: u64,
    pub len: u64,
    pub pgoff: u64,
    pub filename: String,
}

/// A thread naming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommRecord {
    pub pid: u32,
    pub tid: u32,
    pub comm: String,
}

/// A task exit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRecord {
    pub pid: u32,
    pub ppid: u32,
    pub tid: u32,
    pub ptid: u32,
    pub time: u64,
}

/// A dropped-events marker from the kernel ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LostRecord {
    pub id: u64,
    pub lost: u64,
}

/// One sampling event. Which fields are valid is governed by the
/// attribute's `sample_type` bits; absent fields decode as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleRecord {
    pub ip: u64,
    pub pid: u32,
    pub tid: u32,
    pub time: u64,
    pub addr: u64,
    pub id: u64,
    pub cpu: u32,
    pub period: u64,
    pub callchain: Vec<u64>,
}

/// A record of a type this crate does not decode; payload kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub record_type: u32,
    pub data: Vec<u8>,
}

/// A decoded event record.
///
/// The variant is selected by the header's type tag; anything outside the
/// decoded set round-trips through [`EventRecord::Raw`] untouched, which
/// keeps the container forward-compatible with record types this crate
/// does not know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    Mmap(MmapRecord),
    Comm(CommRecord),
    Exit(ExitRecord),
    Lost(LostRecord),
    Sample(SampleRecord),
    Raw(RawRecord),
}

impl EventRecord {
    pub fn record_type(&self) -> u32 {
        match self {
            EventRecord::Mmap(_) => RECORD_MMAP,
            EventRecord::Comm(_) => RECORD_COMM,
            EventRecord::Exit(_) => RECORD_EXIT,
            EventRecord::Lost(_) => RECORD_LOST,
            EventRecord::Sample(_) => RECORD_SAMPLE,
            EventRecord::Raw(raw) => raw.record_type,
        }
    }

    /// Encode the record to its full binary form, header included.
    pub fn to_bytes(&self, attr: &EventAttr) -> Vec<u8> {
        let payload = self.payload_bytes(attr);
        let size = RECORD_HEADER_SIZE + payload.len();
        let mut buf = Vec::with_capacity(size);
        RecordHeader::new(self.record_type(), size as u32).write_to(&mut buf);
        buf.extend_from_slice(&payload);
        buf
    }

    fn payload_bytes(&self, attr: &EventAttr) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            EventRecord::Mmap(r) => {
                buf.extend_from_slice(&r.pid.to_le_bytes());
                buf.extend_from_slice(&r.tid.to_le_bytes());
                buf.extend_from_slice(&r.addr.to_le_bytes());
                buf.extend_from_slice(&r.len.to_le_bytes());
                buf.extend_from_slice(&r.pgoff.to_le_bytes());
                put_cstr(&mut buf, &r.filename);
                buf.resize(align_up(buf.len(), 8), 0);
            }
            EventRecord::Comm(r) => {
                buf.extend_from_slice(&r.pid.to_le_bytes());
                buf.extend_from_slice(&r.tid.to_le_bytes());
                put_cstr(&mut buf, &r.comm);
                buf.resize(align_up(buf.len(), 8), 0);
            }
            EventRecord::Exit(r) => {
                buf.extend_from_slice(&r.pid.to_le_bytes());
                buf.extend_from_slice(&r.ppid.to_le_bytes());
                buf.extend_from_slice(&r.tid.to_le_bytes());
                buf.extend_from_slice(&r.ptid.to_le_bytes());
                buf.extend_from_slice(&r.time.to_le_bytes());
            }
            EventRecord::Lost(r) => {
                buf.extend_from_slice(&r.id.to_le_bytes());
                buf.extend_from_slice(&r.lost.to_le_bytes());
            }
            EventRecord::Sample(r) => {
                let sample_type = attr.sample_type;
                if sample_type & SAMPLE_IP != 0 {
                    buf.extend_from_slice(&r.ip.to_le_bytes());
                }
                if sample_type & SAMPLE_TID != 0 {
                    buf.extend_from_slice(&r.pid.to_le_bytes());
                    buf.extend_from_slice(&r.tid.to_le_bytes());
                }
                if sample_type & SAMPLE_TIME != 0 {
                    buf.extend_from_slice(&r.time.to_le_bytes());
                }
                if sample_type & SAMPLE_ADDR != 0 {
                    buf.extend_from_slice(&r.addr.to_le_bytes());
                }
                if sample_type & SAMPLE_ID != 0 {
                    buf.extend_from_slice(&r.id.to_le_bytes());
                }
                if sample_type & SAMPLE_CPU != 0 {
                    buf.extend_from_slice(&r.cpu.to_le_bytes());
                    buf.extend_from_slice(&0u32.to_le_bytes());
                }
                if sample_type & SAMPLE_PERIOD != 0 {
                    buf.extend_from_slice(&r.period.to_le_bytes());
                }
                if sample_type & SAMPLE_CALLCHAIN != 0 {
                    buf.extend_from_slice(&(r.callchain.len() as u64).to_le_bytes());
                    for ip in &r.callchain {
                        buf.extend_from_slice(&ip.to_le_bytes());
                    }
                }
            }
            EventRecord::Raw(r) => {
                buf.extend_from_slice(&r.data);
            }
        }
        buf
    }

    /// Decode a record from its full binary form, header included.
    ///
    /// Sample records are decoded using the given attribute's
    /// `sample_type`; trailing bytes governed by bits this crate does not
    /// decode are ignored.
    pub fn parse(attr: &EventAttr, bytes: &[u8]) -> Result<EventRecord> {
        let header = RecordHeader::parse(bytes)?;
        if (header.size as usize) > bytes.len() {
            return Err(RecordFileError::Truncated(bytes.len()));
        }
        let payload = &bytes[RECORD_HEADER_SIZE..header.size as usize];
        let mut reader = ByteReader::new(payload);

        let record = match header.record_type {
            RECORD_MMAP => EventRecord::Mmap(MmapRecord {
                pid: reader.read_u32()?,
                tid: reader.read_u32()?,
                addr: reader.read_u64()?,
                len: reader.read_u64()?,
                pgoff: reader.read_u64()?,
                filename: reader.read_cstr()?,
            }),
            RECORD_COMM => EventRecord::Comm(CommRecord {
                pid: reader.read_u32()?,
                tid: reader.read_u32()?,
                comm: reader.read_cstr()?,
            }),
            RECORD_EXIT => EventRecord::Exit(ExitRecord {
                pid: reader.read_u32()?,
                ppid: reader.read_u32()?,
                tid: reader.read_u32()?,
                ptid: reader.read_u32()?,
                time: reader.read_u64()?,
            }),
            RECORD_LOST => EventRecord::Lost(LostRecord {
                id: reader.read_u64()?,
                lost: reader.read_u64()?,
            }),
            RECORD_SAMPLE => {
                let sample_type = attr.sample_type;
                let mut sample = SampleRecord::default();
                if sample_type & SAMPLE_IP != 0 {
                    sample.ip = reader.read_u64()?;
                }
                if sample_type & SAMPLE_TID != 0 {
                    sample.pid = reader.read_u32()?;
                    sample.tid = reader.read_u32()?;
                }
                if sample_type & SAMPLE_TIME != 0 {
                    sample.time = reader.read_u64()?;
                }
                if sample_type & SAMPLE_ADDR != 0 {
                    sample.addr = reader.read_u64()?;
                }
                if sample_type & SAMPLE_ID != 0 {
                    sample.id = reader.read_u64()?;
                }
                if sample_type & SAMPLE_CPU != 0 {
                    sample.cpu = reader.read_u32()?;
                    reader.read_u32()?;
                }
                if sample_type & SAMPLE_PERIOD != 0 {
                    sample.period = reader.read_u64()?;
                }
                if sample_type & SAMPLE_CALLCHAIN != 0 {
                    let nr = reader.read_u64()? as usize;
                    let mut callchain = Vec::with_capacity(nr);
                    for _ in 0..nr {
                        callchain.push(reader.read_u64()?);
                    }
                    sample.callchain = callchain;
                }
                EventRecord::Sample(sample)
            }
            other => EventRecord::Raw(RawRecord {
                record_type: other,
                data: payload.to_vec(),
            }),
        };

        Ok(record)
    }
}
