//! Performance event attribute descriptors.
//!
//! An [`EventAttr`] describes one configured sampling event: what was
//! counted, how often samples were taken, and which fields each sample
//! record carries. The writer stores one fixed-size attribute record per
//! attribute; the ids of the kernel events an attribute aggregates live in
//! a separate id section referenced by offset.

use crate::error::{RecordFileError, Result};
use crate::header::SECTION_DESC_SIZE;

/// Wire size of one attribute descriptor.
pub const ATTR_SIZE: usize = 112;

/// Wire size of one attribute record: descriptor plus the section
/// descriptor pointing at its slice of the id section.
pub const FILE_ATTR_SIZE: usize = ATTR_SIZE + SECTION_DESC_SIZE;

// sample_type bits: which fields a sample record carries, in wire order.
pub const SAMPLE_IP: u64 = 1 << 0;
pub const SAMPLE_TID: u64 = 1 << 1;
pub const SAMPLE_TIME: u64 = 1 << 2;
pub const SAMPLE_ADDR: u64 = 1 << 3;
pub const SAMPLE_READ: u64 = 1 << 4;
pub const SAMPLE_CALLCHAIN: u64 = 1 << 5;
pub const SAMPLE_ID: u64 = 1 << 6;
pub const SAMPLE_CPU: u64 = 1 << 7;
pub const SAMPLE_PERIOD: u64 = 1 << 8;

// flag bits
pub const ATTR_FLAG_DISABLED: u64 = 1 << 0;
pub const ATTR_FLAG_INHERIT: u64 = 1 << 1;
pub const ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;

/// One performance-event attribute descriptor.
///
/// Fixed 112-byte little-endian wire image. Producers fill in whatever
/// subset of fields their event source uses; unused configuration words
/// stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventAttr {
    pub event_type: u32,
    pub size: u32,
    pub config: u64,
    pub sample_period: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    pub reserved: u16,
}

impl EventAttr {
    pub fn new() -> Self {
        EventAttr {
            event_type: 0,
            size: ATTR_SIZE as u32,
            config: 0,
            sample_period: 0,
            sample_type: 0,
            read_format: 0,
            flags: 0,
            wakeup_events: 0,
            bp_type: 0,
            config1: 0,
            config2: 0,
            branch_sample_type: 0,
            sample_regs_user: 0,
            sample_stack_user: 0,
            clockid: 0,
            sample_regs_intr: 0,
            aux_watermark: 0,
            sample_max_stack: 0,
            reserved: 0,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ATTR_SIZE);

        bytes.extend_from_slice(&self.event_type.to_le_bytes());
        bytes.extend_from_slice(&self.size.to_le_bytes());
        bytes.extend_from_slice(&self.config.to_le_bytes());
        bytes.extend_from_slice(&self.sample_period.to_le_bytes());
        bytes.extend_from_slice(&self.sample_type.to_le_bytes());
        bytes.extend_from_slice(&self.read_format.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&self.wakeup_events.to_le_bytes());
        bytes.extend_from_slice(&self.bp_type.to_le_bytes());
        bytes.extend_from_slice(&self.config1.to_le_bytes());
        bytes.extend_from_slice(&self.config2.to_le_bytes());
        bytes.extend_from_slice(&self.branch_sample_type.to_le_bytes());
        bytes.extend_from_slice(&self.sample_regs_user.to_le_bytes());
        bytes.extend_from_slice(&self.sample_stack_user.to_le_bytes());
        bytes.extend_from_slice(&self.clockid.to_le_bytes());
        bytes.extend_from_slice(&self.sample_regs_intr.to_le_bytes());
        bytes.extend_from_slice(&self.aux_watermark.to_le_bytes());
        bytes.extend_from_slice(&self.sample_max_stack.to_le_bytes());
        bytes.extend_from_slice(&self.reserved.to_le_bytes());

        debug_assert_eq!(bytes.len(), ATTR_SIZE);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ATTR_SIZE {
            return Err(RecordFileError::Truncated(bytes.len()));
        }

        let mut attr = EventAttr::new();
        attr.event_type = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        attr.size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        attr.config = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        attr.sample_period = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        attr.sample_type = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        attr.read_format = u64::from_le_bytes(bytes[32..40].try_into().unwrap());
        attr.flags = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        attr.wakeup_events = u32::from_le_bytes(bytes[48..52].try_into().unwrap());
        attr.bp_type = u32::from_le_bytes(bytes[52..56].try_into().unwrap());
        attr.config1 = u64::from_le_bytes(bytes[56..64].try_into().unwrap());
        attr.config2 = u64::from_le_bytes(bytes[64..72].try_into().unwrap());
        attr.branch_sample_type = u64::from_le_bytes(bytes[72..80].try_into().unwrap());
        attr.sample_regs_user = u64::from_le_bytes(bytes[80..88].try_into().unwrap());
        attr.sample_stack_user = u32::from_le_bytes(bytes[88..92].try_into().unwrap());
        attr.clockid = i32::from_le_bytes(bytes[92..96].try_into().unwrap());
        attr.sample_regs_intr = u64::from_le_bytes(bytes[96..104].try_into().unwrap());
        attr.aux_watermark = u32::from_le_bytes(bytes[104..108].try_into().unwrap());
        attr.sample_max_stack = u16::from_le_bytes(bytes[108..110].try_into().unwrap());
        attr.reserved = u16::from_le_bytes(bytes[110..112].try_into().unwrap());

        Ok(attr)
    }
}

impl Default for EventAttr {
    fn default() -> Self {
        Self::new()
    }
}

/// An attribute descriptor plus the numeric ids of the kernel events it
/// aggregates. Multiple attributes may share one container; only the first
/// is retained for record decoding.
#[derive(Debug, Clone)]
pub struct AttrWithIds {
    pub attr: EventAttr,
    pub ids: Vec<u64>,
}
