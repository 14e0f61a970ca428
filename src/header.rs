use crate::error::{RecordFileError, Result};
use crate::feature::FeatureId;

pub const MAGIC: [u8; 8] = *b"PERFILE2";
pub const FILE_HEADER_SIZE: usize = 104;
pub const SECTION_DESC_SIZE: usize = 16;

/// Number of bytes in the feature presence bitmap (256 feature ids).
pub const FEATURE_BITMAP_SIZE: usize = 32;

/// Locates a contiguous byte range within the container.
///
/// Live descriptors never overlap, and sections appear in file order:
/// id arrays, attribute records, event data, feature index, feature blobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionDesc {
    /// Absolute byte offset from the start of the file
    pub offset: u64,

    /// Byte length of the section
    pub size: u64,
}

impl SectionDesc {
    pub fn to_bytes(&self) -> [u8; SECTION_DESC_SIZE] {
        let mut bytes = [0u8; SECTION_DESC_SIZE];
        bytes[0..8].copy_from_slice(&self.offset.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SECTION_DESC_SIZE {
            return Err(RecordFileError::Truncated(bytes.len()));
        }
        Ok(SectionDesc {
            offset: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            size: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        })
    }

    /// Byte offset one past the end of the section.
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Container file header (offset 0)
///
/// The header occupies the first 104 bytes of the file. It is the last
/// region written: every field depends on section extents that are only
/// known once the attribute, data, and feature sections are on disk.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// Magic number: "PERFILE2"
    pub magic: [u8; 8],

    /// Size of this header in bytes (always 104)
    pub header_size: u64,

    /// Size of one attribute record in the attribute section
    pub attr_size: u64,

    /// Extent of the attribute records
    pub attrs: SectionDesc,

    /// Extent of the event data section
    pub data: SectionDesc,

    /// Unused, kept zeroed for a fixed header layout
    pub event_types: SectionDesc,

    /// Presence bitmap: bit `k` set means feature `k` exists in the
    /// feature section
    pub features: [u8; FEATURE_BITMAP_SIZE],
}

impl FileHeader {
    pub fn new() -> Self {
        FileHeader {
            magic: MAGIC,
            header_size: FILE_HEADER_SIZE as u64,
            attr_size: crate::attr::FILE_ATTR_SIZE as u64,
            attrs: SectionDesc::default(),
            data: SectionDesc::default(),
            event_types: SectionDesc::default(),
            features: [0; FEATURE_BITMAP_SIZE],
        }
    }

    /// Mark a feature as present in the bitmap
    pub fn set_feature(&mut self, feature: FeatureId) {
        self.features[feature.0 as usize / 8] |= 1 << (feature.0 % 8);
    }

    /// Check whether a feature is present in the bitmap
    pub fn has_feature(&self, feature: FeatureId) -> bool {
        self.features[feature.0 as usize / 8] & (1 << (feature.0 % 8)) != 0
    }

    /// All features present in the bitmap, in ascending identifier order
    pub fn feature_ids(&self) -> Vec<FeatureId> {
        let mut ids = Vec::new();
        for bit in 0..(FEATURE_BITMAP_SIZE * 8) {
            if self.features[bit / 8] & (1 << (bit % 8)) != 0 {
                ids.push(FeatureId(bit as u8));
            }
        }
        ids
    }

    /// Validate magic and structural sizes
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(RecordFileError::InvalidMagic);
        }
        if self.header_size != FILE_HEADER_SIZE as u64 {
            return Err(RecordFileError::UnsupportedHeaderSize(self.header_size));
        }
        if self.attr_size != crate::attr::FILE_ATTR_SIZE as u64 {
            return Err(RecordFileError::UnsupportedAttrSize(self.attr_size));
        }
        Ok(())
    }

    /// Serialize header to its 104-byte wire image
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FILE_HEADER_SIZE);

        bytes.extend_from_slice(&self.magic);
        bytes.extend_from_slice(&self.header_size.to_le_bytes());
        bytes.extend_from_slice(&self.attr_size.to_le_bytes());
        bytes.extend_from_slice(&self.attrs.to_bytes());
        bytes.extend_from_slice(&self.data.to_bytes());
        bytes.extend_from_slice(&self.event_types.to_bytes());
        bytes.extend_from_slice(&self.features);

        bytes
    }

    /// Deserialize and validate a header from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FILE_HEADER_SIZE {
            return Err(RecordFileError::Truncated(bytes.len()));
        }

        let mut header = FileHeader::new();
        header.magic.copy_from_slice(&bytes[0..8]);
        header.header_size = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        header.attr_size = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        header.attrs = SectionDesc::from_bytes(&bytes[24..40])?;
        header.data = SectionDesc::from_bytes(&bytes[40..56])?;
        header.event_types = SectionDesc::from_bytes(&bytes[56..72])?;
        header.features.copy_from_slice(&bytes[72..104]);

        header.validate()?;

        Ok(header)
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureId;

    #[test]
    fn test_header_creation() {
        let header = FileHeader::new();
        assert_eq!(header.magic, MAGIC);
        assert_eq!(header.header_size, FILE_HEADER_SIZE as u64);
        assert!(header.validate().is_ok());
    }

    #[test]
    fn test_wire_image_is_104_bytes() {
        assert_eq!(FileHeader::new().to_bytes().len(), FILE_HEADER_SIZE);
    }

    #[test]
    fn test_invalid_magic() {
        let mut header = FileHeader::new();
        header.magic = *b"NOTPERF!";
        assert!(matches!(
            header.validate(),
            Err(RecordFileError::InvalidMagic)
        ));
    }

    #[test]
    fn test_unsupported_header_size() {
        let mut header = FileHeader::new();
        header.header_size = 96;
        assert!(matches!(
            header.validate(),
            Err(RecordFileError::UnsupportedHeaderSize(96))
        ));
    }

    #[test]
    fn test_feature_bitmap() {
        let mut header = FileHeader::new();
        header.set_feature(FeatureId::BUILD_ID);
        header.set_feature(FeatureId::META_INFO);

        assert!(header.has_feature(FeatureId::BUILD_ID));
        assert!(header.has_feature(FeatureId::META_INFO));
        assert!(!header.has_feature(FeatureId::CMDLINE));

        // Ids come back in ascending order regardless of set order.
        assert_eq!(
            header.feature_ids(),
            vec![FeatureId::BUILD_ID, FeatureId::META_INFO]
        );
    }

    #[test]
    fn test_header_round_trip() {
        let mut header = FileHeader::new();
        header.attrs = SectionDesc {
            offset: 120,
            size: 128,
        };
        header.data = SectionDesc {
            offset: 248,
            size: 4096,
        };
        header.set_feature(FeatureId::CMDLINE);

        let bytes = header.to_bytes();
        let parsed = FileHeader::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.attrs, header.attrs);
        assert_eq!(parsed.data, header.data);
        assert_eq!(parsed.event_types, SectionDesc::default());
        assert!(parsed.has_feature(FeatureId::CMDLINE));
        assert!(!parsed.has_feature(FeatureId::BUILD_ID));
    }

    #[test]
    fn test_section_desc_end() {
        let sec = SectionDesc {
            offset: 100,
            size: 28,
        };
        assert_eq!(sec.end(), 128);
    }
}
