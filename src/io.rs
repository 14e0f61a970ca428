//! Byte cursor over the exclusively-owned container file.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

/// Sequential writes, absolute seeks, and position queries over one open
/// file. The logical position is tracked here so `position()` never costs
/// a syscall.
///
/// A failed write leaves the container in an undefined state; callers are
/// expected to abandon the session, never to retry.
#[derive(Debug)]
pub struct RecordFile {
    file: File,
    pos: u64,
}

impl RecordFile {
    /// Create (truncating) a container file for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(RecordFile { file, pos: 0 })
    }

    /// Open an existing container file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(RecordFile { file, pos: 0 })
    }

    /// Current absolute byte offset.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Seek to an absolute byte offset.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        self.pos = self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.file.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Flush buffered writes through to the OS and disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_tracks_position() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = RecordFile::create(temp.path()).unwrap();

        assert_eq!(file.position(), 0);
        file.write(b"abcdef").unwrap();
        assert_eq!(file.position(), 6);
        file.write(b"gh").unwrap();
        assert_eq!(file.position(), 8);
    }

    #[test]
    fn test_seek_and_read_back() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = RecordFile::create(temp.path()).unwrap();

        file.write(b"0123456789").unwrap();
        file.seek(4).unwrap();
        assert_eq!(file.position(), 4);

        let mut buf = [0u8; 3];
        file.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"456");
        assert_eq!(file.position(), 7);
    }

    #[test]
    fn test_overwrite_at_offset() {
        let temp = NamedTempFile::new().unwrap();
        let mut file = RecordFile::create(temp.path()).unwrap();

        file.write(&[0u8; 16]).unwrap();
        file.seek(0).unwrap();
        file.write(b"HEAD").unwrap();
        file.sync().unwrap();

        let mut reopened = RecordFile::open(temp.path()).unwrap();
        let mut buf = [0u8; 16];
        reopened.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[0..4], b"HEAD");
        assert_eq!(&buf[4..], &[0u8; 12]);
    }

    #[test]
    fn test_open_missing_file_fails() {
        assert!(RecordFile::open("/nonexistent/recfile-test").is_err());
    }
}
