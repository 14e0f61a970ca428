//! Sectioned Record-File Container
//!
//! A single-file binary container for performance sampling profilers:
//! event records plus trace metadata, laid out so third-party
//! trace-analysis tooling can consume it. This crate is the write side
//! (and a minimal read side) used once event collection has completed.
//!
//! ## Features
//!
//! - **Three-section layout** with offset/length descriptors and a
//!   two-pass header write
//! - **Split protocol** fragmenting oversized records into wire chunks
//!   bounded at 65 535 bytes
//! - **Feature blobs** (build ids, command line, symbol tables, metadata)
//!   behind a fixed-layout index reserved up front and filled last
//! - **Deterministic output**: identical logical input produces identical
//!   bytes across runs and platforms
//! - **Abandonment cleanup**: a writer dropped before `close()` deletes
//!   its partial file
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use recfile::{AttrWithIds, EventAttr, RecordFileWriter};
//!
//! # fn main() -> recfile::Result<()> {
//! let mut attr = EventAttr::new();
//! attr.sample_type = recfile::attr::SAMPLE_IP | recfile::attr::SAMPLE_TID;
//!
//! let mut writer = RecordFileWriter::create("perf.data")?;
//! writer.write_attr_section(&[AttrWithIds { attr, ids: vec![0] }])?;
//! // ... write_record() for every collected event ...
//! writer.begin_feature_writing(2)?;
//! writer.write_cmdline_feature(&["sampler".into(), "record".into()])?;
//! writer.write_branch_stack_feature()?;
//! writer.end_feature_writing()?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Container Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ File header (104 bytes, written last)       │
//! │  - Magic "PERFILE2", header/attr sizes      │
//! │  - Attr + data section descriptors          │
//! │  - Feature presence bitmap (256 bits)       │
//! ├─────────────────────────────────────────────┤
//! │ Id section                                  │
//! │  - Concatenated per-attribute id arrays     │
//! ├─────────────────────────────────────────────┤
//! │ Attribute records                           │
//! │  - Descriptor + id-slice locator each       │
//! ├─────────────────────────────────────────────┤
//! │ Data section                                │
//! │  - Event records, split-fragmented if big   │
//! ├─────────────────────────────────────────────┤
//! │ Feature index (reserved early, filled last) │
//! │  - One descriptor per feature, id order     │
//! ├─────────────────────────────────────────────┤
//! │ Feature blobs                               │
//! │  - Build ids, cmdline, symbols, meta-info   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Writes follow a fixed protocol (attribute section, then records, then
//! features, then finalize) because each region's offset is only known
//! once the previous region is on disk. See [`RecordFileWriter`] for the
//! exact call sequence and [`RecordFileReader`] for the read side.

pub mod attr;
pub mod error;
pub mod feature;
pub mod header;
pub mod io;
pub mod reader;
pub mod record;
pub mod writer;

// Re-export commonly used types
pub use attr::{AttrWithIds, EventAttr};
pub use error::{RecordFileError, Result};
pub use feature::{BuildIdRecord, FeatureId, ModuleSymbols, ModuleType, Symbol};
pub use header::{FileHeader, SectionDesc, MAGIC};
pub use reader::RecordFileReader;
pub use record::{EventRecord, RecordHeader, RECORD_SIZE_LIMIT};
pub use writer::RecordFileWriter;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
