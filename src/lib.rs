//! # CaskDB
//!
//! An embedded, log-structured key-value store in the Bitcask style:
//! - Append-only data segments with CRC-checked records
//! - In-memory (BTreeMap, adaptive radix tree) or on-disk (LMDB B+Tree) index
//! - Atomic write batches tagged with sequence numbers
//! - Merge compaction with hint files for fast restarts
//! - Single-writer/multi-reader concurrency model
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Engine  /  WriteBatch  /  EngineIterator        │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Segments   │          │    Index    │
//!   │  (Append)   │          │ key → pos   │
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  IoManager  │          │    Merge    │
//!   │ (std/mmap)  │          │ (hint file) │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod fio;
pub mod data;
pub mod index;
pub mod engine;
pub mod batch;
pub mod iterator;
pub mod merge;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::{Config, IteratorOptions, WriteBatchOptions};
pub use engine::{Engine, Stat};
pub use batch::WriteBatch;
pub use iterator::EngineIterator;
pub use fio::IoType;
pub use index::IndexType;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskDB
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
