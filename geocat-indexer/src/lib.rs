//! Metadata scanning and rebuild orchestration.
//!
//! [`Indexer::rebuild`] scans a [`DocumentSource`], publishes the resulting
//! tables to an [`IndexStore`](geocat_store::IndexStore) under a fresh
//! version and then applies the retention policy. [`RebuildWorker`] runs
//! rebuilds in the background with at most one in flight per document root,
//! fed by [`RebuildRequest`]s from any transport.

pub mod error;
pub mod indexer;
pub mod orchestrator;
pub mod scanner;
pub mod source;
pub mod watcher;

pub use error::{IndexerError, Result};
pub use indexer::{root_lock, Indexer, RebuildReport};
pub use orchestrator::{
    RebuildCompletion, RebuildHandle, RebuildOutcome, RebuildPhase, RebuildRequest,
    RebuildStatus, RebuildWorker,
};
pub use scanner::{scan, DocumentError, ScanOutput};
pub use source::{
    fingerprint, is_indexable, DocumentSource, FileDocumentSource, MemoryDocumentSource,
    SourceEntry,
};
pub use watcher::spawn_poll_watcher;
