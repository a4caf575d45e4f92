//! Encrypted, content-addressed backup store.
//!
//! A shroud store is a flat, sharded directory of stream-ciphered blobs plus
//! one encrypted manifest (`.fs`) mapping original paths to store locations.
//! The [`pipeline::Ingestor`] walks a source tree into the store, the
//! [`pipeline::Egressor`] reconstructs the original tree from it, and
//! [`reconcile`] keeps the manifest and the physical store consistent across
//! partial failures.

pub mod crypto;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod pipeline;
pub mod reconcile;
pub mod store;

pub use crypto::StoreKey;
pub use manifest::{LogicalPath, Manifest};
pub use pipeline::{EgressSummary, Egressor, IngestStatus, IngestSummary, Ingestor};
pub use reconcile::CommitResult;
