//! Error types for the store engine.
//!
//! Each module owns its error enum; this module re-exports them in one
//! place for callers.

pub use crate::crypto::KeyError;
pub use crate::manifest::{ManifestError, PathError};
pub use crate::naming::NamingError;
pub use crate::pipeline::{EgressError, IngestError};
pub use crate::store::StoreError;
