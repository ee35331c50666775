//! Persistent store for the latest analysis and the analysis history

pub mod error;
pub mod flush;
pub mod store;

pub use error::StorageError;
pub use flush::{spawn_periodic_flush, FlushGuard};
pub use store::{FlushReport, LatestDocument, ResultStore};
