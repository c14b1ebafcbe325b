//! Fragment sources.
//!
//! The retrieval pipeline reads fragments through the [`FragmentSource`]
//! trait so the same ranking code runs against SQLite in the application
//! and against [`InMemorySource`] in tests.
//!
//! A source hands back a complete snapshot on every call. Both scorers
//! run against that one snapshot, so nothing can be added or removed
//! between lexical and dense scoring.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Fragment;

pub use memory::InMemorySource;

/// Supplies the full set of retrievable fragments.
///
/// Implementations must return every fragment with non-empty text. A
/// failed fetch is an `Err`, never an empty `Vec`, so callers can tell
/// "no data" apart from "fetch failed".
#[async_trait]
pub trait FragmentSource: Send + Sync {
    async fn fetch_fragments(&self) -> Result<Vec<Fragment>>;
}

#[async_trait]
impl<T: FragmentSource + ?Sized> FragmentSource for std::sync::Arc<T> {
    async fn fetch_fragments(&self) -> Result<Vec<Fragment>> {
        (**self).fetch_fragments().await
    }
}
