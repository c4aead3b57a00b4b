//! Index sink trait — the user-provided indexing function.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::BatchRecord;

/// Consumes batches of new records and applies them to the derived index.
///
/// Called at most once per feed per pass, with the records of a single feed
/// in increasing sequence order. The indexer only advances (and persists) the
/// feed's cursor once `apply` has returned `Ok`.
#[async_trait]
pub trait IndexSink: Send + Sync {
    async fn apply(&self, batch: &[BatchRecord]) -> Result<(), IndexerError>;
}

/// Adapts an async closure into an [`IndexSink`].
///
/// ```rust,no_run
/// use feedindex_core::sink::FnSink;
///
/// let sink = FnSink::new(|batch| async move {
///     println!("indexing {} records", batch.len());
///     Ok(())
/// });
/// ```
pub struct FnSink<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnSink<F, Fut>
where
    F: Fn(Vec<BatchRecord>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), IndexerError>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f, _fut: PhantomData }
    }
}

#[async_trait]
impl<F, Fut> IndexSink for FnSink<F, Fut>
where
    F: Fn(Vec<BatchRecord>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), IndexerError>> + Send,
{
    async fn apply(&self, batch: &[BatchRecord]) -> Result<(), IndexerError> {
        (self.f)(batch.to_vec()).await
    }
}
