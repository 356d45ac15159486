//! The repository boundary.
//!
//! A [`BlockingRepository`] is a synchronous data store whose calls block
//! (a JDBC-style driver, a file, a legacy client). The adapters here move
//! those calls onto an elastic scheduler so they never run on the caller's
//! thread or on a scheduler reserved for non-blocking work.

use rill_core::{Flux, Mono, SchedulerRef};
use std::sync::Arc;

/// A store whose calls block the calling thread.
pub trait BlockingRepository<R>: Send + Sync {
    /// Every stored record.
    fn find_all(&self) -> Vec<R>;

    /// Store one record.
    fn save(&self, record: R);
}

/// A store that already exposes its records as a sequence.
pub trait ReactiveRepository<R>: Send + Sync {
    /// Every stored record, emitted as demand allows.
    fn find_all(&self) -> Flux<R>;
}

/// Expose a blocking repository's records as a [`Flux`].
///
/// `find_all` runs once per subscription, on `elastic`.
pub fn blocking_to_flux<R, B>(repository: Arc<B>, elastic: SchedulerRef) -> Flux<R>
where
    R: Clone + Send + Sync + 'static,
    B: BlockingRepository<R> + ?Sized + 'static,
{
    Flux::defer(move || {
        tracing::trace!("Loading records from blocking repository");
        Flux::from_iter(repository.find_all())
    })
    .subscribe_on(elastic)
}

/// Save every record of `records` into a blocking repository.
///
/// Each `save` runs on `elastic`. The returned [`Mono`] completes once every
/// record was saved and fails with the first error of `records`.
pub fn flux_to_blocking<R, B>(records: Flux<R>, repository: Arc<B>, elastic: SchedulerRef) -> Mono<()>
where
    R: Clone + Send + 'static,
    B: BlockingRepository<R> + ?Sized + 'static,
{
    records
        .publish_on(elastic)
        .do_on_next(move |record: &R| repository.save(record.clone()))
        .then()
}
