//! Waiting for sequences from synchronous code.
//!
//! These calls park the calling thread until the sequence produces what they
//! wait for. They belong at the outermost edge of a program (a `main`, a
//! test, a synchronous API boundary), never inside an operator chain or a
//! scheduler task: a blocked worker cannot run the work it waits for.

use crate::config::{BlockingConfig, replenish_limit};
use crate::error::FluxError;
use crate::flux::Flux;
use crate::mono::Mono;
use crate::protocol::{Subscriber, SubscriptionRef, UNBOUNDED};
use crate::sync::lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

enum Event<T> {
    Next(T),
    Error(FluxError),
    Complete,
}

/// The subscription of a blocking consumer, which may arrive on another
/// thread after the consumer started waiting.
#[derive(Default)]
struct Handle {
    subscription: Mutex<Option<SubscriptionRef>>,
    cancelled: AtomicBool,
}

impl Handle {
    fn request(&self, n: u64) {
        let subscription = lock(&self.subscription).clone();
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            tracing::trace!("Cancelling blocking consumer");
            subscription.cancel();
        }
    }
}

struct ChannelSubscriber<T> {
    sender: Sender<Event<T>>,
    handle: Arc<Handle>,
    initial: u64,
}

impl<T: Send> Subscriber<T> for ChannelSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        if self.handle.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        *lock(&self.handle.subscription) = Some(Arc::clone(&subscription));
        subscription.request(self.initial);
    }

    fn on_next(&mut self, value: T) {
        if self.sender.send(Event::Next(value)).is_err() {
            self.handle.cancel();
        }
    }

    fn on_error(&mut self, error: FluxError) {
        let _ = self.sender.send(Event::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.sender.send(Event::Complete);
    }
}

fn connect<T: Send + 'static>(flux: &Flux<T>, initial: u64) -> (Receiver<Event<T>>, Arc<Handle>) {
    let (sender, receiver) = mpsc::channel();
    let handle = Arc::new(Handle::default());
    flux.subscribe_raw(ChannelSubscriber {
        sender,
        handle: Arc::clone(&handle),
        initial,
    });
    (receiver, handle)
}

fn missing_terminal() -> FluxError {
    FluxError::ProtocolViolation("sequence ended without a terminal signal".to_string())
}

/// Receive the next event, honouring an optional deadline.
fn receive<T>(
    receiver: &Receiver<Event<T>>,
    deadline: Option<(Instant, Duration)>,
) -> Result<Event<T>, FluxError> {
    match deadline {
        None => receiver.recv().map_err(|_| missing_terminal()),
        Some((at, timeout)) => {
            let remaining = at.saturating_duration_since(Instant::now());
            receiver.recv_timeout(remaining).map_err(|error| match error {
                RecvTimeoutError::Timeout => FluxError::Timeout(timeout),
                RecvTimeoutError::Disconnected => missing_terminal(),
            })
        }
    }
}

/// Wait for the terminal signal, returning the last value seen.
fn await_last<T: Send + 'static>(
    flux: &Flux<T>,
    timeout: Option<Duration>,
) -> Result<Option<T>, FluxError> {
    let (receiver, handle) = connect(flux, UNBOUNDED);
    let deadline = timeout.map(|timeout| (Instant::now() + timeout, timeout));
    let mut last = None;
    loop {
        match receive(&receiver, deadline) {
            Ok(Event::Next(value)) => last = Some(value),
            Ok(Event::Complete) => return Ok(last),
            Ok(Event::Error(error)) => return Err(error),
            Err(error) => {
                handle.cancel();
                return Err(error);
            }
        }
    }
}

impl<T: Send + 'static> Mono<T> {
    /// Subscribe and wait for the value.
    ///
    /// Returns `Ok(None)` if the `Mono` completes empty and re-raises its
    /// error otherwise.
    ///
    /// # Errors
    ///
    /// The error signal of the sequence, or [`FluxError::ProtocolViolation`]
    /// if the sequence is dropped without terminating.
    pub fn block(&self) -> Result<Option<T>, FluxError> {
        await_last(&self.clone().into_flux(), None)
    }

    /// Like [`block`](Self::block), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`FluxError::Timeout`] once `timeout` elapsed; the subscription is
    /// cancelled in that case.
    pub fn block_timeout(&self, timeout: Duration) -> Result<Option<T>, FluxError> {
        await_last(&self.clone().into_flux(), Some(timeout))
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Subscribe and wait for the first value, cancelling the rest.
    ///
    /// # Errors
    ///
    /// The error signal of the sequence if it arrives before any value.
    pub fn block_first(&self) -> Result<Option<T>, FluxError> {
        let (receiver, handle) = connect(self, 1);
        match receive(&receiver, None) {
            Ok(Event::Next(value)) => {
                handle.cancel();
                Ok(Some(value))
            }
            Ok(Event::Complete) => Ok(None),
            Ok(Event::Error(error)) | Err(error) => Err(error),
        }
    }

    /// Subscribe and wait for completion, returning the last value.
    ///
    /// # Errors
    ///
    /// The error signal of the sequence.
    pub fn block_last(&self) -> Result<Option<T>, FluxError> {
        await_last(self, None)
    }

    /// Iterate over the values from the calling thread.
    pub fn to_iterable(&self) -> BlockingIter<T> {
        self.to_iterable_with(BlockingConfig::default())
    }

    /// Like [`to_iterable`](Self::to_iterable) with an explicit prefetch.
    pub fn to_iterable_with(&self, config: BlockingConfig) -> BlockingIter<T> {
        let (receiver, handle) = connect(self, config.prefetch);
        BlockingIter {
            receiver,
            handle,
            limit: replenish_limit(config.prefetch),
            consumed: 0,
            done: false,
        }
    }
}

/// Blocking iterator over the values of a [`Flux`].
///
/// At most `prefetch` values are requested ahead of the iterating thread.
/// The error signal is yielded as a final `Err` item. Dropping the iterator
/// cancels the subscription.
pub struct BlockingIter<T> {
    receiver: Receiver<Event<T>>,
    handle: Arc<Handle>,
    limit: u64,
    consumed: u64,
    done: bool,
}

impl<T> Iterator for BlockingIter<T> {
    type Item = Result<T, FluxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match receive(&self.receiver, None) {
            Ok(Event::Next(value)) => {
                self.consumed += 1;
                if self.consumed == self.limit {
                    self.consumed = 0;
                    self.handle.request(self.limit);
                }
                Some(Ok(value))
            }
            Ok(Event::Complete) => {
                self.done = true;
                None
            }
            Ok(Event::Error(error)) | Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }
}

impl<T> Drop for BlockingIter<T> {
    fn drop(&mut self) {
        if !self.done {
            self.handle.cancel();
        }
    }
}

impl<T> std::fmt::Debug for BlockingIter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingIter")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_support::ThreadScheduler;

    #[test]
    fn block_returns_the_value() {
        assert_eq!(Mono::just(5).block().unwrap(), Some(5));
        assert_eq!(Mono::<i32>::empty().block().unwrap(), None);
    }

    #[test]
    fn block_reraises_the_error() {
        let error = Mono::<i32>::error(FluxError::message("nope")).block().unwrap_err();
        assert_eq!(error.to_string(), "nope");
    }

    #[test]
    fn block_waits_for_another_thread() {
        let value = Mono::just("late")
            .subscribe_on(ThreadScheduler::shared("producer"))
            .block()
            .unwrap();
        assert_eq!(value, Some("late"));
    }

    #[test]
    fn block_timeout_gives_up() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let error = Mono::<i32>::never()
            .do_on_cancel(move || flag.store(true, Ordering::SeqCst))
            .block_timeout(Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(error, FluxError::Timeout(_)));
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn block_first_and_last() {
        let flux = Flux::range(1, 5);
        assert_eq!(flux.block_first().unwrap(), Some(1));
        assert_eq!(flux.block_last().unwrap(), Some(5));
        assert_eq!(Flux::<i64>::empty().block_last().unwrap(), None);
    }

    #[test]
    fn iterable_requests_in_batches() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let values: Vec<i64> = Flux::range(0, 10)
            .do_on_request(move |n| seen.lock().unwrap().push(n))
            .to_iterable_with(BlockingConfig::default().with_prefetch(4))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        let requests = requests.lock().unwrap().clone();
        assert_eq!(requests[0], 4);
        assert!(requests[1..].iter().all(|&n| n == 3));
    }

    #[test]
    fn iterable_yields_the_error_last() {
        let items: Vec<Result<i32, FluxError>> = Flux::just([1])
            .concat_with(Flux::error(FluxError::message("tail")))
            .to_iterable()
            .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "tail");
    }

    #[test]
    fn dropping_the_iterator_cancels() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let mut iter = Flux::range(0, 1_000)
            .do_on_cancel(move || flag.store(true, Ordering::SeqCst))
            .to_iterable();
        assert_eq!(iter.next().unwrap().unwrap(), 0);
        drop(iter);
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
