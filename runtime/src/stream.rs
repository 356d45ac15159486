//! Consuming a `Flux` as a `futures::Stream`.
//!
//! The stream requests a bounded window of values and replenishes it as the
//! async consumer polls, so a slow task applies backpressure to the source.

use futures::Stream;
use rill_core::{BlockingConfig, Flux, FluxError, Subscriber, SubscriptionRef};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

enum Event<T> {
    Next(T),
    Error(FluxError),
    Complete,
}

type SharedSubscription = Arc<Mutex<Option<SubscriptionRef>>>;

fn current(subscription: &SharedSubscription) -> Option<SubscriptionRef> {
    subscription
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

struct StreamSubscriber<T> {
    sender: UnboundedSender<Event<T>>,
    subscription: SharedSubscription,
    prefetch: u64,
}

impl<T: Send> Subscriber<T> for StreamSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        *self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&subscription));
        subscription.request(self.prefetch);
    }

    fn on_next(&mut self, value: T) {
        if self.sender.send(Event::Next(value)).is_err() {
            if let Some(subscription) = current(&self.subscription) {
                subscription.cancel();
            }
        }
    }

    fn on_error(&mut self, error: FluxError) {
        let _ = self.sender.send(Event::Error(error));
    }

    fn on_complete(&mut self) {
        let _ = self.sender.send(Event::Complete);
    }
}

/// A [`Flux`] adapted to [`Stream`].
///
/// Items are `Ok(value)`; the error signal becomes a final `Err`. Dropping
/// the stream cancels the subscription.
pub struct FluxStream<T> {
    receiver: UnboundedReceiver<Event<T>>,
    subscription: SharedSubscription,
    limit: u64,
    consumed: u64,
    done: bool,
}

/// Subscribe to `flux` and expose its signals as a [`Stream`].
pub fn into_stream<T: Send + 'static>(flux: &Flux<T>) -> FluxStream<T> {
    into_stream_with(flux, BlockingConfig::default())
}

/// Like [`into_stream`] with an explicit prefetch window.
pub fn into_stream_with<T: Send + 'static>(flux: &Flux<T>, config: BlockingConfig) -> FluxStream<T> {
    let (sender, receiver) = unbounded_channel();
    let subscription = SharedSubscription::default();
    flux.subscribe_with(StreamSubscriber {
        sender,
        subscription: Arc::clone(&subscription),
        prefetch: config.prefetch,
    });
    FluxStream {
        receiver,
        subscription,
        limit: config.replenish_limit(),
        consumed: 0,
        done: false,
    }
}

impl<T> Unpin for FluxStream<T> {}

impl<T> Stream for FluxStream<T> {
    type Item = Result<T, FluxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Event::Next(value))) => {
                this.consumed += 1;
                if this.consumed == this.limit {
                    this.consumed = 0;
                    if let Some(subscription) = current(&this.subscription) {
                        subscription.request(this.limit);
                    }
                }
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(Some(Event::Error(error))) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(Some(Event::Complete)) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(Some(Err(FluxError::ProtocolViolation(
                    "sequence ended without a terminal signal".to_string(),
                ))))
            }
        }
    }
}

impl<T> Drop for FluxStream<T> {
    fn drop(&mut self) {
        if !self.done {
            if let Some(subscription) = current(&self.subscription) {
                tracing::trace!("Cancelling stream subscription");
                subscription.cancel();
            }
        }
    }
}

impl<T> std::fmt::Debug for FluxStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FluxStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn streams_every_value() {
        let values: Vec<i64> = into_stream(&Flux::range(0, 100))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(values, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn demand_follows_consumption() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        let flux = Flux::range(0, 10).do_on_request(move |n| seen.lock().unwrap().push(n));
        let mut stream = into_stream_with(&flux, BlockingConfig::default().with_prefetch(4));
        assert_eq!(stream.next().await.unwrap().unwrap(), 0);
        assert_eq!(*requests.lock().unwrap(), vec![4]);
        let rest: Vec<_> = stream.collect().await;
        assert_eq!(rest.len(), 9);
    }

    #[tokio::test]
    async fn error_is_the_last_item() {
        let flux = Flux::just([1]).concat_with(Flux::error(FluxError::message("late")));
        let items: Vec<_> = into_stream(&flux).collect().await;
        assert_eq!(*items[0].as_ref().unwrap(), 1);
        assert_eq!(items[1].as_ref().unwrap_err().to_string(), "late");
    }

    #[tokio::test]
    async fn dropping_cancels() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let flux = Flux::range(0, 1_000).do_on_cancel(move || flag.store(true, Ordering::SeqCst));
        let mut stream = into_stream(&flux);
        stream.next().await.unwrap().unwrap();
        drop(stream);
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
