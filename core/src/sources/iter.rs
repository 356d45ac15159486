//! Sources pulling from an iterator at the pace of demand.

use crate::demand::{Demand, WorkInProgress};
use crate::error::{FluxError, guard};
use crate::flux::Flux;
use crate::protocol::{BoxSubscriber, Subscription};
use crate::sync::lock;
use std::iter::Peekable;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type BoxIter<T> = Box<dyn Iterator<Item = T> + Send>;

struct Emission<T> {
    items: Peekable<BoxIter<T>>,
    downstream: BoxSubscriber<T>,
}

/// Emits the items of one iterator, never more than requested.
///
/// Completion is eager: as soon as the iterator reports exhaustion the
/// subscriber is completed, even with zero outstanding demand.
pub(crate) struct IterSubscription<T> {
    demand: Demand,
    wip: WorkInProgress,
    cancelled: AtomicBool,
    invalid: AtomicBool,
    emission: Mutex<Option<Emission<T>>>,
}

enum Outcome {
    Pending,
    Complete,
    Failed(FluxError),
}

impl<T: Send + 'static> IterSubscription<T> {
    /// Start emitting `items` to `downstream`.
    pub(crate) fn start(items: BoxIter<T>, mut downstream: BoxSubscriber<T>) {
        let subscription = Arc::new(Self {
            demand: Demand::new(),
            wip: WorkInProgress::new(),
            cancelled: AtomicBool::new(false),
            invalid: AtomicBool::new(false),
            emission: Mutex::new(None),
        });
        downstream.on_subscribe(Arc::clone(&subscription) as Arc<dyn Subscription>);
        *lock(&subscription.emission) = Some(Emission {
            items: items.peekable(),
            downstream,
        });
        subscription.drain();
    }

    fn drain(&self) {
        if !self.wip.enter() {
            return;
        }
        let mut missed = 1;
        loop {
            let mut slot = lock(&self.emission);
            if let Some(emission) = slot.as_mut() {
                if self.cancelled.load(Ordering::Acquire) {
                    slot.take();
                    return;
                }
                match self.emit(emission) {
                    Outcome::Pending => {}
                    Outcome::Complete => {
                        let finished = slot.take();
                        drop(slot);
                        if let Some(mut emission) = finished {
                            emission.downstream.on_complete();
                        }
                        return;
                    }
                    Outcome::Failed(error) => {
                        let finished = slot.take();
                        drop(slot);
                        if let Some(mut emission) = finished {
                            emission.downstream.on_error(error);
                        }
                        return;
                    }
                }
            }
            drop(slot);
            missed = self.wip.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    fn emit(&self, emission: &mut Emission<T>) -> Outcome {
        if self.invalid.load(Ordering::Acquire) {
            return Outcome::Failed(FluxError::InvalidDemand(0));
        }
        let requested = self.demand.get();
        let mut emitted = 0;
        while emitted < requested {
            if self.cancelled.load(Ordering::Acquire) {
                return Outcome::Pending;
            }
            match guard(|| emission.items.next()) {
                Ok(Some(item)) => {
                    emission.downstream.on_next(item);
                    emitted += 1;
                }
                Ok(None) => return Outcome::Complete,
                Err(error) => return Outcome::Failed(error),
            }
            if self.invalid.load(Ordering::Acquire) {
                return Outcome::Failed(FluxError::InvalidDemand(0));
            }
        }
        self.demand.produced(emitted);
        if self.cancelled.load(Ordering::Acquire) {
            return Outcome::Pending;
        }
        match guard(|| emission.items.peek().is_none()) {
            Ok(true) => Outcome::Complete,
            Ok(false) => Outcome::Pending,
            Err(error) => Outcome::Failed(error),
        }
    }
}

impl<T: Send + 'static> Subscription for IterSubscription<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            self.invalid.store(true, Ordering::Release);
        } else {
            self.demand.add(n);
        }
        self.drain();
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.drain();
    }
}

impl<T: Send + 'static> Flux<T> {
    /// Emit the given values, then complete.
    ///
    /// Every subscription replays the full set.
    pub fn just(values: impl IntoIterator<Item = T>) -> Self
    where
        T: Clone + Sync,
    {
        let values: Arc<Vec<T>> = Arc::new(values.into_iter().collect());
        Self::from_fn(move |subscriber| {
            let values = Arc::clone(&values);
            let items = (0..values.len()).map(move |i| values[i].clone());
            IterSubscription::start(Box::new(items), subscriber);
        })
    }

    /// Pull values from a fresh iterator per subscription.
    ///
    /// The iterator is advanced only as far as downstream demand allows
    /// (plus one look-ahead to detect exhaustion).
    pub fn from_iter<I>(iterable: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
        I::IntoIter: Send + 'static,
    {
        Self::from_fn(move |subscriber| {
            IterSubscription::start(Box::new(iterable.clone().into_iter()), subscriber);
        })
    }

    /// Complete immediately without emitting.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_fn(|subscriber| IterSubscription::start(Box::new(std::iter::empty()), subscriber))
    }
}

impl Flux<i64> {
    /// Emit `count` consecutive integers starting at `start`.
    #[must_use]
    pub fn range(start: i64, count: usize) -> Self {
        Self::from_iter((start..).take(count))
    }
}
