//! Scripted verification of sequences.
//!
//! A [`StepVerifier`] collects expectations about the signals of a sequence
//! and only subscribes when [`Verification::verify`] is called. Steps run in
//! order against the signals as they arrive.

#![allow(clippy::module_name_repetitions)] // StepVerifier is the natural name

use crate::error::VerificationError;
use crate::lock;
use crate::virtual_time::VirtualTimeScheduler;
use rill_core::{Flux, FluxError, SchedulerRef, Signal, Subscriber, SubscriptionRef, UNBOUNDED};
use std::error::Error as StdError;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Type alias for checks on a received value
type ValueCheck<T> = Box<dyn FnOnce(&T) -> Result<(), String> + Send>;

/// Type alias for checks on a received error
type ErrorCheck = Box<dyn FnOnce(&FluxError) -> Result<(), String> + Send>;

/// Settings shared by every wait of one verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Longest wait for any single signal
    pub default_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(10),
        }
    }
}

impl VerifierConfig {
    /// Set the longest wait for any single signal.
    #[must_use]
    pub const fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

enum Step<T> {
    Subscription,
    Next { expected: String, check: ValueCheck<T> },
    NextCount(u64),
    Request(u64),
    Run(Box<dyn FnOnce() + Send>),
    Await(Duration),
    NoEvent(Duration),
    Complete,
    Error { expected: String, check: ErrorCheck },
    Cancel,
}

impl<T> Step<T> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Subscription => "expect_subscription",
            Self::Next { .. } => "expect_next",
            Self::NextCount(_) => "expect_next_count",
            Self::Request(_) => "then_request",
            Self::Run(_) => "then",
            Self::Await(_) => "then_await",
            Self::NoEvent(_) => "expect_no_event",
            Self::Complete => "expect_complete",
            Self::Error { .. } => "expect_error",
            Self::Cancel => "then_cancel",
        }
    }
}

/// Fluent expectation script for a [`Flux`] or [`Mono`](rill_core::Mono).
///
/// Demand defaults to unbounded. Nothing happens until the script is closed
/// with a terminal expectation and [`Verification::verify`] is called.
///
/// # Example
///
/// ```
/// use rill_core::Flux;
/// use rill_testing::StepVerifier;
///
/// StepVerifier::create(Flux::just(["foo", "bar"]))
///     .expect_next("foo")
///     .expect_next("bar")
///     .expect_complete()
///     .verify()
///     .unwrap();
/// ```
pub struct StepVerifier<T> {
    source: Flux<T>,
    initial_demand: u64,
    virtual_time: Option<Arc<VirtualTimeScheduler>>,
    config: VerifierConfig,
    steps: Vec<Step<T>>,
}

impl<T: fmt::Debug + Send + 'static> StepVerifier<T> {
    /// Script the signals of `source`, requesting unbounded demand.
    pub fn create(source: impl Into<Flux<T>>) -> Self {
        Self::create_with_demand(source, UNBOUNDED)
    }

    /// Script the signals of `source`, requesting only `initial_demand` at
    /// subscription. Use [`then_request`](Self::then_request) for more.
    pub fn create_with_demand(source: impl Into<Flux<T>>, initial_demand: u64) -> Self {
        Self {
            source: source.into(),
            initial_demand,
            virtual_time: None,
            config: VerifierConfig::default(),
            steps: Vec::new(),
        }
    }

    /// Script a sequence built on a fresh virtual-time scheduler.
    ///
    /// `supplier` receives the scheduler to pass to time-based operators;
    /// [`then_await`](Self::then_await) advances its clock.
    pub fn with_virtual_time<S, F>(supplier: F) -> Self
    where
        S: Into<Flux<T>>,
        F: FnOnce(SchedulerRef) -> S,
    {
        let scheduler = VirtualTimeScheduler::new();
        let mut verifier = Self::create(supplier(scheduler.as_scheduler()));
        verifier.virtual_time = Some(scheduler);
        verifier
    }

    /// Replace the default configuration.
    #[must_use]
    pub fn with_config(mut self, config: VerifierConfig) -> Self {
        self.config = config;
        self
    }

    fn step(mut self, step: Step<T>) -> Self {
        self.steps.push(step);
        self
    }

    /// Expect the subscription, which always precedes any other signal.
    #[must_use]
    pub fn expect_subscription(self) -> Self {
        self.step(Step::Subscription)
    }

    /// Expect the next signal to be the value `expected`.
    #[must_use]
    pub fn expect_next(self, expected: T) -> Self
    where
        T: PartialEq,
    {
        let description = format!("onNext({expected:?})");
        self.step(Step::Next {
            expected: description,
            check: Box::new(move |actual| {
                if *actual == expected {
                    Ok(())
                } else {
                    Err(format!("onNext({actual:?})"))
                }
            }),
        })
    }

    /// Expect the next signals to be exactly `values`, in order.
    #[must_use]
    pub fn expect_next_seq(self, values: impl IntoIterator<Item = T>) -> Self
    where
        T: PartialEq,
    {
        values
            .into_iter()
            .fold(self, |verifier, value| verifier.expect_next(value))
    }

    /// Expect `count` values without checking them.
    #[must_use]
    pub fn expect_next_count(self, count: u64) -> Self {
        self.step(Step::NextCount(count))
    }

    /// Expect a value for which `predicate` holds.
    #[must_use]
    pub fn expect_next_matches<P>(self, predicate: P) -> Self
    where
        P: FnOnce(&T) -> bool + Send + 'static,
    {
        self.step(Step::Next {
            expected: "a value matching the predicate".to_string(),
            check: Box::new(move |actual| {
                if predicate(actual) {
                    Ok(())
                } else {
                    Err(format!("onNext({actual:?})"))
                }
            }),
        })
    }

    /// Expect a value and run `assertion` on it.
    ///
    /// A panic inside `assertion` (a failed `assert!`) fails the
    /// verification with its message.
    #[must_use]
    pub fn assert_next<F>(self, assertion: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.step(Step::Next {
            expected: "a value passing the assertion".to_string(),
            check: Box::new(move |actual| {
                catch_unwind(AssertUnwindSafe(|| assertion(actual))).map_err(|payload| {
                    let message = payload
                        .downcast_ref::<String>()
                        .cloned()
                        .or_else(|| payload.downcast_ref::<&str>().map(ToString::to_string))
                        .unwrap_or_default();
                    format!("onNext({actual:?}) failing with {message:?}")
                })
            }),
        })
    }

    /// Request `n` more values.
    #[must_use]
    pub fn then_request(self, n: u64) -> Self {
        self.step(Step::Request(n))
    }

    /// Advance virtual time by `duration`.
    ///
    /// Only valid on a verifier built with
    /// [`with_virtual_time`](Self::with_virtual_time).
    #[must_use]
    pub fn then_await(self, duration: Duration) -> Self {
        self.step(Step::Await(duration))
    }

    /// Expect no signal during `duration` (virtual or real time).
    #[must_use]
    pub fn expect_no_event(self, duration: Duration) -> Self {
        self.step(Step::NoEvent(duration))
    }

    /// Run an arbitrary action between two steps.
    #[must_use]
    pub fn then<F>(self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.step(Step::Run(Box::new(action)))
    }

    fn finish(self, step: Step<T>) -> Verification<T> {
        Verification {
            script: Some(self.step(step)),
        }
    }

    /// Expect successful completion.
    pub fn expect_complete(self) -> Verification<T> {
        self.finish(Step::Complete)
    }

    /// Expect an error of any kind.
    pub fn expect_error(self) -> Verification<T> {
        self.expect_error_described("onError(..)".to_string(), |_| true)
    }

    /// Expect an error whose cause is an `E`.
    pub fn expect_error_of<E: StdError + 'static>(self) -> Verification<T> {
        self.expect_error_described(
            format!("onError({})", std::any::type_name::<E>()),
            FluxError::is::<E>,
        )
    }

    /// Expect an error whose message is `message`.
    pub fn expect_error_message(self, message: impl Into<String>) -> Verification<T> {
        let message = message.into();
        self.expect_error_described(format!("onError({message})"), move |error| {
            error.to_string() == message
        })
    }

    /// Expect an error for which `predicate` holds.
    pub fn expect_error_matches<P>(self, predicate: P) -> Verification<T>
    where
        P: FnOnce(&FluxError) -> bool + Send + 'static,
    {
        self.expect_error_described("an error matching the predicate".to_string(), predicate)
    }

    fn expect_error_described<P>(self, expected: String, predicate: P) -> Verification<T>
    where
        P: FnOnce(&FluxError) -> bool + Send + 'static,
    {
        self.finish(Step::Error {
            expected,
            check: Box::new(move |error| {
                if predicate(error) {
                    Ok(())
                } else {
                    Err(format!("onError({error})"))
                }
            }),
        })
    }

    /// Cancel the subscription instead of waiting for a terminal signal.
    pub fn then_cancel(self) -> Verification<T> {
        self.finish(Step::Cancel)
    }

    /// Shortcut for `expect_complete().verify()`.
    ///
    /// # Errors
    ///
    /// See [`Verification::verify`].
    pub fn verify_complete(self) -> Result<Duration, VerificationError> {
        self.expect_complete().verify()
    }

    /// Shortcut for `expect_error().verify()`.
    ///
    /// # Errors
    ///
    /// See [`Verification::verify`].
    pub fn verify_error(self) -> Result<Duration, VerificationError> {
        self.expect_error().verify()
    }

    /// Shortcut for `expect_error_message(message).verify()`.
    ///
    /// # Errors
    ///
    /// See [`Verification::verify`].
    pub fn verify_error_message(
        self,
        message: impl Into<String>,
    ) -> Result<Duration, VerificationError> {
        self.expect_error_message(message).verify()
    }
}

/// A closed expectation script, waiting to be executed.
#[must_use = "a verification does nothing until verify() is called"]
pub struct Verification<T> {
    script: Option<StepVerifier<T>>,
}

impl<T: fmt::Debug + Send + 'static> Verification<T> {
    /// Subscribe and run every step.
    ///
    /// Returns the wall-clock time the verification took.
    ///
    /// # Errors
    ///
    /// The first step that did not hold, as a [`VerificationError`].
    pub fn verify(mut self) -> Result<Duration, VerificationError> {
        match self.script.take() {
            Some(script) => execute(script),
            None => Ok(Duration::ZERO),
        }
    }
}

impl<T> Drop for Verification<T> {
    fn drop(&mut self) {
        if let Some(script) = &self.script {
            tracing::warn!(
                steps = script.steps.len(),
                "Verification dropped without verify(); its expectations never ran"
            );
        }
    }
}

impl<T> fmt::Debug for Verification<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verification")
            .field("pending", &self.script.is_some())
            .finish()
    }
}

enum Event<T> {
    Subscribed,
    Signal(Signal<T>),
}

#[derive(Default)]
struct Handle {
    subscription: Mutex<Option<SubscriptionRef>>,
}

impl Handle {
    fn request(&self, n: u64) {
        let subscription = lock(&self.subscription).clone();
        if let Some(subscription) = subscription {
            subscription.request(n);
        }
    }

    fn cancel(&self) {
        let subscription = lock(&self.subscription).take();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
    }
}

struct VerifierSubscriber<T> {
    sender: Sender<Event<T>>,
    handle: Arc<Handle>,
    initial_demand: u64,
}

impl<T: Send> Subscriber<T> for VerifierSubscriber<T> {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
        *lock(&self.handle.subscription) = Some(Arc::clone(&subscription));
        let _ = self.sender.send(Event::Subscribed);
        if self.initial_demand > 0 {
            subscription.request(self.initial_demand);
        }
    }

    fn on_next(&mut self, value: T) {
        let _ = self.sender.send(Event::Signal(Signal::Next(value)));
    }

    fn on_error(&mut self, error: FluxError) {
        let _ = self.sender.send(Event::Signal(Signal::Error(error)));
    }

    fn on_complete(&mut self) {
        let _ = self.sender.send(Event::Signal(Signal::Complete));
    }
}

/// The running side of a verification.
struct Session<T> {
    receiver: Receiver<Event<T>>,
    handle: Arc<Handle>,
    virtual_time: Option<Arc<VirtualTimeScheduler>>,
    timeout: Duration,
}

fn execute<T: fmt::Debug + Send + 'static>(
    script: StepVerifier<T>,
) -> Result<Duration, VerificationError> {
    let StepVerifier {
        source,
        initial_demand,
        virtual_time,
        config,
        steps,
    } = script;
    let started = Instant::now();
    let (sender, receiver) = mpsc::channel();
    let handle = Arc::new(Handle::default());
    source.subscribe_with(VerifierSubscriber {
        sender,
        handle: Arc::clone(&handle),
        initial_demand,
    });

    let session = Session {
        receiver,
        handle,
        virtual_time,
        timeout: config.default_timeout,
    };
    let result = session.run(steps);
    if result.is_err() {
        session.handle.cancel();
    }
    if let Some(scheduler) = &session.virtual_time {
        scheduler.shutdown();
    }
    result.map(|()| started.elapsed())
}

impl<T: fmt::Debug + Send + 'static> Session<T> {
    fn run(&self, steps: Vec<Step<T>>) -> Result<(), VerificationError> {
        match self.next_event(0)? {
            Event::Subscribed => {}
            Event::Signal(signal) => {
                return Err(VerificationError::Mismatch {
                    step: 0,
                    expected: "onSubscribe".to_string(),
                    actual: signal.to_string(),
                });
            }
        }
        for (index, step) in steps.into_iter().enumerate() {
            let index = index + 1;
            tracing::debug!(step = index, name = step.name(), "Evaluating step");
            self.evaluate(index, step)?;
        }
        Ok(())
    }

    fn evaluate(&self, step: usize, kind: Step<T>) -> Result<(), VerificationError> {
        match kind {
            Step::Subscription => Ok(()),
            Step::Next { expected, check } => match self.next_signal(step)? {
                Signal::Next(value) => check(&value).map_err(|actual| VerificationError::Mismatch {
                    step,
                    expected,
                    actual,
                }),
                other => Err(VerificationError::Mismatch {
                    step,
                    expected,
                    actual: other.to_string(),
                }),
            },
            Step::NextCount(count) => {
                for received in 0..count {
                    let signal = self.next_signal(step)?;
                    if !matches!(signal, Signal::Next(_)) {
                        return Err(VerificationError::Mismatch {
                            step,
                            expected: format!("{count} values"),
                            actual: format!("{signal} after {received} values"),
                        });
                    }
                }
                Ok(())
            }
            Step::Request(n) => {
                self.handle.request(n);
                Ok(())
            }
            Step::Run(action) => {
                action();
                Ok(())
            }
            Step::Await(duration) => {
                let scheduler = self
                    .virtual_time
                    .as_ref()
                    .ok_or(VerificationError::NotVirtual { step })?;
                scheduler.advance_time_by(duration);
                Ok(())
            }
            Step::NoEvent(duration) => self.expect_silence(step, duration),
            Step::Complete => match self.next_signal(step)? {
                Signal::Complete => Ok(()),
                other => Err(VerificationError::Mismatch {
                    step,
                    expected: "onComplete()".to_string(),
                    actual: other.to_string(),
                }),
            },
            Step::Error { expected, check } => match self.next_signal(step)? {
                Signal::Error(error) => check(&error).map_err(|actual| VerificationError::Mismatch {
                    step,
                    expected,
                    actual,
                }),
                other => Err(VerificationError::Mismatch {
                    step,
                    expected,
                    actual: other.to_string(),
                }),
            },
            Step::Cancel => {
                self.handle.cancel();
                Ok(())
            }
        }
    }

    fn expect_silence(&self, step: usize, duration: Duration) -> Result<(), VerificationError> {
        let observed = match &self.virtual_time {
            Some(scheduler) => {
                scheduler.advance_time_by(duration);
                match self.receiver.try_recv() {
                    Ok(event) => Some(event),
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
                }
            }
            None => match self.receiver.recv_timeout(duration) {
                Ok(event) => Some(event),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
            },
        };
        match observed {
            None => Ok(()),
            Some(event) => Err(VerificationError::Mismatch {
                step,
                expected: format!("no event for {duration:?}"),
                actual: match event {
                    Event::Subscribed => "onSubscribe".to_string(),
                    Event::Signal(signal) => signal.to_string(),
                },
            }),
        }
    }

    fn next_signal(&self, step: usize) -> Result<Signal<T>, VerificationError> {
        loop {
            if let Event::Signal(signal) = self.next_event(step)? {
                return Ok(signal);
            }
        }
    }

    fn next_event(&self, step: usize) -> Result<Event<T>, VerificationError> {
        if let Ok(event) = self.receiver.try_recv() {
            return Ok(event);
        }
        if let Some(scheduler) = &self.virtual_time {
            scheduler.advance_time();
            if let Ok(event) = self.receiver.try_recv() {
                return Ok(event);
            }
        }
        self.receiver
            .recv_timeout(self.timeout)
            .map_err(|error| match error {
                RecvTimeoutError::Timeout => VerificationError::Timeout {
                    step,
                    waited: self.timeout,
                },
                RecvTimeoutError::Disconnected => VerificationError::MissingTerminal,
            })
    }
}
