//! Integration tests for the repository boundary and runtime services.
//!
//! Blocking repository calls must run on the elastic pool, never on the
//! subscribing thread.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use rill_core::{Flux, FluxError};
use rill_runtime::{
    ElasticConfig, ElasticScheduler, ReactiveRepository, RetryExt, RetryPolicy, blocking_to_flux,
    flux_to_blocking,
};
use rill_testing::{
    InMemoryBlockingRepository, InMemoryReactiveRepository, StepVerifier, init_tracing,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
struct User {
    username: String,
}

impl User {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
        }
    }
}

fn elastic() -> Arc<ElasticScheduler> {
    ElasticScheduler::new(ElasticConfig::default().with_thread_name("rill-elastic")).unwrap()
}

#[test]
fn blocking_find_all_is_moved_off_the_caller() {
    init_tracing();
    let repository = Arc::new(InMemoryBlockingRepository::new([
        User::new("skyler"),
        User::new("jesse"),
    ]));
    let scheduler = elastic();
    StepVerifier::create(blocking_to_flux(Arc::clone(&repository), scheduler.as_scheduler()))
        .expect_next(User::new("skyler"))
        .expect_next(User::new("jesse"))
        .verify_complete()
        .unwrap();

    let caller = thread::current().name().map(ToString::to_string);
    let threads = repository.find_all_threads();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0], "rill-elastic");
    assert_ne!(Some(threads[0].clone()), caller);
}

#[test]
fn saves_run_on_the_elastic_pool() {
    let repository = Arc::new(InMemoryBlockingRepository::new(Vec::<User>::new()));
    let scheduler = elastic();
    let users = Flux::just([User::new("walter"), User::new("saul")]);
    StepVerifier::create(flux_to_blocking(users, Arc::clone(&repository), scheduler.as_scheduler()))
        .verify_complete()
        .unwrap();

    assert_eq!(repository.save_count(), 2);
    assert!(repository.save_threads().iter().all(|name| name == "rill-elastic"));
    assert_eq!(
        repository.records(),
        vec![User::new("walter"), User::new("saul")]
    );
}

#[test]
fn slow_saves_keep_their_order() {
    let repository = Arc::new(
        InMemoryBlockingRepository::new(Vec::<i64>::new()).with_call_delay(Duration::from_millis(5)),
    );
    let scheduler = elastic();
    flux_to_blocking(Flux::range(0, 10), Arc::clone(&repository), scheduler.as_scheduler())
        .block()
        .unwrap();
    assert_eq!(repository.records(), (0..10).collect::<Vec<_>>());
}

#[test]
fn reactive_repository_feeds_a_pipeline() {
    let repository = InMemoryReactiveRepository::new([User::new("mike"), User::new("gus")]);
    StepVerifier::create(repository.find_all().map(|user| user.username.to_uppercase()))
        .expect_next_seq(["MIKE".to_string(), "GUS".to_string()])
        .verify_complete()
        .unwrap();
}

#[test]
fn backoff_waits_on_virtual_time() {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_secs(1))
        .multiplier(2.0)
        .jitter(0.0)
        .build();
    StepVerifier::with_virtual_time(move |scheduler| {
        let counter = Arc::clone(&counter);
        Flux::defer(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Flux::error(FluxError::message("unavailable"))
            } else {
                Flux::just(["ok"])
            }
        })
        .retry_backoff(policy, scheduler)
    })
    .expect_subscription()
    .expect_no_event(Duration::from_millis(999))
    .then_await(Duration::from_millis(1)) // first retry after 1s
    .expect_no_event(Duration::from_millis(1999))
    .then_await(Duration::from_millis(1)) // second retry 2s later
    .expect_next("ok")
    .verify_complete()
    .unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[test]
fn backoff_gives_up_with_the_last_error() {
    let policy = RetryPolicy::builder()
        .max_retries(2)
        .initial_delay(Duration::from_millis(10))
        .jitter(0.0)
        .build();
    StepVerifier::with_virtual_time(move |scheduler| {
        Flux::<i32>::error(FluxError::message("down")).retry_backoff(policy, scheduler)
    })
    .then_await(Duration::from_secs(1))
    .verify_error_message("down")
    .unwrap();
}
