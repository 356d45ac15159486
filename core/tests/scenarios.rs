//! End-to-end scenarios verified with the step verifier.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use rill_core::{Flux, FluxError, Mono};
use rill_testing::{StepVerifier, init_tracing};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("illegal state: {0}")]
struct IllegalState(&'static str);

#[derive(Error, Debug)]
#[error("io failure")]
struct IoFailure;

#[test]
fn literal_values_then_complete() {
    init_tracing();
    StepVerifier::create(Flux::just(["foo", "bar"]))
        .expect_next("foo")
        .expect_next("bar")
        .expect_complete()
        .verify()
        .unwrap();
}

#[test]
fn literal_values_then_error() {
    StepVerifier::create(
        Flux::just(["foo", "bar"]).concat_with(Flux::error(FluxError::upstream(IllegalState("boom")))),
    )
    .expect_next("foo")
    .expect_next("bar")
    .expect_error_of::<IllegalState>()
    .verify()
    .unwrap();
}

#[test]
fn matching_error_resumes_with_fallback() {
    let source = Flux::just([1, 2]).concat_with(Flux::error(FluxError::upstream(IllegalState("x"))));
    StepVerifier::create(source.on_error_resume_of::<IllegalState, _>(|_| Flux::just([3, 4])))
        .expect_next_seq([1, 2, 3, 4])
        .verify_complete()
        .unwrap();
}

#[test]
fn other_errors_pass_through_resume() {
    let source = Flux::just([1]).concat_with(Flux::error(FluxError::upstream(IoFailure)));
    StepVerifier::create(source.on_error_resume_of::<IllegalState, _>(|_| Flux::just([9])))
        .expect_next(1)
        .expect_error_of::<IoFailure>()
        .verify()
        .unwrap();
}

#[test]
fn failing_transform_becomes_an_error_signal() {
    StepVerifier::create(Flux::just(["1", "x", "3"]).try_map(str::parse::<i32>))
        .expect_next(1)
        .expect_error_of::<std::num::ParseIntError>()
        .verify()
        .unwrap();
}

#[test]
fn errors_are_mapped_to_domain_errors() {
    StepVerifier::create(
        Flux::<i32>::error(FluxError::upstream(IoFailure))
            .on_error_map(|_| FluxError::upstream(IllegalState("wrapped"))),
    )
    .expect_error_message("illegal state: wrapped")
    .verify()
    .unwrap();
}

#[test]
fn take_runs_independently_per_subscription() {
    let subscriptions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&subscriptions);
    let ten = Flux::range(0, 100)
        .do_on_subscribe(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .take(10);
    for _ in 0..2 {
        StepVerifier::create(ten.clone())
            .expect_next_seq(0..10)
            .verify_complete()
            .unwrap();
    }
    assert_eq!(subscriptions.load(Ordering::SeqCst), 2);
}

#[test]
fn cancellation_stops_every_signal() {
    let emitted = Arc::new(Mutex::new(Vec::new()));
    let completed = Arc::new(AtomicBool::new(false));
    let (seen, done) = (Arc::clone(&emitted), Arc::clone(&completed));
    StepVerifier::create_with_demand(
        Flux::range(0, 10)
            .do_on_next(move |v| seen.lock().unwrap().push(*v))
            .do_on_complete(move || done.store(true, Ordering::SeqCst)),
        3,
    )
    .expect_next_seq([0, 1, 2])
    .then_cancel()
    .verify()
    .unwrap();
    assert_eq!(*emitted.lock().unwrap(), vec![0, 1, 2]);
    assert!(!completed.load(Ordering::SeqCst));
}

#[test]
fn bounded_demand_holds_back_the_terminal() {
    StepVerifier::create_with_demand(Flux::just([1, 2]), 2)
        .expect_next_seq([1, 2])
        .verify_complete()
        .unwrap();
    StepVerifier::create_with_demand(Flux::just([1, 2, 3]), 2)
        .expect_next_seq([1, 2])
        .expect_no_event(Duration::from_millis(20))
        .then_request(1)
        .expect_next(3)
        .verify_complete()
        .unwrap();
}

#[test]
fn zero_request_is_an_invalid_demand() {
    StepVerifier::create_with_demand(Flux::just([1]), 0)
        .then_request(0)
        .expect_error_matches(|error| matches!(error, FluxError::InvalidDemand(0)))
        .verify()
        .unwrap();
}

#[test]
fn zip_pairs_by_position() {
    StepVerifier::create(Flux::zip3(
        Flux::just(["a", "b", "c"]),
        Flux::range(1, 2),
        Flux::just([true, false, true, false]),
    ))
    .expect_next(("a", 1, true))
    .expect_next(("b", 2, false))
    .verify_complete()
    .unwrap();
}

#[test]
fn concat_preserves_source_order() {
    StepVerifier::create(Flux::concat([
        Flux::just([1, 2]),
        Flux::empty(),
        Flux::just([3]),
    ]))
    .expect_next_seq([1, 2, 3])
    .verify_complete()
    .unwrap();
}

#[test]
fn merge_interleaves_but_keeps_every_value() {
    let merged = Flux::just([1, 3, 5]).merge_with(Flux::just([2, 4, 6]));
    let mut values: Vec<i32> = merged.collect_list().block().unwrap().unwrap();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn flat_map_flattens_every_inner_sequence() {
    StepVerifier::create(
        Flux::just(["ab", "cd"])
            .concat_map(|word| Flux::from_iter(word.chars().collect::<Vec<_>>())),
    )
    .expect_next_seq(['a', 'b', 'c', 'd'])
    .verify_complete()
    .unwrap();
}

#[test]
fn first_source_to_signal_wins() {
    StepVerifier::create(Mono::first([Mono::never(), Mono::just("fast")]))
        .expect_next("fast")
        .verify_complete()
        .unwrap();
}

#[test]
fn empty_mono_switches_to_the_alternative() {
    StepVerifier::create(Mono::<&str>::empty().switch_if_empty(Mono::just("fallback")))
        .expect_next("fallback")
        .verify_complete()
        .unwrap();
}

#[test]
fn aggregates_emit_a_single_result() {
    StepVerifier::create(Flux::range(1, 4).reduce(|a, b| a + b))
        .expect_next(10)
        .verify_complete()
        .unwrap();
    StepVerifier::create(Flux::just(["x", "y"]).count())
        .expect_next(2)
        .verify_complete()
        .unwrap();
    StepVerifier::create(Flux::just([1, 2]).then())
        .verify_complete()
        .unwrap();
}

#[test]
fn side_effect_taps_do_not_alter_signals() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (subscribed, next, completed) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
    StepVerifier::create(
        Flux::just(["foo", "bar"])
            .do_on_subscribe(move || subscribed.lock().unwrap().push("subscribe".to_string()))
            .do_on_next(move |v| next.lock().unwrap().push(format!("next {v}")))
            .do_on_complete(move || completed.lock().unwrap().push("complete".to_string()))
            .log("scenario"),
    )
    .expect_next_seq(["foo", "bar"])
    .verify_complete()
    .unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["subscribe", "next foo", "next bar", "complete"]
    );
}
