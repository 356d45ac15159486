//! Integration tests for the user pipelines.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use rill_core::{Flux, FluxError, Mono};
use rill_runtime::{ElasticConfig, ElasticScheduler};
use rill_testing::{StepVerifier, init_tracing};
use std::sync::Arc;
use std::time::Duration;
use users_demo::{
    User, UserStore, capitalize_async, capitalize_many, fastest, forbidden, migrate_users,
    or_saul, or_skyler_and_jesse, users_in_order, users_interleaved,
};

#[test]
fn capitalize_variants_agree() {
    init_tracing();
    let users = Flux::just([User::skyler(), User::jesse()]);
    let expected = [User::skyler().capitalized(), User::jesse().capitalized()];
    StepVerifier::create(capitalize_many(users.clone()))
        .expect_next_seq(expected.clone())
        .verify_complete()
        .unwrap();
    StepVerifier::create(capitalize_async(users))
        .expect_next_seq(expected)
        .verify_complete()
        .unwrap();
}

#[test]
fn ordered_then_interleaved() {
    let first = || Flux::just([User::skyler(), User::jesse()]);
    let second = || Flux::just([User::walter(), User::saul()]);
    StepVerifier::create(users_in_order(first(), second()))
        .expect_next_seq([User::skyler(), User::jesse(), User::walter(), User::saul()])
        .verify_complete()
        .unwrap();
    StepVerifier::create(users_interleaved(first(), second()))
        .expect_next_count(4)
        .verify_complete()
        .unwrap();
}

#[test]
fn fastest_user_wins_on_virtual_time() {
    StepVerifier::with_virtual_time(|scheduler| {
        let slow = Mono::delay(Duration::from_millis(450), Arc::clone(&scheduler))
            .map(|_| User::walter());
        let quick = Mono::delay(Duration::from_millis(100), scheduler).map(|_| User::jesse());
        fastest(slow, quick)
    })
    .then_await(Duration::from_millis(100))
    .expect_next(User::jesse())
    .verify_complete()
    .unwrap();
}

#[test]
fn errors_fall_back_to_known_users() {
    StepVerifier::create(or_saul(Mono::error(forbidden("wwhite"))))
        .expect_next(User::saul())
        .verify_complete()
        .unwrap();
    StepVerifier::create(or_skyler_and_jesse(Flux::error(forbidden("wwhite"))))
        .expect_next_seq([User::skyler(), User::jesse()])
        .verify_complete()
        .unwrap();
    StepVerifier::create(or_skyler_and_jesse(Flux::error(FluxError::message("io"))))
        .verify_error_message("io")
        .unwrap();
}

#[test]
fn migration_copies_every_user_capitalized() {
    let elastic = ElasticScheduler::new(ElasticConfig::default()).unwrap();
    let source = Arc::new(UserStore::new(
        [User::skyler(), User::walter()],
        Duration::from_millis(5),
    ));
    let target = Arc::new(UserStore::default());
    StepVerifier::create(migrate_users(source, Arc::clone(&target), &elastic.as_scheduler()))
        .verify_complete()
        .unwrap();
    assert_eq!(target.len(), 2);
}
