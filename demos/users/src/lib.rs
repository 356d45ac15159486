//! User pipelines built from Rill sequences.
//!
//! The functions here are small transformations over a `User`
//! domain: mapping, merging, zipping, racing, error recovery and moving
//! blocking repository calls onto an elastic scheduler.

use rill_core::{Flux, FluxError, Mono, SchedulerRef};
use rill_runtime::{BlockingRepository, blocking_to_flux, flux_to_blocking};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Login name
    pub username: String,
    /// Given name
    pub firstname: String,
    /// Family name
    pub lastname: String,
}

impl User {
    /// Create a user.
    #[must_use]
    pub fn new(username: &str, firstname: &str, lastname: &str) -> Self {
        Self {
            username: username.to_string(),
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
        }
    }

    /// Skyler White
    #[must_use]
    pub fn skyler() -> Self {
        Self::new("swhite", "Skyler", "White")
    }

    /// Jesse Pinkman
    #[must_use]
    pub fn jesse() -> Self {
        Self::new("jpinkman", "Jesse", "Pinkman")
    }

    /// Walter White
    #[must_use]
    pub fn walter() -> Self {
        Self::new("wwhite", "Walter", "White")
    }

    /// Saul Goodman
    #[must_use]
    pub fn saul() -> Self {
        Self::new("sgoodman", "Saul", "Goodman")
    }

    /// The same user with every field upper-cased.
    #[must_use]
    pub fn capitalized(&self) -> Self {
        Self {
            username: self.username.to_uppercase(),
            firstname: self.firstname.to_uppercase(),
            lastname: self.lastname.to_uppercase(),
        }
    }
}

/// Errors raised by user pipelines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    /// The user may not pass through this pipeline
    #[error("user {0} is not allowed here")]
    Forbidden(String),
}

/// Upper-case every user.
#[must_use]
pub fn capitalize_many(users: Flux<User>) -> Flux<User> {
    users.map(|user| user.capitalized())
}

/// Upper-case every user through an inner sequence per user.
///
/// Models a transformation that is itself asynchronous.
#[must_use]
pub fn capitalize_async(users: Flux<User>) -> Flux<User> {
    users.flat_map(|user| Mono::just(user.capitalized()).into_flux())
}

/// Upper-case every user, rejecting Saul.
///
/// The rejection surfaces as an error signal carrying [`UserError`].
#[must_use]
pub fn capitalize_checked(users: Flux<User>) -> Flux<User> {
    users.try_map(|user| {
        if user.username == "sgoodman" {
            Err(UserError::Forbidden(user.username))
        } else {
            Ok(user.capitalized())
        }
    })
}

/// Every user of `first`, then every user of `second`.
#[must_use]
pub fn users_in_order(first: Flux<User>, second: Flux<User>) -> Flux<User> {
    first.concat_with(second)
}

/// Users of both sequences as they arrive.
#[must_use]
pub fn users_interleaved(first: Flux<User>, second: Flux<User>) -> Flux<User> {
    first.merge_with(second)
}

/// Assemble users from three positional sequences of names.
#[must_use]
pub fn users_from_parts(
    usernames: Flux<String>,
    firstnames: Flux<String>,
    lastnames: Flux<String>,
) -> Flux<User> {
    Flux::zip3(usernames, firstnames, lastnames).map(|(username, firstname, lastname)| User {
        username,
        firstname,
        lastname,
    })
}

/// The user of whichever `Mono` signals first.
#[must_use]
pub fn fastest(first: Mono<User>, second: Mono<User>) -> Mono<User> {
    Mono::first([first, second])
}

/// Replace any error with Saul.
#[must_use]
pub fn or_saul(user: Mono<User>) -> Mono<User> {
    user.on_error_return(User::saul())
}

/// Replace a [`UserError`] with Skyler and Jesse; other errors pass.
#[must_use]
pub fn or_skyler_and_jesse(users: Flux<User>) -> Flux<User> {
    users.on_error_resume_of::<UserError, _>(|_| Flux::just([User::skyler(), User::jesse()]))
}

/// Wrap an error as [`UserError::Forbidden`] for `username`.
#[must_use]
pub fn forbidden(username: &str) -> FluxError {
    FluxError::upstream(UserError::Forbidden(username.to_string()))
}

/// A blocking user store with simulated driver latency.
#[derive(Debug, Default)]
pub struct UserStore {
    users: Mutex<Vec<User>>,
    latency: Duration,
}

impl UserStore {
    /// A store holding `users` whose calls take `latency`.
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = User>, latency: Duration) -> Self {
        Self {
            users: Mutex::new(users.into_iter().collect()),
            latency,
        }
    }

    /// Number of stored users.
    pub fn len(&self) -> usize {
        self.users.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no user.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockingRepository<User> for UserStore {
    fn find_all(&self) -> Vec<User> {
        thread::sleep(self.latency);
        tracing::debug!(thread = ?thread::current().name(), "Loaded users");
        self.users.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn save(&self, user: User) {
        thread::sleep(self.latency);
        tracing::debug!(username = %user.username, thread = ?thread::current().name(), "Saved user");
        self.users.lock().unwrap_or_else(PoisonError::into_inner).push(user);
    }
}

/// Copy every user of `source` into `target`, capitalized.
///
/// Both the reads and the writes run on `elastic`.
#[must_use]
pub fn migrate_users(
    source: Arc<UserStore>,
    target: Arc<UserStore>,
    elastic: &SchedulerRef,
) -> Mono<()> {
    let users = capitalize_many(blocking_to_flux(source, Arc::clone(elastic)));
    flux_to_blocking(users, target, Arc::clone(elastic))
}
