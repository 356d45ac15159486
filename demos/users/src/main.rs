//! Users demo binary
//!
//! Runs the user pipelines end to end: synchronous transforms, positional
//! zipping, racing, error recovery and a blocking store migration on the
//! elastic scheduler.

use anyhow::Context;
use rill_core::{Flux, Mono};
use rill_runtime::metrics::MetricsExporter;
use rill_runtime::{ElasticConfig, ElasticScheduler, RetryExt, RetryPolicy};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use users_demo::{
    User, UserStore, capitalize_async, capitalize_checked, fastest, forbidden, migrate_users,
    or_saul, or_skyler_and_jesse, users_from_parts, users_interleaved,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "users_demo=info,rill_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let exporter = MetricsExporter::install().context("installing metrics exporter")?;
    let elastic = ElasticScheduler::new(ElasticConfig::default().with_thread_name("users-elastic"))
        .context("building elastic scheduler")?;

    println!("=== Users Demo: Rill reactive pipelines ===\n");

    let everyone = Flux::just([User::skyler(), User::jesse(), User::walter(), User::saul()]);

    println!(">>> capitalize_async");
    for user in capitalize_async(everyone.clone()).to_iterable() {
        println!("  {}", user?.username);
    }

    println!("\n>>> capitalize_checked, recovering from the rejection");
    let recovered = or_skyler_and_jesse(capitalize_checked(everyone.clone()))
        .map(|user| user.firstname)
        .collect_list()
        .block()?;
    println!("  {recovered:?}");

    println!("\n>>> users_from_parts");
    let parts = |values: [&str; 3]| Flux::just(values.map(ToString::to_string));
    let zipped = users_from_parts(
        parts(["swhite", "jpinkman", "wwhite"]),
        parts(["Skyler", "Jesse", "Walter"]),
        parts(["White", "Pinkman", "White"]),
    );
    for user in zipped.to_iterable() {
        let user = user?;
        println!("  {} {} ({})", user.firstname, user.lastname, user.username);
    }

    println!("\n>>> users_interleaved on the elastic scheduler");
    let interleaved = users_interleaved(
        Flux::just([User::skyler(), User::jesse()]).publish_on(elastic.as_scheduler()),
        Flux::just([User::walter(), User::saul()]).publish_on(elastic.as_scheduler()),
    )
    .count()
    .block()?;
    println!("  {} users", interleaved.unwrap_or_default());

    println!("\n>>> fastest");
    let slow = Mono::delay(Duration::from_millis(200), elastic.as_scheduler()).map(|_| User::walter());
    let quick = Mono::delay(Duration::from_millis(20), elastic.as_scheduler()).map(|_| User::jesse());
    if let Some(winner) = fastest(slow, quick).block()? {
        println!("  {} won", winner.firstname);
    }

    println!("\n>>> or_saul");
    let fallback = or_saul(Mono::error(forbidden("wwhite"))).block()?;
    println!("  {:?}", fallback.map(|user| user.firstname));

    println!("\n>>> retry_backoff on a flaky lookup");
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(20))
        .build();
    let found = Mono::defer(move || {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Mono::error(forbidden("jpinkman"))
        } else {
            Mono::just(User::jesse())
        }
    })
    .retry_backoff(policy, elastic.as_scheduler())
    .block()?;
    println!(
        "  {:?} after {} attempts",
        found.map(|user| user.username),
        attempts.load(Ordering::SeqCst)
    );

    println!("\n>>> migrate_users between blocking stores");
    let source = Arc::new(UserStore::new(
        [User::skyler(), User::jesse(), User::walter(), User::saul()],
        Duration::from_millis(10),
    ));
    let target = Arc::new(UserStore::default());
    migrate_users(source, Arc::clone(&target), &elastic.as_scheduler())
        .block_timeout(Duration::from_secs(5))?;
    println!("  migrated {} users", target.len());

    tracing::debug!(metrics = %exporter.render(), "Scheduler metrics");
    println!("\n=== Demo Complete ===");
    Ok(())
}
