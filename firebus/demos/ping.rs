//! Ping example: one listener with an early and a late handler.
//!
//! Run with `RUST_LOG=firebus=trace cargo run --example ping` to see each
//! handler submission.

use firebus::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Event, Debug)]
struct Ping {
    sequence: u64,
}

struct PingListener;

#[listener]
impl PingListener {
    #[subscribe(priority = Early)]
    pub fn early(&self, ping: &Ping) {
        println!("  EARLY  handled ping #{}", ping.sequence);
    }

    #[subscribe(priority = Late)]
    pub fn late(&self, ping: &Ping) -> Result<(), String> {
        println!("  LATE   handled ping #{}", ping.sequence);
        if ping.sequence == 3 {
            return Err(format!("ping #{} is unlucky", ping.sequence));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("firebus=debug")),
        )
        .init();

    println!("firebus ping example");
    println!();

    let dispatcher = Dispatcher::builder()
        .with_shutdown_timeout(Duration::from_secs(2))
        .build()?;

    let listener = Arc::new(PingListener);
    dispatcher.register(&listener);
    println!("Registered {} handlers for Ping", dispatcher.handler_count::<Ping>());

    for sequence in 1..=3 {
        println!("Firing ping #{sequence}");
        let ping = dispatcher.fire(Ping { sequence })?.await?;
        println!("Completed ping #{}", ping.sequence);
    }

    // Failures never reach the caller; the default sink logged ping #3.
    let stats = dispatcher.metrics().snapshot();
    println!();
    println!(
        "fired {} events, submitted {} handlers, {} failures",
        stats.events_fired, stats.handlers_submitted, stats.handler_failures
    );

    dispatcher.unregister(&listener);
    let drained = dispatcher.shutdown_async(dispatcher.config().shutdown_timeout).await;
    println!("Shut down cleanly: {drained}");

    Ok(())
}
