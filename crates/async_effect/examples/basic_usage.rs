//! Basic usage example for async callbacks
//!
//! This example implements a routine by hand, runs it through a callback with a
//! concurrency limit and a bounded queue, and combines duplicate calls.

use std::time::Duration;

use async_effect::{
    async_trait, AsyncCallback, CallbackConfig, QueueCapacity, Routine, Scope, TracingSink,
};

/// Looks up a package version from a slow registry
#[derive(Debug)]
struct ResolvePackage;

#[async_trait]
impl Routine for ResolvePackage {
    type Args = String;
    type Output = String;
    type Error = String;

    async fn run(&self, scope: Scope, name: String) -> Result<Self::Output, Self::Error> {
        scope.on_teardown({
            let name = name.clone();
            move || println!("  cleaned up lookup of {name}")
        });

        // Simulate a registry round trip
        tokio::time::sleep(Duration::from_millis(150)).await;
        match name.as_str() {
            "missing" => Err(format!("package {name} not found")),
            _ => Ok(format!("{name}==1.0.{}", name.len())),
        }
    }

    fn name(&self) -> String {
        "resolve_package".to_string()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Basic Async Callback Example ===\n");

    let resolve = AsyncCallback::new(
        ResolvePackage,
        CallbackConfig::new()
            .with_combine(true)
            .with_concurrency(2)
            .with_queue_capacity(QueueCapacity::Bounded(2)),
    )?;

    let names = ["numpy", "pandas", "numpy", "scipy", "missing", "polars", "rich"];
    println!("Calling resolve for {} packages", names.len());
    let handles: Vec<_> = names
        .iter()
        .map(|name| (name, resolve.call(name.to_string())))
        .collect();

    println!(
        "  running: {}, queued: {}\n",
        resolve.running(),
        resolve.queued()
    );

    for (name, handle) in handles {
        let admission = handle.admission();
        match handle.await {
            Ok(version) => println!("✅ {name} ({admission:?}): {version}"),
            Err(err) if err.is_overflow() => println!("⏭️  {name} ({admission:?}): queue full"),
            Err(err) => println!("❌ {name} ({admission:?}): {err}"),
        }
    }

    println!("\n=== Status tracking ===\n");

    let tracked = AsyncCallback::new(
        ResolvePackage,
        CallbackConfig::new().with_states(true).with_catch_errors(true),
    )?
    .with_sink(TracingSink::with_context("tracked"));

    let caught = tracked.call("missing".to_string()).caught().await?;
    println!("caught call resolved with {caught:?}");
    if let Some(status) = tracked.status() {
        println!("done: {}, error: {:?}", status.done, status.error);
    }

    Ok(())
}
