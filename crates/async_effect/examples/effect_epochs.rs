//! Effect example
//!
//! Shows a polling effect that restarts whenever its target changes, with
//! pause/resume and teardown along the way.

use std::time::Duration;

use async_effect::{routine_fn, AsyncEffect, CancelReason, EffectConfig, Payload, Scope};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Async Effect Example ===\n");

    let poller = routine_fn(|scope: Scope, target: String| async move {
        scope.on_teardown({
            let target = target.clone();
            move || println!("  stopped polling {target}")
        });

        let mut polls = 0u32;
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            polls += 1;
            let note = scope
                .resume_data()
                .and_then(|data| data.downcast_ref::<&'static str>().copied())
                .unwrap_or("-");
            println!("  polled {target} ({polls}), note: {note}");
        }
        Ok::<_, String>(polls)
    })
    .named("poller");

    let effect = AsyncEffect::new(poller, EffectConfig::new().with_states(true))?;

    let first = effect.update("https://example.org/a".to_string());
    tokio::time::sleep(Duration::from_millis(120)).await;

    println!("Changing target");
    effect.update("https://example.org/b".to_string());
    if let Some(first) = first {
        match first.await {
            Err(err) if err.reason() == Some(&CancelReason::Restarted) => {
                println!("  first run restarted")
            }
            other => println!("  first run ended with {other:?}"),
        }
    }

    tokio::time::sleep(Duration::from_millis(60)).await;
    println!("Pausing");
    effect.pause(None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("Resuming");
    effect.resume(Some(Payload::new("resumed")));

    if let Some(current) = effect.current() {
        println!("Second run finished with {:?}", current.await);
    }
    println!("Status: {:?}", effect.status());

    println!("Tearing down");
    effect.teardown();
    println!("Runs started: {}", effect.runs());

    Ok(())
}
