use anyhow::Result;
use serde_json::json;
use sigcombo::prelude::*;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize structured logging. RUST_LOG overrides the default level.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // 2. Load the configuration: an optional TOML file, then SIGCOMBO__* variables.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ComboEngineConfig::load(config_path.as_deref())?;
    info!("{} v{} with {:?}", sigcombo::ENGINE_NAME, sigcombo::VERSION, config);

    // 3. Create the engine and listen to its event streams.
    let (engine, handle) = ComboEngine::new(config);
    spawn_event_listeners(&handle);
    let engine_task = tokio::spawn(engine.run());

    // 4. Register a few combos and play a scripted sequence of inputs.
    register_demo_combos(&handle).await?;
    play_script(&handle).await?;

    // 5. Keep running until Ctrl+C.
    info!("Script done. Press Ctrl+C to shut down.");
    tokio::signal::ctrl_c().await?;
    handle.shutdown().await?;
    engine_task.await??;

    Ok(())
}

/// Spawns one task per event stream, logging what the engine broadcasts.
fn spawn_event_listeners(handle: &EngineHandle) {
    let mut system_rx = handle.subscribe_system_events();
    tokio::spawn(async move {
        while let Ok(event) = system_rx.recv().await {
            info!("[SYSTEM] => {:?}", event);
        }
    });

    let mut combo_rx = handle.subscribe_combo_events();
    tokio::spawn(async move {
        while let Ok(event) = combo_rx.recv().await {
            info!(
                "[COMBO] => {} fired on tick #{} at {}ms ({})",
                event.name,
                event.tick,
                event.timestamp,
                event.wall_time.format("%H:%M:%S%.3f")
            );
        }
    });
}

async fn register_demo_combos(handle: &EngineHandle) -> Result<()> {
    let documents = [
        json!({"sequence": ["down", "forward", "punch"], "signal": "hadouken"}),
        json!({"sequence": [{"$and": ["punch", "kick"]}], "signal": "throw", "policy": "flip"}),
        json!({"sequence": ["charge", {"$minDelay": 500}], "signal": "charged"}),
        json!({"sequence": ["hadouken", "throw"], "signal": "super"}),
    ];
    for document in documents {
        let signal = handle.register(document).await?;
        info!("Registered combo emitting {}.", signal);
    }
    Ok(())
}

async fn play_script(handle: &EngineHandle) -> Result<()> {
    let script: [(&str, u64); 8] = [
        ("down", 0),
        ("forward", 40),
        ("punch", 40),
        ("punch", 60),
        ("kick", 5),
        ("charge", 300),
        ("jump", 100),
        ("down", 600),
    ];
    for (name, wait_ms) in script {
        tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        info!("[INPUT] => {}", name);
        handle.fire(name).await?;
    }
    Ok(())
}
