//! Manual/local dev driver for the core, not part of the public crate
//! surface. Loads a config file, starts a streaming session, prints events
//! as they arrive, and stops after a fixed duration — useful for checking
//! a provider integration without building the full host shell.

use std::env;
use std::fs;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use vhisper_core::adapters::audio::MicrophoneSource;
use vhisper_core::domain::{Config, Event};
use vhisper_core::pipeline::Pipeline;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let Some(config_path) = env::args().nth(1) else {
        eprintln!("usage: vhisper-cli <config.json> [record_seconds]");
        return ExitCode::FAILURE;
    };
    let record_seconds: u64 = env::args().nth(2).and_then(|s| s.parse().ok()).unwrap_or(5);

    let json = match fs::read_to_string(&config_path) {
        Ok(json) => json,
        Err(err) => {
            eprintln!("failed to read {config_path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let config = match Config::from_json(&json) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid config: {err}");
            return ExitCode::FAILURE;
        }
    };

    let audio = Arc::new(MicrophoneSource::new());
    let pipeline = Arc::new(Pipeline::new(config, audio));

    let callback: vhisper_core::pipeline::EventCallback = Arc::new(|event: Event| match event {
        Event::Partial { confirmed, stash } => println!("partial: {confirmed}|{stash}"),
        Event::Final { text } => println!("final: {text}"),
        Event::Error { message } => eprintln!("error: {message}"),
        Event::Warning { message } => eprintln!("warning: {message}"),
    });

    if let Err(err) = pipeline.start_streaming(callback).await {
        eprintln!("start_streaming failed: {err}");
        return ExitCode::FAILURE;
    }

    log::info!("recording for {record_seconds}s, hold your hot-key in a real host");
    tokio::time::sleep(Duration::from_secs(record_seconds)).await;

    pipeline.stop_streaming().await;
    // Give the terminal Final a moment to arrive before the process exits.
    tokio::time::sleep(Duration::from_secs(1)).await;

    ExitCode::SUCCESS
}
