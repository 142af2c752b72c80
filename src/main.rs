use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::Path;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use skinwatch::replay::{self, Recording};
use skinwatch::{EffectLayer, Session, Settings};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries only detected moves.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "skinwatch=info".into()))
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let matches = Command::new("skinwatch")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Replays a recorded chess page through the move detector")
        .arg(
            Arg::new("recording")
                .long("recording")
                .value_name("PATH")
                .help("Recorded page session (JSON)")
                .required(true),
        )
        .arg(
            Arg::new("settings")
                .long("settings")
                .value_name("PATH")
                .help("Extension settings (JSON); overrides the recording's settings"),
        )
        .arg(
            Arg::new("throttle-ms")
                .long("throttle-ms")
                .value_name("MS")
                .help("Minimum interval between detection passes")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("realtime")
                .long("realtime")
                .help("Pace frames by their recorded timestamps")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let recording_path = matches
        .get_one::<String>("recording")
        .context("--recording is required")?;
    let recording = Recording::load(Path::new(recording_path))?;

    let settings = match matches.get_one::<String>("settings") {
        Some(path) => Settings::load(Path::new(path)),
        None => recording.settings.clone().unwrap_or_default(),
    };
    let mut config = recording.detector.clone().unwrap_or_default();
    if let Some(ms) = matches.get_one::<u64>("throttle-ms") {
        config.throttle_ms = *ms;
    }

    println!("Skinwatch replay: {} steps from {}", recording.steps.len(), recording_path);
    if !settings.effects_active() {
        println!("Effects are disabled in settings; nothing will be detected until they are enabled.");
    }

    let sink = EffectLayer::new(&settings, 0.0);
    let session = Session::new(settings, &config, sink).context("Invalid detector selectors")?;

    let (tx, rx) = mpsc::channel(64);
    let feeder = tokio::spawn(replay::feed(recording.steps, tx, matches.get_flag("realtime")));
    let report = session.run(rx).await;
    feeder.await.context("Replay task failed")??;

    for event in &report.emitted {
        let square = event
            .destination
            .map_or_else(|| "board".to_string(), |sq| sq.to_string());
        println!("move: {} capture={} key={}", square, event.is_capture, event.trigger_key);
    }
    println!(
        "Passes: {}  emitted: {}  suppressed: {}  throttled: {}  skipped: {}  attach attempts: {}",
        report.passes,
        report.emitted.len(),
        report.suppressed,
        report.throttled,
        report.skipped,
        report.attach_attempts
    );

    Ok(())
}
