// SPDX-License-Identifier: MIT OR Apache-2.0
//! AnimFlex headless player.
//!
//! Loads a sequence asset, drives it with a fixed-step controller loop and
//! logs the final value of every animated property.

mod player;
mod settings;

use clap::Parser;
use player::PlayerError;
use settings::{PlayerSettings, SettingsError};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "animflex", version, about = "Play an AnimFlex sequence without a host")]
struct Cli {
    /// Sequence asset (RON).
    sequence: PathBuf,

    /// Player settings (RON).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Initial property value, as `name=value`. May be repeated.
    #[arg(long = "set", value_parser = parse_property)]
    properties: Vec<(String, f32)>,
}

fn parse_property(s: &str) -> Result<(String, f32), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{s}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("property name is empty".to_string());
    }
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.to_string(), value))
}

fn init_tracing(log_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_settings(path: Option<&PathBuf>) -> Result<PlayerSettings, SettingsError> {
    match path {
        Some(path) => PlayerSettings::load(path),
        None => Ok(PlayerSettings::default()),
    }
}

fn run(cli: &Cli, settings: &PlayerSettings) -> Result<(), PlayerError> {
    let asset = animflex_sequencer::SequenceAsset::load(&cli.sequence)?;
    tracing::info!(
        "Playing '{}' ({} nodes) at {} fps",
        asset.name,
        asset.nodes.len(),
        settings.frame_rate
    );

    let summary = player::play_asset(&asset, settings, &cli.properties)?;
    if summary.truncated_ticks > 0 {
        tracing::warn!(
            "{} tick(s) hit the propagation limit of {} passes",
            summary.truncated_ticks,
            animflex_sequencer::MAX_ITERATIONS
        );
    }
    for (name, value) in &summary.properties {
        tracing::info!("{name} = {value}");
    }
    tracing::info!(
        "Finished after {} frames ({})",
        summary.frames,
        if summary.completed { "completed" } else { "still running" }
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let settings = load_settings(cli.settings.as_ref());
    let log_filter = settings
        .as_ref()
        .map_or(settings::DEFAULT_LOG_FILTER, |settings| settings.log_filter.as_str());
    init_tracing(log_filter);

    tracing::info!("Starting AnimFlex player v{}", env!("CARGO_PKG_VERSION"));

    let result = settings
        .map_err(PlayerError::from)
        .and_then(|settings| run(&cli, &settings));
    if let Err(e) = result {
        tracing::error!("Playback failed: {e}");
        std::process::exit(1);
    }
}
