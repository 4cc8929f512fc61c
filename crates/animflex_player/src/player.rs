// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed-step playback of a sequence asset.

use crate::settings::{PlayerSettings, SettingsError};
use animflex_sequencer::{
    AssetError, BuiltinClipFactory, PlaybackError, PropertyStore, SequenceAsset,
    SequenceController,
};
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

/// Errors that stop the player
#[derive(Debug, Error)]
pub enum PlayerError {
    /// The sequence asset could not be loaded or built
    #[error(transparent)]
    Asset(#[from] AssetError),
    /// The settings file could not be loaded
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// The sequence refused to play
    #[error(transparent)]
    Playback(#[from] PlaybackError),
}

/// Outcome of a playback run
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSummary {
    /// Controller updates performed
    pub frames: u64,
    /// Whether the sequence reported completion
    pub completed: bool,
    /// Ticks that hit the same-tick propagation limit
    pub truncated_ticks: usize,
    /// Final property values in declaration order
    pub properties: Vec<(String, f32)>,
}

/// Play `asset` with fixed steps until the controller is idle or the frame
/// limit is reached.
///
/// Every property a tween animates starts at `0.0` unless `overrides` sets it.
pub fn play_asset(
    asset: &SequenceAsset,
    settings: &PlayerSettings,
    overrides: &[(String, f32)],
) -> Result<PlaybackSummary, PlayerError> {
    let properties = PropertyStore::new();
    for name in asset.property_names() {
        properties.set(name, 0.0);
    }
    for (name, value) in overrides {
        properties.set(name.clone(), *value);
    }

    let mut sequence = asset.build(&BuiltinClipFactory::new(properties.clone()))?;
    let issues = sequence.validate();
    if !issues.is_empty() {
        tracing::warn!("Sequence '{}' has {} validation issue(s)", sequence.name, issues.len());
    }

    let completed = Rc::new(Cell::new(false));
    let flag = completed.clone();
    let name = sequence.name.clone();
    sequence.on_complete(move || {
        flag.set(true);
        tracing::info!("Sequence '{}' complete", name);
    });

    let mut controller = SequenceController::new(settings.controller_settings());
    let id = controller.add_sequence(sequence);
    controller.play(id)?;

    let delta_time = settings.frame_delta();
    let mut truncated_ticks = 0;
    while controller.frame() < settings.max_frames {
        let report = controller.update(delta_time);
        truncated_ticks += report.truncated;
        if controller.is_idle() {
            break;
        }
    }

    if !controller.is_idle() {
        tracing::warn!("Stopped after reaching the limit of {} frames", settings.max_frames);
    }

    Ok(PlaybackSummary {
        frames: controller.frame(),
        completed: completed.get(),
        truncated_ticks,
        properties: properties.snapshot(),
    })
}
