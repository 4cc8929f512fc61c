// SPDX-License-Identifier: MIT OR Apache-2.0
//! Serialized sequence descriptions.
//!
//! A [`SequenceAsset`] stores nodes by position, with successors as indices
//! into the node list. [`SequenceAsset::build`] turns it into a runnable
//! [`Sequence`] through a [`ClipFactory`].

use crate::clip::Clip;
use crate::clips::{InstantClip, LogClip, WaitClip};
use crate::node::ClipNode;
use crate::sequence::Sequence;
use crate::tween::{Ease, PropertyStore, TweenClip};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Current sequence asset format version
pub const SEQUENCE_FORMAT_VERSION: u32 = 1;

/// Errors from reading, writing or building assets
#[derive(Debug, Error)]
pub enum AssetError {
    /// File access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The RON text could not be parsed
    #[error("failed to parse sequence asset: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// The asset could not be written as RON
    #[error("failed to serialize sequence asset: {0}")]
    Serialize(#[from] ron::Error),
    /// The asset was written by a newer format
    #[error("sequence asset version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the file
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },
    /// A tween names a property the store does not have
    #[error("unknown property '{0}'")]
    UnknownProperty(String),
}

fn default_true() -> bool {
    true
}

/// Serialized clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClipAsset {
    /// Ends immediately
    Instant,
    /// Ends after `duration` seconds
    Wait {
        /// Seconds to wait
        duration: f32,
    },
    /// Logs a message and ends
    Log {
        /// Message to log
        message: String,
    },
    /// Animates a named property
    Tween {
        /// Property name
        property: String,
        /// Fixed start value
        #[serde(default)]
        from: Option<f32>,
        /// End value, or offset when `relative`
        to: f32,
        /// Seconds from start to end
        duration: f32,
        /// Easing curve
        #[serde(default)]
        ease: Ease,
        /// Treat `to` as an offset
        #[serde(default)]
        relative: bool,
    },
}

/// Serialized clip node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipNodeAsset {
    /// Display name
    pub name: String,
    /// Seconds before the clip starts
    #[serde(default)]
    pub delay: f32,
    /// Chain to the next node in order instead of `next_indices`
    #[serde(default)]
    pub play_next_after_finish: bool,
    /// Explicit successors as node positions
    #[serde(default)]
    pub next_indices: Vec<usize>,
    /// The clip
    pub clip: ClipAsset,
}

impl ClipNodeAsset {
    /// Node with no delay and no successors
    pub fn new(name: impl Into<String>, clip: ClipAsset) -> Self {
        Self {
            name: name.into(),
            delay: 0.0,
            play_next_after_finish: false,
            next_indices: Vec::new(),
            clip,
        }
    }
}

/// Serialized sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceAsset {
    /// Format version
    pub version: u32,
    /// Display name
    pub name: String,
    /// Keep propagating activations within a tick
    #[serde(default = "default_true")]
    pub activate_next_clips_asap: bool,
    /// Nodes in order
    #[serde(default)]
    pub nodes: Vec<ClipNodeAsset>,
}

impl SequenceAsset {
    /// Empty asset at the current format version
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: SEQUENCE_FORMAT_VERSION,
            name: name.into(),
            activate_next_clips_asap: true,
            nodes: Vec::new(),
        }
    }

    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, AssetError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, AssetError> {
        let asset: Self = ron::from_str(s)?;
        if asset.version > SEQUENCE_FORMAT_VERSION {
            return Err(AssetError::UnsupportedVersion {
                found: asset.version,
                supported: SEQUENCE_FORMAT_VERSION,
            });
        }
        Ok(asset)
    }

    /// Load an asset from file
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let contents = std::fs::read_to_string(path)?;
        let asset = Self::from_ron(&contents)?;
        tracing::debug!("Loaded sequence asset '{}' from {}", asset.name, path.display());
        Ok(asset)
    }

    /// Save the asset to file
    pub fn save(&self, path: &Path) -> Result<(), AssetError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Properties animated by tween nodes, without duplicates
    pub fn property_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in &self.nodes {
            if let ClipAsset::Tween { property, .. } = &node.clip {
                if !names.contains(&property.as_str()) {
                    names.push(property.as_str());
                }
            }
        }
        names
    }

    /// Remove the node at `index`, dropping references to it and shifting
    /// later references down
    pub fn remove_node(&mut self, index: usize) -> Option<ClipNodeAsset> {
        if index >= self.nodes.len() {
            return None;
        }
        let removed = self.nodes.remove(index);
        for node in &mut self.nodes {
            node.next_indices.retain(|&next| next != index);
            for next in &mut node.next_indices {
                if *next > index {
                    *next -= 1;
                }
            }
        }
        Some(removed)
    }

    /// Swap two nodes, keeping every reference pointed at the same node
    pub fn move_node(&mut self, from: usize, to: usize) -> bool {
        if from >= self.nodes.len() || to >= self.nodes.len() {
            return false;
        }
        self.nodes.swap(from, to);
        for node in &mut self.nodes {
            for next in &mut node.next_indices {
                if *next == from {
                    *next = to;
                } else if *next == to {
                    *next = from;
                }
            }
        }
        true
    }

    /// Build a runnable sequence
    pub fn build(&self, factory: &dyn ClipFactory) -> Result<Sequence, AssetError> {
        let mut sequence = Sequence::new(self.name.clone());
        sequence.activate_next_clips_asap = self.activate_next_clips_asap;

        let mut ids = Vec::with_capacity(self.nodes.len());
        for asset in &self.nodes {
            let mut node = ClipNode::from_boxed(asset.name.clone(), factory.create(&asset.clip)?)
                .with_delay(asset.delay);
            if asset.play_next_after_finish {
                node = node.with_play_next_after_finish();
            }
            ids.push(sequence.add_node(node));
        }

        for (asset, &from) in self.nodes.iter().zip(&ids) {
            if asset.play_next_after_finish && !asset.next_indices.is_empty() {
                tracing::warn!(
                    node = %asset.name,
                    "Ignoring explicit successors on a node that plays the next one after finishing"
                );
                continue;
            }
            for &index in &asset.next_indices {
                let Some(&to) = ids.get(index) else {
                    tracing::warn!(node = %asset.name, "Skipping out of range successor index {}", index);
                    continue;
                };
                if let Err(e) = sequence.add_next(from, to) {
                    tracing::warn!(node = %asset.name, "Skipping successor: {e}");
                }
            }
        }

        tracing::debug!("Built sequence '{}' with {} nodes", self.name, ids.len());
        Ok(sequence)
    }
}

/// Creates clips from their serialized form
pub trait ClipFactory {
    /// Create the clip described by `asset`
    fn create(&self, asset: &ClipAsset) -> Result<Box<dyn Clip>, AssetError>;
}

/// Builds the clips of this crate, tweening properties of a shared store
#[derive(Debug, Clone, Default)]
pub struct BuiltinClipFactory {
    /// Store tweens read and write
    pub properties: PropertyStore,
}

impl BuiltinClipFactory {
    /// Factory over `properties`
    pub fn new(properties: PropertyStore) -> Self {
        Self { properties }
    }
}

impl ClipFactory for BuiltinClipFactory {
    fn create(&self, asset: &ClipAsset) -> Result<Box<dyn Clip>, AssetError> {
        let clip: Box<dyn Clip> = match asset {
            ClipAsset::Instant => Box::new(InstantClip::noop()),
            ClipAsset::Wait { duration } => Box::new(WaitClip::new(*duration)),
            ClipAsset::Log { message } => Box::new(LogClip::new(message.clone())),
            ClipAsset::Tween {
                property,
                from,
                to,
                duration,
                ease,
                relative,
            } => {
                let target = self
                    .properties
                    .handle(property)
                    .ok_or_else(|| AssetError::UnknownProperty(property.clone()))?;
                let mut tween = TweenClip::new(target, *to, *duration).with_ease(*ease);
                tween.from = *from;
                tween.relative = *relative;
                Box::new(tween)
            }
        };
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SequenceController;

    fn tween(property: &str, to: f32, duration: f32) -> ClipAsset {
        ClipAsset::Tween {
            property: property.to_string(),
            from: None,
            to,
            duration,
            ease: Ease::Linear,
            relative: false,
        }
    }

    fn named(names: &[&str]) -> SequenceAsset {
        let mut asset = SequenceAsset::new("Test");
        for name in names {
            asset.nodes.push(ClipNodeAsset::new(*name, ClipAsset::Instant));
        }
        asset
    }

    #[test]
    fn test_ron_roundtrip() {
        let mut asset = SequenceAsset::new("Intro");
        let mut fade = ClipNodeAsset::new("Fade", tween("alpha", 1.0, 0.5));
        fade.next_indices = vec![1];
        asset.nodes.push(fade);
        asset.nodes.push(ClipNodeAsset::new("Hold", ClipAsset::Wait { duration: 1.0 }));

        let ron_str = asset.to_ron().unwrap();
        let loaded = SequenceAsset::from_ron(&ron_str).unwrap();
        assert_eq!(loaded, asset);
    }

    #[test]
    fn test_minimal_ron_uses_defaults() {
        let asset = SequenceAsset::from_ron(
            r#"(version: 1, name: "Short", nodes: [(name: "Only", clip: Log(message: "hi"))])"#,
        )
        .unwrap();
        assert!(asset.activate_next_clips_asap);
        assert_eq!(asset.nodes[0].delay, 0.0);
        assert!(asset.nodes[0].next_indices.is_empty());
    }

    #[test]
    fn test_demo_asset_builds() {
        let asset = SequenceAsset::from_ron(include_str!("../../../demos/intro.ron")).unwrap();
        assert_eq!(asset.property_names(), vec!["alpha", "x"]);

        let properties = PropertyStore::new();
        properties.set("alpha", 0.0);
        properties.set("x", 0.0);
        let mut sequence = asset.build(&BuiltinClipFactory::new(properties)).unwrap();
        assert_eq!(sequence.len(), 5);
        assert_eq!(sequence.next_indices(0), Some(vec![1, 2]));
        assert!(sequence.validate().is_empty());
    }

    #[test]
    fn test_newer_version_rejected() {
        let mut asset = SequenceAsset::new("Future");
        asset.version = SEQUENCE_FORMAT_VERSION + 1;
        let ron_str = asset.to_ron().unwrap();
        assert!(matches!(
            SequenceAsset::from_ron(&ron_str),
            Err(AssetError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("animflex-{}.ron", uuid::Uuid::new_v4()));
        let asset = named(&["A", "B"]);
        asset.save(&path).unwrap();
        let loaded = SequenceAsset::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, asset);
    }

    #[test]
    fn test_remove_node_remaps_indices() {
        let mut asset = named(&["A", "B", "C", "D"]);
        asset.nodes[0].next_indices = vec![1, 2, 3];
        asset.nodes[3].next_indices = vec![2, 0];

        let removed = asset.remove_node(2).unwrap();
        assert_eq!(removed.name, "C");
        assert_eq!(asset.nodes[0].next_indices, vec![1, 2]);
        assert_eq!(asset.nodes[2].name, "D");
        assert_eq!(asset.nodes[2].next_indices, vec![0]);
        assert!(asset.remove_node(3).is_none());
    }

    #[test]
    fn test_move_node_swaps_references() {
        let mut asset = named(&["A", "B", "C"]);
        asset.nodes[0].next_indices = vec![1, 2];

        assert!(asset.move_node(1, 2));
        assert_eq!(asset.nodes[1].name, "C");
        assert_eq!(asset.nodes[2].name, "B");
        assert_eq!(asset.nodes[0].next_indices, vec![2, 1]);
        assert!(!asset.move_node(0, 3));
    }

    #[test]
    fn test_property_names() {
        let mut asset = SequenceAsset::new("Props");
        asset.nodes.push(ClipNodeAsset::new("A", tween("x", 1.0, 1.0)));
        asset.nodes.push(ClipNodeAsset::new("B", ClipAsset::Instant));
        asset.nodes.push(ClipNodeAsset::new("C", tween("y", 1.0, 1.0)));
        asset.nodes.push(ClipNodeAsset::new("D", tween("x", 0.0, 1.0)));
        assert_eq!(asset.property_names(), vec!["x", "y"]);
    }

    #[test]
    fn test_build_skips_out_of_range_successors() {
        let mut asset = named(&["A", "B"]);
        asset.nodes[0].next_indices = vec![5, 1];

        let sequence = asset.build(&BuiltinClipFactory::default()).unwrap();
        assert_eq!(sequence.len(), 2);
        assert_eq!(sequence.next_indices(0), Some(vec![1]));
    }

    #[test]
    fn test_build_unknown_property() {
        let mut asset = SequenceAsset::new("Broken");
        asset.nodes.push(ClipNodeAsset::new("Move", tween("missing", 1.0, 1.0)));
        assert!(matches!(
            asset.build(&BuiltinClipFactory::default()),
            Err(AssetError::UnknownProperty(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_built_sequence_plays_to_completion() {
        let properties = PropertyStore::new();
        properties.set("x", 0.0);

        let mut asset = SequenceAsset::new("Move");
        let mut first = ClipNodeAsset::new("Move", tween("x", 1.0, 0.5));
        first.play_next_after_finish = true;
        asset.nodes.push(first);
        asset.nodes.push(ClipNodeAsset::new("Done", ClipAsset::Log { message: "done".into() }));

        let sequence = asset.build(&BuiltinClipFactory::new(properties.clone())).unwrap();
        let mut controller = SequenceController::default();
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();

        for _ in 0..100 {
            controller.update(0.1);
            if controller.is_idle() {
                break;
            }
        }
        assert!(controller.is_idle());
        assert_eq!(properties.get("x"), Some(1.0));
    }
}
