// SPDX-License-Identifier: MIT OR Apache-2.0
//! Clip sequence runtime for AnimFlex.
//!
//! A [`Sequence`] is an ordered graph of [`ClipNode`]s. Each node wraps a
//! [`Clip`] and names the nodes to start when the clip ends, either
//! explicitly or by playing the next node in order. A
//! [`SequenceController`] owns sequences and drives the active ones once
//! per frame.
//!
//! ## Modules
//!
//! - [`clip`] - The clip contract and its end handle
//! - [`node`] - Clip nodes and node handles
//! - [`sequence`] - Graph walking, activation and editing
//! - [`controller`] - Per-frame driver
//! - [`events`] - Playback notifications
//! - [`clips`], [`tween`] - Built-in clips
//! - [`asset`] - RON sequence descriptions

pub mod asset;
pub mod clip;
pub mod clips;
pub mod controller;
pub mod events;
pub mod node;
pub mod sequence;
pub mod settings;
pub mod tween;

pub use asset::{
    AssetError, BuiltinClipFactory, ClipAsset, ClipFactory, ClipNodeAsset, SequenceAsset,
    SEQUENCE_FORMAT_VERSION,
};
pub use clip::{Clip, ClipEnd, ClipError};
pub use clips::{InstantClip, LogClip, WaitClip};
pub use controller::{ControllerLink, SequenceController, UpdateReport};
pub use events::{Observers, SequenceEvent, SubscriptionId, TickReport};
pub use node::{ClipNode, NodeFlags, NodeId};
pub use sequence::{
    EditError, IssueKind, PlaybackError, Sequence, SequenceFlags, SequenceId, ValidationIssue,
    MAX_ITERATIONS,
};
pub use settings::ControllerSettings;
pub use tween::{cubic_bezier, lerp, Ease, PropertyHandle, PropertyStore, TweenClip, TweenTarget};
