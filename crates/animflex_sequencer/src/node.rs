// SPDX-License-Identifier: MIT OR Apache-2.0
//! Clip nodes and the generational arena that stores them.

use crate::clip::{Clip, ClipEnd};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Stable handle of a clip node inside its sequence.
///
/// A handle consists of a slot index and a generation counter. Freed slots
/// are reused with a bumped generation, so a handle to a removed node never
/// aliases a node inserted later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    slot: u32,
    generation: u32,
}

impl NodeId {
    const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    const fn idx(self) -> usize {
        self.slot as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

bitflags::bitflags! {
    /// Per-node activation state.
    ///
    /// Inactive (empty) -> `PENDING_ACTIVE` -> `ACTIVE` -> inactive again on
    /// completion. `TICKED` is frame-local and cleared at the end of every
    /// sequence tick.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        /// Activated, waiting for the driver to reset and promote it
        const PENDING_ACTIVE = 1 << 0;
        /// Being ticked every frame
        const ACTIVE = 1 << 1;
        /// Already ticked during the current sequence tick
        const TICKED = 1 << 2;
    }
}

/// Completion report pushed by a clip's end callback.
///
/// `activation` guards against clips that keep an old [`ClipEnd`] around and
/// fire it after the node has been reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Completion {
    pub(crate) node: NodeId,
    pub(crate) activation: u32,
}

/// Queue shared between a sequence and the end callbacks of its clips
pub(crate) type CompletionQueue = Rc<RefCell<Vec<Completion>>>;

/// A clip plus its position in the sequence graph.
///
/// Successors are either the explicit `next` list or, when
/// `play_next_after_finish` is set, the node that structurally follows this
/// one in the sequence. The implicit form depends on node order: moving a
/// node changes what plays after it.
pub struct ClipNode {
    /// Display name
    pub name: String,
    clip: Box<dyn Clip>,
    next: Vec<NodeId>,
    play_next_after_finish: bool,
    delay: f32,
    pub(crate) flags: NodeFlags,

    id: Option<NodeId>,
    completions: Option<CompletionQueue>,
    activation: u32,
    elapsed: f32,
    end: Option<ClipEnd>,
}

impl ClipNode {
    /// Create a node around a clip
    pub fn new(name: impl Into<String>, clip: impl Clip + 'static) -> Self {
        Self::from_boxed(name, Box::new(clip))
    }

    /// Create a node around an already boxed clip
    pub fn from_boxed(name: impl Into<String>, clip: Box<dyn Clip>) -> Self {
        Self {
            name: name.into(),
            clip,
            next: Vec::new(),
            play_next_after_finish: false,
            delay: 0.0,
            flags: NodeFlags::empty(),
            id: None,
            completions: None,
            activation: 0,
            elapsed: 0.0,
            end: None,
        }
    }

    /// Set the pre-start delay
    pub fn with_delay(mut self, delay: f32) -> Self {
        self.delay = delay;
        self
    }

    /// Play the structurally next node when this one finishes
    pub fn with_play_next_after_finish(mut self) -> Self {
        self.set_play_next_after_finish(true);
        self
    }

    /// Wrapped clip
    pub fn clip(&self) -> &dyn Clip {
        self.clip.as_ref()
    }

    /// Wrapped clip, mutably
    pub fn clip_mut(&mut self) -> &mut dyn Clip {
        self.clip.as_mut()
    }

    /// Seconds to wait after activation before the clip starts
    pub fn delay(&self) -> f32 {
        self.delay
    }

    /// Set the pre-start delay
    pub fn set_delay(&mut self, delay: f32) {
        self.delay = delay;
    }

    /// Explicit successors
    pub fn next(&self) -> &[NodeId] {
        &self.next
    }

    pub(crate) fn next_mut(&mut self) -> &mut Vec<NodeId> {
        &mut self.next
    }

    /// Whether the implicit successor is used instead of [`next`](Self::next)
    pub fn play_next_after_finish(&self) -> bool {
        self.play_next_after_finish
    }

    /// Switch between implicit and explicit successors.
    ///
    /// Enabling the implicit successor clears the explicit list.
    pub fn set_play_next_after_finish(&mut self, enabled: bool) {
        self.play_next_after_finish = enabled;
        if enabled {
            self.next.clear();
        }
    }

    /// Current activation flags
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Whether the node is active or about to become active
    pub fn is_live(&self) -> bool {
        self.flags
            .intersects(NodeFlags::ACTIVE | NodeFlags::PENDING_ACTIVE)
    }

    /// Whether the clip has been started in the current activation
    pub fn has_started(&self) -> bool {
        self.end.is_some()
    }

    /// Time accumulated towards the delay in the current activation
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Bind the node to its owning sequence
    pub(crate) fn init(&mut self, id: NodeId, completions: CompletionQueue) {
        self.id = Some(id);
        self.completions = Some(completions);
    }

    /// Prepare for a new activation
    pub(crate) fn reset(&mut self) {
        self.flags.remove(NodeFlags::TICKED);
        self.activation = self.activation.wrapping_add(1);
        self.elapsed = 0.0;
        self.end = None;
    }

    /// Whether `completion` belongs to the current activation
    pub(crate) fn accepts(&self, completion: Completion) -> bool {
        self.flags.contains(NodeFlags::ACTIVE) && completion.activation == self.activation
    }

    /// Advance the delay timer, start the clip once, then forward ticks to it
    pub(crate) fn tick(&mut self, delta_time: f32) {
        if self.end.is_some() {
            self.clip.on_tick(delta_time);
            return;
        }

        self.elapsed += delta_time;
        if self.elapsed < self.delay {
            return;
        }

        let (Some(node), Some(queue)) = (self.id, self.completions.clone()) else {
            tracing::error!(node = %self.name, "Clip node ticked before being bound to a sequence");
            return;
        };
        let completion = Completion {
            node,
            activation: self.activation,
        };

        tracing::trace!(node = %self.name, kind = self.clip.kind(), "Starting clip");
        self.end = Some(self.clip.play(move || queue.borrow_mut().push(completion)));
    }
}

impl fmt::Debug for ClipNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipNode")
            .field("name", &self.name)
            .field("clip", &self.clip)
            .field("next", &self.next)
            .field("play_next_after_finish", &self.play_next_after_finish)
            .field("delay", &self.delay)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<ClipNode>,
}

/// Generational storage for clip nodes
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: ClipNode) -> NodeId {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.generation = entry.generation.wrapping_add(1);
            entry.node = Some(node);
            return NodeId::new(slot, entry.generation);
        }

        let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 1,
            node: Some(node),
        });
        NodeId::new(slot, 1)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<ClipNode> {
        let entry = self.slots.get_mut(id.idx())?;
        if entry.generation != id.generation {
            return None;
        }
        let node = entry.node.take()?;
        self.free.push(id.slot);
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&ClipNode> {
        self.slots
            .get(id.idx())
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut ClipNode> {
        self.slots
            .get_mut(id.idx())
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.node.as_mut())
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }
}
