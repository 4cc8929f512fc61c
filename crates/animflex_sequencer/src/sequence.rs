// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sequence of clip nodes and the per-tick activation driver.

use crate::clip::{Clip, ClipError};
use crate::controller::ControllerLink;
use crate::events::{Observers, SequenceEvent, SubscriptionId, TickReport};
use crate::node::{ClipNode, Completion, CompletionQueue, NodeArena, NodeFlags, NodeId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum passes over the node list within a single tick
pub const MAX_ITERATIONS: usize = 64;

/// Unique identifier for a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceId(pub Uuid);

impl SequenceId {
    /// Create a new random sequence ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::new()
    }
}

bitflags::bitflags! {
    /// Sequence playback state.
    ///
    /// Inactive (empty) -> `ACTIVE` -> `STOPPING` -> inactive. `PAUSED` is
    /// orthogonal and only consulted by the controller.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SequenceFlags: u8 {
        /// Driven by a controller
        const ACTIVE = 1 << 1;
        /// Skipped by the controller until resumed
        const PAUSED = 1 << 2;
        /// Waiting for the controller to tear it down
        const STOPPING = 1 << 3;
    }
}

/// Misuse of the playback API
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// `play` on a sequence that is already playing
    #[error("The sequence is already active, use play_or_restart instead")]
    AlreadyActive,

    /// `stop` on a sequence that is not playing
    #[error("The sequence is not active, so there's nothing to stop")]
    NotActive,

    /// The sequence is not registered with a live controller
    #[error("The sequence has no controller")]
    NoController,

    /// The controller does not know this sequence
    #[error("Unknown sequence: {0:?}")]
    UnknownSequence(SequenceId),
}

/// Invalid structural edit
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    /// Node position out of range
    #[error("Node index {index} out of bounds (len {len})")]
    IndexOutOfBounds {
        /// Requested position
        index: usize,
        /// Number of nodes
        len: usize,
    },

    /// Handle does not refer to a node of this sequence
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// Explicit successors requested on a node that plays the next node
    #[error("Node {0} plays the next node after finishing, explicit successors are ignored")]
    ImplicitSuccessor(NodeId),
}

/// Problem found by [`Sequence::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IssueKind {
    /// The clip rejected its own configuration
    #[error(transparent)]
    Clip(#[from] ClipError),

    /// A successor handle no longer refers to a node
    #[error("successor {0} does not exist")]
    DanglingSuccessor(NodeId),

    /// Both implicit and explicit successors are configured
    #[error("explicit successors are set but the node plays the next node after finishing")]
    ConflictingSuccessors,

    /// Delay below zero
    #[error("negative delay {0}")]
    NegativeDelay(f32),
}

/// A validation problem attached to a node
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    /// Node position
    pub index: usize,
    /// Node name
    pub node_name: String,
    /// What is wrong
    pub kind: IssueKind,
}

/// An ordered graph of clip nodes driven by ticks
#[derive(Debug)]
pub struct Sequence {
    /// Unique sequence ID
    pub id: SequenceId,
    /// Sequence name
    pub name: String,
    /// Resolve chained activations within the same tick instead of the next one
    pub activate_next_clips_asap: bool,
    nodes: NodeArena,
    order: Vec<NodeId>,
    flags: SequenceFlags,
    pending_active_count: usize,
    completions: CompletionQueue,
    pub(crate) controller: ControllerLink,
    observers: Observers,
    truncated_ticks: u64,
}

impl Sequence {
    /// Create a new empty sequence
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: SequenceId::new(),
            name: name.into(),
            activate_next_clips_asap: true,
            nodes: NodeArena::default(),
            order: Vec::new(),
            flags: SequenceFlags::empty(),
            pending_active_count: 0,
            completions: CompletionQueue::default(),
            controller: ControllerLink::default(),
            observers: Observers::default(),
            truncated_ticks: 0,
        }
    }

    // Playback

    /// Pause the sequence
    pub fn pause(&mut self) {
        self.flags.insert(SequenceFlags::PAUSED);
    }

    /// Resume the sequence if it was paused
    pub fn resume(&mut self) {
        self.flags.remove(SequenceFlags::PAUSED);
    }

    /// Request the sequence to stop.
    ///
    /// Teardown happens on the controller's next update, not right away.
    pub fn stop(&mut self) -> Result<(), PlaybackError> {
        if !self.is_active() {
            tracing::warn!(sequence = %self.name, "Sequence is not active, so there's nothing to stop");
            return Err(PlaybackError::NotActive);
        }

        self.flags.insert(SequenceFlags::STOPPING);
        Ok(())
    }

    /// Play the sequence.
    ///
    /// The controller activates it at the start of its next update. Playing
    /// a sequence without nodes does nothing.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.is_active() {
            tracing::error!(
                sequence = %self.name,
                "The sequence is already active. You cannot play an active sequence, call play_or_restart instead"
            );
            return Err(PlaybackError::AlreadyActive);
        }

        if self.order.is_empty() {
            return Ok(());
        }

        if !self.controller.add_new_sequence(self.id) {
            tracing::warn!(sequence = %self.name, "Cannot play a sequence that has no controller");
            return Err(PlaybackError::NoController);
        }
        Ok(())
    }

    /// Play the sequence, or restart it if it is already active.
    ///
    /// A restart stops the sequence and defers `play` to the controller's
    /// delayed calls, so the new run begins only after the stop went through.
    pub fn play_or_restart(&mut self) -> Result<(), PlaybackError> {
        if !self.is_active() {
            return self.play();
        }

        if !self.controller.is_connected() {
            tracing::warn!(sequence = %self.name, "Cannot restart a sequence that has no controller");
            return Err(PlaybackError::NoController);
        }

        self.stop()?;
        let id = self.id;
        self.controller.delayed_call(move |controller| {
            if let Err(e) = controller.play(id) {
                tracing::warn!("Deferred restart of {:?} failed: {e}", id);
            }
        });
        Ok(())
    }

    /// Whether the sequence is active and playing
    pub fn is_playing(&self) -> bool {
        self.is_active()
    }

    /// Whether a controller is driving the sequence
    pub fn is_active(&self) -> bool {
        self.flags.contains(SequenceFlags::ACTIVE)
    }

    /// Whether the sequence is paused
    pub fn is_paused(&self) -> bool {
        self.flags.contains(SequenceFlags::PAUSED)
    }

    /// Whether a stop has been requested but not processed yet
    pub fn is_stopping(&self) -> bool {
        self.flags.contains(SequenceFlags::STOPPING)
    }

    /// Current playback flags
    pub fn flags(&self) -> SequenceFlags {
        self.flags
    }

    /// Number of nodes waiting to be promoted
    pub fn pending_active_count(&self) -> usize {
        self.pending_active_count
    }

    /// Ticks that stopped same-tick propagation at [`MAX_ITERATIONS`]
    pub fn truncated_ticks(&self) -> u64 {
        self.truncated_ticks
    }

    // Events

    /// Event listeners
    pub fn events(&mut self) -> &mut Observers {
        &mut self.observers
    }

    /// Run `f` every time the sequence starts playing
    pub fn on_play(&mut self, mut f: impl FnMut() + 'static) -> SubscriptionId {
        self.observers.subscribe(move |event| {
            if *event == SequenceEvent::Played {
                f();
            }
        })
    }

    /// Run `f` every time the sequence completes or is stopped
    pub fn on_complete(&mut self, mut f: impl FnMut() + 'static) -> SubscriptionId {
        self.observers.subscribe(move |event| {
            if *event == SequenceEvent::Completed {
                f();
            }
        })
    }

    // Controller hooks

    /// Bind all nodes and schedule the entry node
    pub(crate) fn on_activate(&mut self) {
        self.flags = SequenceFlags::ACTIVE;
        self.pending_active_count = 0;
        self.completions.borrow_mut().clear();

        for &id in &self.order {
            if let Some(node) = self.nodes.get_mut(id) {
                node.init(id, self.completions.clone());
                node.flags = NodeFlags::empty();
            }
        }
        self.activate_clip(0);

        tracing::debug!(sequence = %self.name, nodes = self.order.len(), "Sequence activated");
        self.observers.emit(&SequenceEvent::Played);
    }

    /// Clear all state and report completion
    pub(crate) fn on_stop(&mut self) {
        self.flags = SequenceFlags::empty();
        for &id in &self.order {
            if let Some(node) = self.nodes.get_mut(id) {
                node.flags = NodeFlags::empty();
            }
        }
        self.pending_active_count = 0;
        self.completions.borrow_mut().clear();

        tracing::debug!(sequence = %self.name, "Sequence stopped");
        self.observers.emit(&SequenceEvent::Completed);
    }

    /// Advance the sequence by one frame.
    ///
    /// Does nothing unless the sequence is active, and nothing once a stop was
    /// requested. Pausing is enforced by the controller.
    pub(crate) fn tick(&mut self, delta_time: f32) -> TickReport {
        let mut report = TickReport::default();
        if !self.is_active() || self.is_stopping() {
            return report;
        }

        // Clips may end between ticks
        self.drain_completions(&mut report);

        'passes: loop {
            if report.passes == MAX_ITERATIONS {
                report.truncated = true;
                break;
            }
            report.passes += 1;

            for index in 0..self.order.len() {
                let id = self.order[index];
                let Some(node) = self.nodes.get_mut(id) else {
                    continue;
                };

                if node.flags.contains(NodeFlags::PENDING_ACTIVE) {
                    self.pending_active_count = self.pending_active_count.saturating_sub(1);
                    node.reset();
                    node.flags = NodeFlags::ACTIVE;
                    report.promoted += 1;
                }

                if node.flags.contains(NodeFlags::ACTIVE) && !node.flags.contains(NodeFlags::TICKED) {
                    let was_started = node.has_started();
                    node.tick(delta_time);
                    node.flags.insert(NodeFlags::TICKED);

                    if !was_started && node.has_started() {
                        self.observers.emit(&SequenceEvent::ClipStarted { node: id, index });
                    }
                    self.drain_completions(&mut report);
                    if self.is_stopping() {
                        break 'passes;
                    }
                }
            }

            if !(self.activate_next_clips_asap && self.pending_active_count > 0) {
                break;
            }
        }

        for &id in &self.order {
            if let Some(node) = self.nodes.get_mut(id) {
                node.flags.remove(NodeFlags::TICKED);
            }
        }

        if report.truncated {
            self.truncated_ticks += 1;
            tracing::debug!(
                sequence = %self.name,
                pending = self.pending_active_count,
                "Same-tick propagation reached {MAX_ITERATIONS} passes, continuing next tick"
            );
            self.observers.emit(&SequenceEvent::PropagationTruncated {
                pending: self.pending_active_count,
            });
        }

        if !self.is_stopping() && self.live_node_count() == 0 {
            tracing::debug!(sequence = %self.name, "All clip nodes finished");
            self.finish();
        }

        report
    }

    /// Schedule the node at `index` for activation.
    ///
    /// Returns `false` if there is no such node or it is already live.
    pub(crate) fn activate_clip(&mut self, index: usize) -> bool {
        match self.order.get(index) {
            Some(&id) => self.activate_node(id),
            None => false,
        }
    }

    fn activate_node(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            tracing::warn!(sequence = %self.name, "Skipping activation of missing node {id}");
            return false;
        };
        if node.is_live() {
            tracing::trace!(node = %node.name, "Node already active, skipping activation");
            return false;
        }

        node.flags = NodeFlags::PENDING_ACTIVE;
        self.pending_active_count += 1;
        true
    }

    /// Clear a node's activation state
    pub fn deactivate_clip_node(&mut self, id: NodeId) {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.flags.contains(NodeFlags::PENDING_ACTIVE) {
                self.pending_active_count = self.pending_active_count.saturating_sub(1);
            }
            node.flags = NodeFlags::empty();
        }
    }

    fn drain_completions(&mut self, report: &mut TickReport) {
        loop {
            let batch = std::mem::take(&mut *self.completions.borrow_mut());
            if batch.is_empty() {
                break;
            }
            for completion in batch {
                if self.complete_node(completion) {
                    report.completed += 1;
                }
            }
        }
    }

    fn complete_node(&mut self, completion: Completion) -> bool {
        let Some(node) = self.nodes.get_mut(completion.node) else {
            return false;
        };
        if !node.accepts(completion) {
            tracing::trace!(node = %node.name, "Ignoring stale clip completion");
            return false;
        }

        node.flags = NodeFlags::empty();
        let play_next = node.play_next_after_finish();
        let successors = node.next().to_vec();

        let Some(index) = self.index_of(completion.node) else {
            return false;
        };
        self.observers.emit(&SequenceEvent::ClipFinished {
            node: completion.node,
            index,
        });

        if play_next {
            match self.order.get(index + 1).copied() {
                Some(next) => {
                    self.activate_node(next);
                }
                None => self.finish(),
            }
        } else {
            for next in successors {
                self.activate_node(next);
            }
        }
        true
    }

    fn finish(&mut self) {
        if self.is_active() && !self.is_stopping() {
            self.flags.insert(SequenceFlags::STOPPING);
        }
    }

    fn live_node_count(&self) -> usize {
        self.order
            .iter()
            .filter_map(|&id| self.nodes.get(id))
            .filter(|node| node.is_live())
            .count()
    }

    // Node access

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the sequence has no nodes
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Get a node by handle
    pub fn node(&self, id: NodeId) -> Option<&ClipNode> {
        self.nodes.get(id)
    }

    /// Get a mutable node by handle
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ClipNode> {
        self.nodes.get_mut(id)
    }

    /// Get the node at a position
    pub fn node_at(&self, index: usize) -> Option<&ClipNode> {
        self.order.get(index).and_then(|&id| self.nodes.get(id))
    }

    /// Handle of the node at a position
    pub fn node_id_at(&self, index: usize) -> Option<NodeId> {
        self.order.get(index).copied()
    }

    /// Current position of a node
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|&other| other == id)
    }

    /// Node handles in order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.order.iter().copied()
    }

    /// Nodes in order
    pub fn nodes(&self) -> impl Iterator<Item = &ClipNode> {
        self.order.iter().filter_map(|&id| self.nodes.get(id))
    }

    // Editing

    /// Append a node named after its position
    pub fn add_new_clip_node(&mut self, clip: impl Clip + 'static) -> NodeId {
        let name = format!("Node {}", self.order.len());
        self.add_node(ClipNode::new(name, clip))
    }

    /// Append a prepared node
    pub fn add_node(&mut self, node: ClipNode) -> NodeId {
        let id = self.nodes.insert(node);
        self.order.push(id);
        self.bind_if_active(id);
        id
    }

    /// Insert a node named after its position
    pub fn insert_new_clip_at(&mut self, clip: impl Clip + 'static, index: usize) -> Result<NodeId, EditError> {
        self.insert_node(index, ClipNode::new(format!("Node {index}"), clip))
    }

    /// Insert a prepared node at `index`
    pub fn insert_node(&mut self, index: usize, node: ClipNode) -> Result<NodeId, EditError> {
        if index > self.order.len() {
            return Err(EditError::IndexOutOfBounds {
                index,
                len: self.order.len(),
            });
        }
        let id = self.nodes.insert(node);
        self.order.insert(index, id);
        self.bind_if_active(id);
        Ok(id)
    }

    /// Nodes added mid-playback need the completion queue `on_activate` hands out
    fn bind_if_active(&mut self, id: NodeId) {
        if !self.is_active() {
            return;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.init(id, self.completions.clone());
        }
    }

    /// Remove the node at `index`
    pub fn remove_clip_node_at_index(&mut self, index: usize) -> Result<ClipNode, EditError> {
        let id = self.node_id_at(index).ok_or(EditError::IndexOutOfBounds {
            index,
            len: self.order.len(),
        })?;
        self.remove_clip_node(id).ok_or(EditError::UnknownNode(id))
    }

    /// Remove a node and every successor reference to it
    pub fn remove_clip_node(&mut self, id: NodeId) -> Option<ClipNode> {
        if !self.nodes.contains(id) {
            return None;
        }

        self.deactivate_clip_node(id);
        self.order.retain(|&other| other != id);
        for &other in &self.order {
            if let Some(node) = self.nodes.get_mut(other) {
                node.next_mut().retain(|&next| next != id);
            }
        }
        self.nodes.remove(id)
    }

    /// Swap the nodes at two positions
    pub fn move_clip_node(&mut self, from: usize, to: usize) -> Result<(), EditError> {
        let len = self.order.len();
        for index in [from, to] {
            if index >= len {
                return Err(EditError::IndexOutOfBounds { index, len });
            }
        }
        self.order.swap(from, to);
        Ok(())
    }

    /// Add an explicit successor
    pub fn add_next(&mut self, from: NodeId, to: NodeId) -> Result<(), EditError> {
        if !self.nodes.contains(to) {
            return Err(EditError::UnknownNode(to));
        }
        let node = self.nodes.get_mut(from).ok_or(EditError::UnknownNode(from))?;
        if node.play_next_after_finish() {
            return Err(EditError::ImplicitSuccessor(from));
        }
        if !node.next().contains(&to) {
            node.next_mut().push(to);
        }
        Ok(())
    }

    /// Remove an explicit successor, returning whether it was present
    pub fn remove_next(&mut self, from: NodeId, to: NodeId) -> bool {
        let Some(node) = self.nodes.get_mut(from) else {
            return false;
        };
        let before = node.next().len();
        node.next_mut().retain(|&next| next != to);
        node.next().len() != before
    }

    /// Replace the successors of the node at `index` by position
    pub fn set_next_indices(&mut self, index: usize, next: &[usize]) -> Result<(), EditError> {
        let len = self.order.len();
        let from = self
            .node_id_at(index)
            .ok_or(EditError::IndexOutOfBounds { index, len })?;
        let ids = next
            .iter()
            .map(|&i| self.node_id_at(i).ok_or(EditError::IndexOutOfBounds { index: i, len }))
            .collect::<Result<Vec<_>, _>>()?;

        let node = self.nodes.get_mut(from).ok_or(EditError::UnknownNode(from))?;
        if node.play_next_after_finish() && !ids.is_empty() {
            return Err(EditError::ImplicitSuccessor(from));
        }
        *node.next_mut() = ids;
        Ok(())
    }

    /// Successors of the node at `index` as positions, skipping stale handles
    pub fn next_indices(&self, index: usize) -> Option<Vec<usize>> {
        let node = self.node_at(index)?;
        Some(node.next().iter().filter_map(|&id| self.index_of(id)).collect())
    }

    /// Check every clip and the successor graph
    pub fn validate(&mut self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for (index, &id) in self.order.iter().enumerate() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            let mut kinds = Vec::new();

            if node.delay() < 0.0 {
                kinds.push(IssueKind::NegativeDelay(node.delay()));
            }
            if node.play_next_after_finish() && !node.next().is_empty() {
                kinds.push(IssueKind::ConflictingSuccessors);
            }
            for &next in node.next() {
                if !self.nodes.contains(next) {
                    kinds.push(IssueKind::DanglingSuccessor(next));
                }
            }

            let node_name = node.name.clone();
            if let Some(node) = self.nodes.get_mut(id) {
                if let Err(e) = node.clip_mut().on_validate() {
                    kinds.push(IssueKind::Clip(e));
                }
            }

            issues.extend(kinds.into_iter().map(|kind| ValidationIssue {
                index,
                node_name: node_name.clone(),
                kind,
            }));
        }

        for issue in &issues {
            tracing::warn!(sequence = %self.name, node = %issue.node_name, "{}", issue.kind);
        }
        issues
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new("Untitled Sequence")
    }
}
