// SPDX-License-Identifier: MIT OR Apache-2.0
//! Lifecycle events published by a sequence.

use crate::node::NodeId;
use std::fmt;

/// Something observable that happened to a sequence
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceEvent {
    /// The sequence was activated and its entry node scheduled
    Played,
    /// The sequence finished or was stopped and is inactive again
    Completed,
    /// A node's delay elapsed and its clip was started
    ClipStarted {
        /// Node handle
        node: NodeId,
        /// Node position at the time of the event
        index: usize,
    },
    /// A node's clip reported completion
    ClipFinished {
        /// Node handle
        node: NodeId,
        /// Node position at the time of the event
        index: usize,
    },
    /// A tick hit the pass limit with activations still pending
    PropagationTruncated {
        /// Activations carried over to the next tick
        pending: usize,
    },
}

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&SequenceEvent)>;

/// Ordered list of event listeners.
///
/// Listeners run in subscription order, synchronously, after the state
/// change they describe has been applied.
#[derive(Default)]
pub struct Observers {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
}

impl Observers {
    /// Register a listener
    pub fn subscribe(&mut self, listener: impl FnMut(&SequenceEvent) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub(crate) fn emit(&mut self, event: &SequenceEvent) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// What a single call to `Sequence::tick` did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Passes over the node list
    pub passes: usize,
    /// Nodes promoted from pending to active
    pub promoted: usize,
    /// Clips that reported completion
    pub completed: usize,
    /// Whether the pass limit stopped same-tick propagation
    pub truncated: bool,
}
