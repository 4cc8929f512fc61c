// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-frame driver for sequences.
//!
//! The controller owns registered sequences and, once per [`update`], it:
//! 1. activates sequences that asked to play since the last update,
//! 2. tears down stopping sequences and ticks the others (paused ones are
//!    skipped), in registration order,
//! 3. runs the delayed calls queued before this update.
//!
//! Sequences reach their controller through a weak [`ControllerLink`], so a
//! sequence never keeps the controller alive.
//!
//! [`update`]: SequenceController::update

use crate::sequence::{PlaybackError, Sequence, SequenceId};
use crate::settings::ControllerSettings;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type DelayedCall = Box<dyn FnOnce(&mut SequenceController)>;

/// Requests queued by sequences between updates
#[derive(Default)]
struct ControllerInbox {
    added: Vec<SequenceId>,
    delayed: Vec<DelayedCall>,
}

/// Weak back-link from a sequence to its controller
#[derive(Clone, Default)]
pub struct ControllerLink(Weak<RefCell<ControllerInbox>>);

impl ControllerLink {
    /// Whether the controller is still alive
    pub fn is_connected(&self) -> bool {
        self.0.strong_count() > 0
    }

    /// Ask the controller to activate `id` on its next update
    pub(crate) fn add_new_sequence(&self, id: SequenceId) -> bool {
        match self.0.upgrade() {
            Some(inbox) => {
                inbox.borrow_mut().added.push(id);
                true
            }
            None => false,
        }
    }

    /// Run `call` after the controller's next round of ticks
    pub(crate) fn delayed_call(&self, call: impl FnOnce(&mut SequenceController) + 'static) -> bool {
        match self.0.upgrade() {
            Some(inbox) => {
                inbox.borrow_mut().delayed.push(Box::new(call));
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for ControllerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ControllerLink")
            .field(&self.is_connected())
            .finish()
    }
}

/// What a single [`SequenceController::update`] did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Sequences activated this update
    pub activated: usize,
    /// Sequences ticked this update
    pub ticked: usize,
    /// Sequences torn down this update
    pub stopped: usize,
    /// Ticks that hit the same-tick propagation limit
    pub truncated: usize,
    /// Delayed calls executed
    pub delayed_calls: usize,
}

/// Owns sequences and drives the active ones every frame
pub struct SequenceController {
    /// Frame timing settings
    pub settings: ControllerSettings,
    sequences: IndexMap<SequenceId, Sequence>,
    active: Vec<SequenceId>,
    inbox: Rc<RefCell<ControllerInbox>>,
    frame: u64,
}

impl SequenceController {
    /// Create a controller with the given settings
    pub fn new(settings: ControllerSettings) -> Self {
        Self {
            settings,
            sequences: IndexMap::new(),
            active: Vec::new(),
            inbox: Rc::new(RefCell::new(ControllerInbox::default())),
            frame: 0,
        }
    }

    /// Link for sequences owned elsewhere
    pub fn link(&self) -> ControllerLink {
        ControllerLink(Rc::downgrade(&self.inbox))
    }

    /// Register a sequence and take ownership of it
    pub fn add_sequence(&mut self, mut sequence: Sequence) -> SequenceId {
        let id = sequence.id;
        sequence.controller = self.link();
        self.sequences.insert(id, sequence);
        id
    }

    /// Unregister a sequence, returning it without a controller.
    ///
    /// A sequence that is still playing is torn down first.
    pub fn remove_sequence(&mut self, id: SequenceId) -> Option<Sequence> {
        self.active.retain(|&other| other != id);
        let mut sequence = self.sequences.shift_remove(&id)?;
        if sequence.is_active() {
            sequence.on_stop();
        }
        sequence.controller = ControllerLink::default();
        Some(sequence)
    }

    /// Get a sequence
    pub fn sequence(&self, id: SequenceId) -> Option<&Sequence> {
        self.sequences.get(&id)
    }

    /// Get a mutable sequence
    pub fn sequence_mut(&mut self, id: SequenceId) -> Option<&mut Sequence> {
        self.sequences.get_mut(&id)
    }

    /// All registered sequences, in registration order
    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    /// Play a registered sequence
    pub fn play(&mut self, id: SequenceId) -> Result<(), PlaybackError> {
        self.sequences
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownSequence(id))?
            .play()
    }

    /// Play or restart a registered sequence
    pub fn play_or_restart(&mut self, id: SequenceId) -> Result<(), PlaybackError> {
        self.sequences
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownSequence(id))?
            .play_or_restart()
    }

    /// Stop a registered sequence
    pub fn stop(&mut self, id: SequenceId) -> Result<(), PlaybackError> {
        self.sequences
            .get_mut(&id)
            .ok_or(PlaybackError::UnknownSequence(id))?
            .stop()
    }

    /// Queue a call to run at the end of the next update
    pub fn delayed_call(&mut self, call: impl FnOnce(&mut SequenceController) + 'static) {
        self.inbox.borrow_mut().delayed.push(Box::new(call));
    }

    /// Number of sequences being driven
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether nothing is active and nothing is queued
    pub fn is_idle(&self) -> bool {
        let inbox = self.inbox.borrow();
        self.active.is_empty() && inbox.added.is_empty() && inbox.delayed.is_empty()
    }

    /// Updates performed so far
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Drive all sequences by one frame
    pub fn update(&mut self, delta_time: f32) -> UpdateReport {
        let mut report = UpdateReport::default();
        let delta_time = self.settings.effective_delta(delta_time);

        let added = std::mem::take(&mut self.inbox.borrow_mut().added);
        for id in added {
            let Some(sequence) = self.sequences.get_mut(&id) else {
                tracing::warn!("Ignoring play request for unregistered sequence {:?}", id);
                continue;
            };
            if sequence.is_active() || self.active.contains(&id) {
                tracing::warn!(sequence = %sequence.name, "Sequence already active, ignoring duplicate play request");
                continue;
            }
            sequence.on_activate();
            self.active.push(id);
            report.activated += 1;
        }

        let active = self.active.clone();
        for id in active {
            let Some(sequence) = self.sequences.get_mut(&id) else {
                self.active.retain(|&other| other != id);
                continue;
            };

            if sequence.is_stopping() {
                sequence.on_stop();
                self.active.retain(|&other| other != id);
                report.stopped += 1;
            } else if !sequence.is_paused() {
                let tick = sequence.tick(delta_time);
                report.ticked += 1;
                if tick.truncated {
                    report.truncated += 1;
                }
            }
        }

        let delayed = std::mem::take(&mut self.inbox.borrow_mut().delayed);
        report.delayed_calls = delayed.len();
        for call in delayed {
            call(&mut *self);
        }

        self.frame += 1;
        tracing::trace!(frame = self.frame, ?report, "Controller update");
        report
    }
}

impl Default for SequenceController {
    fn default() -> Self {
        Self::new(ControllerSettings::default())
    }
}

impl fmt::Debug for SequenceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceController")
            .field("settings", &self.settings)
            .field("sequences", &self.sequences.len())
            .field("active", &self.active)
            .field("frame", &self.frame)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::testing::ProbeClip;
    use crate::events::SequenceEvent;
    use crate::node::ClipNode;
    use crate::sequence::SequenceFlags;

    fn held_sequence() -> (Sequence, std::rc::Rc<RefCell<Option<crate::clip::ClipEnd>>>) {
        let mut sequence = Sequence::new("Held");
        let probe = ProbeClip::held();
        let held = probe.held.clone();
        sequence.add_new_clip_node(probe);
        (sequence, held)
    }

    fn record(sequence: &mut Sequence) -> Rc<RefCell<Vec<SequenceEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        sequence.events().subscribe(move |event| {
            if matches!(event, SequenceEvent::Played | SequenceEvent::Completed) {
                sink.borrow_mut().push(event.clone());
            }
        });
        log
    }

    #[test]
    fn test_play_activates_on_next_update() {
        let mut controller = SequenceController::default();
        let (sequence, _held) = held_sequence();
        let id = controller.add_sequence(sequence);

        controller.play(id).unwrap();
        assert!(!controller.sequence(id).unwrap().is_active());
        assert!(!controller.is_idle());

        let report = controller.update(0.016);
        assert_eq!(report.activated, 1);
        assert_eq!(report.ticked, 1);
        assert!(controller.sequence(id).unwrap().is_playing());
        assert_eq!(controller.active_count(), 1);
    }

    #[test]
    fn test_play_active_sequence_fails() {
        let mut controller = SequenceController::default();
        let (sequence, _held) = held_sequence();
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();
        controller.update(0.016);

        assert_eq!(controller.play(id), Err(PlaybackError::AlreadyActive));
        let report = controller.update(0.016);
        assert_eq!(report.activated, 0);
    }

    #[test]
    fn test_duplicate_play_requests_activate_once() {
        let mut controller = SequenceController::default();
        let (mut sequence, _held) = held_sequence();
        let log = record(&mut sequence);
        let id = controller.add_sequence(sequence);

        controller.play(id).unwrap();
        controller.play(id).unwrap();
        let report = controller.update(0.016);
        assert_eq!(report.activated, 1);
        assert_eq!(*log.borrow(), vec![SequenceEvent::Played]);
    }

    #[test]
    fn test_empty_sequence_never_activates() {
        let mut controller = SequenceController::default();
        let id = controller.add_sequence(Sequence::new("Empty"));
        controller.play(id).unwrap();
        controller.update(0.016);
        assert!(!controller.sequence(id).unwrap().is_active());
        assert!(controller.is_idle());
    }

    #[test]
    fn test_stop_is_deferred() {
        let mut controller = SequenceController::default();
        let (mut sequence, _held) = held_sequence();
        let log = record(&mut sequence);
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();
        controller.update(0.016);

        controller.stop(id).unwrap();
        assert!(controller.sequence(id).unwrap().is_stopping());
        assert_eq!(*log.borrow(), vec![SequenceEvent::Played]);

        let report = controller.update(0.016);
        assert_eq!(report.stopped, 1);
        assert_eq!(report.ticked, 0);
        assert!(!controller.sequence(id).unwrap().is_active());
        assert_eq!(*log.borrow(), vec![SequenceEvent::Played, SequenceEvent::Completed]);
        assert!(controller.is_idle());
    }

    #[test]
    fn test_paused_sequence_is_skipped() {
        let mut controller = SequenceController::default();
        let mut sequence = Sequence::new("Paused");
        let probe = ProbeClip::held();
        let ticks = probe.ticks.clone();
        sequence.add_new_clip_node(probe);
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();
        controller.update(0.016);

        controller.sequence_mut(id).unwrap().pause();
        controller.update(0.016);
        controller.update(0.016);
        assert_eq!(ticks.get(), 0);

        controller.sequence_mut(id).unwrap().resume();
        controller.update(0.016);
        assert_eq!(ticks.get(), 1);
    }

    #[test]
    fn test_stop_while_paused_still_tears_down() {
        let mut controller = SequenceController::default();
        let (sequence, _held) = held_sequence();
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();
        controller.update(0.016);

        let sequence = controller.sequence_mut(id).unwrap();
        sequence.pause();
        sequence.stop().unwrap();
        let report = controller.update(0.016);
        assert_eq!(report.stopped, 1);
        assert!(controller.sequence(id).unwrap().flags().is_empty());
    }

    #[test]
    fn test_play_or_restart_cycles_once() {
        let mut controller = SequenceController::default();
        let (mut sequence, _held) = held_sequence();
        let log = record(&mut sequence);
        let id = controller.add_sequence(sequence);

        // Inactive: same as play
        controller.play_or_restart(id).unwrap();
        controller.update(0.016);
        assert_eq!(*log.borrow(), vec![SequenceEvent::Played]);

        controller.play_or_restart(id).unwrap();
        let report = controller.update(0.016);
        assert_eq!(report.stopped, 1);
        assert_eq!(report.delayed_calls, 1);
        assert_eq!(report.activated, 0);

        let report = controller.update(0.016);
        assert_eq!(report.activated, 1);
        controller.update(0.016);

        assert_eq!(
            *log.borrow(),
            vec![SequenceEvent::Played, SequenceEvent::Completed, SequenceEvent::Played]
        );
        assert!(controller.sequence(id).unwrap().is_active());
    }

    #[test]
    fn test_completed_sequence_is_torn_down() {
        let mut controller = SequenceController::default();
        let mut sequence = Sequence::new("Instant");
        sequence.add_node(ClipNode::new("A", ProbeClip::instant()).with_play_next_after_finish());
        sequence.add_node(ClipNode::new("B", ProbeClip::instant()).with_play_next_after_finish());
        let log = record(&mut sequence);
        let id = controller.add_sequence(sequence);

        controller.play(id).unwrap();
        controller.update(0.016);
        assert!(controller.sequence(id).unwrap().is_stopping());
        controller.update(0.016);
        assert!(controller.is_idle());
        assert_eq!(*log.borrow(), vec![SequenceEvent::Played, SequenceEvent::Completed]);

        // Can be played again
        controller.play(id).unwrap();
        controller.update(0.016);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_delayed_call_runs_after_ticks() {
        let mut controller = SequenceController::default();
        let ran = Rc::new(RefCell::new(Vec::new()));
        let sink = ran.clone();
        controller.delayed_call(move |controller| sink.borrow_mut().push(controller.frame()));
        assert!(ran.borrow().is_empty());

        controller.update(0.016);
        controller.update(0.016);
        assert_eq!(*ran.borrow(), vec![0]);
    }

    #[test]
    fn test_dropped_controller_disconnects() {
        let (mut sequence, _held) = held_sequence();
        let controller = SequenceController::default();
        sequence.controller = controller.link();
        assert!(sequence.controller.is_connected());
        drop(controller);
        assert_eq!(sequence.play(), Err(PlaybackError::NoController));
    }

    #[test]
    fn test_remove_sequence() {
        let mut controller = SequenceController::default();
        let (sequence, _held) = held_sequence();
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();
        controller.update(0.016);

        let mut removed = controller.remove_sequence(id).unwrap();
        assert_eq!(controller.active_count(), 0);
        assert!(controller.sequence(id).is_none());
        assert_eq!(controller.play(id), Err(PlaybackError::UnknownSequence(id)));
        assert!(!removed.controller.is_connected());
        assert!(!removed.is_active());
        assert_eq!(removed.stop(), Err(PlaybackError::NotActive));
    }

    #[test]
    fn test_readded_sequence_plays_again() {
        let mut controller = SequenceController::default();
        let (mut sequence, _held) = held_sequence();
        let log = record(&mut sequence);
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();
        controller.update(0.016);

        let removed = controller.remove_sequence(id).unwrap();
        assert_eq!(removed.flags(), SequenceFlags::empty());
        assert_eq!(*log.borrow(), vec![SequenceEvent::Played, SequenceEvent::Completed]);

        let id = controller.add_sequence(removed);
        controller.play(id).unwrap();
        controller.update(0.016);
        assert!(controller.sequence(id).unwrap().is_playing());
        assert_eq!(controller.active_count(), 1);
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn test_time_scale_applies() {
        let mut controller = SequenceController::new(ControllerSettings {
            time_scale: 0.5,
            max_delta_time: 1.0,
        });
        let mut sequence = Sequence::new("Scaled");
        let probe = ProbeClip::instant();
        let starts = probe.starts.clone();
        sequence.add_node(ClipNode::new("Late", probe).with_delay(0.5));
        let id = controller.add_sequence(sequence);
        controller.play(id).unwrap();

        controller.update(0.6);
        assert_eq!(starts.get(), 0);
        controller.update(0.6);
        assert_eq!(starts.get(), 1);
    }
}
