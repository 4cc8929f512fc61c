// SPDX-License-Identifier: MIT OR Apache-2.0
//! Clip contract: the unit of work a clip node drives.
//!
//! A clip is started once per activation and reports completion by calling
//! [`ClipEnd::end`] on the handle it received in [`Clip::on_start`]. It may
//! end immediately inside `on_start`, on a later [`Clip::on_tick`], or from
//! anywhere else that holds a clone of the handle.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

type EndCallback = Box<dyn FnOnce()>;

/// Completion handle given to a clip when it starts.
///
/// The wrapped callback runs at most once. Clones share the same callback,
/// so a clip can hand a clone to whatever finishes its work.
#[derive(Clone)]
pub struct ClipEnd {
    callback: Rc<RefCell<Option<EndCallback>>>,
}

impl ClipEnd {
    /// Wrap a completion callback
    pub fn new(on_end: impl FnOnce() + 'static) -> Self {
        Self {
            callback: Rc::new(RefCell::new(Some(Box::new(on_end)))),
        }
    }

    /// Signal that the clip finished.
    ///
    /// Returns `false` without doing anything if the clip already ended.
    pub fn end(&self) -> bool {
        let callback = self.callback.borrow_mut().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => {
                tracing::warn!("Clip ended more than once in the same activation, ignoring");
                false
            }
        }
    }

    /// Whether [`end`](Self::end) has already been called
    pub fn has_ended(&self) -> bool {
        self.callback.borrow().is_none()
    }
}

impl fmt::Debug for ClipEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClipEnd")
            .field("ended", &self.has_ended())
            .finish()
    }
}

/// A single animatable unit of work
pub trait Clip: fmt::Debug {
    /// Short name of the clip kind, used in logs and validation reports
    fn kind(&self) -> &'static str;

    /// Begin work for a new activation.
    ///
    /// Instantaneous clips call `end.end()` before returning; multi-frame
    /// clips keep the handle and call it later.
    fn on_start(&mut self, end: ClipEnd);

    /// Advance a started clip by one frame
    fn on_tick(&mut self, _delta_time: f32) {}

    /// Author-time consistency check, never called while ticking
    fn on_validate(&mut self) -> Result<(), ClipError> {
        Ok(())
    }
}

impl dyn Clip {
    /// Store `on_end` as the completion callback and start the clip
    pub fn play(&mut self, on_end: impl FnOnce() + 'static) -> ClipEnd {
        let end = ClipEnd::new(on_end);
        self.on_start(end.clone());
        end
    }
}

/// Error reported by [`Clip::on_validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClipError {
    /// Duration is negative or not finite
    #[error("Invalid duration: {0}")]
    InvalidDuration(f32),

    /// Any other clip-specific problem
    #[error("{0}")]
    Invalid(String),
}
