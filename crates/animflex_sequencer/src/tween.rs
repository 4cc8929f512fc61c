// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tweening: easing curves, property targets and the tween clip.

use crate::clip::{Clip, ClipEnd, ClipError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Easing curve applied to normalized tween time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Ease {
    /// Constant speed
    #[default]
    Linear,
    /// Quadratic, accelerating
    QuadIn,
    /// Quadratic, decelerating
    QuadOut,
    /// Quadratic, accelerating then decelerating
    QuadInOut,
    /// Cubic, accelerating
    CubicIn,
    /// Cubic, decelerating
    CubicOut,
    /// Cubic, accelerating then decelerating
    CubicInOut,
    /// Sinusoidal, accelerating then decelerating
    SineInOut,
    /// Holds the start value until the end
    Step,
    /// 1D cubic bezier from 0 to 1 with two inner control values
    Bezier {
        /// First control value
        p1: f32,
        /// Second control value
        p2: f32,
    },
}

impl Ease {
    /// Map `t` in `[0, 1]` to eased progress
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::QuadIn => t * t,
            Self::QuadOut => t * (2.0 - t),
            Self::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    -1.0 + (4.0 - 2.0 * t) * t
                }
            }
            Self::CubicIn => t * t * t,
            Self::CubicOut => {
                let u = t - 1.0;
                u * u * u + 1.0
            }
            Self::CubicInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    let u = 2.0 * t - 2.0;
                    0.5 * u * u * u + 1.0
                }
            }
            Self::SineInOut => -0.5 * ((std::f32::consts::PI * t).cos() - 1.0),
            Self::Step => {
                if t >= 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Bezier { p1, p2 } => cubic_bezier(0.0, p1, p2, 1.0, t),
        }
    }
}

/// Blend from `a` to `b`; exact at both ends
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a * (1.0 - t) + b * t
}

/// One-dimensional cubic bezier through `p0` and `p3`, evaluated by
/// repeated blending of the control polygon
pub fn cubic_bezier(p0: f32, p1: f32, p2: f32, p3: f32, t: f32) -> f32 {
    let (a, b, c) = (lerp(p0, p1, t), lerp(p1, p2, t), lerp(p2, p3, t));
    lerp(lerp(a, b, t), lerp(b, c, t), t)
}

/// Something a tween can drive
pub trait TweenTarget: fmt::Debug {
    /// Current value
    fn get(&self) -> f32;
    /// Write a new value
    fn set(&mut self, value: f32);
}

/// Shared table of named animatable values.
///
/// Clones refer to the same table.
#[derive(Debug, Clone, Default)]
pub struct PropertyStore(Rc<RefCell<IndexMap<String, f32>>>);

impl PropertyStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, creating it if needed
    pub fn set(&self, name: impl Into<String>, value: f32) {
        self.0.borrow_mut().insert(name.into(), value);
    }

    /// Read a property
    pub fn get(&self, name: &str) -> Option<f32> {
        self.0.borrow().get(name).copied()
    }

    /// Whether a property exists
    pub fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    /// Handle to an existing property
    pub fn handle(&self, name: &str) -> Option<PropertyHandle> {
        self.contains(name).then(|| PropertyHandle {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    /// Copy of all properties in insertion order
    pub fn snapshot(&self) -> Vec<(String, f32)> {
        self.0
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), *value))
            .collect()
    }
}

/// A named property inside a [`PropertyStore`]
#[derive(Debug, Clone)]
pub struct PropertyHandle {
    store: PropertyStore,
    name: String,
}

impl PropertyHandle {
    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TweenTarget for PropertyHandle {
    fn get(&self) -> f32 {
        self.store.get(&self.name).unwrap_or_default()
    }

    fn set(&mut self, value: f32) {
        self.store.set(self.name.clone(), value);
    }
}

#[derive(Debug)]
struct Running {
    start: f32,
    target: f32,
    elapsed: f32,
    end: ClipEnd,
}

/// Clip that animates a value over time
#[derive(Debug)]
pub struct TweenClip<T: TweenTarget> {
    target: T,
    /// Start value, or the target's current value when `None`
    pub from: Option<f32>,
    /// End value
    pub to: f32,
    /// Seconds from start to end
    pub duration: f32,
    /// Easing curve
    pub ease: Ease,
    /// Treat `to` as an offset from the value at start
    pub relative: bool,
    running: Option<Running>,
}

impl<T: TweenTarget> TweenClip<T> {
    /// Tween `target` from its current value to `to`
    pub fn new(target: T, to: f32, duration: f32) -> Self {
        Self {
            target,
            from: None,
            to,
            duration,
            ease: Ease::Linear,
            relative: false,
            running: None,
        }
    }

    /// Start from a fixed value
    pub fn starting_at(mut self, from: f32) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the easing curve
    pub fn with_ease(mut self, ease: Ease) -> Self {
        self.ease = ease;
        self
    }

    /// Treat `to` as an offset
    pub fn relative(mut self) -> Self {
        self.relative = true;
        self
    }

    /// Driven target
    pub fn target(&self) -> &T {
        &self.target
    }
}

impl<T: TweenTarget> Clip for TweenClip<T> {
    fn kind(&self) -> &'static str {
        "tween"
    }

    fn on_start(&mut self, end: ClipEnd) {
        let current = self.target.get();
        let start = self.from.unwrap_or(current);
        let target = if self.relative { current + self.to } else { self.to };

        if self.duration <= 0.0 {
            self.running = None;
            self.target.set(target);
            end.end();
            return;
        }

        self.target.set(start);
        self.running = Some(Running {
            start,
            target,
            elapsed: 0.0,
            end,
        });
    }

    fn on_tick(&mut self, delta_time: f32) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        running.elapsed += delta_time;
        let t = (running.elapsed / self.duration).min(1.0);
        self.target
            .set(lerp(running.start, running.target, self.ease.apply(t)));

        if t >= 1.0 {
            if let Some(running) = self.running.take() {
                running.end.end();
            }
        }
    }

    fn on_validate(&mut self) -> Result<(), ClipError> {
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ClipError::InvalidDuration(self.duration));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_ease_endpoints() {
        let eases = [
            Ease::Linear,
            Ease::QuadIn,
            Ease::QuadOut,
            Ease::QuadInOut,
            Ease::CubicIn,
            Ease::CubicOut,
            Ease::CubicInOut,
            Ease::SineInOut,
            Ease::Bezier { p1: 0.2, p2: 0.9 },
        ];
        for ease in eases {
            assert!(approx(ease.apply(0.0), 0.0), "{ease:?} at 0");
            assert!(approx(ease.apply(1.0), 1.0), "{ease:?} at 1");
        }
        assert!(approx(Ease::QuadInOut.apply(0.5), 0.5));
        assert_eq!(Ease::Step.apply(0.99), 0.0);
        assert_eq!(Ease::Linear.apply(2.0), 1.0);
    }

    #[test]
    fn test_cubic_bezier() {
        assert_eq!(cubic_bezier(0.0, 0.0, 1.0, 1.0, 0.5), 0.5);
        // Control points above the end value overshoot in the middle
        assert!(cubic_bezier(0.0, 1.5, 1.5, 1.0, 0.5) > 1.0);
        assert_eq!(lerp(2.0, 4.0, 0.25), 2.5);
    }

    #[test]
    fn test_property_store_shared() {
        let store = PropertyStore::new();
        store.set("alpha", 1.0);
        let mut handle = store.handle("alpha").unwrap();
        handle.set(0.25);
        assert_eq!(store.get("alpha"), Some(0.25));
        assert!(store.handle("missing").is_none());
        assert_eq!(store.snapshot(), vec![("alpha".to_string(), 0.25)]);
    }

    #[test]
    fn test_tween_reaches_target_and_ends() {
        let store = PropertyStore::new();
        store.set("x", 0.0);
        let mut clip: Box<dyn Clip> =
            Box::new(TweenClip::new(store.handle("x").unwrap(), 10.0, 1.0));

        let ended = Rc::new(Cell::new(false));
        let flag = ended.clone();
        clip.play(move || flag.set(true));
        assert_eq!(store.get("x"), Some(0.0));

        clip.on_tick(0.5);
        assert!(approx(store.get("x").unwrap(), 5.0));
        assert!(!ended.get());

        clip.on_tick(0.6);
        assert_eq!(store.get("x"), Some(10.0));
        assert!(ended.get());

        // No further writes once finished
        store.set("x", 3.0);
        clip.on_tick(0.5);
        assert_eq!(store.get("x"), Some(3.0));
    }

    #[test]
    fn test_relative_tween_and_from() {
        let store = PropertyStore::new();
        store.set("y", 2.0);
        let mut clip = TweenClip::new(store.handle("y").unwrap(), 3.0, 0.0).relative();
        let end = ClipEnd::new(|| {});
        clip.on_start(end.clone());
        assert_eq!(store.get("y"), Some(5.0));
        assert!(end.has_ended());

        let mut clip = TweenClip::new(store.handle("y").unwrap(), 1.0, 1.0).starting_at(0.0);
        clip.on_start(ClipEnd::new(|| {}));
        assert_eq!(store.get("y"), Some(0.0));
    }

    #[test]
    fn test_validate_duration() {
        let store = PropertyStore::new();
        store.set("z", 0.0);
        let mut clip = TweenClip::new(store.handle("z").unwrap(), 1.0, -1.0);
        assert_eq!(clip.on_validate(), Err(ClipError::InvalidDuration(-1.0)));
        clip.duration = 0.5;
        assert_eq!(clip.on_validate(), Ok(()));
    }
}
