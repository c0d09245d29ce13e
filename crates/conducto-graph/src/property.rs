//! Animatable scalar properties.
//!
//! A [`Property`] wraps an `f64` value, notifies linked consumers on every
//! change, and can be keyframe-animated in sync with the graph clock. The
//! [`Animator`] advances once per block: it computes the elapsed
//! proportion of the current segment on the nanosecond clock,
//! interpolates through the segment's [`Easing`], and carries any overrun
//! into the next segment - and into a `when_done` re-arm - so chained
//! animations keep tempo instead of drifting.

use crate::easing::Easing;
use crate::graph::{Dependent, Timebase};

const TO_NANOS: f64 = 1_000_000_000.0;

enum Tick {
    Idle,
    Value(f64),
    Finished { value: f64, overrun: i64 },
}

/// Keyframe animation state of one property.
///
/// Builder methods return `&mut Self` for chaining:
/// `prop.to(&[1.0, 0.0]).in_secs(&[1.0, 0.25]).ease_in_out();`
pub struct Animator {
    targets: Vec<f64>,
    durations: Vec<i64>,
    easing: Vec<Easing>,
    index: usize,
    from_value: f64,
    from_time: i64,
    animating: bool,
    overrun: i64,
    when_done: Option<Box<dyn FnMut(&mut Property) + Send>>,
}

impl Animator {
    fn new() -> Self {
        Self {
            targets: Vec::new(),
            durations: vec![0],
            easing: vec![Easing::Linear],
            index: 0,
            from_value: 0.0,
            from_time: 0,
            animating: false,
            overrun: 0,
            when_done: None,
        }
    }

    /// Starts animating towards `targets`, one keyframe per value.
    /// Durations and easing reset to their defaults (instant, linear), so
    /// chain [`in_secs`](Self::in_secs) and an easing call after this.
    /// An empty target list stops the animation instead.
    ///
    /// The start point comes from the owning property, so this is only
    /// reachable through [`Property::to`].
    pub(crate) fn to(&mut self, targets: &[f64]) -> &mut Self {
        if targets.is_empty() {
            return self.stop();
        }
        self.targets = targets.to_vec();
        self.index = 0;
        self.durations = vec![0];
        self.easing = vec![Easing::Linear];
        self.animating = true;
        self
    }

    /// Sets the duration in seconds of each keyframe segment. Values are
    /// cycled when there are fewer durations than keyframes. Any overrun
    /// carried from a just-finished animation is deducted from the first
    /// segment so re-armed animations stay on tempo.
    pub fn in_secs(&mut self, seconds: &[f64]) -> &mut Self {
        if seconds.is_empty() {
            self.durations = vec![0];
        } else {
            self.durations = seconds.iter().map(|s| (s * TO_NANOS) as i64).collect();
            self.durations[0] = (self.durations[0] - self.overrun).max(0);
        }
        self
    }

    /// Sets the easing of each keyframe segment, cycled like durations.
    pub fn easing(&mut self, easing: &[Easing]) -> &mut Self {
        if easing.is_empty() {
            self.easing = vec![Easing::Linear];
        } else {
            self.easing = easing.to_vec();
        }
        self
    }

    /// Linear easing for all segments.
    pub fn linear(&mut self) -> &mut Self {
        self.easing(&[Easing::Linear])
    }

    /// Smooth easing for all segments.
    pub fn ease(&mut self) -> &mut Self {
        self.easing(&[Easing::Ease])
    }

    /// Accelerating easing for all segments.
    pub fn ease_in(&mut self) -> &mut Self {
        self.easing(&[Easing::EaseIn])
    }

    /// Decelerating easing for all segments.
    pub fn ease_out(&mut self) -> &mut Self {
        self.easing(&[Easing::EaseOut])
    }

    /// Accelerate-then-decelerate easing for all segments.
    pub fn ease_in_out(&mut self) -> &mut Self {
        self.easing(&[Easing::EaseInOut])
    }

    /// Stops animating, retaining the current value.
    pub fn stop(&mut self) -> &mut Self {
        self.index = 0;
        self.animating = false;
        self
    }

    /// Whether an animation is active.
    pub fn is_animating(&self) -> bool {
        self.animating
    }

    /// The overrun of the animation that just finished, in nanoseconds.
    /// Non-zero only while a `when_done` consumer runs.
    pub fn overrun(&self) -> i64 {
        self.overrun
    }

    fn start_from(&mut self, value: f64, now: i64) {
        self.from_value = value;
        self.from_time = now;
    }

    fn tick(&mut self, now: i64) -> Tick {
        if !self.animating || self.targets.is_empty() {
            return Tick::Idle;
        }
        let target = self.targets[self.index];
        let duration = self.durations[self.index % self.durations.len()];
        let proportion = if duration < 1 {
            1.0
        } else {
            (now - self.from_time) as f64 / duration as f64
        };
        if proportion >= 1.0 {
            self.index += 1;
            if self.index >= self.targets.len() {
                self.index = 0;
                self.animating = false;
                Tick::Finished {
                    value: target,
                    overrun: now - (self.from_time + duration),
                }
            } else {
                self.from_value = target;
                self.from_time += duration;
                Tick::Value(target)
            }
        } else if proportion > 0.0 {
            let ease = self.easing[self.index % self.easing.len()];
            let eased = ease.calculate(proportion);
            Tick::Value(eased * (target - self.from_value) + self.from_value)
        } else {
            Tick::Idle
        }
    }
}

/// A scalar value with change notification and keyframe animation locked
/// to the graph clock.
pub struct Property {
    value: f64,
    now: i64,
    links: Vec<Box<dyn FnMut(f64) + Send>>,
    animator: Option<Animator>,
}

impl Default for Property {
    fn default() -> Self {
        Self::new()
    }
}

impl Property {
    /// Creates a property with value 0.
    pub fn new() -> Self {
        Self {
            value: 0.0,
            now: 0,
            links: Vec::new(),
            animator: None,
        }
    }

    /// Sets the value, cancelling any active animation and notifying
    /// links.
    pub fn set(&mut self, value: f64) -> &mut Self {
        if let Some(animator) = &mut self.animator {
            animator.stop();
        }
        self.set_impl(value);
        self
    }

    /// The current value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Calls `consumer` with the value now and on every later change.
    pub fn link(&mut self, mut consumer: impl FnMut(f64) + Send + 'static) -> &mut Self {
        consumer(self.value);
        self.links.push(Box::new(consumer));
        self
    }

    /// Removes every linked consumer.
    pub fn clear_links(&mut self) -> &mut Self {
        self.links.clear();
        self
    }

    /// The property's animator, created on first use.
    pub fn animator(&mut self) -> &mut Animator {
        self.animator.get_or_insert_with(Animator::new)
    }

    /// Starts animating towards `targets`; shorthand for
    /// `animator().to(..)` with the start point captured from the current
    /// value and graph time.
    pub fn to(&mut self, targets: &[f64]) -> &mut Animator {
        let (value, now) = (self.value, self.now);
        let animator = self.animator();
        animator.to(targets);
        animator.start_from(value, now);
        animator
    }

    /// Registers a consumer called every time an animation finishes, with
    /// the finishing overrun visible through
    /// [`Animator::overrun`] so a restarted animation keeps phase. The
    /// consumer runs before the final keyframe value is applied: it still
    /// reads the last interpolated value, and an animation it starts
    /// picks up from there. If no animation is active the consumer runs
    /// immediately.
    pub fn when_done(&mut self, consumer: impl FnMut(&mut Property) + Send + 'static) -> &mut Self {
        let mut consumer = Box::new(consumer);
        if self.is_animating() {
            self.animator().when_done = Some(consumer);
        } else {
            consumer(self);
            self.animator().when_done = Some(consumer);
        }
        self
    }

    /// Whether a keyframe animation is running.
    pub fn is_animating(&self) -> bool {
        self.animator.as_ref().is_some_and(Animator::is_animating)
    }

    fn set_impl(&mut self, value: f64) {
        self.value = value;
        for link in &mut self.links {
            link(value);
        }
    }

    /// Runs the finish consumer, then applies the final keyframe value.
    /// The consumer observes the value from before the final set, so a
    /// re-arm started inside it animates from the last interpolated point.
    fn finish(&mut self, value: f64, overrun: i64) {
        let consumer = self
            .animator
            .as_mut()
            .and_then(|animator| animator.when_done.take());
        if let Some(mut consumer) = consumer {
            if let Some(animator) = &mut self.animator {
                animator.overrun = overrun;
            }
            consumer(self);
            if let Some(animator) = &mut self.animator {
                animator.overrun = 0;
                if animator.when_done.is_none() {
                    animator.when_done = Some(consumer);
                }
            }
        }
        self.set_impl(value);
    }
}

impl Dependent for Property {
    fn attach(&mut self, timebase: &Timebase) {
        self.now = timebase.nanos();
    }

    fn detach(&mut self, _timebase: &Timebase) {
        if let Some(animator) = &mut self.animator {
            animator.stop();
        }
    }

    fn update(&mut self, timebase: &Timebase) {
        self.now = timebase.nanos();
        let result = match &mut self.animator {
            Some(animator) => animator.tick(self.now),
            None => Tick::Idle,
        };
        match result {
            Tick::Idle => {}
            Tick::Value(value) => self.set_impl(value),
            Tick::Finished { value, overrun } => self.finish(value, overrun),
        }
    }
}
