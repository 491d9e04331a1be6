//! Parametric gain envelope
//!
//! A [`Fader`] maps a time value onto a gain between `from` and `to` over
//! `[time_start, time_end]`, shaped by an exponent. Upward ramps follow
//! `progress^factor`; downward ramps follow `(1 - progress)^factor` mapped
//! symmetrically, so the same factor gives mirror-image in/out curves.
//!
//! The envelope fires its completion callback exactly once when time passes
//! the end, then resets to `reset_to` (or the idle value) so the next
//! `start` begins from a known state. The post-processor uses this for
//! karaoke mix transitions; hosts can drive their own envelopes with it.

/// One-shot completion callback
pub type FadeDone = Box<dyn FnOnce() + Send>;

/// Parametric gain envelope with start/end times and curve factor
pub struct Fader {
    /// Value reported while no ramp is configured
    normal_value: Option<f32>,
    value: f32,

    time_start: f64,
    time_end: f64,
    from: f32,
    to: f32,
    factor: f32,

    reset_to: Option<f32>,

    reversed: bool,
    started: bool,
    always_reset_time: bool,

    callback: Option<FadeDone>,
}

impl Fader {
    /// Create an idle fader. `normal_value` is the gain reported while no
    /// ramp is active; pass `None` to keep whatever value the last ramp
    /// settled on.
    pub fn new(normal_value: Option<f32>) -> Self {
        Self {
            normal_value,
            value: normal_value.unwrap_or(0.0),
            time_start: -1.0,
            time_end: -1.0,
            from: 0.0,
            to: 0.0,
            factor: 1.0,
            reset_to: None,
            reversed: false,
            started: false,
            always_reset_time: false,
            callback: None,
        }
    }

    pub fn time_start(&self) -> f64 {
        self.time_start
    }

    pub fn time_end(&self) -> f64 {
        self.time_end
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Configure and arm a ramp.
    ///
    /// `reset_to` is the value the fader snaps to once the ramp completes;
    /// `None` falls back to the idle value.
    pub fn start(
        &mut self,
        time_start: f64,
        time_end: f64,
        from: f32,
        to: f32,
        factor: f32,
        reset_to: Option<f32>,
        callback: Option<FadeDone>,
    ) {
        self.time_start = time_start;
        self.time_end = time_end;
        self.from = from;
        self.to = to;
        self.factor = factor;
        self.callback = callback;
        self.reset_to = reset_to;
        self.reversed = to < from;
        self.value = from;
        self.started = true;
    }

    /// True while a ramp is armed or `time` falls inside the ramp window
    pub fn should_update(&self, time: f64) -> bool {
        self.started || (time >= self.time_start && time <= self.time_end)
    }

    /// Evaluate the envelope at `time` and advance its state.
    ///
    /// Fires the completion callback (once) when `time` passes the end.
    pub fn update(&mut self, time: f64) -> f32 {
        let idle = self.normal_value.unwrap_or(self.value);

        if self.time_start < 0.0 || self.time_end < 0.0 {
            return idle;
        }

        if time < self.time_start {
            return idle;
        }

        let duration = self.time_end - self.time_start;
        let progress = if duration > 0.0 {
            ((time - self.time_start) / duration).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if duration > 0.0 {
            self.value = if self.reversed {
                (1.0 - progress).powf(self.factor as f64) as f32 * (self.from - self.to) + self.to
            } else {
                progress.powf(self.factor as f64) as f32 * (self.to - self.from) + self.from
            };
        } else {
            self.value = self.to;
        }

        if time >= self.time_end {
            self.stop();
        }

        self.value
    }

    /// Cancel the ramp, snapping to the configured reset value and firing
    /// the completion callback if the ramp was armed.
    pub fn stop(&mut self) {
        let reset_to = self.reset_to;
        self.reset(reset_to);

        if self.started {
            self.started = false;
            if let Some(callback) = self.callback.take() {
                callback();
            }
        }
    }

    /// Snap the value to `to_value` (or the idle value when `None`)
    pub fn reset(&mut self, to_value: Option<f32>) {
        if self.always_reset_time {
            self.reset_time();
        }

        if let Some(value) = to_value.or(self.normal_value) {
            self.value = value;
        }
    }

    /// Clear the ramp window so `update` reports the idle value again
    pub fn reset_time(&mut self) {
        self.time_start = -1.0;
        self.time_end = -1.0;
    }

    /// Always clear the ramp window when a ramp completes
    pub fn always_reset_time(&mut self, value: bool) {
        self.always_reset_time = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn idle_fader_reports_normal_value() {
        let mut fader = Fader::new(Some(1.0));
        assert_eq!(fader.update(0.0), 1.0);
        assert_eq!(fader.update(100.0), 1.0);
    }

    #[test]
    fn linear_upward_ramp() {
        let mut fader = Fader::new(Some(0.0));
        fader.start(1.0, 3.0, 0.0, 1.0, 1.0, None, None);

        assert_eq!(fader.update(0.5), 0.0); // before start: idle value
        assert!((fader.update(2.0) - 0.5).abs() < 1e-6);
        assert!((fader.update(2.99) - 0.995).abs() < 1e-3);
        // passing the end completes the ramp and snaps back to the idle value
        assert_eq!(fader.update(3.0), 0.0);
    }

    #[test]
    fn reversed_ramp_is_symmetric() {
        let mut down = Fader::new(None);
        down.start(0.0, 2.0, 1.0, 0.0, 2.0, None, None);
        let mut up = Fader::new(None);
        up.start(0.0, 2.0, 0.0, 1.0, 2.0, None, None);

        // (1-p)^2 down at t equals p^2 up at (2 - t)
        let d = down.update(0.5);
        let u = up.update(1.5);
        assert!((d - u).abs() < 1e-6);
    }

    #[test]
    fn completion_fires_exactly_once_and_resets() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        let mut fader = Fader::new(None);
        fader.start(
            0.0,
            1.0,
            0.0,
            1.0,
            1.0,
            Some(0.25),
            Some(Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        fader.update(0.5);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        let value = fader.update(1.5);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        // reset_to applied once the ramp completes
        assert_eq!(value, 0.25);

        fader.update(2.0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_duration_ramp_jumps_to_target() {
        let mut fader = Fader::new(None);
        fader.start(1.0, 1.0, 0.0, 0.8, 2.0, None, None);
        assert_eq!(fader.update(1.0), 0.8);
    }
}
