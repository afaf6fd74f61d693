//! Scheduled parameter segments.
//!
//! An [`Automator`] supplies a property's value over a span of simulation
//! time. Before it can be evaluated it must be started with the value and time
//! in effect immediately before it, which is how ramps stay continuous with
//! whatever preceded them.

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Curve {
    /// Jump to `value` at the scheduled time.
    Set { value: f64 },
    /// Interpolate from the starting value to `target`, arriving at the
    /// scheduled time.
    LinearRamp { target: f64, delta: f64 },
    /// Piecewise-linear walk over evenly spaced points. `span` is the length
    /// the points were laid out over; it only differs from the automator's
    /// duration after a cancellation truncated the envelope.
    Envelope { points: Vec<f64>, span: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Automator {
    scheduled_time: f64,
    duration: f64,
    initial_value: f64,
    initial_time: f64,
    curve: Curve,
}

impl Automator {
    pub fn set(time: f64, value: f64) -> Self {
        Self::with_curve(time, 0.0, Curve::Set { value })
    }

    pub fn linear_ramp(time: f64, target: f64) -> Self {
        Self::with_curve(time, 0.0, Curve::LinearRamp { target, delta: 0.0 })
    }

    pub fn envelope(time: f64, duration: f64, points: Vec<f64>) -> Result<Self> {
        if points.is_empty() {
            return Err(EngineError::range("envelope needs at least one point"));
        }
        if !(duration > 0.0) {
            return Err(EngineError::range(format!(
                "envelope duration must be positive, got {duration}"
            )));
        }
        Ok(Self::with_curve(
            time,
            duration,
            Curve::Envelope {
                points,
                span: duration,
            },
        ))
    }

    fn with_curve(scheduled_time: f64, duration: f64, curve: Curve) -> Self {
        Self {
            scheduled_time,
            duration,
            initial_value: 0.0,
            initial_time: 0.0,
            curve,
        }
    }

    pub fn scheduled_time(&self) -> f64 {
        self.scheduled_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn end_time(&self) -> f64 {
        self.scheduled_time + self.duration
    }

    pub fn curve(&self) -> &Curve {
        &self.curve
    }

    /// Binds the automator to the value and time in effect just before it.
    pub fn start(&mut self, initial_value: f64, initial_time: f64) {
        self.initial_value = initial_value;
        self.initial_time = initial_time;
        if let Curve::LinearRamp { target, delta } = &mut self.curve {
            let span = self.scheduled_time - initial_time;
            *delta = if span > 0.0 {
                (*target - initial_value) / span
            } else {
                0.0
            };
        }
    }

    pub fn value(&self, time: f64) -> f64 {
        match &self.curve {
            Curve::Set { value } => {
                if time < self.scheduled_time {
                    self.initial_value
                } else {
                    *value
                }
            }
            Curve::LinearRamp { target, delta } => {
                if time <= self.initial_time || self.scheduled_time <= self.initial_time {
                    self.initial_value
                } else if time >= self.scheduled_time {
                    *target
                } else {
                    self.initial_value + (time - self.initial_time) * delta
                }
            }
            Curve::Envelope { points, span } => {
                if time < self.scheduled_time {
                    return self.initial_value;
                }
                let offset = (time - self.scheduled_time).min(self.duration);
                envelope_sample(points, *span, offset)
            }
        }
    }

    pub fn final_value(&self) -> f64 {
        match &self.curve {
            Curve::Set { value } => *value,
            Curve::LinearRamp { target, .. } => *target,
            Curve::Envelope { points, span } => envelope_sample(points, *span, self.duration),
        }
    }

    /// Whether the automator already shapes values before `time`. A ramp does
    /// so from the moment it starts, other curves from their scheduled time.
    pub(crate) fn starts_before(&self, time: f64) -> bool {
        match self.curve {
            Curve::LinearRamp { .. } => self.initial_time < time,
            _ => self.scheduled_time < time,
        }
    }

    /// Ends the automator early at `time`, keeping the shape before that
    /// point. An envelope stops at the cut. A ramp still heading for a later
    /// deadline keeps its slope and now ends at `time` on the value it has
    /// reached there.
    pub(crate) fn truncate(&mut self, time: f64) {
        match &mut self.curve {
            Curve::Envelope { .. } => {
                self.duration = (time - self.scheduled_time).clamp(0.0, self.duration);
            }
            Curve::LinearRamp { target, delta } => {
                if self.initial_time < time && time < self.scheduled_time {
                    *target = self.initial_value + (time - self.initial_time) * *delta;
                    self.scheduled_time = time;
                }
            }
            Curve::Set { .. } => {}
        }
    }
}

fn envelope_sample(points: &[f64], span: f64, offset: f64) -> f64 {
    let last = points.len().saturating_sub(1);
    if last == 0 {
        return points.first().copied().unwrap_or_default();
    }
    let interval = span / last as f64;
    let position = (offset / interval).max(0.0);
    let index = (position.floor() as usize).min(last);
    let next = (index + 1).min(last);
    let weight = (position - index as f64).clamp(0.0, 1.0);
    points[index] * (1.0 - weight) + points[next] * weight
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_holds_initial_until_scheduled() {
        let mut set = Automator::set(2.0, 4.0);
        set.start(1.0, 0.0);
        assert_eq!(set.value(1.9), 1.0);
        assert_eq!(set.value(2.0), 4.0);
        assert_eq!(set.final_value(), 4.0);
    }

    #[test]
    fn ramp_interpolates_towards_deadline() {
        let mut ramp = Automator::linear_ramp(4.0, 8.0);
        ramp.start(0.0, 0.0);
        assert_eq!(ramp.value(1.0), 2.0);
        assert_eq!(ramp.value(3.0), 6.0);
        assert_eq!(ramp.value(4.0), 8.0);
    }

    #[test]
    fn zero_length_ramp_starts_from_previous_value() {
        let mut ramp = Automator::linear_ramp(1.0, 8.0);
        ramp.start(3.0, 1.0);
        assert_eq!(ramp.value(1.0), 3.0);
        assert_eq!(ramp.final_value(), 8.0);
    }

    #[test]
    fn envelope_walks_points() {
        let mut env = Automator::envelope(0.0, 2.0, vec![0.0, 1.0, 0.0]).unwrap();
        env.start(0.0, 0.0);
        assert_eq!(env.value(0.5), 0.5);
        assert_eq!(env.value(1.0), 1.0);
        assert_eq!(env.value(1.5), 0.5);
        assert_eq!(env.value(9.0), 0.0);
    }

    #[test]
    fn truncated_envelope_freezes_at_cut() {
        let mut env = Automator::envelope(0.0, 2.0, vec![0.0, 1.0, 0.0]).unwrap();
        env.start(0.0, 0.0);
        env.truncate(0.5);
        assert_eq!(env.end_time(), 0.5);
        assert_eq!(env.final_value(), 0.5);
        assert_eq!(env.value(0.25), 0.25);
    }

    #[test]
    fn truncated_ramp_keeps_its_slope() {
        let mut ramp = Automator::linear_ramp(4.0, 8.0);
        ramp.start(0.0, 0.0);
        assert!(ramp.starts_before(1.0));
        ramp.truncate(1.0);
        assert_eq!(ramp.scheduled_time(), 1.0);
        assert_eq!(ramp.final_value(), 2.0);
        assert_eq!(ramp.value(0.5), 1.0);
        assert_eq!(ramp.value(3.0), 2.0);

        let mut set = Automator::set(2.0, 4.0);
        set.start(0.0, 0.0);
        assert!(!set.starts_before(2.0));
    }

    #[test]
    fn envelope_rejects_bad_input() {
        assert!(matches!(
            Automator::envelope(0.0, 1.0, Vec::new()),
            Err(EngineError::Range(_))
        ));
        assert!(Automator::envelope(0.0, 0.0, vec![1.0]).is_err());
    }
}
