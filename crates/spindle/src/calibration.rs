//! Conversion from requested spindle speed to PWM duty.

use libm::{floorf, fmaxf, fminf};
use scara_protocol::{RpmSegment, Settings, MAX_RPM_SEGMENTS};
use serde::{Deserialize, Serialize};

/// The duty values that the PWM timer understands.
///
/// These are fixed by the timer hardware: `max` is its top value, and `min` is
/// the smallest duty that still counts as "on".
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmRange {
    pub off: u16,
    pub min: u16,
    pub max: u16,
}

impl Default for PwmRange {
    // An 8-bit fast PWM timer.
    fn default() -> Self {
        PwmRange {
            off: 0,
            min: 1,
            max: 255,
        }
    }
}

impl PwmRange {
    pub fn span(&self) -> u16 {
        self.max.saturating_sub(self.min)
    }

    fn clamp(&self, duty: f32) -> u16 {
        fminf(fmaxf(duty, self.min as f32), self.max as f32) as u16
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedModel {
    /// A straight line from `(rpm_min, pwm.min)` to `(rpm_max, pwm.max)`.
    #[default]
    Linear,
    /// The lines in [`Settings::rpm_segments`].
    Piecewise,
}

/// A speed and the duty that produces it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Duty {
    /// The speed that the spindle will actually turn at, after clamping.
    pub rpm: f32,
    pub value: u16,
}

#[derive(Clone, Debug)]
enum Curve {
    OnOff,
    Linear { gradient: f32 },
    Piecewise(heapless::Vec<RpmSegment, MAX_RPM_SEGMENTS>),
}

/// Speed calibration, derived from the settings whenever they change.
#[derive(Clone, Debug)]
pub struct Calibration {
    rpm_min: f32,
    rpm_max: f32,
    pwm: PwmRange,
    curve: Curve,
}

impl Calibration {
    pub fn new(settings: &Settings, model: SpeedModel, pwm: PwmRange) -> Self {
        let curve = match model {
            SpeedModel::Piecewise if !settings.rpm_segments.is_empty() => {
                Curve::Piecewise(settings.rpm_segments.clone())
            }
            SpeedModel::Piecewise => {
                log::warn!("piecewise speed model has no segments, using a linear one");
                Self::linear(settings, pwm)
            }
            SpeedModel::Linear => Self::linear(settings, pwm),
        };
        Calibration {
            rpm_min: settings.rpm_min,
            rpm_max: settings.rpm_max,
            pwm,
            curve,
        }
    }

    /// A calibration for a spindle that can only be switched on and off.
    pub fn on_off(settings: &Settings, pwm: PwmRange) -> Self {
        Calibration {
            rpm_min: settings.rpm_min,
            rpm_max: settings.rpm_max,
            pwm,
            curve: Curve::OnOff,
        }
    }

    fn linear(settings: &Settings, pwm: PwmRange) -> Curve {
        Curve::Linear {
            gradient: pwm.span() as f32 / (settings.rpm_max - settings.rpm_min),
        }
    }

    fn off(&self) -> Duty {
        Duty {
            rpm: 0.0,
            value: self.pwm.off,
        }
    }

    fn full(&self) -> Duty {
        Duty {
            rpm: self.rpm_max,
            value: self.pwm.max,
        }
    }

    // The fixed answers at and beyond the ends of the speed range, or `None` if
    // `rpm` is strictly inside it.
    fn boundary(&self, rpm: f32) -> Option<Duty> {
        // With no usable range, the best we can do is switch fully on.
        if self.rpm_min >= self.rpm_max || rpm >= self.rpm_max {
            Some(self.full())
        } else if rpm <= 0.0 {
            Some(self.off())
        } else if rpm <= self.rpm_min {
            Some(Duty {
                rpm: self.rpm_min,
                value: self.pwm.min,
            })
        } else {
            None
        }
    }

    /// The duty for a requested speed. A speed that isn't a number stops the
    /// spindle.
    pub fn duty(&self, rpm: f32) -> Duty {
        if rpm.is_nan() {
            return self.off();
        }

        let value = match &self.curve {
            Curve::OnOff => return if rpm > 0.0 { self.full() } else { self.off() },
            Curve::Linear { gradient } => match self.boundary(rpm) {
                Some(duty) => return duty,
                None => floorf((rpm - self.rpm_min) * gradient) + self.pwm.min as f32,
            },
            Curve::Piecewise(segments) => match self.boundary(rpm) {
                Some(duty) => return duty,
                None => {
                    let seg = active_segment(segments, rpm);
                    floorf(seg.slope * rpm - seg.offset)
                }
            },
        };
        Duty {
            rpm,
            value: self.pwm.clamp(value),
        }
    }
}

// Checks the highest piece first: a speed belongs to the first piece whose
// lower neighbour's breakpoint it exceeds.
fn active_segment(segments: &[RpmSegment], rpm: f32) -> &RpmSegment {
    segments
        .windows(2)
        .rev()
        .find(|pair| rpm > pair[0].rpm_upper)
        .map(|pair| &pair[1])
        .unwrap_or(&segments[0])
}
