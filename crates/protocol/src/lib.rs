//! Records shared between the controller core and the things around it: the
//! settings store, the status reporter and the bench.

#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;

use serde::{Deserialize, Serialize};

/// Speed override that leaves the programmed speed alone, in percent.
pub const DEFAULT_SPEED_OVERRIDE: u8 = 100;
pub const MIN_SPEED_OVERRIDE: u8 = 10;
pub const MAX_SPEED_OVERRIDE: u8 = 200;

/// Maximum number of pieces in a piecewise-linear speed calibration.
pub const MAX_RPM_SEGMENTS: usize = 4;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleState {
    #[default]
    Disabled,
    Clockwise,
    Counterclockwise,
}

/// What the machine as a whole is doing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MachineMode {
    #[default]
    Idle = 0,
    Alarm,
    /// Dry run: programs are parsed but nothing moves or switches on.
    CheckMode,
    Homing,
    Cycle,
    Hold,
    Jog,
    SafetyDoor,
    Sleep,
}

impl MachineMode {
    pub fn from_u8(v: u8) -> Option<MachineMode> {
        use MachineMode::*;
        Some(match v {
            0 => Idle,
            1 => Alarm,
            2 => CheckMode,
            3 => Homing,
            4 => Cycle,
            5 => Hold,
            6 => Jog,
            7 => SafetyDoor,
            8 => Sleep,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        use MachineMode::*;
        match self {
            Idle => "Idle",
            Alarm => "Alarm",
            CheckMode => "Check",
            Homing => "Home",
            Cycle => "Run",
            Hold => "Hold",
            Jog => "Jog",
            SafetyDoor => "Door",
            Sleep => "Sleep",
        }
    }
}

impl fmt::Display for MachineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One piece of a piecewise-linear speed calibration.
///
/// Within the piece, `duty = slope * rpm - offset`. The piece covers speeds
/// up to `rpm_upper`, where the next piece takes over.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpmSegment {
    pub slope: f32,
    pub offset: f32,
    pub rpm_upper: f32,
}

/// Spindle calibration, as kept by the settings store.
///
/// The controller core reads these but never changes them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Speed that corresponds to the smallest non-zero duty. If this isn't
    /// smaller than `rpm_max`, the spindle is only ever fully on or fully off.
    pub rpm_min: f32,
    pub rpm_max: f32,
    /// In laser mode, counterclockwise means "accessory on, beam off".
    pub laser_mode: bool,
    /// Servo duty that lifts the pen.
    pub pen_top: u16,
    /// Servo duty that puts the pen down.
    #[serde(alias = "pen_button")]
    pub pen_bottom: u16,
    /// Piecewise calibration, ordered by increasing `rpm_upper`. Only used
    /// when the spindle is configured for piecewise calibration.
    pub rpm_segments: heapless::Vec<RpmSegment, MAX_RPM_SEGMENTS>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rpm_min: 1.0,
            rpm_max: 2000.0,
            laser_mode: false,
            pen_top: 115,
            pen_bottom: 138,
            rpm_segments: heapless::Vec::new(),
        }
    }
}

/// A snapshot of the runtime state, for the status reporter.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub mode: MachineMode,
    pub abort: bool,
    pub spindle: SpindleState,
    pub spindle_speed: f32,
    pub speed_override: u8,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}|S:{:.0}|Ov:{}",
            self.mode, self.spindle_speed, self.speed_override
        )?;
        match self.spindle {
            SpindleState::Disabled => {}
            SpindleState::Clockwise => f.write_str("|A:S")?,
            SpindleState::Counterclockwise => f.write_str("|A:C")?,
        }
        if self.abort {
            f.write_str("|Abort")?;
        }
        f.write_str(">")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_round_trip() {
        for v in 0..=8 {
            let mode = MachineMode::from_u8(v).unwrap();
            assert_eq!(mode as u8, v);
        }
        assert_eq!(MachineMode::from_u8(9), None);
    }

    #[test]
    fn partial_settings() {
        let settings: Settings = toml::from_str(
            r#"
            rpm_max = 12000.0
            pen_button = 140

            [[rpm_segments]]
            slope = 0.5
            offset = 10.0
            rpm_upper = 400.0
            "#,
        )
        .unwrap();
        assert_eq!(settings.rpm_max, 12000.0);
        assert_eq!(settings.rpm_min, 1.0);
        assert_eq!(settings.pen_bottom, 140);
        assert_eq!(settings.pen_top, 115);
        assert_eq!(settings.rpm_segments.len(), 1);
        assert!(!settings.laser_mode);
    }

    #[test]
    fn status_line() {
        let mut status = Status {
            mode: MachineMode::Cycle,
            abort: false,
            spindle: SpindleState::Clockwise,
            spindle_speed: 1000.0,
            speed_override: 100,
        };
        assert_eq!(status.to_string(), "<Run|S:1000|Ov:100|A:S>");

        status.spindle = SpindleState::Disabled;
        status.spindle_speed = 0.0;
        status.mode = MachineMode::CheckMode;
        assert_eq!(status.to_string(), "<Check|S:0|Ov:100>");
    }
}
