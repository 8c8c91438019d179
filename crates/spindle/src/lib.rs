//! Spindle (or laser, or pen) control.
//!
//! The [`Spindle`] owns the tool's on/off/direction state and turns requested
//! speeds into duty cycles using a [`Calibration`]. Programs should go through
//! [`Spindle::sync`], which waits for queued motion to finish first; the
//! safety paths (reset, parking, program end) call [`Spindle::set_state`]
//! directly.

#![cfg_attr(not(feature = "std"), no_std)]

use scara_protocol::{MachineMode, Settings, SpindleState};
use serde::{Deserialize, Serialize};

pub mod calibration;
pub mod output;
pub mod system;

pub use calibration::{Calibration, Duty, PwmRange, SpeedModel};
pub use output::{Direction, NoPin, PinOutput, SpindleOutput};
pub use system::SystemState;

/// What kind of tool hangs off the spindle output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    /// PWM speed control.
    #[default]
    Variable,
    /// Just the enable line; the speed is ignored.
    OnOff,
    /// A hobby servo that lifts and drops a pen. The PWM output moves it
    /// between [`Settings::pen_top`] and [`Settings::pen_bottom`].
    ServoPen,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnablePin {
    #[default]
    Separate,
    /// The board has no direction line; the enable signal goes out on the
    /// direction pin instead.
    DirectionAsEnable,
}

/// How the spindle is wired up. Chosen once, when the board starts.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleConfig {
    pub tool: Tool,
    pub speed_model: SpeedModel,
    pub enable_pin: EnablePin,
    /// The enable line is active-low.
    pub invert_enable: bool,
    /// Switch the enable line off when the requested speed comes out as zero
    /// duty, instead of leaving the tool enabled and idling.
    pub off_with_zero_speed: bool,
    pub pwm: PwmRange,
}

/// Something that accumulates motion and executes it in the background.
#[allow(async_fn_in_trait)]
pub trait MotionQueue {
    /// Resolves once everything queued so far has been executed.
    async fn wait_until_empty(&mut self);
}

pub struct Spindle<O> {
    output: O,
    config: SpindleConfig,
    settings: Settings,
    calibration: Calibration,
    state: SpindleState,
}

impl<O: SpindleOutput> Spindle<O> {
    /// Takes over the output and puts it in the stopped state.
    pub fn new(output: O, config: SpindleConfig, settings: Settings) -> Self {
        let calibration = Self::calibrate(&config, &settings);
        let mut ret = Spindle {
            output,
            config,
            settings,
            calibration,
            state: SpindleState::Disabled,
        };
        ret.stop();
        ret
    }

    fn calibrate(config: &SpindleConfig, settings: &Settings) -> Calibration {
        match config.tool {
            Tool::OnOff => Calibration::on_off(settings, config.pwm),
            Tool::Variable | Tool::ServoPen => {
                Calibration::new(settings, config.speed_model, config.pwm)
            }
        }
    }

    /// Call this whenever the settings store changes.
    pub fn load_settings(&mut self, settings: Settings) {
        self.calibration = Self::calibrate(&self.config, &settings);
        self.settings = settings;
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn current_state(&self) -> SpindleState {
        self.state
    }

    /// The duty (and actual speed) for a requested speed, after applying the
    /// speed override.
    pub fn compute_duty(&self, sys: &SystemState, rpm: f32) -> Duty {
        let rpm = rpm * (sys.speed_override() as f32 / 100.0);
        self.calibration.duty(rpm)
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.output.set_enable(enabled != self.config.invert_enable);
    }

    /// Drives the outputs to their stopped configuration. The stored state is
    /// left alone.
    pub fn stop(&mut self) {
        match self.config.tool {
            Tool::ServoPen => {
                self.output.set_duty(self.settings.pen_top);
                self.set_enabled(true);
            }
            Tool::Variable | Tool::OnOff => {
                self.output.set_duty(self.config.pwm.off);
                self.set_enabled(false);
            }
        }
    }

    /// Immediately switches the spindle to `state` at `rpm`.
    ///
    /// Does nothing at all while the machine is aborting.
    pub fn set_state(&mut self, sys: &SystemState, state: SpindleState, mut rpm: f32) {
        if sys.abort() {
            log::debug!("ignoring spindle {state:?} during abort");
            return;
        }

        let dir = match state {
            SpindleState::Disabled => {
                sys.set_spindle_speed(0.0);
                self.stop();
                None
            }
            SpindleState::Clockwise => Some(Direction::Clockwise),
            SpindleState::Counterclockwise => Some(Direction::Counterclockwise),
        };

        if let Some(dir) = dir {
            if self.config.enable_pin == EnablePin::Separate {
                self.output.set_direction(dir);
            }
            // In laser mode, counterclockwise runs the accessories with the beam off.
            if self.settings.laser_mode && dir == Direction::Counterclockwise {
                rpm = 0.0;
            }

            let duty = self.compute_duty(sys, rpm);
            sys.set_spindle_speed(duty.rpm);
            log::debug!("spindle {dir:?} at {} rpm, duty {}", duty.rpm, duty.value);

            match self.config.tool {
                Tool::ServoPen => {
                    let pen = if duty.value == self.config.pwm.off {
                        self.settings.pen_top
                    } else {
                        self.settings.pen_bottom
                    };
                    self.output.set_duty(pen);
                    self.set_enabled(true);
                }
                Tool::Variable => {
                    self.output.set_duty(duty.value);
                    if self.config.off_with_zero_speed && duty.value == self.config.pwm.off {
                        self.stop();
                    } else {
                        self.set_enabled(true);
                    }
                }
                Tool::OnOff => {
                    self.output.set_duty(duty.value);
                    self.set_enabled(true);
                }
            }
        }

        self.state = state;
        sys.reset_report_counter();
    }

    /// Switches the spindle once all previously queued motion is done, so
    /// that no move runs with the wrong tool state. Does nothing in check mode.
    pub async fn sync<Q: MotionQueue>(
        &mut self,
        sys: &SystemState,
        queue: &mut Q,
        state: SpindleState,
        rpm: f32,
    ) {
        if sys.mode() == MachineMode::CheckMode {
            return;
        }
        queue.wait_until_empty().await;
        self.set_state(sys, state, rpm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use proptest::prelude::*;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Recorder {
        duty: Option<u16>,
        enable: Option<bool>,
        direction: Option<Direction>,
    }

    impl SpindleOutput for Recorder {
        fn set_duty(&mut self, duty: u16) {
            self.duty = Some(duty);
        }

        fn set_enable(&mut self, high: bool) {
            self.enable = Some(high);
        }

        fn set_direction(&mut self, dir: Direction) {
            self.direction = Some(dir);
        }
    }

    // Remembers what the spindle speed was when it was drained.
    struct Queue<'a> {
        sys: &'a SystemState,
        drained_at: Option<f32>,
    }

    impl MotionQueue for Queue<'_> {
        async fn wait_until_empty(&mut self) {
            self.drained_at = Some(self.sys.spindle_speed());
        }
    }

    fn spindle(config: SpindleConfig) -> Spindle<Recorder> {
        Spindle::new(Recorder::default(), config, Settings::default())
    }

    #[test]
    fn starts_stopped() {
        let s = spindle(SpindleConfig::default());
        assert_eq!(s.output().duty, Some(0));
        assert_eq!(s.output().enable, Some(false));
        assert_eq!(s.current_state(), SpindleState::Disabled);
    }

    #[test]
    fn clockwise() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig::default());
        sys.tick_report_counter();
        s.set_state(&sys, SpindleState::Clockwise, 1000.0);

        assert_eq!(s.output().duty, Some(127));
        assert_eq!(s.output().enable, Some(true));
        assert_eq!(s.output().direction, Some(Direction::Clockwise));
        assert_eq!(s.current_state(), SpindleState::Clockwise);
        assert_eq!(sys.spindle_speed(), 1000.0);
        assert_eq!(sys.report_counter(), 0);
    }

    #[test]
    fn override_scales_speed() {
        let sys = SystemState::new();
        sys.set_speed_override(50);
        let mut s = spindle(SpindleConfig::default());
        s.set_state(&sys, SpindleState::Counterclockwise, 2000.0);
        assert_eq!(s.output().duty, Some(127));
        assert_eq!(sys.spindle_speed(), 1000.0);
    }

    #[test]
    fn disable_with_inverted_enable() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig {
            invert_enable: true,
            ..SpindleConfig::default()
        });
        s.set_state(&sys, SpindleState::Clockwise, 500.0);
        assert_eq!(s.output().enable, Some(false));

        s.set_state(&sys, SpindleState::Disabled, 500.0);
        assert_eq!(s.output().duty, Some(0));
        assert_eq!(s.output().enable, Some(true));
        assert_eq!(sys.spindle_speed(), 0.0);
        assert_eq!(s.current_state(), SpindleState::Disabled);
    }

    #[test]
    fn abort_changes_nothing() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig::default());
        s.set_state(&sys, SpindleState::Clockwise, 1500.0);
        sys.tick_report_counter();
        sys.set_abort(true);

        let before = (s.output().clone(), sys.status(s.current_state()), sys.report_counter());
        s.set_state(&sys, SpindleState::Disabled, 0.0);
        s.set_state(&sys, SpindleState::Counterclockwise, 10.0);
        let after = (s.output().clone(), sys.status(s.current_state()), sys.report_counter());
        assert_eq!(before, after);
    }

    #[test]
    fn laser_counterclockwise_is_off() {
        let sys = SystemState::new();
        let settings = Settings {
            laser_mode: true,
            ..Settings::default()
        };
        let mut s = Spindle::new(Recorder::default(), SpindleConfig::default(), settings);
        s.set_state(&sys, SpindleState::Counterclockwise, 500.0);
        assert_eq!(sys.spindle_speed(), 0.0);
        assert_eq!(s.output().duty, Some(0));
        assert_eq!(s.current_state(), SpindleState::Counterclockwise);

        // Clockwise is the beam, and it still works.
        s.set_state(&sys, SpindleState::Clockwise, 500.0);
        assert_eq!(sys.spindle_speed(), 500.0);
    }

    #[test]
    fn zero_speed_switches_off() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig {
            off_with_zero_speed: true,
            ..SpindleConfig::default()
        });
        s.set_state(&sys, SpindleState::Clockwise, 0.0);
        assert_eq!(s.output().enable, Some(false));
        assert_eq!(s.current_state(), SpindleState::Clockwise);

        let mut s = spindle(SpindleConfig::default());
        s.set_state(&sys, SpindleState::Clockwise, 0.0);
        assert_eq!(s.output().enable, Some(true));
        assert_eq!(s.output().duty, Some(0));
    }

    #[test]
    fn nan_speed_is_zero() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig::default());
        s.set_state(&sys, SpindleState::Clockwise, f32::NAN);
        assert_eq!(s.output().duty, Some(0));
        assert_eq!(sys.spindle_speed(), 0.0);
        assert_eq!(sys.status(s.current_state()).to_string(), "<Idle|S:0|Ov:100|A:S>");
    }

    #[test]
    fn direction_as_enable() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig {
            enable_pin: EnablePin::DirectionAsEnable,
            ..SpindleConfig::default()
        });
        s.set_state(&sys, SpindleState::Counterclockwise, 800.0);
        assert_eq!(s.output().direction, None);
        assert_eq!(s.output().enable, Some(true));
    }

    #[test]
    fn servo_pen() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig {
            tool: Tool::ServoPen,
            ..SpindleConfig::default()
        });
        assert_eq!(s.output().duty, Some(115));
        assert_eq!(s.output().enable, Some(true));

        s.set_state(&sys, SpindleState::Clockwise, 1000.0);
        assert_eq!(s.output().duty, Some(138));
        s.set_state(&sys, SpindleState::Clockwise, 0.0);
        assert_eq!(s.output().duty, Some(115));
        s.set_state(&sys, SpindleState::Clockwise, 1000.0);
        s.set_state(&sys, SpindleState::Disabled, 0.0);
        assert_eq!(s.output().duty, Some(115));
        assert_eq!(s.output().enable, Some(true));
    }

    #[test]
    fn on_off_ignores_speed() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig {
            tool: Tool::OnOff,
            ..SpindleConfig::default()
        });
        s.set_state(&sys, SpindleState::Clockwise, 0.0);
        assert_eq!(s.output().enable, Some(true));

        s.set_state(&sys, SpindleState::Clockwise, 12.0);
        assert_eq!(s.output().enable, Some(true));
        assert_eq!(sys.spindle_speed(), 2000.0);
    }

    #[test]
    fn new_settings_recalibrate() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig::default());
        s.load_settings(Settings {
            rpm_min: 1000.0,
            rpm_max: 1000.0,
            ..Settings::default()
        });
        assert_eq!(s.compute_duty(&sys, 10.0).value, 255);
        // Loading settings doesn't touch the outputs.
        assert_eq!(s.output().duty, Some(0));
    }

    #[test]
    fn sync_waits_for_motion() {
        let sys = SystemState::new();
        let mut s = spindle(SpindleConfig::default());
        s.set_state(&sys, SpindleState::Clockwise, 300.0);

        let mut queue = Queue {
            sys: &sys,
            drained_at: None,
        };
        block_on(s.sync(&sys, &mut queue, SpindleState::Clockwise, 1200.0));
        assert_eq!(queue.drained_at, Some(300.0));
        assert_eq!(sys.spindle_speed(), 1200.0);
    }

    #[test]
    fn sync_in_check_mode() {
        let sys = SystemState::new();
        sys.set_mode(MachineMode::CheckMode);
        let mut s = spindle(SpindleConfig::default());
        let before = s.output().clone();

        let mut queue = Queue {
            sys: &sys,
            drained_at: None,
        };
        block_on(s.sync(&sys, &mut queue, SpindleState::Clockwise, 1200.0));
        assert_eq!(queue.drained_at, None);
        assert_eq!(s.output(), &before);
        assert_eq!(s.current_state(), SpindleState::Disabled);
        assert_eq!(sys.spindle_speed(), 0.0);
    }

    fn any_state() -> impl Strategy<Value = SpindleState> {
        prop_oneof![
            Just(SpindleState::Disabled),
            Just(SpindleState::Clockwise),
            Just(SpindleState::Counterclockwise),
        ]
    }

    proptest! {
        #[test]
        fn test_disable(prior in any_state(), rpm in 0.0..5000.0f32, invert: bool, laser: bool) {
            let sys = SystemState::new();
            let config = SpindleConfig { invert_enable: invert, ..SpindleConfig::default() };
            let settings = Settings { laser_mode: laser, ..Settings::default() };
            let mut s = Spindle::new(Recorder::default(), config, settings);
            s.set_state(&sys, prior, rpm);
            s.set_state(&sys, SpindleState::Disabled, rpm);

            prop_assert_eq!(s.output().duty, Some(0));
            prop_assert_eq!(s.output().enable, Some(invert));
            prop_assert_eq!(sys.spindle_speed(), 0.0);
        }
    }
}
