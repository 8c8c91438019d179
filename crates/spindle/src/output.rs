//! The three signals that the spindle drives, and an implementation of them on
//! top of `embedded-hal` pins.

use embedded_hal::digital::{Error as _, ErrorType, OutputPin, PinState};
use embedded_hal::pwm::{Error as _, SetDutyCycle};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Clockwise,
    Counterclockwise,
}

/// Spindle hardware, as seen by the state machine.
///
/// Implementations just move signals. The state machine decides which level
/// means "enabled", so `set_enable` takes the electrical level of the pin.
pub trait SpindleOutput {
    fn set_duty(&mut self, duty: u16);
    fn set_enable(&mut self, high: bool);
    fn set_direction(&mut self, dir: Direction);
}

impl<T: SpindleOutput + ?Sized> SpindleOutput for &mut T {
    fn set_duty(&mut self, duty: u16) {
        (**self).set_duty(duty)
    }

    fn set_enable(&mut self, high: bool) {
        (**self).set_enable(high)
    }

    fn set_direction(&mut self, dir: Direction) {
        (**self).set_direction(dir)
    }
}

/// Stands in for the direction pin on boards that use it as the enable line.
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = core::convert::Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct PinOutput<En, Dir, Pwm> {
    enable: En,
    direction: Dir,
    pwm: Pwm,
}

impl<En, Dir, Pwm> PinOutput<En, Dir, Pwm>
where
    En: OutputPin,
    Dir: OutputPin,
    Pwm: SetDutyCycle,
{
    pub fn new(enable: En, direction: Dir, pwm: Pwm) -> Self {
        Self {
            enable,
            direction,
            pwm,
        }
    }

    pub fn release(self) -> (En, Dir, Pwm) {
        (self.enable, self.direction, self.pwm)
    }
}

impl<En, Dir, Pwm> SpindleOutput for PinOutput<En, Dir, Pwm>
where
    En: OutputPin,
    Dir: OutputPin,
    Pwm: SetDutyCycle,
{
    fn set_duty(&mut self, duty: u16) {
        let duty = duty.min(self.pwm.max_duty_cycle());
        if let Err(e) = self.pwm.set_duty_cycle(duty) {
            log::warn!("failed to set spindle duty: {:?}", e.kind());
        }
    }

    fn set_enable(&mut self, high: bool) {
        if let Err(e) = self.enable.set_state(PinState::from(high)) {
            log::warn!("failed to set spindle enable: {:?}", e.kind());
        }
    }

    fn set_direction(&mut self, dir: Direction) {
        // Clockwise is the pin's reset state.
        let high = dir == Direction::Counterclockwise;
        if let Err(e) = self.direction.set_state(PinState::from(high)) {
            log::warn!("failed to set spindle direction: {:?}", e.kind());
        }
    }
}
