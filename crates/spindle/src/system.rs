//! Runtime state shared between the main loop, the spindle and the status
//! reporter.
//!
//! The reporter may read from interrupt context, so the fields are plain
//! atomics: a reader gets a recent value without ever blocking. Every field
//! has a single writer except the report counter, which the spindle zeroes
//! and the reporter counts up; the count-up is a single read-modify-write so
//! that a concurrent zeroing is never lost.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering::Relaxed};

use scara_protocol::{
    MachineMode, SpindleState, Status, DEFAULT_SPEED_OVERRIDE, MAX_SPEED_OVERRIDE,
    MIN_SPEED_OVERRIDE,
};

pub struct SystemState {
    // Written by the reset and emergency-stop paths.
    abort: AtomicBool,
    // Written by the protocol loop.
    mode: AtomicU8,
    // Bits of an f32. Written by the spindle only.
    spindle_speed: AtomicU32,
    // Written by the override handling, in percent.
    speed_override: AtomicU8,
    // Zeroed by the spindle, counted up by the reporter.
    report_counter: AtomicU8,
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemState {
    pub const fn new() -> Self {
        SystemState {
            abort: AtomicBool::new(false),
            mode: AtomicU8::new(MachineMode::Idle as u8),
            spindle_speed: AtomicU32::new(0),
            speed_override: AtomicU8::new(DEFAULT_SPEED_OVERRIDE),
            report_counter: AtomicU8::new(0),
        }
    }

    /// Puts everything back to its power-up value, except for the machine
    /// mode, which survives a reset.
    pub fn reset(&self) {
        self.abort.store(false, Relaxed);
        self.spindle_speed.store(0, Relaxed);
        self.speed_override.store(DEFAULT_SPEED_OVERRIDE, Relaxed);
        self.report_counter.store(0, Relaxed);
    }

    pub fn abort(&self) -> bool {
        self.abort.load(Relaxed)
    }

    pub fn set_abort(&self, abort: bool) {
        self.abort.store(abort, Relaxed);
    }

    pub fn mode(&self) -> MachineMode {
        MachineMode::from_u8(self.mode.load(Relaxed)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: MachineMode) {
        self.mode.store(mode as u8, Relaxed);
    }

    /// The speed that the spindle is running at, in rpm.
    pub fn spindle_speed(&self) -> f32 {
        f32::from_bits(self.spindle_speed.load(Relaxed))
    }

    pub(crate) fn set_spindle_speed(&self, rpm: f32) {
        self.spindle_speed.store(rpm.to_bits(), Relaxed);
    }

    pub fn speed_override(&self) -> u8 {
        self.speed_override.load(Relaxed)
    }

    /// Sets the speed override, clamped to what the machine allows.
    pub fn set_speed_override(&self, percent: u8) {
        let percent = percent.clamp(MIN_SPEED_OVERRIDE, MAX_SPEED_OVERRIDE);
        self.speed_override.store(percent, Relaxed);
    }

    /// How many report cycles have passed since something changed. Zero means
    /// that the next report should include the change.
    pub fn report_counter(&self) -> u8 {
        self.report_counter.load(Relaxed)
    }

    pub fn tick_report_counter(&self) {
        // Never fails: the closure always returns `Some`.
        let _ = self
            .report_counter
            .fetch_update(Relaxed, Relaxed, |n| Some(n.saturating_add(1)));
    }

    pub(crate) fn reset_report_counter(&self) {
        self.report_counter.store(0, Relaxed);
    }

    pub fn status(&self, spindle: SpindleState) -> Status {
        Status {
            mode: self.mode(),
            abort: self.abort(),
            spindle,
            spindle_speed: self.spindle_speed(),
            speed_override: self.speed_override(),
        }
    }
}
