use std::collections::VecDeque;

use scara_geom::{JointSteps, Kinematics, Point};
use scara_protocol::{MachineMode, SpindleState};
use scara_spindle::{Direction, MotionQueue, Spindle, SpindleOutput, SystemState};
use serde::Deserialize;

use crate::command::Command;

/// Everything that the bench reads from its config file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub settings: scara_protocol::Settings,
    pub spindle: scara_spindle::SpindleConfig,
    pub linkage: scara_geom::Config,
}

/// Spindle pins that just remember (and log) what they were set to.
#[derive(Clone, Debug, Default)]
pub struct SimOutput {
    pub duty: u16,
    pub enable: bool,
    pub direction: Option<Direction>,
}

impl SpindleOutput for SimOutput {
    fn set_duty(&mut self, duty: u16) {
        if duty != self.duty {
            log::info!("pwm duty {} -> {duty}", self.duty);
        }
        self.duty = duty;
    }

    fn set_enable(&mut self, high: bool) {
        if high != self.enable {
            log::info!("enable line {}", if high { "high" } else { "low" });
        }
        self.enable = high;
    }

    fn set_direction(&mut self, dir: Direction) {
        if Some(dir) != self.direction {
            log::info!("direction {dir:?}");
        }
        self.direction = Some(dir);
    }
}

/// A motion queue whose moves happen instantly, but only when someone waits
/// for them.
#[derive(Debug, Default)]
pub struct SimQueue {
    pub pending: VecDeque<JointSteps>,
    pub position: JointSteps,
}

impl MotionQueue for SimQueue {
    async fn wait_until_empty(&mut self) {
        while let Some(steps) = self.pending.pop_front() {
            log::info!("moving {:?} -> {steps:?}", self.position);
            self.position = steps;
            tokio::task::yield_now().await;
        }
    }
}

pub struct Simulation {
    pub sys: SystemState,
    pub spindle: Spindle<SimOutput>,
    pub kinematics: Kinematics,
    pub queue: SimQueue,
}

impl Simulation {
    pub fn new(config: MachineConfig) -> Self {
        let kinematics = Kinematics::new(config.linkage);
        let queue = SimQueue {
            pending: VecDeque::new(),
            position: config.linkage.joints_to_steps(&config.linkage.home),
        };
        Simulation {
            sys: SystemState::new(),
            spindle: Spindle::new(SimOutput::default(), config.spindle, config.settings),
            kinematics,
            queue,
        }
    }

    pub fn position(&self) -> Point {
        self.kinematics.steps_to_point(&self.queue.position)
    }

    /// Runs a single command, returning whatever it has to say.
    pub async fn run(&mut self, cmd: Command) -> anyhow::Result<Option<String>> {
        match cmd {
            Command::Spindle(state, rpm) => {
                self.spindle
                    .sync(&self.sys, &mut self.queue, state, rpm)
                    .await;
            }
            Command::Override(percent) => self.sys.set_speed_override(percent),
            Command::Abort => {
                self.sys.set_abort(true);
                // Motion stops dead; what's left in the queue is gone.
                self.queue.pending.clear();
            }
            Command::Reset => {
                self.sys.reset();
                self.spindle.set_state(&self.sys, SpindleState::Disabled, 0.0);
            }
            Command::Mode(mode) => self.sys.set_mode(mode),
            Command::Move(x, y, z) => {
                if self.sys.abort() {
                    anyhow::bail!("aborted, reset first");
                }
                let steps = self.kinematics.point_to_steps(&Point::new(x, y, z))?;
                if self.sys.mode() != MachineMode::CheckMode {
                    self.queue.pending.push_back(steps);
                }
            }
            Command::AngleMode(on) => self.kinematics.set_angle_mode(on),
            Command::Where => {
                self.queue.wait_until_empty().await;
                let p = self.position();
                let joints = self.kinematics.config.steps_to_joints(&self.queue.position);
                return Ok(Some(format!(
                    "MPos:{:.3},{:.3},{:.3}\n{joints}",
                    p.x, p.y, p.z
                )));
            }
            Command::Status => {
                let status = self.sys.status(self.spindle.current_state());
                self.sys.tick_report_counter();
                return Ok(Some(status.to_string()));
            }
            Command::Quit => {}
        }
        Ok(None)
    }
}
