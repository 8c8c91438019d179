//! Basic geometry of the SCARA arm, including conversion between joint
//! angles, stepper steps and Cartesian coordinates.
//!
//! The arm has two links in a horizontal plane and a pass-through z axis.
//! The "inner" link turns about the tower; the "outer" link is driven from
//! the tower too, so its angle `psi` is measured in the world frame and not
//! relative to the inner link. Cartesian coordinates are offset from the
//! tower by a fixed planar offset, so that the machine's (0, 0) can sit
//! somewhere convenient on the bed.
//!
//! This crate supports `no_std` and uses `libm` to allow for running in
//! embedded contexts.

#![cfg_attr(not(feature = "std"), no_std)]

use core::fmt;

use libm::{atan2f, cosf, fabsf, roundf, sinf, sqrtf};

pub type Angle = euclid::Angle<f32>;
pub type Point = euclid::Point3D<f32, Mm>;

pub struct Mm;

pub type Len = euclid::Length<f32, Mm>;

fn square<T: core::ops::Mul<T> + Copy>(x: T) -> <T as core::ops::Mul<T>>::Output {
    x * x
}

pub trait LenExt {
    fn mm(self) -> Len;
}

impl LenExt for f32 {
    fn mm(self) -> Len {
        Len::new(self)
    }
}

/// The inverse transform was asked for a point that the arm can't reach.
///
/// Reachable points are between `|L1 - L2|` and `L1 + L2` away from the
/// tower; anywhere else the elbow angle has no real solution.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("target is {distance}mm from the tower, out of reach (elbow cosine {cos_elbow})")]
pub struct OutOfReach {
    /// Distance from the tower to the requested point.
    pub distance: f32,
    /// The elbow cosine that fell outside `[-1, 1]`.
    pub cos_elbow: f32,
}

/// Positions of the arm's joints.
///
/// `theta` is the angle of the inner link, `psi` the angle of the outer link
/// (both in the world frame), and `z` is the linear axis, which the
/// kinematics pass straight through.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct JointPosition {
    pub theta: Angle,
    pub psi: Angle,
    pub z: Len,
}

impl JointPosition {
    pub fn from_degrees(theta: f32, psi: f32, z: f32) -> Self {
        JointPosition {
            theta: Angle::degrees(theta),
            psi: Angle::degrees(psi),
            z: z.mm(),
        }
    }
}

// The joint position line of a status report.
impl fmt::Display for JointPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SCARA Theta:{:.2}   Psi+Theta:{:.2}",
            self.theta.to_degrees(),
            self.psi.to_degrees()
        )
    }
}

/// The position of the stepper motors, measured in number of steps.
///
/// Zero steps corresponds to a zero joint angle (or zero height), so these
/// can be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct JointSteps {
    pub theta: i32,
    pub psi: i32,
    pub z: i32,
}

pub struct ConfigBuilder {
    inner_link: Len,
    outer_link: Len,
    offset_x: Len,
    offset_y: Len,
    theta_steps_per_degree: f32,
    psi_steps_per_degree: f32,
    z_steps_per_mm: f32,
    home: JointPosition,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            inner_link: 200.0.mm(),
            outer_link: 200.0.mm(),
            offset_x: (-129.0).mm(),
            offset_y: 128.0.mm(),
            theta_steps_per_degree: 97.777_78,
            psi_steps_per_degree: 97.777_78,
            z_steps_per_mm: 97.777_78,
            home: JointPosition::from_degrees(-48.27, 90.67, 0.0),
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> Config {
        Config {
            inner_link: self.inner_link,
            outer_link: self.outer_link,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
            theta_steps_per_degree: self.theta_steps_per_degree,
            psi_steps_per_degree: self.psi_steps_per_degree,
            z_steps_per_mm: self.z_steps_per_mm,
            home: self.home,
        }
    }

    pub fn with_links(&mut self, inner: Len, outer: Len) -> &mut Self {
        self.inner_link = inner;
        self.outer_link = outer;
        self
    }

    pub fn with_offset(&mut self, x: Len, y: Len) -> &mut Self {
        self.offset_x = x;
        self.offset_y = y;
        self
    }

    pub fn with_steps_per_degree(&mut self, theta: f32, psi: f32) -> &mut Self {
        self.theta_steps_per_degree = theta;
        self.psi_steps_per_degree = psi;
        self
    }

    pub fn with_z_steps_per_mm(&mut self, steps: f32) -> &mut Self {
        self.z_steps_per_mm = steps;
        self
    }

    pub fn with_home(&mut self, home: JointPosition) -> &mut Self {
        self.home = home;
        self
    }
}

/// The geometric configuration of a SCARA arm.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of the inner link, from the tower axis to the elbow. Measure
    /// this precisely; every position depends on it.
    pub inner_link: Len,
    /// Length of the outer link, from the elbow to the tool.
    pub outer_link: Len,
    /// Where the tower sits relative to the Cartesian origin. This needs to be
    /// reasonably accurate, because it places the bed in the arm's space.
    pub offset_x: Len,
    pub offset_y: Len,
    pub theta_steps_per_degree: f32,
    pub psi_steps_per_degree: f32,
    pub z_steps_per_mm: f32,
    /// Joint position that the arm is in after a manual homing.
    pub home: JointPosition,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

impl Config {
    /// The closest and farthest distances from the tower that the tool can reach.
    pub fn reach(&self) -> (Len, Len) {
        let l1 = self.inner_link.get();
        let l2 = self.outer_link.get();
        (fabsf(l1 - l2).mm(), (l1 + l2).mm())
    }

    /// Converts joint angles to a Cartesian position.
    pub fn forward(&self, joints: &JointPosition) -> Point {
        let l1 = self.inner_link.get();
        let l2 = self.outer_link.get();
        let theta = joints.theta.get();
        let psi = joints.psi.get();

        Point::new(
            -cosf(theta) * l1 - cosf(psi) * l2 - self.offset_x.get(),
            sinf(theta) * l1 + sinf(psi) * l2 - self.offset_y.get(),
            joints.z.get(),
        )
    }

    /// Converts a Cartesian position to joint angles.
    ///
    /// Only one elbow configuration is ever produced. In `angle_mode` the
    /// transform is bypassed: `x` and `y` are taken to be the joint angles
    /// in degrees, which is what raw joint-space jogging wants.
    pub fn inverse(&self, p: &Point, angle_mode: bool) -> Result<JointPosition, OutOfReach> {
        if angle_mode {
            return Ok(JointPosition::from_degrees(p.x, p.y, p.z));
        }

        let l1 = self.inner_link.get();
        let l2 = self.outer_link.get();

        // Position relative to the tower, with x mirrored.
        let x = -p.x - self.offset_x.get();
        let y = p.y + self.offset_y.get();
        let dist_sq = square(x) + square(y);

        let cos_elbow = (dist_sq - square(l1) - square(l2)) / (2.0 * l1 * l2);
        // Also catches NaN, which `contains` rejects.
        if !(-1.0..=1.0).contains(&cos_elbow) {
            return Err(OutOfReach {
                distance: sqrtf(dist_sq),
                cos_elbow,
            });
        }
        let sin_elbow = sqrtf(1.0 - square(cos_elbow));

        let k1 = l1 + l2 * cos_elbow;
        let k2 = l2 * sin_elbow;
        let theta = atan2f(k1, k2) - atan2f(x, y);
        let psi = atan2f(sin_elbow, cos_elbow) + theta;

        Ok(JointPosition {
            theta: Angle::radians(theta),
            psi: Angle::radians(psi),
            z: p.z.mm(),
        })
    }

    pub fn joints_to_steps(&self, joints: &JointPosition) -> JointSteps {
        JointSteps {
            theta: roundf(joints.theta.to_degrees() * self.theta_steps_per_degree) as i32,
            psi: roundf(joints.psi.to_degrees() * self.psi_steps_per_degree) as i32,
            z: roundf(joints.z.get() * self.z_steps_per_mm) as i32,
        }
    }

    pub fn steps_to_joints(&self, steps: &JointSteps) -> JointPosition {
        JointPosition::from_degrees(
            steps.theta as f32 / self.theta_steps_per_degree,
            steps.psi as f32 / self.psi_steps_per_degree,
            steps.z as f32 / self.z_steps_per_mm,
        )
    }

    /// Where the tool is, given the stepper positions. Used for position reports.
    pub fn steps_to_point(&self, steps: &JointSteps) -> Point {
        self.forward(&self.steps_to_joints(steps))
    }

    pub fn point_to_steps(&self, p: &Point, angle_mode: bool) -> Result<JointSteps, OutOfReach> {
        Ok(self.joints_to_steps(&self.inverse(p, angle_mode)?))
    }

    pub fn home_point(&self) -> Point {
        self.forward(&self.home)
    }
}

/// The arm's geometry together with the jog-mode switch.
///
/// Angle mode is a machine-wide setting rather than something each caller
/// chooses, so it lives here next to the geometry that it bypasses.
#[derive(Clone, Copy, Debug)]
pub struct Kinematics {
    pub config: Config,
    angle_mode: bool,
}

impl Kinematics {
    pub fn new(config: Config) -> Self {
        Kinematics {
            config,
            angle_mode: false,
        }
    }

    pub fn angle_mode(&self) -> bool {
        self.angle_mode
    }

    pub fn set_angle_mode(&mut self, on: bool) {
        self.angle_mode = on;
    }

    pub fn forward(&self, joints: &JointPosition) -> Point {
        self.config.forward(joints)
    }

    pub fn inverse(&self, p: &Point) -> Result<JointPosition, OutOfReach> {
        self.config.inverse(p, self.angle_mode)
    }

    pub fn point_to_steps(&self, p: &Point) -> Result<JointSteps, OutOfReach> {
        self.config.point_to_steps(p, self.angle_mode)
    }

    pub fn steps_to_point(&self, steps: &JointSteps) -> Point {
        self.config.steps_to_point(steps)
    }
}
