//! Poses, odometry deltas and laser scans.
//!
//! The motion model is the arc-of-turn model: a step turns by `T` around a
//! center `TURN_RADIUS` to the side of the robot, then translates `D`
//! forward and `C` laterally along the mean heading of the step. The
//! inverse (`MotionDelta::between`) is exact, so that a pose sequence can
//! be distilled back into the deltas that reproduce it.

use std::f64::consts::{FRAC_PI_2, PI};

/// Planar pose in grid units and radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

/// One interval's odometry: forward, lateral and rotational components.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionDelta {
    pub forward: f64,
    pub lateral: f64,
    pub turn: f64,
}

/// A single range reading: beam direction relative to the robot's heading
/// and measured distance in grid units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Beam {
    pub theta: f64,
    pub distance: f64,
}

pub type Scan = Vec<Beam>;

/// Wrap an angle into (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

impl MotionDelta {
    pub fn zero() -> Self {
        Self {
            forward: 0.0,
            lateral: 0.0,
            turn: 0.0,
        }
    }

    /// The delta that carries `from` to `to` under the arc-of-turn model:
    /// subtract the turn arc, then project the remaining translation onto
    /// the mean heading.
    pub fn between(from: &Pose, to: &Pose, turn_radius: f64) -> Self {
        let turn = normalize_angle(to.theta - from.theta);
        let move_angle = from.theta + turn / 2.0;
        let dx = to.x - from.x - turn_radius * ((from.theta + turn).cos() - from.theta.cos());
        let dy = to.y - from.y - turn_radius * ((from.theta + turn).sin() - from.theta.sin());
        Self {
            forward: dx * move_angle.cos() + dy * move_angle.sin(),
            lateral: dx * (move_angle + FRAC_PI_2).cos() + dy * (move_angle + FRAC_PI_2).sin(),
            turn,
        }
    }

    /// Rescale the translation components (grid unit conversions).
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            forward: self.forward * factor,
            lateral: self.lateral * factor,
            turn: self.turn,
        }
    }
}

impl Pose {
    /// Apply one motion delta.
    pub fn advance(&self, delta: &MotionDelta, turn_radius: f64) -> Pose {
        let move_angle = self.theta + delta.turn / 2.0;
        Pose {
            x: self.x
                + turn_radius * ((self.theta + delta.turn).cos() - self.theta.cos())
                + delta.forward * move_angle.cos()
                + delta.lateral * (move_angle + FRAC_PI_2).cos(),
            y: self.y
                + turn_radius * ((self.theta + delta.turn).sin() - self.theta.sin())
                + delta.forward * move_angle.sin()
                + delta.lateral * (move_angle + FRAC_PI_2).sin(),
            theta: self.theta + delta.turn,
        }
    }
}
