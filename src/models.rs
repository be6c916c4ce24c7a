//! Process models for the estimator.
//!
//! Any `Fn(&StateVec, f64) -> StateVec` works as a process model; the
//! functions here cover the ground-vehicle layout used by the replay tool.

use crate::types::StateVec;

// ===== 6-state vehicle layout =====
pub const STATE_DIM: usize = 6;
pub const POS_X: usize = 0;
pub const POS_Y: usize = 1;
pub const HEADING: usize = 2;
pub const SPEED: usize = 3;
pub const YAW_RATE: usize = 4;
pub const ACCEL: usize = 5;

pub const STATE_NAMES: [&str; STATE_DIM] = ["x", "y", "heading", "speed", "yaw_rate", "accel"];

/// Kinematic vehicle model over `[x, y, heading, speed, yaw_rate, accel]`:
///
/// ```text
/// x'        = x + dt * v * cos(heading)
/// y'        = y + dt * v * sin(heading)
/// heading'  = heading + dt * yaw_rate
/// v'        = v + dt * accel
/// ```
///
/// Yaw rate and acceleration are held constant.
pub fn bicycle(x: &StateVec, dt: f64) -> StateVec {
    let mut next = x.clone();
    let heading = x[HEADING];
    let speed = x[SPEED];
    next[POS_X] = x[POS_X] + dt * speed * heading.cos();
    next[POS_Y] = x[POS_Y] + dt * speed * heading.sin();
    next[HEADING] = heading + dt * x[YAW_RATE];
    next[SPEED] = speed + dt * x[ACCEL];
    next
}

/// Static model, any dimension.
pub fn identity(x: &StateVec, _dt: f64) -> StateVec {
    x.clone()
}
