//! Instantaneous controller internals exposed for an external blackbox
//! sink. The core overwrites this snapshot in place every tick; buffering
//! and encoding are the sink's problem.

use crate::math::constrain_f;

/// Clip to the int16 wire range used by the log encoder.
pub fn clip_i16(value: f32) -> i16 {
    constrain_f(value, -32768.0, 32767.0) as i16
}

pub fn clip_i32(value: f32) -> i32 {
    constrain_f(value, -2147483648.0, 2147483647.0) as i32
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Default)]
pub struct BlackboxState {
    pub axis_p: [i16; 3],
    pub axis_i: [i16; 3],
    pub axis_d: [i16; 3],
    pub axis_setpoint: [i16; 3],
    pub axis_output: [i16; 3],
    /// Altitude target, cm.
    pub nav_target_position_z: i32,
    /// Outer-loop velocity targets, cm/s, X/Y/Z.
    pub nav_desired_velocity: [i16; 3],
    /// Surface-tracking target, cm; -1 when tracking is off.
    pub nav_target_surface: i16,
}
