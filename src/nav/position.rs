//! Horizontal position cascade: position (P) → velocity (PID with an
//! acceleration envelope and jerk limiting) → tilt angles via
//! inverse-gravity geometry, handed to the leveling loop as roll/pitch
//! commands. Also owns the cruise-style pilot override and the predictive
//! stopping point used when the sticks are released.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::blackbox::{clip_i16, BlackboxState};
use crate::config::{CoreConfig, PidBank, PidProfile, UserControlMode};
use crate::filter::Pt1Filter;
use crate::math::{apply_deadband, constrain_f, hz_to_us, us_to_s, wrap_cd_18000};
use crate::rc::angle_to_rc_command;
use crate::state::{
    DesiredState, FreshFlags, NavDirectives, NavEstimate, NavStateFlags, RcState, PITCH, ROLL,
};

use super::{NavPid, MIN_POSITION_UPDATE_RATE_HZ};

/// Horizontal acceleration cap, cm/s².
const ACCEL_XY_MAX: f32 = 980.0;
/// Acceleration target smoothing cutoff, Hz.
const ACCEL_LPF_CUTOFF_HZ: f32 = 2.0;
/// Maximum rate of change of the acceleration target, cm/s³.
const JERK_LIMIT: f32 = 1700.0;
/// Velocity errors below this get a symmetric acceleration envelope, cm/s.
const MIN_ERROR_FOR_ENVELOPE: f32 = 0.1;
/// Heading-attenuation floor in waypoint mode.
const HEADING_ATTENUATION_MIN: f32 = 0.05;
const GRAVITY_CMSS: f32 = 980.665;

pub struct PositionController {
    pos_kp: f32,
    vel_x: NavPid,
    vel_y: NavPid,
    accel_filter: [Pt1Filter; 2],
    /// Last jerk-limited acceleration targets, North/East.
    last_accel: [f32; 2],
    /// Stopping-point prediction horizon, s.
    deceleration_time: f32,
    /// Velocity-curve expo toward the target, 0..1.
    response_expo: f32,
    /// Tilt commands, deci-degrees, ROLL/PITCH.
    pub rc_adjustment: [f32; 2],
    last_update_us: u64,
    last_pos_update_us: u64,
}

impl PositionController {
    pub fn new(profile: &PidProfile) -> Self {
        Self {
            pos_kp: profile.p(PidBank::Pos) as f32 / 100.0,
            vel_x: NavPid::new(
                profile.p(PidBank::PosRate) as f32 / 100.0,
                profile.i(PidBank::PosRate) as f32 / 100.0,
                profile.d(PidBank::PosRate) as f32 / 100.0,
            ),
            vel_y: NavPid::new(
                profile.p(PidBank::PosRate) as f32 / 100.0,
                profile.i(PidBank::PosRate) as f32 / 100.0,
                profile.d(PidBank::PosRate) as f32 / 100.0,
            ),
            accel_filter: [Pt1Filter::new(); 2],
            last_accel: [0.0; 2],
            deceleration_time: profile.i(PidBank::Pos) as f32 / 100.0,
            response_expo: profile.d(PidBank::Pos) as f32 / 100.0,
            rc_adjustment: [0.0; 2],
            last_update_us: 0,
            last_pos_update_us: 0,
        }
    }

    /// One position-hold tick; rewrites the roll/pitch commands unless the
    /// pilot or a lost fix bypasses the controller.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &mut self,
        now_us: u64,
        cfg: &CoreConfig,
        est: &NavEstimate,
        fresh: &mut FreshFlags,
        desired: &mut DesiredState,
        directives: &NavDirectives,
        nav_flags: NavStateFlags,
        rc: &mut RcState,
        is_adjusting: bool,
        bb: &mut BlackboxState,
    ) {
        // In ATTI-style assist the pilot's stick goes straight to the
        // leveling loop while they are moving it.
        let mut bypass =
            cfg.nav.user_control_mode == UserControlMode::Atti && is_adjusting;

        let delta = now_us.saturating_sub(self.last_update_us);
        self.last_update_us = now_us;

        if delta > hz_to_us(MIN_POSITION_UPDATE_RATE_HZ) {
            self.last_pos_update_us = now_us;
            self.reset();
            return;
        }

        if est.has_position_sensor {
            if fresh.horizontal_new {
                let delta_pos = now_us.saturating_sub(self.last_pos_update_us);
                self.last_pos_update_us = now_us;

                if !bypass {
                    if delta_pos < hz_to_us(MIN_POSITION_UPDATE_RATE_HZ) {
                        self.update_velocity_target(est, desired, directives, nav_flags, bb);
                        self.update_tilt_targets(us_to_s(delta_pos), cfg, est, desired);
                    } else {
                        self.reset();
                    }
                }

                fresh.horizontal_consumed = true;
            }
        } else {
            // Fix lost: stabilize on pilot sticks only.
            self.rc_adjustment = [0.0; 2];
            bypass = true;
        }

        if !bypass {
            rc.command[ROLL] = angle_to_rc_command(self.rc_adjustment[ROLL]);
            rc.command[PITCH] = angle_to_rc_command(self.rc_adjustment[PITCH]);
        }
    }

    /// Position to velocity stage (P only), capped at the active waypoint
    /// speed, attenuated while the nose is off the travel bearing, and
    /// expo-shaped near the target.
    fn update_velocity_target(
        &mut self,
        est: &NavEstimate,
        desired: &mut DesiredState,
        directives: &NavDirectives,
        nav_flags: NavStateFlags,
        bb: &mut BlackboxState,
    ) {
        let error_x = desired.pos.x - est.pos.x;
        let error_y = desired.pos.y - est.pos.y;

        let mut vel_x = error_x * self.pos_kp;
        let mut vel_y = error_y * self.pos_kp;

        let max_speed = directives.waypoint_speed;
        let mut vel_total = (vel_x * vel_x + vel_y * vel_y).sqrt();
        if vel_total > max_speed && vel_total > 0.0 {
            vel_x *= max_speed / vel_total;
            vel_y *= max_speed / vel_total;
            vel_total = max_speed;
        }

        let heading = heading_attenuation(nav_flags, desired, est);
        let expo = self.expo_attenuation(vel_total, max_speed);

        desired.vel.x = vel_x * heading * expo;
        desired.vel.y = vel_y * heading * expo;

        bb.nav_desired_velocity[0] = clip_i16(desired.vel.x);
        bb.nav_desired_velocity[1] = clip_i16(desired.vel.y);
    }

    /// Velocity profile shaping: unity at the speed cap, easing off toward
    /// the target as velocity drops.
    fn expo_attenuation(&self, vel_total: f32, vel_max: f32) -> f32 {
        let scale = constrain_f(vel_total / vel_max.max(0.01), 0.01, 1.0);
        1.0 - self.response_expo * (1.0 - scale * scale)
    }

    /// Velocity to acceleration to tilt. The acceleration envelope points
    /// along the velocity-error vector so the PID's output limiting (and
    /// its back-calculation) track the direction of travel.
    fn update_tilt_targets(
        &mut self,
        dt: f32,
        cfg: &CoreConfig,
        est: &NavEstimate,
        desired: &DesiredState,
    ) {
        let error_x = desired.vel.x - est.vel.x;
        let error_y = desired.vel.y - est.vel.y;

        let error_magnitude = (error_x * error_x + error_y * error_y).sqrt();
        let (limit_x, limit_y) = if error_magnitude > MIN_ERROR_FOR_ENVELOPE {
            (
                ACCEL_XY_MAX / error_magnitude * error_x.abs(),
                ACCEL_XY_MAX / error_magnitude * error_y.abs(),
            )
        } else {
            let limit = ACCEL_XY_MAX / core::f32::consts::SQRT_2;
            (limit, limit)
        };

        // Jerk limiting keeps the tilt demand inside what the leveling and
        // rate loops can track.
        let max_change = JERK_LIMIT * dt;
        let x_min = constrain_f(self.last_accel[0] - max_change, -limit_x, limit_x);
        let x_max = constrain_f(self.last_accel[0] + max_change, -limit_x, limit_x);
        let y_min = constrain_f(self.last_accel[1] - max_change, -limit_y, limit_y);
        let y_max = constrain_f(self.last_accel[1] + max_change, -limit_y, limit_y);

        let accel_n = self.vel_x.apply(desired.vel.x, est.vel.x, dt, x_min, x_max);
        let accel_e = self.vel_y.apply(desired.vel.y, est.vel.y, dt, y_min, y_max);
        self.last_accel = [accel_n, accel_e];

        let accel_n = self.accel_filter[0].apply(accel_n, ACCEL_LPF_CUTOFF_HZ, dt);
        let accel_e = self.accel_filter[1].apply(accel_e, ACCEL_LPF_CUTOFF_HZ, dt);

        // Rotate North/East into forward/right.
        let accel_forward = accel_n * est.cos_yaw + accel_e * est.sin_yaw;
        let accel_right = -accel_n * est.sin_yaw + accel_e * est.cos_yaw;

        let desired_pitch = accel_forward.atan2(GRAVITY_CMSS);
        let desired_roll = (accel_right * desired_pitch.cos()).atan2(GRAVITY_CMSS);

        let max_bank_dd = cfg.nav.mc_max_bank_angle as f32 * 10.0;
        self.rc_adjustment[ROLL] = constrain_f(
            desired_roll.to_degrees() * 10.0,
            -max_bank_dd,
            max_bank_dd,
        );
        self.rc_adjustment[PITCH] = constrain_f(
            desired_pitch.to_degrees() * 10.0,
            -max_bank_dd,
            max_bank_dd,
        );
    }

    pub fn reset(&mut self) {
        self.vel_x.reset();
        self.vel_y.reset();
        self.accel_filter[0].reset(0.0);
        self.accel_filter[1].reset(0.0);
        self.last_accel = [0.0; 2];
        self.rc_adjustment = [0.0; 2];
    }

    /// Stick deflection past the deadband. In cruise assist it retargets the
    /// hold position so the P stage yields the commanded body-frame
    /// velocity; on release the hold point moves to the predicted stopping
    /// point.
    pub fn adjust_from_rc_input(
        &mut self,
        cfg: &CoreConfig,
        est: &NavEstimate,
        desired: &mut DesiredState,
        rc: &RcState,
        was_adjusting: bool,
    ) -> bool {
        let deadband = cfg.rc_controls.pos_hold_deadband;
        let pitch_adjustment = apply_deadband(rc.command[PITCH] as i32, deadband as i32);
        let roll_adjustment = apply_deadband(rc.command[ROLL] as i32, deadband as i32);

        if pitch_adjustment != 0 || roll_adjustment != 0 {
            if cfg.nav.user_control_mode == UserControlMode::Cruise
                && self.pos_kp > f32::EPSILON
            {
                let span = ((500 - deadband) as f32).max(1.0);
                let vel_forward =
                    pitch_adjustment as f32 * cfg.nav.max_manual_speed as f32 / span;
                let vel_right = roll_adjustment as f32 * cfg.nav.max_manual_speed as f32 / span;

                let vel_n = vel_forward * est.cos_yaw - vel_right * est.sin_yaw;
                let vel_e = vel_forward * est.sin_yaw + vel_right * est.cos_yaw;

                desired.pos.x = est.pos.x + vel_n / self.pos_kp;
                desired.pos.y = est.pos.y + vel_e / self.pos_kp;
            }
            true
        } else {
            if was_adjusting {
                let (hold_x, hold_y) = self.initial_hold_position(est);
                desired.pos.x = hold_x;
                desired.pos.y = hold_y;
            }
            false
        }
    }

    /// Predicted rest position assuming linear deceleration over the
    /// configured horizon.
    pub fn initial_hold_position(&self, est: &NavEstimate) -> (f32, f32) {
        (
            est.pos.x + est.vel.x * self.deceleration_time,
            est.pos.y + est.vel.y * self.deceleration_time,
        )
    }
}

/// In waypoint mode, slow down while the nose still points away from the
/// travel bearing: cos² of the heading error, floored so motion never fully
/// stalls.
fn heading_attenuation(
    nav_flags: NavStateFlags,
    desired: &DesiredState,
    est: &NavEstimate,
) -> f32 {
    if nav_flags.auto_waypoint() {
        let error_cd = constrain_f(
            wrap_cd_18000(desired.yaw_cd - est.yaw_cd),
            -9000.0,
            9000.0,
        );
        let scale = (error_cd / 100.0).to_radians().cos();
        constrain_f(scale * scale, HEADING_ATTENUATION_MIN, 1.0)
    } else {
        1.0
    }
}
