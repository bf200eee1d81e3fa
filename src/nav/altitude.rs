//! Altitude cascade: position (P) → climb rate (PID) → throttle offset,
//! plus the surface-tracking sub-loop and the pilot's climb-rate override.
//!
//! Runs at the inner loop rate; the cascade stages only advance on a fresh
//! vertical sample, and a stale gap resets the whole chain instead of
//! integrating old data.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::blackbox::{clip_i16, clip_i32, BlackboxState};
use crate::config::{CoreConfig, PidBank, PidProfile};
use crate::filter::Pt1Filter;
use crate::math::{apply_deadband, constrain_f, constrain_i, hz_to_us, us_to_s};
use crate::rc::throttle_mid;
use crate::state::{DesiredState, FreshFlags, NavEstimate, RcState, THROTTLE};

use super::{NavPid, MIN_POSITION_UPDATE_RATE_HZ};

/// Hard cap on the commanded climb rate, cm/s.
const MAX_CLIMB_RATE: f32 = 2000.0;
/// Vertical acceleration cap on climb-rate target changes, cm/s².
const MAX_VERTICAL_ACCEL: f32 = 250.0;
/// Throttle-offset smoothing cutoff, Hz.
const THROTTLE_LPF_CUTOFF_HZ: f32 = 4.0;
/// Surface-tracking altitude correction bounds, cm. Overshoot above ground
/// is preferred to undershoot.
const SURFACE_ERROR_MIN: f32 = -5.0;
const SURFACE_ERROR_MAX: f32 = 35.0;
/// Descent rate while the range sensor is lost in terrain follow, cm/s.
const SURFACE_LOST_DESCENT_RATE: f32 = -20.0;
/// Integrator seed on an armed-at-idle reset, throttle units.
const TAKEOFF_INTEGRATOR_SEED: f32 = -500.0;
/// Altitudes below this at activation count as "on the ground", cm.
const TAKEOFF_MAX_ALTITUDE: f32 = 50.0;

/// What a climb-rate command does to the surface-tracking target.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ClimbRateMode {
    KeepSurfaceTarget,
    UpdateSurfaceTarget,
    /// Abandon surface tracking (emergency descent).
    ResetSurfaceTarget,
}

pub struct AltitudeController {
    pos_z_kp: f32,
    vel_z: NavPid,
    surface: NavPid,
    throttle_filter: Pt1Filter,
    throttle_adjustment: f32,
    /// Throttle stick position that commands zero climb.
    rc_zero: i16,
    prepare_for_takeoff: bool,
    last_update_us: u64,
    last_pos_update_us: u64,
}

impl AltitudeController {
    pub fn new(profile: &PidProfile) -> Self {
        Self {
            pos_z_kp: profile.p(PidBank::Alt) as f32 / 100.0,
            vel_z: NavPid::new(
                profile.p(PidBank::Vel) as f32 / 66.7,
                profile.i(PidBank::Vel) as f32 / 20.0,
                profile.d(PidBank::Vel) as f32 / 100.0,
            ),
            surface: NavPid::new(2.0, 0.0, 0.0),
            throttle_filter: Pt1Filter::new(),
            throttle_adjustment: 0.0,
            rc_zero: 1500,
            prepare_for_takeoff: false,
            last_update_us: 0,
            last_pos_update_us: 0,
        }
    }

    /// One altitude-hold tick; publishes the throttle command.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &mut self,
        now_us: u64,
        cfg: &CoreConfig,
        est: &NavEstimate,
        fresh: &mut FreshFlags,
        desired: &mut DesiredState,
        rc: &mut RcState,
        bb: &mut BlackboxState,
    ) {
        let delta = now_us.saturating_sub(self.last_update_us);
        self.last_update_us = now_us;

        // Stale tick: likely a controller restart or a missed schedule.
        if delta > hz_to_us(MIN_POSITION_UPDATE_RATE_HZ) {
            self.last_pos_update_us = now_us;
            self.reset(est, desired);
            return;
        }

        if fresh.vertical_new {
            let delta_pos = now_us.saturating_sub(self.last_pos_update_us);
            self.last_pos_update_us = now_us;

            if delta_pos < hz_to_us(MIN_POSITION_UPDATE_RATE_HZ) {
                let dt = us_to_s(delta_pos);
                self.update_surface_tracking(dt, est, desired);
                self.update_climb_rate_target(dt, est, desired, bb);
                self.update_throttle_adjustment(dt, cfg, est, desired);
            } else {
                self.reset(est, desired);
            }

            fresh.vertical_consumed = true;
        }

        rc.command[THROTTLE] = constrain_i(
            cfg.nav.mc_hover_throttle as i32 + self.throttle_adjustment as i32,
            cfg.motors.min_throttle as i32,
            cfg.motors.max_throttle as i32,
        ) as i16;

        bb.nav_target_position_z = clip_i32(desired.pos.z);
        bb.nav_target_surface = clip_i16(desired.surface);
    }

    /// Emergency variant: pin the climb-rate target to the configured
    /// descent rate and abandon surface tracking.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_emergency_descent(
        &mut self,
        now_us: u64,
        cfg: &CoreConfig,
        est: &NavEstimate,
        fresh: &mut FreshFlags,
        desired: &mut DesiredState,
        rc: &mut RcState,
        bb: &mut BlackboxState,
    ) {
        let delta = now_us.saturating_sub(self.last_update_us);
        self.last_update_us = now_us;

        if delta > hz_to_us(MIN_POSITION_UPDATE_RATE_HZ) {
            self.last_pos_update_us = now_us;
            self.reset(est, desired);
            return;
        }

        if fresh.vertical_new {
            let delta_pos = now_us.saturating_sub(self.last_pos_update_us);
            self.last_pos_update_us = now_us;

            if delta_pos < hz_to_us(MIN_POSITION_UPDATE_RATE_HZ) {
                let dt = us_to_s(delta_pos);
                self.update_target_from_climb_rate(
                    est,
                    desired,
                    -(cfg.nav.emerg_descent_rate as f32),
                    ClimbRateMode::ResetSurfaceTarget,
                );
                self.update_climb_rate_target(dt, est, desired, bb);
                self.update_throttle_adjustment(dt, cfg, est, desired);
            } else {
                self.reset(est, desired);
            }

            fresh.vertical_consumed = true;
        }

        rc.command[THROTTLE] = constrain_i(
            cfg.nav.mc_hover_throttle as i32 + self.throttle_adjustment as i32,
            cfg.motors.min_throttle as i32,
            cfg.motors.max_throttle as i32,
        ) as i16;
    }

    /// Re-aim the altitude target so the position stage yields `climb_rate`.
    pub fn update_target_from_climb_rate(
        &self,
        est: &NavEstimate,
        desired: &mut DesiredState,
        climb_rate: f32,
        mode: ClimbRateMode,
    ) {
        if self.pos_z_kp > f32::EPSILON {
            desired.pos.z = est.pos.z + climb_rate / self.pos_z_kp;
        }

        match mode {
            ClimbRateMode::ResetSurfaceTarget => desired.surface = -1.0,
            ClimbRateMode::UpdateSurfaceTarget => {
                if desired.surface >= 0.0 && est.surface >= 0.0 && self.pos_z_kp > f32::EPSILON {
                    desired.surface = est.surface + climb_rate / self.pos_z_kp;
                }
            }
            ClimbRateMode::KeepSurfaceTarget => {}
        }
    }

    /// Terrain follow: re-derive the altitude target from the range sensor,
    /// or creep downward until it reads again.
    fn update_surface_tracking(&mut self, dt: f32, est: &NavEstimate, desired: &mut DesiredState) {
        if desired.surface < 0.0 {
            return;
        }

        if est.has_surface_sensor && est.surface >= 0.0 {
            let correction = self.surface.apply(
                desired.surface,
                est.surface,
                dt,
                SURFACE_ERROR_MIN,
                SURFACE_ERROR_MAX,
            );
            desired.pos.z = est.pos.z + correction;
        } else {
            self.update_target_from_climb_rate(
                est,
                desired,
                SURFACE_LOST_DESCENT_RATE,
                ClimbRateMode::KeepSurfaceTarget,
            );
        }
    }

    /// Position to climb-rate stage (P only), rate- and slew-limited.
    fn update_climb_rate_target(
        &mut self,
        dt: f32,
        est: &NavEstimate,
        desired: &mut DesiredState,
        bb: &mut BlackboxState,
    ) {
        let altitude_error = desired.pos.z - est.pos.z;
        let target = constrain_f(
            altitude_error * self.pos_z_kp,
            -MAX_CLIMB_RATE,
            MAX_CLIMB_RATE,
        );

        let max_change = MAX_VERTICAL_ACCEL * dt;
        desired.vel.z = constrain_f(
            target,
            desired.vel.z - max_change,
            desired.vel.z + max_change,
        );

        bb.nav_desired_velocity[2] = clip_i16(desired.vel.z);
    }

    /// Climb rate to throttle-offset stage. Bounds are symmetric about the
    /// hover throttle so the integrator can't wind past either end.
    fn update_throttle_adjustment(
        &mut self,
        dt: f32,
        cfg: &CoreConfig,
        est: &NavEstimate,
        desired: &DesiredState,
    ) {
        let adj_min = (cfg.motors.min_throttle - cfg.nav.mc_hover_throttle) as f32;
        let adj_max = (cfg.motors.max_throttle - cfg.nav.mc_hover_throttle) as f32;

        let adjustment = self
            .vel_z
            .apply(desired.vel.z, est.vel.z, dt, adj_min, adj_max);
        let adjustment = self
            .throttle_filter
            .apply(adjustment, THROTTLE_LPF_CUTOFF_HZ, dt);

        self.throttle_adjustment = constrain_f(adjustment, adj_min, adj_max);
    }

    /// Clear the cascade and hand off bumplessly from the current climb.
    pub fn reset(&mut self, est: &NavEstimate, desired: &mut DesiredState) {
        self.vel_z.reset();
        self.surface.reset();
        self.throttle_adjustment = 0.0;
        self.throttle_filter.reset(0.0);
        desired.vel.z = est.vel.z;

        if self.prepare_for_takeoff {
            // Armed at idle throttle: bias the cascade downward so spool-up
            // doesn't jump the craft off the ground.
            self.vel_z.set_integrator(TAKEOFF_INTEGRATOR_SEED);
            if self.pos_z_kp > f32::EPSILON {
                desired.pos.z = est.pos.z + TAKEOFF_INTEGRATOR_SEED / self.pos_z_kp;
            }
            self.prepare_for_takeoff = false;
        }
    }

    /// Mode entry: fix the stick zero and arm the takeoff guard.
    pub fn activate(
        &mut self,
        cfg: &CoreConfig,
        est: &NavEstimate,
        rc: &RcState,
        throttle_low: bool,
    ) {
        let zero = if cfg.nav.use_thr_mid_for_althold || throttle_low {
            throttle_mid(cfg)
        } else {
            rc.command[THROTTLE]
        };

        // Leave the pilot symmetric authority on both sides of the zero.
        self.rc_zero = constrain_i(
            zero as i32,
            (cfg.motors.min_throttle + cfg.rc_controls.alt_hold_deadband + 10) as i32,
            (cfg.motors.max_throttle - cfg.rc_controls.alt_hold_deadband - 10) as i32,
        ) as i16;

        if throttle_low && est.pos.z.abs() <= TAKEOFF_MAX_ALTITUDE {
            self.prepare_for_takeoff = true;
        }
    }

    /// Throttle deflection past the deadband commands a climb rate; the
    /// scaling differs per side so full authority is reachable both ways.
    /// Returning into the deadband locks the current altitude.
    pub fn adjust_from_rc_input(
        &mut self,
        cfg: &CoreConfig,
        est: &NavEstimate,
        desired: &mut DesiredState,
        rc: &RcState,
        was_adjusting: bool,
    ) -> bool {
        let deadband = cfg.rc_controls.alt_hold_deadband;
        let adjustment = apply_deadband(
            (rc.command[THROTTLE] - self.rc_zero) as i32,
            deadband as i32,
        );

        if adjustment != 0 {
            let max_rate = cfg.nav.max_manual_climb_rate as f32;
            let climb_rate = if adjustment > 0 {
                let span = (cfg.motors.max_throttle - self.rc_zero - deadband).max(1);
                adjustment as f32 * max_rate / span as f32
            } else {
                let span = (self.rc_zero - cfg.motors.min_throttle - deadband).max(1);
                adjustment as f32 * max_rate / span as f32
            };

            self.update_target_from_climb_rate(
                est,
                desired,
                climb_rate,
                ClimbRateMode::UpdateSurfaceTarget,
            );
            true
        } else {
            if was_adjusting {
                self.update_target_from_climb_rate(
                    est,
                    desired,
                    0.0,
                    ClimbRateMode::UpdateSurfaceTarget,
                );
            }
            false
        }
    }

    pub fn rc_zero(&self) -> i16 {
        self.rc_zero
    }

    pub fn throttle_adjustment(&self) -> f32 {
        self.throttle_adjustment
    }

    pub fn climb_rate_integrator(&self) -> f32 {
        self.vel_z.integrator()
    }
}
