//! Outer navigation controllers for multirotor airframes: altitude and
//! horizontal position cascades, surface tracking, land detection and
//! emergency descent, dispatched from the navigation state machine's flag
//! vector. Outputs are setpoints for the inner loop (`rc.command` rewrites).

pub mod altitude;
pub mod land;
pub mod position;

use crate::blackbox::BlackboxState;
use crate::config::CoreConfig;
use crate::filter::Pt1Filter;
use crate::math::constrain_f;
use crate::pid::mag_hold::MagHold;
use crate::rc::throttle_low;
use crate::state::{
    DesiredState, FreshFlags, NavDirectives, NavEstimate, NavStateFlags, RcState, PITCH, ROLL,
    THROTTLE, YAW,
};

use altitude::AltitudeController;
use land::LandDetector;
use position::PositionController;

/// Position samples older than this reset the consuming stage instead of
/// being integrated.
pub const MIN_POSITION_UPDATE_RATE_HZ: u32 = 5;
/// Smoothing on the outer-loop derivative terms.
const NAV_DTERM_LPF_HZ: f32 = 10.0;

// ── Outer-loop PID ───────────────────────────────────────────────────────────

/// Outer-loop PID: derivative on measurement, output limiting with
/// back-calculation anti-windup against the caller-supplied bounds.
#[derive(Clone, Copy)]
pub struct NavPid {
    kp: f32,
    ki: f32,
    kd: f32,
    kt: f32,
    integrator: f32,
    last_measurement: f32,
    dterm_filter: Pt1Filter,
    pending_reset: bool,
}

impl NavPid {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        let kt = if kp > 0.0 && ki > 0.0 {
            2.0 / (kp / ki + kd / kp)
        } else {
            0.0
        };
        Self {
            kp,
            ki,
            kd,
            kt,
            integrator: 0.0,
            last_measurement: 0.0,
            dterm_filter: Pt1Filter::new(),
            pending_reset: true,
        }
    }

    pub fn apply(
        &mut self,
        setpoint: f32,
        measurement: f32,
        dt: f32,
        out_min: f32,
        out_max: f32,
    ) -> f32 {
        let error = setpoint - measurement;

        let p_term = error * self.kp;

        if self.pending_reset {
            self.last_measurement = measurement;
            self.pending_reset = false;
        }
        let d_raw = if dt > 0.0 {
            -(measurement - self.last_measurement) / dt
        } else {
            0.0
        };
        self.last_measurement = measurement;
        let d_term = self.kd * self.dterm_filter.apply(d_raw, NAV_DTERM_LPF_HZ, dt);

        let output = p_term + self.integrator + d_term;
        let output_limited = constrain_f(output, out_min, out_max);

        // Back-calculation against the actuator bounds.
        self.integrator += error * self.ki * dt + (output_limited - output) * self.kt * dt;

        output_limited
    }

    pub fn reset(&mut self) {
        self.integrator = 0.0;
        self.dterm_filter.reset(0.0);
        self.pending_reset = true;
    }

    pub fn set_integrator(&mut self, value: f32) {
        self.integrator = value;
    }

    pub fn integrator(&self) -> f32 {
        self.integrator
    }

    pub fn kp(&self) -> f32 {
        self.kp
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

pub struct NavController {
    pub desired: DesiredState,
    pub altitude: AltitudeController,
    pub position: PositionController,
    pub land: LandDetector,
    pub is_adjusting_altitude: bool,
    pub is_adjusting_position: bool,
    /// Throttle as last published by the altitude stage; the land detector
    /// reads this rather than the raw pilot throttle.
    adjusted_throttle: i16,
}

impl NavController {
    pub fn new(cfg: &CoreConfig) -> Self {
        Self {
            desired: DesiredState::default(),
            altitude: AltitudeController::new(&cfg.pid),
            position: PositionController::new(&cfg.pid),
            land: LandDetector::new(),
            is_adjusting_altitude: false,
            is_adjusting_position: false,
            adjusted_throttle: cfg.nav.mc_hover_throttle,
        }
    }

    /// Run whichever outer controllers the navigation state machine enabled
    /// this tick. Emergency preempts everything else.
    #[allow(clippy::too_many_arguments)]
    pub fn apply(
        &mut self,
        flags: NavStateFlags,
        now_us: u64,
        cfg: &CoreConfig,
        est: &NavEstimate,
        fresh: &mut FreshFlags,
        directives: &NavDirectives,
        rc: &mut RcState,
        mag_hold: &mut MagHold,
        bb: &mut BlackboxState,
    ) {
        if flags.emergency() {
            self.apply_emergency(now_us, cfg, est, fresh, directives, rc, bb);
            return;
        }

        if flags.altitude_enabled() {
            self.altitude
                .apply(now_us, cfg, est, fresh, &mut self.desired, rc, bb);
            self.adjusted_throttle = rc.command[THROTTLE];
        }

        if flags.position_enabled() {
            self.position.apply(
                now_us,
                cfg,
                est,
                fresh,
                &mut self.desired,
                directives,
                flags,
                rc,
                self.is_adjusting_position,
                bb,
            );
        }

        if flags.heading_enabled() {
            mag_hold.set_target_deg(self.desired.yaw_cd / 100.0);
        }
    }

    /// Pilot-override pass, run at RC-processing rate for the active
    /// controllers.
    pub fn process_rc_adjustments(
        &mut self,
        flags: NavStateFlags,
        cfg: &CoreConfig,
        est: &NavEstimate,
        rc: &RcState,
    ) {
        if flags.emergency() {
            self.is_adjusting_altitude = false;
            self.is_adjusting_position = false;
            return;
        }

        self.is_adjusting_altitude = flags.altitude_enabled()
            && self.altitude.adjust_from_rc_input(
                cfg,
                est,
                &mut self.desired,
                rc,
                self.is_adjusting_altitude,
            );

        self.is_adjusting_position = flags.position_enabled()
            && self.position.adjust_from_rc_input(
                cfg,
                est,
                &mut self.desired,
                rc,
                self.is_adjusting_position,
            );
    }

    pub fn is_landing_detected(&mut self, now_us: u64, cfg: &CoreConfig, est: &NavEstimate) -> bool {
        self.land.update(now_us, cfg, est, self.adjusted_throttle)
    }

    /// Altitude-hold mode entry: capture the stick zero and arm the takeoff
    /// guard.
    pub fn activate_altitude_hold(
        &mut self,
        cfg: &CoreConfig,
        est: &NavEstimate,
        rc: &RcState,
        reversible_motors: bool,
    ) {
        let low = throttle_low(rc, cfg, reversible_motors);
        self.altitude.activate(cfg, est, rc, low);
    }

    /// Best-effort descent: level the craft and ride the altitude cascade
    /// down, or fall back to the failsafe throttle with no altitude
    /// reference.
    #[allow(clippy::too_many_arguments)]
    fn apply_emergency(
        &mut self,
        now_us: u64,
        cfg: &CoreConfig,
        est: &NavEstimate,
        fresh: &mut FreshFlags,
        directives: &NavDirectives,
        rc: &mut RcState,
        bb: &mut BlackboxState,
    ) {
        rc.command[ROLL] = 0;
        rc.command[PITCH] = 0;
        rc.command[YAW] = 0;

        if est.has_altitude_sensor {
            self.altitude
                .apply_emergency_descent(now_us, cfg, est, fresh, &mut self.desired, rc, bb);
            self.adjusted_throttle = rc.command[THROTTLE];
        } else {
            rc.command[THROTTLE] = if directives.failsafe.drop_procedure {
                cfg.motors.min_throttle
            } else {
                directives.failsafe.throttle
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::hz_to_us;
    use crate::state::FailsafeConfig;

    fn close(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    #[test]
    fn nav_pid_back_calculation_matches_hand_computation() {
        let mut pid = NavPid::new(1.0, 2.0, 0.0);
        // kt = 2 / (kp/ki) = 4
        let out = pid.apply(100.0, 0.0, 0.1, -50.0, 50.0);
        assert_eq!(out, 50.0, "output limited to the actuator bound");
        // I += 100*2*0.1 + (50 - 100)*4*0.1 = 20 - 20 = 0
        assert!(
            close(pid.integrator(), 0.0, 1e-4),
            "integrator {}, expected back-calculation to cancel windup",
            pid.integrator()
        );
    }

    #[test]
    fn nav_pid_without_i_disables_back_calculation() {
        let pid = NavPid::new(1.0, 0.0, 0.5);
        assert_eq!(pid.kt, 0.0);
        let pid = NavPid::new(0.0, 1.0, 0.5);
        assert_eq!(pid.kt, 0.0);
    }

    #[test]
    fn nav_pid_derivative_has_no_first_sample_kick() {
        let mut pid = NavPid::new(0.0, 0.0, 1.0);
        // First sample after reset sees a huge measurement step; D must not
        // spike because the history seeds from it.
        let out = pid.apply(0.0, 500.0, 0.1, -1000.0, 1000.0);
        assert!(
            out.abs() < 1e-4,
            "derivative kicked on the first sample: {out}"
        );
        let out = pid.apply(0.0, 510.0, 0.1, -1000.0, 1000.0);
        assert!(out < 0.0, "rising measurement should give negative D");
    }

    #[test]
    fn emergency_preempts_other_controllers_and_levels_sticks() {
        let cfg = CoreConfig::default();
        let mut nav = NavController::new(&cfg);
        let mut est = NavEstimate::default();
        est.has_altitude_sensor = false;
        let mut fresh = FreshFlags::default();
        let mut rc = RcState::default();
        rc.command = [200, -200, 100, 1700];
        let mut mag = MagHold::new();
        let mut bb = BlackboxState::default();

        let flags = NavStateFlags::new(
            NavStateFlags::CTL_EMERG | NavStateFlags::CTL_ALT | NavStateFlags::CTL_POS,
        );
        let directives = NavDirectives::default();
        nav.apply(
            flags, 1_000_000, &cfg, &est, &mut fresh, &directives, &mut rc, &mut mag, &mut bb,
        );

        assert_eq!(rc.command[ROLL], 0);
        assert_eq!(rc.command[PITCH], 0);
        assert_eq!(rc.command[YAW], 0);
        assert_eq!(
            rc.command[THROTTLE],
            directives.failsafe.throttle,
            "no altitude reference: open-loop failsafe throttle"
        );
    }

    #[test]
    fn emergency_drop_procedure_uses_min_throttle() {
        let cfg = CoreConfig::default();
        let mut nav = NavController::new(&cfg);
        let est = NavEstimate::default();
        let mut fresh = FreshFlags::default();
        let mut rc = RcState::default();
        let mut mag = MagHold::new();
        let mut bb = BlackboxState::default();

        let mut directives = NavDirectives::default();
        directives.failsafe = FailsafeConfig {
            drop_procedure: true,
            throttle: 1300,
        };
        nav.apply(
            NavStateFlags::new(NavStateFlags::CTL_EMERG),
            1_000_000,
            &cfg,
            &est,
            &mut fresh,
            &directives,
            &mut rc,
            &mut mag,
            &mut bb,
        );
        assert_eq!(rc.command[THROTTLE], cfg.motors.min_throttle);
    }

    #[test]
    fn emergency_with_altitude_sensor_commands_descent() {
        let cfg = CoreConfig::default();
        let mut nav = NavController::new(&cfg);
        let mut est = NavEstimate::default();
        est.has_altitude_sensor = true;
        est.pos.z = 2000.0;
        nav.desired.surface = 120.0; // terrain follow was active

        let mut rc = RcState::default();
        let mut mag = MagHold::new();
        let mut bb = BlackboxState::default();
        let directives = NavDirectives::default();
        let flags = NavStateFlags::new(NavStateFlags::CTL_EMERG);
        let step = hz_to_us(50);

        let mut now = 1_000_000u64;
        // First tick resets (cold timers), following ticks run the cascade.
        for _ in 0..200 {
            now += step;
            let mut fresh = FreshFlags {
                vertical_new: true,
                ..Default::default()
            };
            nav.apply(
                flags, now, &cfg, &est, &mut fresh, &directives, &mut rc, &mut mag, &mut bb,
            );
        }

        assert_eq!(
            nav.desired.surface, -1.0,
            "emergency descent must drop the surface-tracking target"
        );
        assert!(
            close(
                nav.desired.vel.z,
                -(cfg.nav.emerg_descent_rate as f32),
                1.0
            ),
            "descent rate target {}, expected {}",
            nav.desired.vel.z,
            -(cfg.nav.emerg_descent_rate as f32)
        );
        assert!(
            rc.command[THROTTLE] >= cfg.motors.min_throttle
                && rc.command[THROTTLE] <= cfg.motors.max_throttle
        );
    }

    #[test]
    fn heading_stage_feeds_mag_hold_target() {
        let cfg = CoreConfig::default();
        let mut nav = NavController::new(&cfg);
        nav.desired.yaw_cd = 27000.0;
        let est = NavEstimate::default();
        let mut fresh = FreshFlags::default();
        let mut rc = RcState::default();
        let mut mag = MagHold::new();
        let mut bb = BlackboxState::default();

        nav.apply(
            NavStateFlags::new(NavStateFlags::CTL_YAW),
            1_000_000,
            &cfg,
            &est,
            &mut fresh,
            &NavDirectives::default(),
            &mut rc,
            &mut mag,
            &mut bb,
        );
        assert_eq!(mag.target_deg(), 270.0);
    }
}
