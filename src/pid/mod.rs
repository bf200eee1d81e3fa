//! Inner three-axis attitude/rate controller.
//!
//! One rate-PID routine runs all three axes; yaw's special cases (P clamp,
//! P-term smoothing, TPA exemption) live in per-axis policy records rather
//! than axis branches. Self-leveling, the heading-lock integrator, and the
//! magnetometer hold feed the per-axis rate targets upstream of the PID.

pub mod mag_hold;

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::blackbox::{clip_i16, BlackboxState};
use crate::config::{CoreConfig, PidBank};
use crate::filter::{FirFilter, Pt1Filter};
use crate::math::constrain_f;
use crate::rc::{rc_command_to_angle, rc_command_to_rate, stick_deflection};
use crate::state::{
    AttitudeSample, FlightFlags, HeadingControl, MixerFeedback, RcState, PITCH, ROLL, YAW,
};

use mag_hold::{MagHold, MagHoldState};

/// Rate targets beyond this cannot be measured reliably by the gyro.
pub const GYRO_SATURATION_LIMIT: f32 = 1800.0;
/// Correction range handed to the mixer.
pub const PID_MAX_OUTPUT: f32 = 1000.0;

const RATE_P_SCALE: f32 = 1.0 / 40.0;
const RATE_I_SCALE: f32 = 1.0 / 10.0;
const RATE_D_SCALE: f32 = 1.0 / 4000.0;
const LEVEL_P_SCALE: f32 = 1.0 / 40.0;
const HEADING_LOCK_P_SCALE: f32 = 1.0 / 80.0;
/// Accumulated heading-lock error clamp, degrees.
const HEADING_LOCK_LIMIT: f32 = 45.0;
/// Commanded rates above this release the heading lock, deg/s.
const HEADING_LOCK_RATE_THRESHOLD: f32 = 2.0;
/// P+D attenuation while the mixer reports saturation.
const SATURATION_ATTENUATION: f32 = 0.33;

/// Holoborodko 5-point smooth noise-robust differentiator, newest sample
/// first; divide by 8·dT.
const DTERM_COEFFS: [f32; 5] = [5.0, 2.0, -8.0, -2.0, 3.0];
const DTERM_DENOM: f32 = 8.0;

#[derive(Clone, Copy, Default)]
struct AxisGains {
    kp: f32,
    ki: f32,
    kd: f32,
    /// Back-calculation gain; 0 disables (P or I unset).
    kt: f32,
}

/// Per-axis special casing, resolved from config once per tick.
#[derive(Clone, Copy, Default)]
struct AxisPolicy {
    /// Throttle PID attenuation applies (roll/pitch only).
    tpa: bool,
    /// P-term clamp; 0 disables.
    p_limit: f32,
    /// P-term low-pass cutoff, Hz; 0 disables.
    pterm_lpf_hz: f32,
}

#[derive(Clone, Copy, Default)]
struct AxisState {
    gains: AxisGains,
    rate_target: f32,
    gyro_rate: f32,
    error_gyro_i: f32,
    /// Anti-windup envelope; grows to the last unsaturated |I|.
    error_gyro_i_limit: f32,
    rate_history: FirFilter<5>,
    angle_filter: Pt1Filter,
    pterm_filter: Pt1Filter,
    dterm_filter: Pt1Filter,
}

pub struct AttitudeController {
    axes: [AxisState; 3],
    heading_lock_accum: f32,
    /// Last published corrections, ±[`PID_MAX_OUTPUT`].
    pub output: [f32; 3],
}

impl AttitudeController {
    pub fn new() -> Self {
        Self {
            axes: [AxisState::default(); 3],
            heading_lock_accum: 0.0,
            output: [0.0; 3],
        }
    }

    /// Clear accumulated state so the next tick starts bumplessly.
    pub fn reset(&mut self) {
        for axis in self.axes.iter_mut() {
            axis.error_gyro_i = 0.0;
            axis.error_gyro_i_limit = 0.0;
            axis.rate_history.reset();
        }
        self.heading_lock_accum = 0.0;
    }

    /// Run one gyro-period update and publish the per-axis corrections.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        dt: f32,
        cfg: &CoreConfig,
        sample: &AttitudeSample,
        rc: &RcState,
        flags: FlightFlags,
        mixer: MixerFeedback,
        heading_control: HeadingControl,
        mag_hold: &mut MagHold,
        bb: &mut BlackboxState,
    ) -> [f32; 3] {
        if dt <= 0.0 {
            return self.output;
        }

        let policies = Self::axis_policies(cfg, mixer);
        self.refresh_gains(cfg, rc, &policies);

        for axis in 0..3 {
            self.axes[axis].gyro_rate = sample.gyro_dps[axis];
        }

        let mag_state = mag_hold.state(flags, sample.has_mag, rc.command[YAW], heading_control);
        if mag_state == MagHoldState::UpdateHeading {
            mag_hold.set_target_deg(sample.heading_dd / 10.0);
        }

        for axis in [ROLL, PITCH] {
            let stick_rate = rc_command_to_rate(rc.command[axis], cfg.rates.rates[axis]);
            let target = if flags.angle_mode() || flags.horizon_mode() {
                self.leveled_rate_target(axis, stick_rate, cfg, sample, rc, flags, dt)
            } else {
                stick_rate
            };
            self.axes[axis].rate_target =
                constrain_f(target, -GYRO_SATURATION_LIMIT, GYRO_SATURATION_LIMIT);
        }

        let yaw_target = if mag_state == MagHoldState::Enabled {
            mag_hold.rate(sample.heading_dd / 10.0, cfg, dt)
        } else {
            rc_command_to_rate(rc.command[YAW], cfg.rates.rates[YAW])
        };
        self.axes[YAW].rate_target =
            constrain_f(yaw_target, -GYRO_SATURATION_LIMIT, GYRO_SATURATION_LIMIT);

        if flags.heading_lock() && mag_state != MagHoldState::Enabled {
            self.apply_heading_lock(cfg, flags, dt);
        }

        for axis in 0..3 {
            let (p, d, out) =
                Self::rate_pid(&mut self.axes[axis], &policies[axis], cfg, flags, mixer, dt);
            self.output[axis] = out;
            bb.axis_p[axis] = clip_i16(p);
            bb.axis_i[axis] = clip_i16(self.axes[axis].error_gyro_i);
            bb.axis_d[axis] = clip_i16(d);
            bb.axis_setpoint[axis] = clip_i16(self.axes[axis].rate_target);
            bb.axis_output[axis] = clip_i16(out);
        }

        self.output
    }

    fn axis_policies(cfg: &CoreConfig, mixer: MixerFeedback) -> [AxisPolicy; 3] {
        // Yaw P clamp only makes sense when yaw authority comes from motors.
        let yaw_p_limit = if mixer.motor_count >= 4 && cfg.pid.yaw_p_limit > 0 {
            cfg.pid.yaw_p_limit as f32
        } else {
            0.0
        };
        [
            AxisPolicy {
                tpa: true,
                p_limit: 0.0,
                pterm_lpf_hz: 0.0,
            },
            AxisPolicy {
                tpa: true,
                p_limit: 0.0,
                pterm_lpf_hz: 0.0,
            },
            AxisPolicy {
                tpa: false,
                p_limit: yaw_p_limit,
                pterm_lpf_hz: cfg.pid.yaw_lpf_hz as f32,
            },
        ]
    }

    fn refresh_gains(&mut self, cfg: &CoreConfig, rc: &RcState, policies: &[AxisPolicy; 3]) {
        const BANKS: [PidBank; 3] = [PidBank::Roll, PidBank::Pitch, PidBank::Yaw];

        let throttle = rc.data[crate::state::THROTTLE];
        let tpa = tpa_factor(cfg, throttle);
        let kd_att = kd_attenuation(cfg, throttle);

        for axis in 0..3 {
            let bank = BANKS[axis];
            let mut kp = cfg.pid.p(bank) as f32 * RATE_P_SCALE;
            let ki = cfg.pid.i(bank) as f32 * RATE_I_SCALE;
            let mut kd = cfg.pid.d(bank) as f32 * RATE_D_SCALE;

            if policies[axis].tpa {
                kp *= tpa;
                kd *= tpa * kd_att;
            }

            let kt = if kp > 0.0 && ki > 0.0 {
                2.0 / (kp / ki + kd / kp)
            } else {
                0.0
            };

            self.axes[axis].gains = AxisGains { kp, ki, kd, kt };
        }
    }

    /// Self-leveling rate target for roll/pitch in ANGLE or HORIZON mode.
    #[allow(clippy::too_many_arguments)]
    fn leveled_rate_target(
        &mut self,
        axis: usize,
        stick_rate: f32,
        cfg: &CoreConfig,
        sample: &AttitudeSample,
        rc: &RcState,
        flags: FlightFlags,
        dt: f32,
    ) -> f32 {
        let max_incl = cfg.pid.max_angle_inclination[axis] as f32;
        let angle_target = constrain_f(rc_command_to_angle(rc.command[axis]), -max_incl, max_incl);
        let angle_error = (angle_target - sample.angles_dd[axis]) / 10.0;

        let mut rate_target = angle_error * cfg.pid.p(PidBank::Level) as f32 * LEVEL_P_SCALE;

        // Smooth the leveling response; cutoff doubles as the enable.
        let lpf_hz = cfg.pid.i(PidBank::Level);
        if lpf_hz != 0 {
            rate_target = self.axes[axis]
                .angle_filter
                .apply(rate_target, lpf_hz as f32, dt);
        }

        if flags.horizon_mode() {
            stick_rate + rate_target * horizon_strength(cfg, rc)
        } else {
            rate_target
        }
    }

    /// Integrate residual yaw drift and replace the rate target with the
    /// correction needed to wind it back.
    fn apply_heading_lock(&mut self, cfg: &CoreConfig, flags: FlightFlags, dt: f32) {
        let yaw = &mut self.axes[YAW];
        if yaw.rate_target.abs() > HEADING_LOCK_RATE_THRESHOLD || !flags.armed() {
            self.heading_lock_accum = 0.0;
        } else {
            self.heading_lock_accum += (yaw.rate_target - yaw.gyro_rate) * dt;
            self.heading_lock_accum =
                constrain_f(self.heading_lock_accum, -HEADING_LOCK_LIMIT, HEADING_LOCK_LIMIT);
            yaw.rate_target =
                self.heading_lock_accum * cfg.pid.p(PidBank::Mag) as f32 * HEADING_LOCK_P_SCALE;
        }
    }

    fn rate_pid(
        axis: &mut AxisState,
        policy: &AxisPolicy,
        cfg: &CoreConfig,
        flags: FlightFlags,
        mixer: MixerFeedback,
        dt: f32,
    ) -> (f32, f32, f32) {
        let gains = axis.gains;
        let rate_error = axis.rate_target - axis.gyro_rate;

        let mut p_term = rate_error * gains.kp;
        if policy.p_limit > 0.0 {
            p_term = constrain_f(p_term, -policy.p_limit, policy.p_limit);
        }
        if policy.pterm_lpf_hz > 0.0 {
            p_term = axis.pterm_filter.apply(p_term, policy.pterm_lpf_hz, dt);
        }

        let d_term = if gains.kd == 0.0 {
            0.0
        } else {
            axis.rate_history.update(axis.gyro_rate);
            let mut d =
                axis.rate_history.weighted_sum(&DTERM_COEFFS) * (-gains.kd / (DTERM_DENOM * dt));
            if cfg.pid.dterm_lpf_hz != 0 {
                d = axis.dterm_filter.apply(d, cfg.pid.dterm_lpf_hz as f32, dt);
            }
            d
        };

        let attenuation = if flags.pid_attenuate() {
            SATURATION_ATTENUATION
        } else {
            1.0
        };

        let output = (p_term + d_term) * attenuation + axis.error_gyro_i;
        let output_limited = constrain_f(output, -PID_MAX_OUTPUT, PID_MAX_OUTPUT);

        // Back-calculation: the saturation excess unwinds the integrator.
        axis.error_gyro_i +=
            rate_error * gains.ki * dt + (output_limited - output) * gains.kt * dt;

        // The envelope expands to the last unsaturated magnitude and freezes
        // while motors are limited.
        if flags.anti_windup() || mixer.limit_reached {
            axis.error_gyro_i = constrain_f(
                axis.error_gyro_i,
                -axis.error_gyro_i_limit,
                axis.error_gyro_i_limit,
            );
        } else {
            axis.error_gyro_i_limit = axis.error_gyro_i.abs();
        }

        (p_term, d_term, output_limited)
    }
}

impl Default for AttitudeController {
    fn default() -> Self {
        Self::new()
    }
}

/// Attenuation of leveling strength in HORIZON mode: 1 at centered sticks,
/// fading to 0 as the most deflected stick approaches full throw, shaped by
/// the LEVEL D sensitivity.
fn horizon_strength(cfg: &CoreConfig, rc: &RcState) -> f32 {
    let roll = stick_deflection(rc.data[ROLL], cfg.rx.midrc).abs();
    let pitch = stick_deflection(rc.data[PITCH], cfg.rx.midrc).abs();
    let most_deflected = roll.max(pitch) as f32;

    let strength = (500.0 - most_deflected) / 500.0;

    let sensitivity = cfg.pid.d(PidBank::Level);
    if sensitivity == 0 {
        0.0
    } else {
        constrain_f((strength - 1.0) * (100.0 / sensitivity as f32) + 1.0, 0.0, 1.0)
    }
}

/// Thrust PID attenuation from the raw throttle channel.
fn tpa_factor(cfg: &CoreConfig, throttle: i16) -> f32 {
    if cfg.rates.dyn_thr_pid == 0 || (throttle as f32) < cfg.rates.tpa_breakpoint as f32 {
        return 1.0;
    }
    let strength = cfg.rates.dyn_thr_pid as f32 / 100.0;
    if (throttle as f32) < 2000.0 {
        let span = (2000.0 - cfg.rates.tpa_breakpoint as f32).max(1.0);
        1.0 - strength * (throttle as f32 - cfg.rates.tpa_breakpoint as f32) / span
    } else {
        1.0 - strength
    }
}

/// kD fade-out at low throttle, where prop wash makes the D term noisy.
fn kd_attenuation(cfg: &CoreConfig, throttle: i16) -> f32 {
    let span = ((cfg.rx.maxcheck - cfg.rx.mincheck) as f32).max(1.0);
    let rel = (throttle - cfg.rx.mincheck) as f32 / span;
    if rel < 0.25 {
        constrain_f(rel / 0.25 + 0.5, 0.0, 1.0)
    } else {
        1.0
    }
}
