//! Stick command scaling between the RC decoder's µs-style units and the
//! controller's angle/rate units. The lookup-table shaping itself lives in
//! the RC layer; these are the linear maps the control loops invert.

use crate::config::CoreConfig;
use crate::math::{constrain_f, constrain_i};
use crate::state::{RcState, THROTTLE};

/// Stick deflection relative to `midrc`, clamped to ±500.
pub fn stick_deflection(raw: i16, midrc: i16) -> i32 {
    constrain_i(raw as i32 - midrc as i32, -500, 500)
}

/// Stick command (±500) to a tilt target in deci-degrees.
pub fn rc_command_to_angle(command: i16) -> f32 {
    command as f32 * 2.0
}

/// Tilt in deci-degrees back to a stick command. Inverse of
/// [`rc_command_to_angle`] up to integer rounding.
pub fn angle_to_rc_command(angle_dd: f32) -> i16 {
    constrain_f(angle_dd / 2.0, -500.0, 500.0) as i16
}

/// Stick command (±500) to a body rate target in deg/s for the given rate
/// setting.
pub fn rc_command_to_rate(command: i16, rate: u8) -> f32 {
    command as f32 * (rate as f32 + 20.0) / 50.0
}

/// Rate in deg/s back to a stick command. Inverse of
/// [`rc_command_to_rate`] for positive rate settings.
pub fn rate_to_rc_command(rate_dps: f32, rate: u8) -> i16 {
    constrain_f(rate_dps * 50.0 / (rate as f32 + 20.0), -500.0, 500.0) as i16
}

/// Throttle midpoint of the configured throttle curve, µs units.
pub fn throttle_mid(cfg: &CoreConfig) -> i16 {
    let span = (cfg.motors.max_throttle - cfg.motors.min_throttle) as i32;
    (cfg.motors.min_throttle as i32 + span * cfg.rates.thr_mid8 as i32 / 100) as i16
}

/// Whether the raw throttle reads "low". With reversible motors the low zone
/// is the band around midrc instead of the bottom of the range.
pub fn throttle_low(rc: &RcState, cfg: &CoreConfig, reversible_motors: bool) -> bool {
    let raw = rc.data[THROTTLE];
    if reversible_motors {
        raw > cfg.rx.midrc - cfg.rc_controls.deadband3d_throttle
            && raw < cfg.rx.midrc + cfg.rc_controls.deadband3d_throttle
    } else {
        raw < cfg.rx.mincheck
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_round_trip() {
        for angle_dd in (-900..=900).step_by(2) {
            let angle = angle_dd as f32;
            let back = rc_command_to_angle(angle_to_rc_command(angle));
            assert!(
                (back - angle).abs() <= 2.0,
                "angle {angle} came back as {back}"
            );
        }
    }

    #[test]
    fn rate_round_trip() {
        for rate in [10u8, 20, 70] {
            for command in [-500i16, -123, 0, 123, 500] {
                let dps = rc_command_to_rate(command, rate);
                let back = rate_to_rc_command(dps, rate);
                assert_eq!(back, command, "rate setting {rate}, command {command}");
            }
        }
    }

    #[test]
    fn full_stick_rate_scaling() {
        // rate 20 -> full stick commands 400 deg/s
        assert_eq!(rc_command_to_rate(500, 20), 400.0);
        assert_eq!(rc_command_to_rate(-500, 20), -400.0);
    }

    #[test]
    fn deflection_clamps_to_stick_range() {
        assert_eq!(stick_deflection(2100, 1500), 500);
        assert_eq!(stick_deflection(900, 1500), -500);
        assert_eq!(stick_deflection(1600, 1500), 100);
    }

    #[test]
    fn throttle_low_modes() {
        let cfg = CoreConfig::default();
        let mut rc = RcState::default();

        rc.data[THROTTLE] = 1050;
        assert!(throttle_low(&rc, &cfg, false));
        rc.data[THROTTLE] = 1200;
        assert!(!throttle_low(&rc, &cfg, false));

        // Reversible motors: low zone is around midrc.
        rc.data[THROTTLE] = 1500;
        assert!(throttle_low(&rc, &cfg, true));
        rc.data[THROTTLE] = 1600;
        assert!(!throttle_low(&rc, &cfg, true));
    }
}
