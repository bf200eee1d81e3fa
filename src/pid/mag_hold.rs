//! Magnetometer heading hold: latches a target heading while the pilot
//! commands yaw, and converts the wrapped heading error into a yaw rate
//! target when engaged.

use crate::config::{CoreConfig, PidBank};
use crate::filter::Pt1Filter;
use crate::math::{constrain_f, wrap_deg_180};
use crate::state::{FlightFlags, HeadingControl};

/// Smoothing on the commanded hold rate.
const MAG_HOLD_ERROR_LPF_HZ: f32 = 2.0;
/// Yaw stick commands below this keep the hold engaged.
const YAW_STICK_DEADBAND: i16 = 15;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MagHoldState {
    Disabled,
    /// Pilot owns yaw; keep latching the current heading.
    UpdateHeading,
    Enabled,
}

#[derive(Clone, Copy)]
pub struct MagHold {
    target_deg: f32,
    rate_filter: Pt1Filter,
}

impl MagHold {
    pub fn new() -> Self {
        Self {
            target_deg: 0.0,
            rate_filter: Pt1Filter::new(),
        }
    }

    /// Heading-hold engagement for this tick.
    pub fn state(
        &self,
        flags: FlightFlags,
        has_mag: bool,
        yaw_command: i16,
        heading_control: HeadingControl,
    ) -> MagHoldState {
        if !has_mag || !flags.small_angle() {
            return MagHoldState::Disabled;
        }

        // Navigation overrides the pilot's MAG mode switch.
        match heading_control {
            HeadingControl::Auto => MagHoldState::Enabled,
            HeadingControl::Manual => MagHoldState::UpdateHeading,
            HeadingControl::None => {
                if yaw_command.abs() < YAW_STICK_DEADBAND && flags.mag_mode() {
                    MagHoldState::Enabled
                } else {
                    MagHoldState::UpdateHeading
                }
            }
        }
    }

    /// Latch the current heading as the hold target.
    pub fn set_target_deg(&mut self, heading_deg: f32) {
        self.target_deg = heading_deg;
    }

    pub fn target_deg(&self) -> f32 {
        self.target_deg
    }

    /// Yaw rate target holding the latched heading, deg/s.
    pub fn rate(&mut self, heading_deg: f32, cfg: &CoreConfig, dt: f32) -> f32 {
        let error = wrap_deg_180(heading_deg - self.target_deg);

        let rate = error * cfg.pid.p(PidBank::Mag) as f32 / 30.0;
        let limit = cfg.pid.mag_hold_rate_limit as f32;
        let rate = constrain_f(rate, -limit, limit);

        self.rate_filter.apply(rate, MAG_HOLD_ERROR_LPF_HZ, dt)
    }
}

impl Default for MagHold {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FlightFlags;

    fn level_flags() -> FlightFlags {
        FlightFlags::new(FlightFlags::SMALL_ANGLE | FlightFlags::MAG_MODE)
    }

    #[test]
    fn disabled_without_mag_or_when_tilted() {
        let hold = MagHold::new();
        let no_tilt_flag = FlightFlags::new(FlightFlags::MAG_MODE);
        assert_eq!(
            hold.state(level_flags(), false, 0, HeadingControl::None),
            MagHoldState::Disabled
        );
        assert_eq!(
            hold.state(no_tilt_flag, true, 0, HeadingControl::None),
            MagHoldState::Disabled
        );
    }

    #[test]
    fn yaw_stick_releases_the_hold() {
        let hold = MagHold::new();
        assert_eq!(
            hold.state(level_flags(), true, 0, HeadingControl::None),
            MagHoldState::Enabled
        );
        assert_eq!(
            hold.state(level_flags(), true, 120, HeadingControl::None),
            MagHoldState::UpdateHeading
        );
        assert_eq!(
            hold.state(level_flags(), true, -120, HeadingControl::None),
            MagHoldState::UpdateHeading
        );
    }

    #[test]
    fn navigation_auto_heading_wins_over_stick() {
        let hold = MagHold::new();
        assert_eq!(
            hold.state(level_flags(), true, 400, HeadingControl::Auto),
            MagHoldState::Enabled
        );
        assert_eq!(
            hold.state(level_flags(), true, 0, HeadingControl::Manual),
            MagHoldState::UpdateHeading
        );
    }

    #[test]
    fn error_wraps_across_north() {
        // Heading 1 deg, target 359 deg: the short way is +2 deg, so the
        // commanded rate must be small and positive.
        let mut hold = MagHold::new();
        hold.set_target_deg(359.0);
        let cfg = CoreConfig::default();

        let mut rate = 0.0;
        for _ in 0..400 {
            rate = hold.rate(1.0, &cfg, 0.01);
        }
        let expected = 2.0 * cfg.pid.p(PidBank::Mag) as f32 / 30.0;
        assert!(rate > 0.0, "rate should be positive, got {rate}");
        assert!(
            (rate - expected).abs() < 0.1,
            "settled rate {rate}, expected {expected}"
        );
    }

    #[test]
    fn error_stays_in_half_open_range_for_any_winding() {
        let mut hold = MagHold::new();
        let cfg = CoreConfig::default();
        hold.set_target_deg(0.0);
        for n in [-2.0f32, -1.0, 0.0, 1.0, 2.0] {
            let mut hold = hold;
            let mut rate = 0.0;
            for _ in 0..400 {
                rate = hold.rate(n * 360.0 + 30.0, &cfg, 0.01);
            }
            let expected = 30.0 * cfg.pid.p(PidBank::Mag) as f32 / 30.0;
            assert!(
                (rate - expected).abs() < 0.5,
                "winding {n}: rate {rate}, expected {expected}"
            );
        }
    }

    #[test]
    fn rate_is_clamped_to_configured_limit() {
        let mut hold = MagHold::new();
        let cfg = CoreConfig::default();
        hold.set_target_deg(0.0);
        let mut rate = 0.0;
        for _ in 0..400 {
            rate = hold.rate(179.0, &cfg, 0.01);
        }
        let limit = cfg.pid.mag_hold_rate_limit as f32;
        assert!(
            rate <= limit + 0.01 && rate > limit - 1.0,
            "rate {rate} should settle at the {limit} deg/s limit"
        );
    }
}
