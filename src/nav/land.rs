//! Touchdown detection: the craft must have committed to a descent, then
//! stay still, throttled below hover, and (with a working range sensor)
//! hugging the ground for the full trigger window.

#[allow(unused_imports)]
use micromath::F32Ext;

use crate::config::CoreConfig;
use crate::state::NavEstimate;

pub const LAND_DETECTOR_TRIGGER_TIME_MS: u32 = 2000;

/// Descents faster than this arm the detector, cm/s.
const DESCENT_ARM_VELOCITY: f32 = -25.0;
/// Vertical stillness bound, cm/s.
const VERTICAL_STILL_LIMIT: f32 = 25.0;
/// Horizontal stillness bound, cm/s.
const HORIZONTAL_STILL_LIMIT: f32 = 100.0;
/// Allowed height above the lowest surface reading, cm.
const SURFACE_PROXIMITY: f32 = 5.0;

pub struct LandDetector {
    condition_start_us: Option<u64>,
    /// Latched once a real descent was observed; without it a craft sitting
    /// on the bench would "land" immediately.
    has_had_some_velocity: bool,
}

impl LandDetector {
    pub fn new() -> Self {
        Self {
            condition_start_us: None,
            has_had_some_velocity: false,
        }
    }

    pub fn reset(&mut self) {
        self.condition_start_us = None;
        self.has_had_some_velocity = false;
    }

    /// Poll at RC-processing rate; `adjusted_throttle` is the throttle as
    /// published by the altitude stage, not the raw pilot stick.
    pub fn update(
        &mut self,
        now_us: u64,
        cfg: &CoreConfig,
        est: &NavEstimate,
        adjusted_throttle: i16,
    ) -> bool {
        if est.vel.z < DESCENT_ARM_VELOCITY {
            self.has_had_some_velocity = true;
        }

        let vertical_still = est.vel.z.abs() <= VERTICAL_STILL_LIMIT;
        let horizontal_still = est.vel_xy <= HORIZONTAL_STILL_LIMIT;
        let below_fly_throttle = adjusted_throttle < cfg.nav.mc_min_fly_throttle;
        let on_surface = if est.has_surface_sensor && est.surface_min > 0.0 {
            est.surface <= est.surface_min + SURFACE_PROXIMITY
        } else {
            true
        };

        let settled = self.has_had_some_velocity
            && vertical_still
            && horizontal_still
            && below_fly_throttle
            && on_surface;

        if !settled {
            self.condition_start_us = None;
            return false;
        }

        match self.condition_start_us {
            None => {
                self.condition_start_us = Some(now_us);
                false
            }
            Some(start) => {
                now_us.saturating_sub(start) >= LAND_DETECTOR_TRIGGER_TIME_MS as u64 * 1000
            }
        }
    }
}

impl Default for LandDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landed_estimate() -> NavEstimate {
        let mut est = NavEstimate::default();
        est.vel.z = 0.0;
        est.vel_xy = 0.0;
        est
    }

    fn low_throttle(cfg: &CoreConfig) -> i16 {
        cfg.nav.mc_min_fly_throttle - 40
    }

    #[test]
    fn triggers_only_after_the_full_window() {
        let cfg = CoreConfig::default();
        let mut detector = LandDetector::new();
        let mut est = landed_estimate();
        let step = 20_000u64; // 50 Hz polls
        let mut now = 1_000_000u64;

        // Committed descent first.
        est.vel.z = -30.0;
        for _ in 0..10 {
            now += step;
            assert!(!detector.update(now, &cfg, &est, low_throttle(&cfg)));
        }

        // Touchdown: still, throttled down.
        est.vel.z = 0.0;
        let window_polls = (LAND_DETECTOR_TRIGGER_TIME_MS as u64 * 1000 / step) as usize;
        for _ in 0..window_polls {
            now += step;
            assert!(
                !detector.update(now, &cfg, &est, low_throttle(&cfg)),
                "must not latch before the trigger window elapses"
            );
        }
        now += step;
        assert!(detector.update(now, &cfg, &est, low_throttle(&cfg)));
    }

    #[test]
    fn never_triggers_without_a_prior_descent() {
        let cfg = CoreConfig::default();
        let mut detector = LandDetector::new();
        let est = landed_estimate();
        let mut now = 1_000_000u64;
        for _ in 0..300 {
            now += 20_000;
            assert!(
                !detector.update(now, &cfg, &est, low_throttle(&cfg)),
                "bench-still craft must not read as landed"
            );
        }
    }

    #[test]
    fn any_violation_restarts_the_window() {
        let cfg = CoreConfig::default();
        let mut detector = LandDetector::new();
        let mut est = landed_estimate();
        let mut now = 1_000_000u64;

        est.vel.z = -30.0;
        now += 20_000;
        detector.update(now, &cfg, &est, low_throttle(&cfg));
        est.vel.z = 0.0;

        // Hold almost the whole window, then jolt sideways.
        for _ in 0..90 {
            now += 20_000;
            detector.update(now, &cfg, &est, low_throttle(&cfg));
        }
        est.vel_xy = 150.0;
        now += 20_000;
        assert!(!detector.update(now, &cfg, &est, low_throttle(&cfg)));
        est.vel_xy = 0.0;

        // Window must restart from scratch.
        for _ in 0..100 {
            now += 20_000;
            assert!(!detector.update(now, &cfg, &est, low_throttle(&cfg)));
        }
        now += 20_000;
        assert!(detector.update(now, &cfg, &est, low_throttle(&cfg)));
    }

    #[test]
    fn throttle_above_hover_blocks_detection() {
        let cfg = CoreConfig::default();
        let mut detector = LandDetector::new();
        let mut est = landed_estimate();
        est.vel.z = -30.0;
        let mut now = 1_000_000u64;
        detector.update(now, &cfg, &est, low_throttle(&cfg));
        est.vel.z = 0.0;

        for _ in 0..300 {
            now += 20_000;
            assert!(!detector.update(now, &cfg, &est, cfg.nav.mc_min_fly_throttle));
        }
    }

    #[test]
    fn surface_sensor_must_read_near_the_ground() {
        let cfg = CoreConfig::default();
        let mut detector = LandDetector::new();
        let mut est = landed_estimate();
        est.has_surface_sensor = true;
        est.surface_min = 8.0;
        est.surface = 40.0; // hovering well above ground

        est.vel.z = -30.0;
        let mut now = 1_000_000u64;
        detector.update(now, &cfg, &est, low_throttle(&cfg));
        est.vel.z = 0.0;

        for _ in 0..300 {
            now += 20_000;
            assert!(!detector.update(now, &cfg, &est, low_throttle(&cfg)));
        }

        // Down at the minimum reading: allowed to latch.
        est.surface = est.surface_min + 2.0;
        for _ in 0..101 {
            now += 20_000;
            detector.update(now, &cfg, &est, low_throttle(&cfg));
        }
        now += 20_000;
        assert!(detector.update(now, &cfg, &est, low_throttle(&cfg)));
    }
}
