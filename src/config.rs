//! Tuning and limit configuration consumed by the control core.
//!
//! All types are plain `Copy` data; the embedding firmware owns persistence
//! and editing. Defaults carry stock multirotor tuning.

// ── PID profile ──────────────────────────────────────────────────────────────

/// Banks in the 10-slot PID profile.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum PidBank {
    Roll = 0,
    Pitch = 1,
    Yaw = 2,
    /// Altitude position stage (P only).
    Alt = 3,
    /// Horizontal position stage (P) + deceleration time (I) + expo (D).
    Pos = 4,
    /// Horizontal velocity stage.
    PosRate = 5,
    /// Fixed-wing navigation rate (unused by the multirotor core).
    NavRate = 6,
    /// Self-leveling: strength (P), rate-target LPF Hz (I), horizon
    /// transition sensitivity (D).
    Level = 7,
    /// Heading hold strength (P); also scales the heading-lock integrator.
    Mag = 8,
    /// Vertical velocity stage.
    Vel = 9,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy)]
pub struct PidProfile {
    pub p: [u8; 10],
    pub i: [u8; 10],
    pub d: [u8; 10],
    /// D-term low-pass cutoff, Hz. 0 disables.
    pub dterm_lpf_hz: u8,
    /// Yaw P-term low-pass cutoff, Hz. 0 disables.
    pub yaw_lpf_hz: u8,
    /// Yaw P-term clamp. 0 disables.
    pub yaw_p_limit: u16,
    /// Maximum commanded tilt, deci-degrees, per ROLL/PITCH.
    pub max_angle_inclination: [i16; 2],
    /// Heading-hold output clamp, deg/s.
    pub mag_hold_rate_limit: u8,
}

impl PidProfile {
    pub fn p(&self, bank: PidBank) -> u8 {
        self.p[bank as usize]
    }

    pub fn i(&self, bank: PidBank) -> u8 {
        self.i[bank as usize]
    }

    pub fn d(&self, bank: PidBank) -> u8 {
        self.d[bank as usize]
    }
}

impl Default for PidProfile {
    fn default() -> Self {
        Self {
            //   roll pitch yaw  alt  pos posr navr lvl  mag  vel
            p: [40, 40, 85, 50, 65, 180, 10, 20, 60, 100],
            i: [30, 30, 45, 0, 120, 15, 5, 10, 0, 50],
            d: [23, 23, 0, 0, 10, 100, 8, 75, 0, 10],
            dterm_lpf_hz: 40,
            yaw_lpf_hz: 30,
            yaw_p_limit: 300,
            max_angle_inclination: [300, 300],
            mag_hold_rate_limit: 90,
        }
    }
}

// ── Rates / receiver / motors ────────────────────────────────────────────────

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy)]
pub struct ControlRateConfig {
    /// Per-axis rate setting; full stick commands `stick * (rate + 20) / 50`
    /// deg/s.
    pub rates: [u8; 3],
    /// Throttle PID attenuation strength, percent. 0 disables TPA.
    pub dyn_thr_pid: u8,
    /// Throttle above which TPA engages, µs units. Must stay below 2000.
    pub tpa_breakpoint: u16,
    /// Throttle stick midpoint, percent of the throttle range.
    pub thr_mid8: u8,
}

impl Default for ControlRateConfig {
    fn default() -> Self {
        Self {
            rates: [20, 20, 20],
            dyn_thr_pid: 0,
            tpa_breakpoint: 1500,
            thr_mid8: 50,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy)]
pub struct RxConfig {
    pub mincheck: i16,
    pub maxcheck: i16,
    pub midrc: i16,
}

impl Default for RxConfig {
    fn default() -> Self {
        Self {
            mincheck: 1100,
            maxcheck: 1900,
            midrc: 1500,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy)]
pub struct MotorConfig {
    pub min_throttle: i16,
    pub max_throttle: i16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            min_throttle: 1150,
            max_throttle: 1850,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy)]
pub struct RcControlsConfig {
    /// Throttle deadband around the hold zero before a climb is commanded.
    pub alt_hold_deadband: i16,
    /// Roll/pitch deadband before a position adjustment is commanded.
    pub pos_hold_deadband: i16,
    /// Throttle band around midrc treated as "low" with reversible motors.
    pub deadband3d_throttle: i16,
}

impl Default for RcControlsConfig {
    fn default() -> Self {
        Self {
            alt_hold_deadband: 50,
            pos_hold_deadband: 20,
            deadband3d_throttle: 50,
        }
    }
}

// ── Navigation ───────────────────────────────────────────────────────────────

/// Pilot-assist behavior while a position controller is engaged.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum UserControlMode {
    /// Sticks bypass the position controller and feed the leveling loop.
    Atti,
    /// Sticks command a ground-frame velocity through the position target.
    Cruise,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy)]
pub struct NavConfig {
    /// Throttle that produces unity thrust-to-weight, µs units.
    pub mc_hover_throttle: i16,
    /// Below this commanded throttle the craft cannot stay airborne.
    pub mc_min_fly_throttle: i16,
    /// Maximum bank the position controller may command, degrees.
    pub mc_max_bank_angle: u8,
    /// Pilot climb-rate authority in altitude hold, cm/s.
    pub max_manual_climb_rate: u16,
    /// Pilot velocity authority in cruise position hold, cm/s.
    pub max_manual_speed: u16,
    /// Emergency descent rate, cm/s.
    pub emerg_descent_rate: u16,
    /// Use the throttle-curve midpoint as the hold zero instead of the
    /// throttle captured at activation.
    pub use_thr_mid_for_althold: bool,
    pub user_control_mode: UserControlMode,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            mc_hover_throttle: 1500,
            mc_min_fly_throttle: 1200,
            mc_max_bank_angle: 30,
            max_manual_climb_rate: 200,
            max_manual_speed: 500,
            emerg_descent_rate: 500,
            use_thr_mid_for_althold: false,
            user_control_mode: UserControlMode::Atti,
        }
    }
}

// ── Aggregate ────────────────────────────────────────────────────────────────

/// Everything the core reads; owned by the scheduler, passed by reference
/// into each stage.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Default)]
pub struct CoreConfig {
    pub pid: PidProfile,
    pub rates: ControlRateConfig,
    pub rx: RxConfig,
    pub motors: MotorConfig,
    pub rc_controls: RcControlsConfig,
    pub nav: NavConfig,
}
