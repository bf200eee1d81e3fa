#![cfg_attr(not(test), no_std)]

//! Flight control core for multirotor airframes.
//!
//! Two cooperating loops: an inner gyro-rate cascaded PID producing the
//! per-axis corrections for the motor mixer, and an outer navigation layer
//! (altitude, horizontal position, surface tracking, heading, land
//! detection, emergency descent) that feeds setpoints into the inner loop
//! by rewriting the stick commands.
//!
//! Everything hardware-shaped lives outside this crate: sensor drivers and
//! fusion, RC decoding, motor mixing, telemetry transport and the
//! navigation/failsafe state machines are collaborators reached through the
//! plain data types in [`state`]. The embedding scheduler owns one
//! [`FlightCore`] and calls its stages in a fixed order per tick; nothing
//! here blocks, allocates, or panics.

pub mod blackbox;
pub mod config;
pub mod filter;
pub mod math;
pub mod nav;
pub mod pid;
pub mod rc;
pub mod state;

pub use blackbox::BlackboxState;
pub use config::CoreConfig;
pub use nav::NavController;
pub use pid::mag_hold::MagHold;
pub use pid::AttitudeController;

use state::{
    AttitudeSample, FlightFlags, FreshFlags, HeadingControl, MixerFeedback, NavDirectives,
    NavEstimate, NavStateFlags, RcState,
};

/// The whole control core as one scheduler-owned value; no process-wide
/// mutable state. Stage order within a tick: RC adjustments → outer
/// navigation → inner loop → land detection.
pub struct FlightCore {
    pub config: CoreConfig,
    pub attitude: AttitudeController,
    pub mag_hold: MagHold,
    pub nav: NavController,
    pub blackbox: BlackboxState,
}

impl FlightCore {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            attitude: AttitudeController::new(),
            mag_hold: MagHold::new(),
            nav: NavController::new(&config),
            blackbox: BlackboxState::default(),
            config,
        }
    }

    /// Pilot-override pass for the active outer controllers; RC-processing
    /// rate.
    pub fn process_rc_adjustments(
        &mut self,
        flags: NavStateFlags,
        est: &NavEstimate,
        rc: &RcState,
    ) {
        self.nav.process_rc_adjustments(flags, &self.config, est, rc);
    }

    /// Outer navigation dispatch; rewrites `rc.command[ROLL|PITCH|THROTTLE]`
    /// per the enabled controllers.
    pub fn apply_navigation(
        &mut self,
        flags: NavStateFlags,
        now_us: u64,
        est: &NavEstimate,
        fresh: &mut FreshFlags,
        directives: &NavDirectives,
        rc: &mut RcState,
    ) {
        self.nav.apply(
            flags,
            now_us,
            &self.config,
            est,
            fresh,
            directives,
            rc,
            &mut self.mag_hold,
            &mut self.blackbox,
        );
    }

    /// Inner attitude/rate loop; returns the per-axis mixer corrections.
    pub fn run_attitude_loop(
        &mut self,
        dt: f32,
        sample: &AttitudeSample,
        rc: &RcState,
        flags: FlightFlags,
        mixer: MixerFeedback,
        heading_control: HeadingControl,
    ) -> [f32; 3] {
        self.attitude.update(
            dt,
            &self.config,
            sample,
            rc,
            flags,
            mixer,
            heading_control,
            &mut self.mag_hold,
            &mut self.blackbox,
        )
    }

    /// Touchdown check; RC-processing rate.
    pub fn is_landing_detected(&mut self, now_us: u64, est: &NavEstimate) -> bool {
        self.nav.is_landing_detected(now_us, &self.config, est)
    }

    /// Altitude-hold mode entry (called by the navigation state machine).
    pub fn activate_altitude_hold(
        &mut self,
        est: &NavEstimate,
        rc: &RcState,
        reversible_motors: bool,
    ) {
        self.nav
            .activate_altitude_hold(&self.config, est, rc, reversible_motors);
    }

    /// Disarm hand-off: clear the inner-loop accumulators.
    pub fn reset_attitude_loop(&mut self) {
        self.attitude.reset();
    }
}
