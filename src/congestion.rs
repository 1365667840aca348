//! [CONGESTION]: the congestion-avoidance controller (spec.md §4.3).
//!
//! Consumes free-space percentage samples from a UM buffer's listener
//! dispatch and, for FEEDBACK-policy buffers, biases the emitted feedback
//! value between the measured MCLK-derived rate and a fixed
//! `ideal_bitrate` with hysteresis. DROP-HALF's own discard/insert bias is
//! the congestion window toggle already built into `DropHalfPolicy`
//! (`src/buffer/policy.rs`) — this controller does not duplicate it.

use crate::listener::CaListener;
use core::cell::Cell;

/// Free space at or above which the reported rate is forced to
/// `ideal_bitrate` (source's `BUFF_FREE_SPACE_UPPER_BOUND`).
pub const UPPER_BOUND: u8 = 56;
/// Free space at or below which the reported rate reverts to the
/// measured value (source's `BUFF_FREE_SPACE_LOWER_BOUND`).
pub const LOWER_BOUND: u8 = 25;

/// Hysteresis controller for the FEEDBACK policy's reported rate
/// (spec.md §4.3).
pub struct CongestionController {
    ideal_bitrate: u32,
    use_ideal: Cell<bool>,
    /// Debug-only witness of how many times `adjust_bitrate` has flipped
    /// `use_ideal`, standing in for one source variant's `test_flag_work`
    /// global (§9 open question). Never read back into `resolve` — it is
    /// observation only, per the "debug witness, not behavior" resolution
    /// recorded in DESIGN.md.
    #[cfg(debug_assertions)]
    flip_count: Cell<u32>,
}

impl CongestionController {
    pub fn new(ideal_bitrate: u32) -> Self {
        CongestionController {
            ideal_bitrate,
            use_ideal: Cell::new(false),
            #[cfg(debug_assertions)]
            flip_count: Cell::new(0),
        }
    }

    /// `adjust_bitrate` in spec.md §4.3. Between bounds, preserves the
    /// previous decision.
    pub fn adjust_bitrate(&self, free_pct: u8) {
        if free_pct >= UPPER_BOUND {
            if !self.use_ideal.get() {
                self.note_flip();
            }
            self.use_ideal.set(true);
        } else if free_pct <= LOWER_BOUND {
            if self.use_ideal.get() {
                self.note_flip();
            }
            self.use_ideal.set(false);
        }
    }

    #[cfg(debug_assertions)]
    fn note_flip(&self) {
        let n = self.flip_count.get() + 1;
        self.flip_count.set(n);
        defmt::trace!("congestion controller: use_ideal flip #{}", n);
    }

    #[cfg(not(debug_assertions))]
    fn note_flip(&self) {}

    /// Number of `use_ideal` flips observed so far. Debug builds only.
    #[cfg(debug_assertions)]
    pub fn flip_count(&self) -> u32 {
        self.flip_count.get()
    }

    /// Resolves the rate to report: `ideal_bitrate` while the deadband
    /// says "slow the host down", otherwise the measured value handed in
    /// by the feedback calculator.
    pub fn resolve(&self, measured: u32) -> u32 {
        if self.use_ideal.get() {
            self.ideal_bitrate
        } else {
            measured
        }
    }
}

impl CaListener for CongestionController {
    fn on_free_space(&self, free_space_percent: u8) {
        self.adjust_bitrate(free_space_percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_sequence_matches_scenario() {
        // spec.md §8 scenario 6: adjust_bitrate([60,55,40,24,30,56]) ->
        // [ideal, ideal, ideal, measured, measured, ideal].
        let ctrl = CongestionController::new(44_100);
        let measured = 48_000;
        let inputs = [60u8, 55, 40, 24, 30, 56];
        let mut got = [0u32; 6];
        for (i, pct) in inputs.iter().enumerate() {
            ctrl.adjust_bitrate(*pct);
            got[i] = ctrl.resolve(measured);
        }
        assert_eq!(
            got,
            [44_100, 44_100, 44_100, 48_000, 48_000, 44_100]
        );
    }

    #[test]
    fn listener_impl_drives_same_state() {
        let ctrl = CongestionController::new(1);
        ctrl.on_free_space(60);
        assert_eq!(ctrl.resolve(99), 1);
        ctrl.on_free_space(10);
        assert_eq!(ctrl.resolve(99), 99);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn flip_count_only_counts_actual_transitions() {
        let ctrl = CongestionController::new(1);
        // repeated highs: one flip, not three.
        ctrl.adjust_bitrate(60);
        ctrl.adjust_bitrate(70);
        ctrl.adjust_bitrate(56);
        assert_eq!(ctrl.flip_count(), 1);
        // a deadband sample does not flip.
        ctrl.adjust_bitrate(40);
        assert_eq!(ctrl.flip_count(), 1);
        // drop to low: second flip.
        ctrl.adjust_bitrate(25);
        assert_eq!(ctrl.flip_count(), 2);
    }
}
