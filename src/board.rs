//! [BOARD]: the thin trait boundary between the core and the real
//! embassy-stm32/daisy peripherals (I2S, DMA, the SOF-synchronized
//! capture timer, the codec's I2C bring-up). None of that is
//! reimplemented here — spec.md §1 keeps it an external collaborator;
//! this module only names the seam the core calls through.
//!
//! A concrete board binds [`crate::buffer::PlayCb`]/
//! [`crate::buffer::PauseResumeCb`] to its DAC/mic DMA start/stop, a
//! [`SofCapture`] to its SOF-synchronized input-capture timer (the
//! `TIM2` setup in the teacher's `_usb_uac.rs`), and a
//! [`crate::feedback::FeedbackSink`] to the UAC2 feedback endpoint.

/// Source of the MCLK-per-SOF counter deltas that feed
/// [`crate::feedback::FeedbackCalculator::capture`]. A concrete
/// implementation reads a free-running timer latched by the USB SOF
/// trigger, as in the teacher's `TIM2` input-capture setup.
pub trait SofCapture {
    /// Returns the counter delta since the last SOF, wrapping-safe.
    fn latest_tick_delta(&self) -> u32;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u32);
    impl SofCapture for Fixed {
        fn latest_tick_delta(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn capture_trait_is_object_safe() {
        let src = Fixed(42);
        let dyn_src: &dyn SofCapture = &src;
        assert_eq!(dyn_src.latest_tick_delta(), 42);
    }
}
