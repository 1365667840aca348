//! Error taxonomy for the UM buffer core.
//!
//! State-machine invariant violations are not part of this enum: they are
//! programmer errors and are handled by [`crate::fatal`], which halts the
//! device rather than returning a value a caller could ignore.

/// Recoverable error conditions raised by buffer construction and the
/// producer/consumer entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum UmError {
    /// Invalid arguments to `init`/`set_driver`: bad policy combination,
    /// packet size larger than `max_packet_size`, zero node count, etc.
    Args,
    /// Backing region or node allocation failed (only possible for
    /// implementations that allocate; the `heapless`-backed core instead
    /// reports this if a caller-supplied region is too small).
    NoMem,
    /// Producer found its target node still `UnderHw`/`UnderUsb`. Only
    /// returned in `Feedback` policy; `None` policy treats overflow as
    /// fatal per spec.
    Overflow,
    /// IN-stream consumer found the next node not `HwFinished`.
    Underflow,
}

impl core::fmt::Display for UmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            UmError::Args => "invalid arguments",
            UmError::NoMem => "backing region too small",
            UmError::Overflow => "producer overflow",
            UmError::Underflow => "consumer underflow",
        };
        f.write_str(msg)
    }
}

/// Halts the device with a recorded cause after a node-state invariant
/// violation. Mirrors the source's `UM_ASSERT`/`BREAK; while(1){}` halt:
/// these are programmer errors (concurrent writers to one field, or a
/// dropped DMA interrupt), not conditions a caller can recover from.
#[cold]
#[inline(never)]
pub fn fatal(cause: &'static str) -> ! {
    defmt::error!("um buffer state machine violation: {}", cause);
    panic!("um buffer state machine violation: {}", cause);
}
