//! [NODE]: a single slot of the UM buffer's ring.
//!
//! A node owns no storage of its own — its PCM slab is a fixed-size slice
//! of the owning [`crate::buffer::UmBuffer`]'s backing region, addressed by
//! index rather than pointer (see the ring construction notes in
//! `SPEC_FULL.md` §3/§9). What a node *does* own is its `state` and
//! `offset`: the bookkeeping the producer and consumer contexts hand off
//! between each other.

use core::sync::atomic::{AtomicU8, Ordering};

/// A node's position in the producer/consumer handoff.
///
/// Transitions are split by owning context: `Initial -> UnderUsb ->
/// UsbFinished` is written only by the USB producer/consumer context;
/// `UsbFinished|Initial -> UnderHw -> HwFinished` only by the DMA ISR.
/// No single transition is ever written from both contexts, which is what
/// lets [`Node::state`]/[`Node::set_state`] get away with a plain atomic
/// store instead of a lock (SPEC_FULL.md §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
#[repr(u8)]
pub enum NodeState {
    /// Never touched since the buffer was created or last paused.
    Initial = 0,
    /// Currently being filled (OUT) or drained (IN) by the USB context.
    UnderUsb = 1,
    /// USB context is done with this node; waiting on hardware.
    UsbFinished = 2,
    /// Currently being drained (OUT) or filled (IN) by the DMA engine.
    UnderHw = 3,
    /// Hardware is done with this node; waiting on USB.
    HwFinished = 4,
}

impl NodeState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Initial,
            1 => NodeState::UnderUsb,
            2 => NodeState::UsbFinished,
            3 => NodeState::UnderHw,
            4 => NodeState::HwFinished,
            _ => NodeState::Initial,
        }
    }
}

/// One ring slot. `offset` is written only by whichever single context
/// (USB producer or USB consumer) owns this buffer's enqueue/dequeue side;
/// `state` is written by both contexts but never the same transition by
/// both, so a relaxed-ish atomic suffices (we use acquire/release to be
/// conservative on weakly-ordered cores).
#[derive(Debug)]
pub struct Node {
    state: AtomicU8,
    /// Bytes (FEEDBACK policy) or frames (NONE / DROP_HALF) written into
    /// this node since it last entered `UnderUsb`.
    pub offset: u32,
}

impl Node {
    pub const fn new() -> Self {
        Node {
            state: AtomicU8::new(NodeState::Initial as u8),
            offset: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn is_hw_finished_or_initial(&self) -> bool {
        matches!(self.state(), NodeState::HwFinished | NodeState::Initial)
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_is_initial() {
        let n = Node::new();
        assert_eq!(n.state(), NodeState::Initial);
        assert_eq!(n.offset, 0);
    }

    #[test]
    fn state_round_trips() {
        let n = Node::new();
        for s in [
            NodeState::Initial,
            NodeState::UnderUsb,
            NodeState::UsbFinished,
            NodeState::UnderHw,
            NodeState::HwFinished,
        ] {
            n.set_state(s);
            assert_eq!(n.state(), s);
        }
    }

    #[test]
    fn hw_finished_or_initial_helper() {
        let n = Node::new();
        assert!(n.is_hw_finished_or_initial());
        n.set_state(NodeState::UnderUsb);
        assert!(!n.is_hw_finished_or_initial());
        n.set_state(NodeState::HwFinished);
        assert!(n.is_hw_finished_or_initial());
    }
}
