//! The three enqueue policies of spec.md §4.2, modeled as separate
//! implementations of [`EnqueuePolicy`] rather than a tag switched on
//! inside one `enqueue` (§9: "different enough to warrant
//! monomorphization" — `FeedbackPolicy`'s byte-wise offset and
//! `NonePolicy`'s frame-wise offset do not share an inner loop).

use super::{PendingCopy, UmBuffer, CW_LOWER_BOUND, CW_UPPER_BOUND};
use crate::error::{fatal, UmError};
use crate::node::NodeState;

/// Producer-side policy. `enqueue` returns a `(backing_offset, len)` pair
/// rather than a live slice so [`UmBuffer::enqueue`] can perform the
/// shared post-enqueue bookkeeping (PLAY transition, listener notify)
/// without fighting the borrow checker over a slice borrowed mid-call.
pub trait EnqueuePolicy: Sized {
    fn enqueue<const N: usize>(
        buf: &mut UmBuffer<'_, Self, N>,
        pkt_size: u16,
    ) -> Result<(usize, usize), UmError>;

    /// `total_buffer_size` in `abs_offset`'s unit: bytes for
    /// [`FeedbackPolicy`], microframes otherwise.
    fn total_units<const N: usize>(buf: &UmBuffer<'_, Self, N>) -> u32;
}

/// CA_NONE (spec.md §6): overflow is fatal, no absorption.
pub struct NonePolicy;

impl EnqueuePolicy for NonePolicy {
    fn enqueue<const N: usize>(
        buf: &mut UmBuffer<'_, Self, N>,
        pkt_size: u16,
    ) -> Result<(usize, usize), UmError> {
        let cur = buf.cursor_usb_idx;
        if buf.nodes[cur].state() != NodeState::UnderUsb {
            if !buf.nodes[cur].is_hw_finished_or_initial() {
                fatal("NonePolicy: overflow, target node not HW-FINISHED/INITIAL");
            }
            buf.nodes[cur].set_state(NodeState::UnderUsb);
            buf.nodes[cur].offset = 0;
        }
        let local = buf.nodes[cur].offset;
        let off = buf.node_base(cur) + (local as usize * buf.packet_size as usize);
        buf.nodes[cur].offset = local + 1;
        buf.abs_offset = (buf.abs_offset + 1) % Self::total_units(buf);
        if buf.nodes[cur].offset == buf.frames_per_node as u32 {
            buf.nodes[cur].set_state(NodeState::UsbFinished);
            buf.cursor_usb_idx = buf.next_index(cur);
        }
        Ok((off, pkt_size as usize))
    }

    fn total_units<const N: usize>(buf: &UmBuffer<'_, Self, N>) -> u32 {
        N as u32 * buf.frames_per_node as u32
    }
}

/// CA_DROP_HALF (spec.md §6/§4.2): same frame-wise bookkeeping as
/// [`NonePolicy`], but while the congestion window is low, only a 4-byte
/// half-packet of each incoming packet survives, landing at local offsets
/// `0` and `packet_size/2` of the current node in turn (the "interleave").
/// §9's open question leaves the 4-byte width as documented rather than
/// "fixed" to 2 bytes — see DESIGN.md.
pub struct DropHalfPolicy;

impl EnqueuePolicy for DropHalfPolicy {
    fn enqueue<const N: usize>(
        buf: &mut UmBuffer<'_, Self, N>,
        pkt_size: u16,
    ) -> Result<(usize, usize), UmError> {
        buf.flush_pending_copy();

        let cur = buf.cursor_usb_idx;
        if buf.nodes[cur].state() != NodeState::UnderUsb {
            if !buf.nodes[cur].is_hw_finished_or_initial() {
                fatal("DropHalfPolicy: overflow, target node not HW-FINISHED/INITIAL");
            }
            buf.nodes[cur].set_state(NodeState::UnderUsb);
            buf.nodes[cur].offset = 0;
        }
        let local = buf.nodes[cur].offset;

        let cw = buf.congestion_window();
        if !buf.ca_active && cw <= CW_LOWER_BOUND {
            buf.ca_active = true;
            buf.ca_pair_phase = false;
        }

        let (write_off, write_len) = if buf.ca_active {
            let half_width = 4usize.min(pkt_size as usize);
            let starting_pair = !buf.ca_pair_phase;
            let local_dst = if starting_pair {
                0
            } else {
                buf.packet_size as usize / 2
            };
            let dest = buf.node_base(cur) + local_dst;
            buf.pending_copy = Some(PendingCopy {
                len_a: half_width,
                dest_a: dest,
                len_b: 0,
                dest_b: 0,
            });
            buf.ca_pair_phase = !buf.ca_pair_phase;
            // set while the second half of the pair is still outstanding;
            // cleared the moment it lands, so the leave-CA check below
            // never fires mid-pair.
            buf.half_frame_pending = starting_pair;
            if !buf.half_frame_pending && cw >= CW_UPPER_BOUND {
                buf.ca_active = false;
            }
            (buf.ca_bucket_offset(), pkt_size as usize)
        } else {
            let off = buf.node_base(cur) + local as usize * buf.packet_size as usize;
            (off, pkt_size as usize)
        };

        buf.nodes[cur].offset = local + 1;
        buf.abs_offset = (buf.abs_offset + 1) % Self::total_units(buf);
        if buf.nodes[cur].offset == buf.frames_per_node as u32 {
            buf.nodes[cur].set_state(NodeState::UsbFinished);
            buf.cursor_usb_idx = buf.next_index(cur);
        }
        Ok((write_off, write_len))
    }

    fn total_units<const N: usize>(buf: &UmBuffer<'_, Self, N>) -> u32 {
        N as u32 * buf.frames_per_node as u32
    }
}

/// CA_FEEDBACK (spec.md §6/§4.2/§4.3): `offset` counts bytes, `pkt_size`
/// may vary call to call. A packet that would cross the node's byte
/// capacity rolls the remainder into the next node; if that next node
/// isn't free, the whole write is rejected and nothing is mutated
/// (caller drops the packet). When the roll lands across the ring-wrap
/// seam (last node back to the first), the two destination runs are not
/// memory-adjacent, so the write is staged through the CA bucket and
/// split on the next call via [`super::UmBuffer::flush_pending_copy`].
pub struct FeedbackPolicy;

impl EnqueuePolicy for FeedbackPolicy {
    fn enqueue<const N: usize>(
        buf: &mut UmBuffer<'_, Self, N>,
        pkt_size: u16,
    ) -> Result<(usize, usize), UmError> {
        buf.flush_pending_copy();

        let cur = buf.cursor_usb_idx;
        let cap = buf.node_stride() as u32;

        if buf.nodes[cur].state() != NodeState::UnderUsb {
            if !buf.nodes[cur].is_hw_finished_or_initial() {
                return Err(UmError::Overflow);
            }
            buf.nodes[cur].set_state(NodeState::UnderUsb);
            buf.nodes[cur].offset = 0;
        }
        let local = buf.nodes[cur].offset;

        let remaining = cap - local;
        let total = Self::total_units(buf);

        if pkt_size as u32 <= remaining {
            let off = buf.node_base(cur) + local as usize;
            buf.nodes[cur].offset = local + pkt_size as u32;
            buf.abs_offset = (buf.abs_offset + pkt_size as u32) % total;
            if buf.nodes[cur].offset == cap {
                buf.nodes[cur].set_state(NodeState::UsbFinished);
                buf.cursor_usb_idx = buf.next_index(cur);
            }
            return Ok((off, pkt_size as usize));
        }

        // split across the node boundary.
        let next = buf.next_index(cur);
        if !buf.nodes[next].is_hw_finished_or_initial() {
            // nothing mutated yet; roll back is a no-op.
            return Err(UmError::Overflow);
        }
        let part1 = remaining;
        let part2 = pkt_size as u32 - part1;

        buf.nodes[cur].offset = cap;
        buf.nodes[cur].set_state(NodeState::UsbFinished);
        buf.nodes[next].set_state(NodeState::UnderUsb);
        buf.nodes[next].offset = part2;
        buf.cursor_usb_idx = next;
        buf.abs_offset = (buf.abs_offset + pkt_size as u32) % total;

        buf.pending_copy = Some(PendingCopy {
            len_a: part1 as usize,
            dest_a: buf.node_base(cur) + local as usize,
            len_b: part2 as usize,
            dest_b: buf.node_base(next),
        });
        Ok((buf.ca_bucket_offset(), pkt_size as usize))
    }

    fn total_units<const N: usize>(buf: &UmBuffer<'_, Self, N>) -> u32 {
        N as u32 * buf.node_stride() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferState, PauseResumeCb, PlayCb};

    struct NullCb;
    impl PlayCb for NullCb {
        fn on_play(&self, _start_offset: usize, _warm_len: usize) {}
    }
    impl PauseResumeCb for NullCb {
        fn on_pause(&self) {}
        fn on_resume(&self) {}
    }

    #[test]
    fn none_policy_startup_scenario() {
        // spec.md §8 scenario 1, adapted to NONE bookkeeping: packet_size
        // 192, frames_per_node 4, node_count 4.
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 4 * 192 + 2 * 192];
        let mut buf: UmBuffer<'_, NonePolicy, 4> =
            UmBuffer::new(&mut backing, 192, 4, &CB, &CB).unwrap();
        for _ in 0..8 {
            buf.enqueue(192).unwrap();
        }
        assert_eq!(buf.abs_offset(), 8);
        assert_eq!(buf.state(), BufferState::Play);
    }

    #[test]
    fn none_policy_ring_wrap_scenario() {
        // spec.md §8 scenario 2: init(48,4,4,NONE); enqueue 16, DMA
        // complete x4, enqueue 16 more; cursor_usb should be back at start.
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 4 * 48 + 2 * 48];
        let mut buf: UmBuffer<'_, NonePolicy, 4> =
            UmBuffer::new(&mut backing, 48, 4, &CB, &CB).unwrap();
        for _ in 0..16 {
            buf.enqueue(48).unwrap();
        }
        for _ in 0..4 {
            buf.audio_dma_complete_cb();
        }
        for _ in 0..16 {
            buf.enqueue(48).unwrap();
        }
        assert_eq!(buf.cursor_usb_index(), 0);
    }

    #[test]
    fn drop_half_enters_and_leaves_ca_within_cw_bound() {
        // spec.md §8's CA-flag testable property: between two successive
        // transitions of the CA flag, the number of packets produced is
        // between CW_LOWER_BOUND and CW_UPPER_BOUND + 1. frames_per_node=1
        // means every enqueue finishes its node immediately and advances
        // cursor_usb, so with no audio_dma_complete_cb calls the producer
        // laps back into its own USB-FINISHED nodes, driving CW up.
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 1 * 48 + 2 * 48];
        let mut buf: UmBuffer<'_, DropHalfPolicy, 4> =
            UmBuffer::new(&mut backing, 48, 1, &CB, &CB).unwrap();

        buf.enqueue(48).unwrap();
        assert!(buf.ca_active, "CA should enter on the first packet");
        let mut packets_in_ca = 1u32;
        loop {
            buf.enqueue(48).unwrap();
            packets_in_ca += 1;
            if !buf.ca_active {
                break;
            }
            assert!(packets_in_ca <= CW_UPPER_BOUND + 1, "CA never left");
        }
        assert!(packets_in_ca >= CW_LOWER_BOUND);
        assert!(packets_in_ca <= CW_UPPER_BOUND + 1);
    }

    #[test]
    fn feedback_policy_overflow_then_reenter() {
        // spec.md §8 scenario 3: fill the ring with no DMA-complete; the
        // 17th 192-byte enqueue (one node's worth is 4*192=768, the ring
        // holds 4 nodes) overflows, then recovers after a DMA complete.
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 4 * 192 + 2 * 192];
        let mut buf: UmBuffer<'_, FeedbackPolicy, 4> =
            UmBuffer::new(&mut backing, 192, 4, &CB, &CB).unwrap();
        for _ in 0..16 {
            buf.enqueue(192).unwrap();
        }
        assert!(matches!(buf.enqueue(192), Err(UmError::Overflow)));
        buf.audio_dma_complete_cb();
        assert!(buf.enqueue(192).is_ok());
    }
}
