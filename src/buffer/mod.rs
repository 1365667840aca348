//! [UM_BUFFER]: the producer/consumer core.
//!
//! A buffer owns one flat backing region sliced into `node_count` physically
//! equal node slabs, an optional CA bucket (present for every policy but
//! `NonePolicy`), and a fixed silent padding slab used to answer `dequeue`
//! before the stream has warmed up. Node slabs are addressed by index
//! (`node_base`), never by stored pointer — see `SPEC_FULL.md` §9 and the
//! ring construction notes in `src/node.rs`.
//!
//! The three producer policies (`NonePolicy`, `DropHalfPolicy`,
//! `FeedbackPolicy`) share this module's state-transition and listener-
//! notification plumbing and differ only in how `enqueue`'s write target is
//! chosen; see `policy.rs`.

pub mod policy;

use crate::error::{fatal, UmError};
use crate::listener::ListenerRegistry;
use crate::node::{Node, NodeState};

pub use policy::{DropHalfPolicy, EnqueuePolicy, FeedbackPolicy, NonePolicy};

/// Congestion window bound at which DROP-HALF enters CA (source's
/// `CW_LOWER_BOUND`).
pub const CW_LOWER_BOUND: u32 = 1;
/// Congestion window bound at which DROP-HALF leaves CA, provided
/// `half_frame_pending` is clear (source's `CW_UPPER_BOUND`).
pub const CW_UPPER_BOUND: u32 = 3;

/// Fraction of `total` below which `dequeue`'s startup dance keeps returning
/// the silent tail region. §9's open question selects `/4` over the
/// source's `/2` variant as the more conservative choice against underflow.
const WARMUP_DIVISOR: u32 = 4;

/// `play_cb` / `pause_resume_cb` in spec.md §3. Implementors are the
/// external driver bound at `init`/`set_driver` time (the I2S/DMA/codec
/// glue, an external collaborator per spec.md §1).
pub trait PlayCb {
    /// Invoked exactly once on the INIT→PLAY transition, with the backing
    /// slab's start and the number of warm bytes already staged.
    fn on_play(&self, start_offset: usize, warm_len: usize);
}

/// Pause/resume sink bound alongside a [`PlayCb`].
pub trait PauseResumeCb {
    fn on_pause(&self);
    fn on_resume(&self);
}

/// `state` ∈ {INIT, READY, PLAY} in spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum BufferState {
    Init,
    Ready,
    Play,
}

/// A pending lazy flush of the CA bucket into one or two destination runs
/// in the backing region, used by `DropHalfPolicy`'s half-packet interleave
/// and `FeedbackPolicy`'s ring-wrap straddle (spec.md §4.2). Flushed at the
/// top of the next `enqueue` call, once the caller has actually written the
/// staged bytes the previous call handed back.
#[derive(Clone, Copy)]
struct PendingCopy {
    len_a: usize,
    dest_a: usize,
    len_b: usize,
    dest_b: usize,
}

/// Producer/consumer core described by spec.md §3/§4.2.
///
/// `P` selects the enqueue policy at the type level (monomorphized, per
/// §9, rather than switched on a tag); `N` is the node ring's fixed
/// capacity.
pub struct UmBuffer<'a, P, const N: usize> {
    backing: &'a mut [u8],
    nodes: [Node; N],
    start_idx: usize,
    cursor_usb_idx: usize,
    cursor_hw_idx: usize,
    /// Max bytes per USB microframe this buffer was constructed for; the
    /// physical node stride is sized against this and never changes.
    max_packet_size: u16,
    /// Current packet size, mutable via `set_driver`, bounded by
    /// `max_packet_size` (invariant 4).
    packet_size: u16,
    frames_per_node: u16,
    /// Position within the ring, in bytes for `FeedbackPolicy`, in
    /// microframes otherwise (spec.md §3).
    abs_offset: u32,
    state: BufferState,
    ca_active: bool,
    /// `true` between writing the first and second half of a DROP-HALF
    /// pair (spec.md §3's half-frame-pending bit); gates the leave-CA
    /// check so it never fires mid-pair.
    half_frame_pending: bool,
    /// Which half of the current DROP-HALF pair lands next: `false` ->
    /// offset `0`, `true` -> offset `packet_size/2`.
    ca_pair_phase: bool,
    pending_copy: Option<PendingCopy>,
    listeners: ListenerRegistry,
    play_cb: &'a dyn PlayCb,
    pause_resume_cb: &'a dyn PauseResumeCb,
    _policy: core::marker::PhantomData<P>,
}

impl<'a, P: EnqueuePolicy, const N: usize> UmBuffer<'a, P, N> {
    /// Bytes occupied by the `N` node slabs, not counting the CA bucket or
    /// the silent tail.
    fn ring_bytes_len(&self) -> usize {
        N * self.node_stride()
    }

    /// Physical size of one node slab, in bytes. Sized against
    /// `max_packet_size` so it never changes even when `packet_size` does
    /// (invariant 4; see the terminal switch in `SPEC_FULL.md` §2).
    fn node_stride(&self) -> usize {
        self.frames_per_node as usize * self.max_packet_size as usize
    }

    fn ca_bucket_offset(&self) -> usize {
        self.ring_bytes_len()
    }

    fn silent_tail_offset(&self) -> usize {
        self.ring_bytes_len() + self.max_packet_size as usize
    }

    fn node_base(&self, idx: usize) -> usize {
        idx * self.node_stride()
    }

    fn next_index(&self, idx: usize) -> usize {
        (idx + 1) % N
    }

    /// `total_buffer_size` in spec.md invariant 3, in `abs_offset`'s own
    /// unit (bytes for `FeedbackPolicy`, microframes otherwise).
    fn total_units(&self) -> u32 {
        P::total_units(self)
    }

    /// Backing constructor. `backing` must be at least
    /// `ring_bytes_len + max_packet_size` (CA bucket) `+ max_packet_size`
    /// (silent tail) bytes; the CA bucket is sized regardless of policy to
    /// keep the layout uniform, matching spec.md §4.1's "plus one extra
    /// packet_size if policy ≠ NONE" modulo the fixed layout simplification
    /// noted in DESIGN.md.
    pub fn new(
        backing: &'a mut [u8],
        max_packet_size: u16,
        frames_per_node: u16,
        play_cb: &'a dyn PlayCb,
        pause_resume_cb: &'a dyn PauseResumeCb,
    ) -> Result<Self, UmError> {
        if max_packet_size == 0 || frames_per_node == 0 || N == 0 {
            return Err(UmError::Args);
        }
        let node_stride = frames_per_node as usize * max_packet_size as usize;
        let needed = N * node_stride + 2 * max_packet_size as usize;
        if backing.len() < needed {
            return Err(UmError::NoMem);
        }
        // zero the silent tail once; never written again.
        let tail_off = N * node_stride + max_packet_size as usize;
        backing[tail_off..tail_off + max_packet_size as usize].fill(0);
        Ok(UmBuffer {
            backing,
            nodes: core::array::from_fn(|_| Node::new()),
            start_idx: 0,
            cursor_usb_idx: 0,
            cursor_hw_idx: 0,
            max_packet_size,
            packet_size: max_packet_size,
            frames_per_node,
            abs_offset: 0,
            state: BufferState::Init,
            ca_active: false,
            half_frame_pending: false,
            ca_pair_phase: false,
            pending_copy: None,
            listeners: ListenerRegistry::new(),
            play_cb,
            pause_resume_cb,
            _policy: core::marker::PhantomData,
        })
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn abs_offset(&self) -> u32 {
        self.abs_offset
    }

    pub fn packet_size(&self) -> u16 {
        self.packet_size
    }

    pub fn cursor_usb_index(&self) -> usize {
        self.cursor_usb_idx
    }

    pub fn node_state(&self, idx: usize) -> NodeState {
        self.nodes[idx].state()
    }

    /// Count of consecutive non-HW-FINISHED nodes ahead of `cursor_usb`
    /// (the CW of spec.md's glossary), iterative per §9 (the source
    /// recurses; bounded recursion on an embedded stack is needless risk).
    /// Starts counting at the node *after* `cursor_usb` — the node
    /// `cursor_usb` itself is always UNDER-USB while this is called from
    /// within an `enqueue`, so including it would never let the count
    /// reach `CW_LOWER_BOUND`.
    pub fn congestion_window(&self) -> u32 {
        let mut cw = 1u32;
        let mut idx = self.next_index(self.cursor_usb_idx);
        for _ in 0..N {
            if self.nodes[idx].is_hw_finished_or_initial() {
                break;
            }
            idx = self.next_index(idx);
            cw += 1;
        }
        cw
    }

    /// Flushes a pending lazy bucket copy (DROP-HALF interleave landing,
    /// FEEDBACK ring-wrap straddle) into the backing region. Must run
    /// before staging a new one, since the caller has had exactly one
    /// `enqueue` call's worth of time to fill the bucket.
    fn flush_pending_copy(&mut self) {
        if let Some(p) = self.pending_copy.take() {
            let bucket = self.ca_bucket_offset();
            if p.len_a > 0 {
                let (src, dst) = (bucket, p.dest_a);
                self.backing.copy_within(src..src + p.len_a, dst);
            }
            if p.len_b > 0 {
                let (src, dst) = (bucket + p.len_a, p.dest_b);
                self.backing.copy_within(src..src + p.len_b, dst);
            }
        }
    }

    /// `free_space_percent = (count-of-nodes-not-UNDER-HW) / node_count · 100`,
    /// notified to every registered CA listener after a PLAY-state
    /// enqueue/dequeue (spec.md §4.2).
    fn notify_listeners(&self) {
        let not_under_hw = self
            .nodes
            .iter()
            .filter(|n| n.state() != NodeState::UnderHw)
            .count();
        let pct = (not_under_hw * 100 / N) as u8;
        self.listeners.notify(pct);
    }

    pub fn register_listener(&mut self, cb: &'static dyn crate::listener::CaListener) -> crate::listener::ListenerId {
        self.listeners.register(cb)
    }

    pub fn unregister_listener(&mut self, id: crate::listener::ListenerId) {
        self.listeners.unregister(id);
    }

    /// Shared post-enqueue bookkeeping described by spec.md §4.2's
    /// "After every enqueue..." paragraph: the INIT/READY→PLAY transition
    /// at half-fill, and the per-call listener notification once in PLAY.
    fn after_enqueue(&mut self) {
        if self.state != BufferState::Play && self.abs_offset >= self.total_units() / 2 {
            self.nodes[self.start_idx].set_state(NodeState::UnderHw);
            self.cursor_hw_idx = self.start_idx;
            let was_init = self.state == BufferState::Init;
            self.state = BufferState::Play;
            if was_init {
                self.play_cb
                    .on_play(self.node_base(self.start_idx), self.abs_offset as usize);
            } else {
                self.pause_resume_cb.on_resume();
            }
        }
        if self.state == BufferState::Play {
            self.notify_listeners();
        }
    }

    /// Producer entry point (spec.md §4.2 `enqueue`). Called from the USB
    /// RX-done context for OUT streams.
    pub fn enqueue(&mut self, pkt_size: u16) -> Result<&mut [u8], UmError> {
        let (offset, len) = P::enqueue(self, pkt_size)?;
        self.after_enqueue();
        Ok(&mut self.backing[offset..offset + len])
    }

    /// Consumer entry point (spec.md §4.2 `dequeue`). Called from the USB
    /// TX pre-load context for IN streams; independent of `P` (the startup
    /// dance and PLAY-state advance are the same for every policy, per
    /// spec.md's description — only `enqueue` varies by policy). Notifies
    /// every registered CA listener on each PLAY-state call, same as
    /// `enqueue` (spec.md §2/§4.2: "invoked by the UM buffer after each
    /// enqueue/dequeue").
    pub fn dequeue(&mut self, pkt_size: u16) -> Result<&mut [u8], UmError> {
        if self.state != BufferState::Play {
            if self.abs_offset < self.total_units() / WARMUP_DIVISOR {
                let off = self.silent_tail_offset();
                let len = self.max_packet_size as usize;
                return Ok(&mut self.backing[off..off + len]);
            }
            let idx = self.cursor_hw_idx;
            self.nodes[idx].set_state(NodeState::UnderHw);
            let was_init = self.state == BufferState::Init;
            self.state = BufferState::Play;
            if was_init {
                self.play_cb.on_play(self.node_base(idx), 0);
            } else {
                self.pause_resume_cb.on_resume();
            }
            let off = self.node_base(idx);
            let len = self.node_stride();
            return Ok(&mut self.backing[off..off + len]);
        }

        let cur = self.cursor_usb_idx;
        if self.nodes[cur].state() != NodeState::UnderUsb {
            return Err(UmError::Underflow);
        }
        let cap = self.node_stride() as u32;
        let local = self.nodes[cur].offset;
        let off = self.node_base(cur) + local as usize;
        let len = (pkt_size as u32).min(cap - local) as usize;
        let new_local = local + pkt_size as u32;
        if new_local >= cap {
            let next = self.next_index(cur);
            if self.nodes[next].state() != NodeState::HwFinished {
                return Err(UmError::Underflow);
            }
            self.nodes[cur].set_state(NodeState::UsbFinished);
            self.nodes[cur].offset = cap;
            self.cursor_usb_idx = next;
        } else {
            self.nodes[cur].offset = new_local;
        }
        self.notify_listeners();
        Ok(&mut self.backing[off..off + len])
    }

    /// spec.md §4.2 `pause`. Resets every node to INITIAL, rewinds both
    /// cursors to `start`, and drops back to READY.
    pub fn pause(&mut self) {
        self.pause_resume_cb.on_pause();
        for n in self.nodes.iter() {
            n.set_state(NodeState::Initial);
        }
        for i in 0..N {
            self.nodes[i].offset = 0;
        }
        self.cursor_usb_idx = self.start_idx;
        self.cursor_hw_idx = self.start_idx;
        self.abs_offset = 0;
        self.state = BufferState::Ready;
        self.ca_active = false;
        self.half_frame_pending = false;
        self.ca_pair_phase = false;
        self.pending_copy = None;
    }

    /// spec.md §4.2 `audio_dma_complete_cb`. Called only from the DMA
    /// half/complete interrupt (spec.md §5).
    pub fn audio_dma_complete_cb(&mut self) {
        let cur = self.cursor_hw_idx;
        match self.nodes[cur].state() {
            NodeState::UnderHw | NodeState::Initial => {}
            _ => fatal("audio_dma_complete_cb: cursor_hw not UNDER-HW/INITIAL"),
        }
        self.nodes[cur].set_state(NodeState::HwFinished);
        let next = self.next_index(cur);
        self.cursor_hw_idx = next;
        match self.nodes[next].state() {
            NodeState::UsbFinished | NodeState::Initial => {
                self.nodes[next].set_state(NodeState::UnderHw);
            }
            NodeState::UnderUsb | NodeState::HwFinished => {
                self.pause();
            }
            NodeState::UnderHw => fatal("audio_dma_complete_cb: successor already UNDER-HW"),
        }
    }

    /// spec.md §4.2 `set_driver`. Pauses first if in PLAY; listener
    /// registrations survive (they live in a separate field untouched
    /// here).
    pub fn set_driver(
        &mut self,
        packet_size: u16,
        play_cb: &'a dyn PlayCb,
        pause_resume_cb: &'a dyn PauseResumeCb,
    ) -> Result<(), UmError> {
        if packet_size > self.max_packet_size {
            return Err(UmError::Args);
        }
        if self.state == BufferState::Play {
            self.pause();
        }
        self.packet_size = packet_size;
        self.play_cb = play_cb;
        self.pause_resume_cb = pause_resume_cb;
        Ok(())
    }
}
