//! [ALTSETTING]: alt-setting glue (spec.md §4.5) plus the feature-unit
//! mute/volume state and per-interface alt persistence that SPEC_FULL.md
//! §2 supplements from `usbd_audio_core.c`.
//!
//! This module translates USB class events (SET_INTERFACE alt 0/1,
//! RX-done, TX-ready) into UM buffer lifecycle calls; the descriptor and
//! control-request parsing that produces these events is an external
//! collaborator per spec.md §1/§6.

use crate::buffer::{EnqueuePolicy, UmBuffer};
use heapless::Vec;

/// Direction an alt-setting interface streams in, needed to pick between
/// "arm via dequeue" (IN) and "arm the feedback generator" (OUT) on
/// entering alt 1 (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum StreamDirection {
    Out,
    In,
}

/// Drives one streaming interface's alt-setting lifecycle against its
/// UM buffer.
pub struct AltSettingGlue {
    direction: StreamDirection,
    /// First packet size to hand `dequeue` when arming an IN stream.
    arm_packet_size: u16,
}

impl AltSettingGlue {
    pub fn new(direction: StreamDirection, arm_packet_size: u16) -> Self {
        AltSettingGlue {
            direction,
            arm_packet_size,
        }
    }

    /// SET_INTERFACE to alt 0: zero-bandwidth, stream closed.
    pub fn enter_alt_zero<'a, P: EnqueuePolicy, const N: usize>(&self, buf: &mut UmBuffer<'a, P, N>) {
        buf.pause();
    }

    /// SET_INTERFACE to alt ≥1: arm the stream. For IN interfaces this
    /// calls `dequeue` once to trigger the startup dance (spec.md §4.2);
    /// for OUT interfaces, arming the feedback generator is the external
    /// collaborator's responsibility (spec.md §1) — this only documents
    /// the call site.
    pub fn enter_alt_operational<'a, P: EnqueuePolicy, const N: usize>(&self, buf: &mut UmBuffer<'a, P, N>) {
        if self.direction == StreamDirection::In {
            let _ = buf.dequeue(self.arm_packet_size);
        }
    }
}

/// Per-interface alt-setting persistence table for GET_CUR of
/// ACT_ALT_SETTING (SPEC_FULL.md §2, `usbd_audio_AltSet` in the source).
pub struct AltSettingTable<const N: usize> {
    current: Vec<u8, N>,
}

impl<const N: usize> AltSettingTable<N> {
    pub fn new() -> Self {
        let mut current = Vec::new();
        for _ in 0..N {
            let _ = current.push(0);
        }
        AltSettingTable { current }
    }

    pub fn get(&self, interface: usize) -> u8 {
        self.current.get(interface).copied().unwrap_or(0)
    }

    pub fn set(&mut self, interface: usize, alt: u8) {
        if let Some(slot) = self.current.get_mut(interface) {
            *slot = alt;
        }
    }
}

impl<const N: usize> Default for AltSettingTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed volume range for the feature unit (spec.md §6): -50 dB to 0 dB
/// in 1 dB (256-unit) steps.
pub const VOLUME_MIN: i16 = -50 * 256;
pub const VOLUME_MAX: i16 = 0;
pub const VOLUME_RESOLUTION: i16 = 256;

/// MUTE/VOLUME CUR/RANGE state for the feature unit (SPEC_FULL.md §2).
/// Consulted only by the control-request dispatcher; the core never
/// reads it.
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct FeatureUnitState {
    pub muted: bool,
    pub volume: i16,
}

impl FeatureUnitState {
    pub const fn new() -> Self {
        FeatureUnitState {
            muted: false,
            volume: VOLUME_MAX,
        }
    }

    /// SET_CUR on VOLUME, clamped to the fixed range.
    pub fn set_volume(&mut self, volume: i16) {
        self.volume = volume.clamp(VOLUME_MIN, VOLUME_MAX);
    }
}

impl Default for FeatureUnitState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferState, NonePolicy, PauseResumeCb, PlayCb, UmBuffer};

    struct NullCb;
    impl PlayCb for NullCb {
        fn on_play(&self, _start_offset: usize, _warm_len: usize) {}
    }
    impl PauseResumeCb for NullCb {
        fn on_pause(&self) {}
        fn on_resume(&self) {}
    }

    #[test]
    fn alt_zero_pauses_buffer() {
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 4 * 48 + 2 * 48];
        let mut buf: UmBuffer<'_, NonePolicy, 4> =
            UmBuffer::new(&mut backing, 48, 4, &CB, &CB).unwrap();
        for _ in 0..8 {
            buf.enqueue(48).unwrap();
        }
        assert_eq!(buf.state(), BufferState::Play);

        let glue = AltSettingGlue::new(StreamDirection::Out, 48);
        glue.enter_alt_zero(&mut buf);
        assert_eq!(buf.state(), BufferState::Ready);
    }

    #[test]
    fn alt_table_persists_per_interface() {
        let mut table: AltSettingTable<3> = AltSettingTable::new();
        table.set(1, 1);
        assert_eq!(table.get(1), 1);
        assert_eq!(table.get(0), 0);
    }

    #[test]
    fn volume_clamped_to_fixed_range() {
        let mut fu = FeatureUnitState::new();
        fu.set_volume(100);
        assert_eq!(fu.volume, VOLUME_MAX);
        fu.set_volume(-20_000);
        assert_eq!(fu.volume, VOLUME_MIN);
    }
}
