//! [TERMINAL]: the terminal switch (spec.md §4.4).
//!
//! The host selects between input terminals (mic 1, mic 2, ...) with a
//! class-specific SET_CUR on the selector unit. The core looks up the
//! matching entry in a small fixed terminal table and rebinds the
//! capture-side UM buffer to it via `set_driver`, persisting the
//! selector only if that rebind succeeds.

use crate::buffer::{EnqueuePolicy, PauseResumeCb, PlayCb, UmBuffer};
use crate::error::UmError;

/// One selectable input terminal: its USB packet size and the
/// play/pause-resume callbacks that drive its hardware path.
pub struct TerminalEntry<'a> {
    pub packet_size: u16,
    pub play_cb: &'a dyn PlayCb,
    pub pause_resume_cb: &'a dyn PauseResumeCb,
}

/// SET_CUR/GET_CUR state for the selector unit (spec.md §4.4, §6).
/// `table` is indexed 1..N to match the USB Audio Class selector's
/// 1-based `bSelector` values; index 0 is unused.
pub struct TerminalSwitch<'a, const N: usize> {
    table: [TerminalEntry<'a>; N],
    current: u8,
}

impl<'a, const N: usize> TerminalSwitch<'a, N> {
    pub fn new(table: [TerminalEntry<'a>; N], initial: u8) -> Self {
        TerminalSwitch {
            table,
            current: initial,
        }
    }

    /// GET_CUR on SELECTOR: the last successfully-set value.
    pub fn current(&self) -> u8 {
        self.current
    }

    /// SET_CUR on SELECTOR. Only commits `selector` if `set_driver`
    /// succeeds on `buf`; on failure the core returns a STALL to the
    /// host (modeled here as `Err` propagating to the external
    /// collaborator's control-request dispatcher, spec.md §6).
    pub fn set_selector<P: EnqueuePolicy, const M: usize>(
        &mut self,
        buf: &mut UmBuffer<'a, P, M>,
        selector: u8,
    ) -> Result<(), UmError> {
        let entry = self
            .table
            .get(selector as usize)
            .ok_or(UmError::Args)?;
        buf.set_driver(entry.packet_size, entry.play_cb, entry.pause_resume_cb)?;
        self.current = selector;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferState, NonePolicy};

    struct NullCb;
    impl PlayCb for NullCb {
        fn on_play(&self, _start_offset: usize, _warm_len: usize) {}
    }
    impl PauseResumeCb for NullCb {
        fn on_pause(&self) {}
        fn on_resume(&self) {}
    }

    #[test]
    fn successful_switch_updates_selector_and_packet_size() {
        // spec.md §8 scenario 5: mic buffer in READY; set_driver(384,...)
        // succeeds; subsequent dequeue uses the new packet size.
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 4 * 384 + 2 * 384];
        let mut buf: UmBuffer<'_, NonePolicy, 4> =
            UmBuffer::new(&mut backing, 384, 4, &CB, &CB).unwrap();
        assert_eq!(buf.state(), BufferState::Init);

        let table = [
            TerminalEntry {
                packet_size: 192,
                play_cb: &CB,
                pause_resume_cb: &CB,
            },
            TerminalEntry {
                packet_size: 192,
                play_cb: &CB,
                pause_resume_cb: &CB,
            },
            TerminalEntry {
                packet_size: 384,
                play_cb: &CB,
                pause_resume_cb: &CB,
            },
        ];
        let mut sw = TerminalSwitch::new(table, 1);
        sw.set_selector(&mut buf, 2).unwrap();
        assert_eq!(sw.current(), 2);
        assert_eq!(buf.packet_size(), 384);
    }

    #[test]
    fn failed_switch_does_not_update_selector() {
        static CB: NullCb = NullCb;
        let mut backing = [0u8; 4 * 4 * 48 + 2 * 48];
        let mut buf: UmBuffer<'_, NonePolicy, 4> =
            UmBuffer::new(&mut backing, 48, 4, &CB, &CB).unwrap();

        let table = [TerminalEntry {
            packet_size: 96,
            play_cb: &CB,
            pause_resume_cb: &CB,
        }];
        let mut sw = TerminalSwitch::new(table, 9);
        // packet_size 96 > max_packet_size 48: set_driver must fail.
        assert!(sw.set_selector(&mut buf, 0).is_err());
        assert_eq!(sw.current(), 9);
    }
}
