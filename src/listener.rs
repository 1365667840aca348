//! [LISTENERS]: the congestion-avoidance observer registry.
//!
//! The source keeps a heap-linked list per listener type; SPEC_FULL.md §1
//! carries that forward as a small fixed-size inline table instead (the
//! source already bounds registrations to a handful per type, so the heap
//! link added nothing but an allocation). Registration returns a stable
//! index that `unregister` uses to free the slot.
//!
//! Only one listener type exists today (`Ca`, matching
//! `UM_LISTENER_TYPE_CA`), but the table is keyed by [`ListenerKind`] so a
//! second type can be added without reshaping the registry.

/// Stable handle returned by [`ListenerRegistry::register`].
pub type ListenerId = usize;

/// Sentinel returned by `register` when the table is full, matching the
/// source's `UM_LISTENERS_WRONG_ID`.
pub const WRONG_ID: ListenerId = usize::MAX;

/// The kind of event a listener observes. Only `Ca` is defined by the
/// current core; this exists so the registry's shape doesn't have to
/// change if a second kind is added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ListenerKind {
    /// Invoked after every PLAY-state enqueue/dequeue with the current
    /// free-space percentage in `[0..100]`.
    Ca,
}

/// A congestion-avoidance observer.
///
/// Implementors must not allocate and should return quickly: per
/// SPEC_FULL.md §1/invariant 6, the callback runs synchronously on the hot
/// enqueue/dequeue path, in whichever context (USB or DMA ISR) drove the
/// state transition.
pub trait CaListener {
    fn on_free_space(&self, free_space_percent: u8);
}

/// Fixed-capacity table of CA listeners. `N` mirrors the source's "4 per
/// type" sizing; bump it if a board genuinely needs more observers.
pub struct ListenerRegistry<const N: usize = 4> {
    slots: [Option<&'static dyn CaListener>; N],
}

impl<const N: usize> ListenerRegistry<N> {
    pub const fn new() -> Self {
        ListenerRegistry {
            slots: [None; N],
        }
    }

    /// Links `callback` into the first free slot and returns its id.
    /// Returns [`WRONG_ID`] if the table is full.
    ///
    /// Must be externally serialized with respect to enqueue/dequeue
    /// (SPEC_FULL.md §5: `listeners[]` is mutated only at registration
    /// time and traversed from the producer/consumer context).
    pub fn register(&mut self, callback: &'static dyn CaListener) -> ListenerId {
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(callback);
                return id;
            }
        }
        WRONG_ID
    }

    /// Unlinks the listener at `id`, freeing its slot. A stale or
    /// out-of-range id is a no-op.
    pub fn unregister(&mut self, id: ListenerId) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Synchronously invokes every registered listener with `free_space_percent`.
    pub fn notify(&self, free_space_percent: u8) {
        for slot in self.slots.iter().flatten() {
            slot.on_free_space(free_space_percent);
        }
    }
}

impl<const N: usize> Default for ListenerRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Counter {
        calls: Cell<u32>,
        last: Cell<u8>,
    }

    impl CaListener for Counter {
        fn on_free_space(&self, free_space_percent: u8) {
            self.calls.set(self.calls.get() + 1);
            self.last.set(free_space_percent);
        }
    }

    #[test]
    fn register_and_notify() {
        static C: Counter = Counter {
            calls: Cell::new(0),
            last: Cell::new(0),
        };
        let mut reg: ListenerRegistry<4> = ListenerRegistry::new();
        let id = reg.register(&C);
        assert_ne!(id, WRONG_ID);
        reg.notify(42);
        assert_eq!(C.calls.get(), 1);
        assert_eq!(C.last.get(), 42);
    }

    #[test]
    fn unregister_stops_notifications() {
        static C: Counter = Counter {
            calls: Cell::new(0),
            last: Cell::new(0),
        };
        let mut reg: ListenerRegistry<4> = ListenerRegistry::new();
        let id = reg.register(&C);
        reg.unregister(id);
        reg.notify(10);
        assert_eq!(C.calls.get(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn table_full_returns_wrong_id() {
        static C: Counter = Counter {
            calls: Cell::new(0),
            last: Cell::new(0),
        };
        let mut reg: ListenerRegistry<2> = ListenerRegistry::new();
        assert_ne!(reg.register(&C), WRONG_ID);
        assert_ne!(reg.register(&C), WRONG_ID);
        assert_eq!(reg.register(&C), WRONG_ID);
    }
}
