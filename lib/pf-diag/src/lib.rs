// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Allocation-free diagnostics: a fixed-capacity ring buffer of recent
//! events plus monotonic operation counters.
//!
//! Grounded on the teacher's `lib/ringbuf` + `lib/counters` crates
//! (`ringbuf!`/`ringbuf_entry!` declare a static ring of the last `N` typed
//! entries for `humility ringbuf`/GDB inspection; `counters::Count` tracks a
//! total per entry variant so history isn't lost once it scrolls off the
//! ring). Those two crates are proc-macro-derive-heavy and tied to
//! `static-cell`/`armv6m-atomic-hack`, neither of which is a
//! `workspace.dependencies` entry pulled in for any other reason, so rather
//! than vendor them wholesale this crate re-derives the same two primitives
//! -- "overwrite-oldest ring behind one lock" and "one atomic counter per
//! event kind" -- against the `critical_section` lock discipline every other
//! `pf-*` crate already uses, the same way `pf-timer` re-derives
//! `Multitimer`'s scheduling technique instead of vendoring it unchanged.

#![cfg_attr(not(test), no_std)]

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};
use critical_section::Mutex;

/// A fixed-capacity, overwrite-oldest ring of the last `N` diagnostic
/// entries, matching `ringbuf!`'s "last N survive, older entries are lost"
/// contract. `T` must be `Copy` for the same reason the teacher's macro
/// requires it: entries are read out by value for inspection, never
/// borrowed out of the lock.
pub struct RingBuffer<T: Copy, const N: usize> {
    inner: Mutex<RefCell<Inner<T, N>>>,
}

struct Inner<T: Copy, const N: usize> {
    buf: [T; N],
    next: usize,
    len: usize,
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    /// Builds an empty ring, every slot initialized to `fill`.
    pub const fn new(fill: T) -> Self {
        RingBuffer {
            inner: Mutex::new(RefCell::new(Inner {
                buf: [fill; N],
                next: 0,
                len: 0,
            })),
        }
    }

    /// Records `value`, overwriting the oldest entry once the ring is full.
    /// Safe to call from task or interrupt context.
    pub fn entry(&self, value: T) {
        critical_section::with(|cs| {
            let mut inner = self.inner.borrow(cs).borrow_mut();
            let next = inner.next;
            inner.buf[next] = value;
            inner.next = (next + 1) % N;
            if inner.len < N {
                inner.len += 1;
            }
        });
    }

    /// Copies out the recorded entries, oldest first. Intended for tests and
    /// host-side inspection tools, not for on-target use.
    #[cfg(test)]
    pub fn snapshot(&self) -> alloc_snapshot::Snapshot<T, N> {
        critical_section::with(|cs| {
            let inner = self.inner.borrow(cs).borrow();
            let mut out = [inner.buf[0]; N];
            let len = inner.len;
            let start = if len < N { 0 } else { inner.next };
            for i in 0..len {
                out[i] = inner.buf[(start + i) % N];
            }
            alloc_snapshot::Snapshot { items: out, len }
        })
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Declares a static [`RingBuffer`], mirroring the teacher's `ringbuf!`
/// macro (type, capacity, initial fill value), optionally naming it when a
/// module needs more than one.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $ty:ty, $cap:expr, $fill:expr) => {
        static $name: $crate::RingBuffer<$ty, $cap> = $crate::RingBuffer::new($fill);
    };
}

/// Records an entry into a ring declared with [`ringbuf!`], mirroring the
/// teacher's `ringbuf_entry!` macro.
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:ident, $val:expr) => {
        $name.entry($val)
    };
}

#[cfg(test)]
pub mod alloc_snapshot {
    /// Owned copy of a [`super::RingBuffer`]'s contents at a point in time.
    pub struct Snapshot<T: Copy, const N: usize> {
        pub(crate) items: [T; N],
        pub(crate) len: usize,
    }

    impl<T: Copy, const N: usize> Snapshot<T, N> {
        pub fn as_slice(&self) -> &[T] {
            &self.items[..self.len]
        }
    }
}

/// A single monotonic, saturating-on-overflow-never (it wraps, matching the
/// teacher's plain `u32` counters) operation counter.
#[derive(Default)]
pub struct Counter(AtomicU32);

impl Counter {
    pub const fn new() -> Self {
        Counter(AtomicU32::new(0))
    }

    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Declares a `struct $name { $field: Counter, ... }` with a single static
/// instance `$name`, mirroring the teacher's `counters::Count`-derived
/// per-task counter structs (one atomic per event kind, all zero-initialized
/// at link time).
#[macro_export]
macro_rules! counters {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        #[derive(Default)]
        pub struct $name {
            $(pub $field: $crate::Counter,)+
        }

        impl $name {
            pub const fn new() -> Self {
                $name {
                    $($field: $crate::Counter::new(),)+
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_overwrites_oldest_once_full() {
        let ring: RingBuffer<u32, 3> = RingBuffer::new(0);
        ring.entry(1);
        ring.entry(2);
        ring.entry(3);
        ring.entry(4);
        assert_eq!(ring.snapshot().as_slice(), &[2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn ring_below_capacity_preserves_order() {
        let ring: RingBuffer<u32, 4> = RingBuffer::new(0);
        ring.entry(10);
        ring.entry(20);
        assert_eq!(ring.snapshot().as_slice(), &[10, 20]);
    }

    #[test]
    fn counter_increments_and_reads() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.increment();
        c.increment();
        assert_eq!(c.get(), 2);
    }

    counters!(DemoCounters { posted, dropped });

    #[test]
    fn counters_macro_builds_independent_fields() {
        static COUNTERS: DemoCounters = DemoCounters::new();
        COUNTERS.posted.increment();
        COUNTERS.posted.increment();
        COUNTERS.dropped.increment();
        assert_eq!(COUNTERS.posted.get(), 2);
        assert_eq!(COUNTERS.dropped.get(), 1);
    }
}
