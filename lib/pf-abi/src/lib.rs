// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared wire types for the PicoFramework event fabric.
//!
//! This crate has no knowledge of tasks, queues, or sockets -- it only
//! defines the `Event` envelope and the small value types carried inside it,
//! so that `pf-event`, `pf-timer`, `pf-gpio` and `pf-http` can all agree on
//! the same representation without depending on each other.

#![cfg_attr(not(test), no_std)]

pub mod arena;

pub use arena::{Arena, ArenaSlot};

/// The wall-clock source PicoFramework consumes but does not own: spec.md
/// treats the RTC/AON timer as an external collaborator we talk to via
/// `now()`/`setTime()`. Every component that needs the time (the timer
/// service, a task's bounded wait) takes a `&dyn Clock` rather than reading
/// a global, so host tests can supply a fake that advances deterministically.
pub trait Clock {
    /// Milliseconds since an arbitrary but monotonic epoch. Used for
    /// relative deadlines (notification timeouts, interval timers).
    fn now_ms(&self) -> u64;

    /// Seconds since the Unix epoch, as set by the SNTP client. Used for
    /// absolute (`scheduleAt`) and time-of-day (`scheduleDailyAt`) deadlines.
    fn unix_time(&self) -> u64;

    /// Day of week (0 = Sunday) and seconds-since-midnight for `unix_time()`,
    /// in whatever local time base the application configured.
    fn local_time_of_day(&self) -> (u8, u32);
}

/// Number of bits reserved for built-in system notifications before the
/// disjoint user-code range begins. Mirrors the "enumerated system
/// notifications ... or a user code in a disjoint range" split in the data
/// model: bits `0..SYSTEM_KIND_COUNT` are system kinds, bits
/// `SYSTEM_KIND_COUNT..32` are `Notification::User`.
pub const SYSTEM_KIND_COUNT: u8 = 8;

/// The built-in system notification kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemKind {
    NetworkDown = 0,
    NetworkReady = 1,
    TimeSync = 2,
    HttpServerStarted = 3,
    GpioChange = 4,
    StorageMounted = 5,
    StorageUnmounted = 6,
    TimerFired = 7,
}

/// An event kind: either a built-in system notification, or an
/// application-defined user code living in a disjoint numeric range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    System(SystemKind),
    /// Application-defined code. Valid range is
    /// `0..(32 - SYSTEM_KIND_COUNT)`; values outside that range still work
    /// but collapse onto bit 31 of the subscription mask (see [`Notification::bit`]).
    User(u8),
}

impl Notification {
    /// The subscription-mask bit this kind occupies. Subscriptions are a
    /// 32-bit bitset; `postEvent` ORs `1 << bit(kind)` into matching tasks.
    pub fn bit(self) -> u8 {
        match self {
            Notification::System(kind) => kind as u8,
            Notification::User(code) => {
                let shifted = SYSTEM_KIND_COUNT as u32 + code as u32;
                shifted.min(31) as u8
            }
        }
    }

    pub fn mask(self) -> u32 {
        1 << self.bit()
    }
}

/// Edge direction for a GPIO transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpioEdge {
    Rising,
    Falling,
}

/// Payload carried by a `GpioChange` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GpioEdgeEvent {
    pub pin: u32,
    pub edge: GpioEdge,
}

/// A value small enough to park in [`Arena`] as a borrowed event payload.
/// The sender guarantees `ptr` stays valid for `len` bytes until delivery
/// completes; the arena's generation check means a late reader who hits a
/// recycled slot gets `None` rather than garbage.
#[derive(Clone, Copy, Debug)]
pub struct Borrow {
    pub ptr: *const u8,
    pub len: usize,
}

// SAFETY: `Borrow` is just a `(ptr, len)` pair; the framework never
// dereferences it on a thread other than the one the sender runs on before
// delivery completes, which is the contract `Event.payload` documents.
unsafe impl Send for Borrow {}

/// The bounded inline union of payload shapes an `Event` can carry.
#[derive(Clone, Copy, Debug)]
pub enum Payload {
    None,
    Gpio(GpioEdgeEvent),
    /// An opaque borrow living in a scratch arena, referenced by slot.
    Borrowed(ArenaSlot),
}

/// Opaque handle to a statically-allocated task, used as an event's
/// directed-delivery target. Tasks are registered once at startup into a
/// fixed-size table (see `pf-event::TaskRegistry`) and this index is stable
/// for the life of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskId(pub u16);

/// A discriminated event record: `{kind, payload, size, source, target}`.
///
/// `target == None` means broadcast to every subscriber whose mask includes
/// `kind`; `target == Some(task)` means directed delivery to that task only.
#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub kind: Notification,
    pub payload: Payload,
    pub size: usize,
    pub source: Option<TaskId>,
    pub target: Option<TaskId>,
}

impl Event {
    pub const fn new(kind: Notification) -> Self {
        Event {
            kind,
            payload: Payload::None,
            size: 0,
            source: None,
            target: None,
        }
    }

    pub fn with_gpio(kind: Notification, gpio: GpioEdgeEvent) -> Self {
        Event {
            kind,
            payload: Payload::Gpio(gpio),
            size: core::mem::size_of::<GpioEdgeEvent>(),
            source: None,
            target: None,
        }
    }

    pub fn with_borrow(kind: Notification, slot: ArenaSlot, size: usize) -> Self {
        Event {
            kind,
            payload: Payload::Borrowed(slot),
            size,
            source: None,
            target: None,
        }
    }

    pub fn targeted(mut self, target: TaskId) -> Self {
        self.target = Some(target);
        self
    }

    pub fn from_source(mut self, source: TaskId) -> Self {
        self.source = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_bits_are_stable_and_disjoint() {
        assert_eq!(Notification::System(SystemKind::NetworkDown).bit(), 0);
        assert_eq!(Notification::System(SystemKind::TimerFired).bit(), 7);
        assert_eq!(Notification::User(0).bit(), SYSTEM_KIND_COUNT);
        assert_eq!(Notification::User(23).bit(), 31);
        // Anything beyond the 32-bit mask saturates rather than wrapping.
        assert_eq!(Notification::User(200).bit(), 31);
    }

    #[test]
    fn mask_is_single_bit() {
        let m = Notification::System(SystemKind::GpioChange).mask();
        assert_eq!(m.count_ones(), 1);
    }
}
