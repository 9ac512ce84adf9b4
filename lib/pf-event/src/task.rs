// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The cooperatively-scheduled task primitive: a static stack (owned by
//! whatever board-support crate actually spawns the thread/fiber), a
//! priority, a one-slot overwrite-semantics notification word, and an
//! optional bounded mailbox.
//!
//! This crate does not implement a scheduler -- `start()` below just flips
//! a flag the way the teacher's generic drivers model hardware state without
//! assuming an execution model (see `drv/lpc55-flash`'s doc comment: "written
//! in a very generic form that doesn't assume any particular execution
//! model"). Spawning the underlying thread of control is the board-support
//! layer's job.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use critical_section::Mutex;
use pf_abi::Clock;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    AlreadyStarted,
    Timeout,
    MailboxFull,
    MailboxEmpty,
}

/// The notification-and-identity half of a task, independent of whatever
/// mailbox item type the task chooses. `EventManager` holds `&dyn Notifiable`
/// so it never needs to know a task's mailbox type.
pub trait Notifiable {
    fn name(&self) -> &'static str;
    /// Sets the notification word, overwriting any prior unread value.
    /// Safe to call from an ISR.
    fn notify(&self, value: u32);
}

/// A small ring buffer of `Msg` items, guarded by a critical section so it
/// can be pushed from ISR context and popped from task context.
struct Mailbox<Msg: Copy, const N: usize> {
    items: [Option<Msg>; N],
    head: usize,
    len: usize,
}

impl<Msg: Copy, const N: usize> Mailbox<Msg, N> {
    const fn new() -> Self {
        Mailbox {
            items: [None; N],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, item: Msg) -> Result<(), Error> {
        if self.len == N {
            return Err(Error::MailboxFull);
        }
        let tail = (self.head + self.len) % N;
        self.items[tail] = Some(item);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Msg> {
        if self.len == 0 {
            return None;
        }
        let item = self.items[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        item
    }
}

/// A cooperatively scheduled task: notification word plus an optional
/// bounded mailbox of `Msg` items.
pub struct Task<Msg: Copy, const N: usize = 8> {
    name: &'static str,
    priority: u8,
    started: AtomicBool,
    notification: AtomicU32,
    mailbox: Mutex<RefCell<Mailbox<Msg, N>>>,
}

impl<Msg: Copy, const N: usize> Task<Msg, N> {
    pub const fn new(name: &'static str, priority: u8) -> Self {
        Task {
            name,
            priority,
            started: AtomicBool::new(false),
            notification: AtomicU32::new(0),
            mailbox: Mutex::new(RefCell::new(Mailbox::new())),
        }
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Marks the task started. The actual spawn (stack allocation, entry
    /// point registration) is the caller's responsibility -- this just
    /// enforces the "fails with AlreadyStarted" contract.
    pub fn start(&self) -> Result<(), Error> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyStarted);
        }
        Ok(())
    }

    /// Consumes and clears the notification word without blocking.
    pub fn try_wait(&self) -> Option<u32> {
        let value = self.notification.swap(0, Ordering::AcqRel);
        if value == 0 {
            None
        } else {
            Some(value)
        }
    }

    /// Blocks (by spinning, calling `clock`/`idle` between polls) until a
    /// notification arrives or `timeout_ms` elapses. `idle` is given a
    /// chance to actually yield the processor (e.g. `cortex_m::asm::wfi`
    /// on target, or a short sleep on the host); this crate owns none of
    /// the real scheduling, matching spec.md's cooperative model where
    /// "yielding points are any blocking primitive."
    pub fn wait_for_notification(
        &self,
        clock: &dyn Clock,
        timeout_ms: Option<u32>,
        mut idle: impl FnMut(),
    ) -> Result<u32, Error> {
        let deadline = timeout_ms.map(|t| clock.now_ms() + t as u64);
        loop {
            if let Some(value) = self.try_wait() {
                return Ok(value);
            }
            if let Some(deadline) = deadline {
                if clock.now_ms() >= deadline {
                    return Err(Error::Timeout);
                }
            }
            idle();
        }
    }

    pub fn send_to_queue(&self, item: Msg) -> Result<(), Error> {
        critical_section::with(|cs| self.mailbox.borrow(cs).borrow_mut().push(item))
    }

    pub fn receive_from_queue(&self) -> Result<Msg, Error> {
        critical_section::with(|cs| {
            self.mailbox
                .borrow(cs)
                .borrow_mut()
                .pop()
                .ok_or(Error::MailboxEmpty)
        })
    }
}

impl<Msg: Copy, const N: usize> Notifiable for Task<Msg, N> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn notify(&self, value: u32) {
        // Overwrite semantics: `eSetValueWithOverwrite`, not an OR-merge.
        self.notification.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeClock {
        ms: core::cell::Cell<u64>,
    }
    impl Clock for FakeClock {
        fn now_ms(&self) -> u64 {
            self.ms.get()
        }
        fn unix_time(&self) -> u64 {
            0
        }
        fn local_time_of_day(&self) -> (u8, u32) {
            (0, 0)
        }
    }

    #[test]
    fn start_twice_fails() {
        let t: Task<u8, 4> = Task::new("t", 1);
        assert!(t.start().is_ok());
        assert_eq!(t.start(), Err(Error::AlreadyStarted));
    }

    #[test]
    fn notify_overwrites_not_ors() {
        let t: Task<u8, 4> = Task::new("t", 1);
        t.notify(0b001);
        t.notify(0b010);
        assert_eq!(t.try_wait(), Some(0b010));
    }

    #[test]
    fn wait_times_out() {
        let t: Task<u8, 4> = Task::new("t", 1);
        let clock = FakeClock {
            ms: core::cell::Cell::new(0),
        };
        let mut ticks = 0;
        let result = t.wait_for_notification(&clock, Some(5), || {
            ticks += 1;
            clock.ms.set(clock.ms.get() + 1);
        });
        assert_eq!(result, Err(Error::Timeout));
        assert!(ticks >= 5);
    }

    #[test]
    fn wait_returns_when_notified() {
        let t: Task<u8, 4> = Task::new("t", 1);
        t.notify(7);
        let clock = FakeClock {
            ms: core::cell::Cell::new(0),
        };
        let result = t.wait_for_notification(&clock, None, || {});
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn mailbox_is_fifo_and_bounded() {
        let t: Task<u8, 2> = Task::new("t", 1);
        t.send_to_queue(1).unwrap();
        t.send_to_queue(2).unwrap();
        assert_eq!(t.send_to_queue(3), Err(Error::MailboxFull));
        assert_eq!(t.receive_from_queue(), Ok(1));
        assert_eq!(t.receive_from_queue(), Ok(2));
        assert_eq!(t.receive_from_queue(), Err(Error::MailboxEmpty));
    }
}
