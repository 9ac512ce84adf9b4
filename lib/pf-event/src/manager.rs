// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The central event queue and subscription table.
//!
//! Grounded on the original `EventManager` (bounded FreeRTOS queue +
//! `std::vector<Subscriber>`, singleton-per-process), generalized the way
//! `lib/multitimer` generalizes "one underlying timer, many logical
//! deadlines": here, one bounded ring buffer of `Event`s plus a small table
//! of registered tasks and their subscription masks, all guarded by a single
//! `critical_section` so posting is safe from both task and interrupt
//! context without a separate "ISR variant" of the API.

use core::cell::RefCell;
use critical_section::Mutex;
use heapless::Vec as HVec;
use pf_abi::{Clock, Event, TaskId};

use crate::task::Notifiable;

pf_diag::counters!(EventCounters { posted, dropped, delivered });

/// Process-wide tally of `post_event` outcomes, shared by every
/// `EventManager` instance (there is normally exactly one per process).
/// Grounded on the teacher's per-task `counters::Count` instrumentation --
/// here specialized to the three outcomes spec.md §4.2 names (`post`,
/// `Dropped`, per-subscriber delivery) rather than derived from the `Event`
/// type itself, since `Event::kind` is open-ended (user codes share the
/// range) and a counter per concrete kind would need unbounded storage.
pub static EVENT_COUNTERS: EventCounters = EventCounters::new();

pf_diag::ringbuf!(EVENT_RINGBUF, RingEntry, 16, RingEntry::Empty);

/// Last-16 diagnostic trace of `post_event` activity, inspectable with
/// [`EventManager`]-independent tooling the way the teacher's ring buffers
/// are read out with Humility -- here just `pf_diag::RingBuffer::snapshot`
/// in tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RingEntry {
    Empty,
    Posted { kind: pf_abi::Notification, targeted: bool },
    Dropped { kind: pf_abi::Notification },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostError {
    /// The queue was full; the event was not stored and no one was notified.
    Dropped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvError {
    Timeout,
}

struct Ring<const N: usize> {
    items: [Option<Event>; N],
    head: usize,
    len: usize,
}

impl<const N: usize> Ring<N> {
    const fn new() -> Self {
        Ring {
            items: [None; N],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, e: Event) -> Result<(), PostError> {
        if self.len == N {
            return Err(PostError::Dropped);
        }
        let tail = (self.head + self.len) % N;
        self.items[tail] = Some(e);
        self.len += 1;
        Ok(())
    }

    fn pop(&mut self) -> Option<Event> {
        if self.len == 0 {
            return None;
        }
        let e = self.items[self.head].take();
        self.head = (self.head + 1) % N;
        self.len -= 1;
        e
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct Subscription {
    mask: u32,
    task_id: TaskId,
}

/// Default `EVENT_QUEUE_LENGTH` from spec.md's configuration table.
pub const DEFAULT_EVENT_QUEUE_LENGTH: usize = 8;

/// Default bound on the number of distinct registered tasks / subscriptions
/// an `EventManager` tracks. Not a spec.md configuration constant (the
/// original's `std::vector` grows unbounded); chosen generously since this
/// crate has no allocator to grow into.
pub const DEFAULT_MAX_TASKS: usize = 16;

/// Singleton-per-process event queue and subscription table.
///
/// `QLEN` corresponds to `EVENT_QUEUE_LENGTH`; `MAX_TASKS` bounds how many
/// distinct tasks can be registered and subscribed.
pub struct EventManager<const QLEN: usize = DEFAULT_EVENT_QUEUE_LENGTH, const MAX_TASKS: usize = DEFAULT_MAX_TASKS>
{
    queue: Mutex<RefCell<Ring<QLEN>>>,
    tasks: Mutex<RefCell<HVec<(TaskId, &'static dyn Notifiable), MAX_TASKS>>>,
    subscriptions: Mutex<RefCell<HVec<Subscription, MAX_TASKS>>>,
}

impl<const QLEN: usize, const MAX_TASKS: usize> Default for EventManager<QLEN, MAX_TASKS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const QLEN: usize, const MAX_TASKS: usize> EventManager<QLEN, MAX_TASKS> {
    pub const fn new() -> Self {
        EventManager {
            queue: Mutex::new(RefCell::new(Ring::new())),
            tasks: Mutex::new(RefCell::new(HVec::new())),
            subscriptions: Mutex::new(RefCell::new(HVec::new())),
        }
    }

    /// Registers (or re-registers) a task under `task_id` so that directed
    /// delivery and subscription notification can reach it. Idempotent.
    pub fn register_task(&self, task_id: TaskId, task: &'static dyn Notifiable) {
        critical_section::with(|cs| {
            let mut tasks = self.tasks.borrow(cs).borrow_mut();
            if let Some(slot) = tasks.iter_mut().find(|(id, _)| *id == task_id) {
                slot.1 = task;
            } else {
                let _ = tasks.push((task_id, task));
            }
        });
    }

    /// Subscribes `task_id` to the event kinds set in `mask`. Subscribing
    /// again with a different mask ORs it into the existing one -- masks
    /// are additive, matching the original (subscriptions are never
    /// removed or replaced, only grown).
    pub fn subscribe(&self, mask: u32, task_id: TaskId) {
        critical_section::with(|cs| {
            let mut subs = self.subscriptions.borrow(cs).borrow_mut();
            if let Some(sub) = subs.iter_mut().find(|s| s.task_id == task_id) {
                sub.mask |= mask;
            } else {
                let _ = subs.push(Subscription { mask, task_id });
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        critical_section::with(|cs| self.subscriptions.borrow(cs).borrow().len())
    }

    /// Enqueues `event` and notifies subscribers. Safe from task or
    /// interrupt context. Returns `Err(Dropped)` if the queue is full
    /// instead of blocking -- callers are responsible for aggregating
    /// bursts before posting if that matters to them.
    pub fn post_event(&self, event: Event) -> Result<(), PostError> {
        let result = critical_section::with(|cs| {
            self.queue.borrow(cs).borrow_mut().push(event)?;

            let tasks = self.tasks.borrow(cs).borrow();
            if let Some(target) = event.target {
                if let Some((_, task)) = tasks.iter().find(|(id, _)| *id == target) {
                    task.notify(event.kind.mask());
                    EVENT_COUNTERS.delivered.increment();
                }
            } else {
                let subs = self.subscriptions.borrow(cs).borrow();
                for sub in subs.iter() {
                    if sub.mask & event.kind.mask() != 0 {
                        if let Some((_, task)) = tasks.iter().find(|(id, _)| *id == sub.task_id) {
                            task.notify(event.kind.mask());
                            EVENT_COUNTERS.delivered.increment();
                        }
                    }
                }
            }
            Ok(())
        });
        match result {
            Ok(()) => {
                EVENT_COUNTERS.posted.increment();
                pf_diag::ringbuf_entry!(
                    EVENT_RINGBUF,
                    RingEntry::Posted { kind: event.kind, targeted: event.target.is_some() }
                );
            }
            Err(PostError::Dropped) => {
                EVENT_COUNTERS.dropped.increment();
                pf_diag::ringbuf_entry!(EVENT_RINGBUF, RingEntry::Dropped { kind: event.kind });
            }
        }
        result
    }

    /// Same operation as [`post_event`](Self::post_event); named separately
    /// because the original draws a line between task-context and
    /// ISR-context posting. Here both go through the same
    /// `critical_section`-guarded path, so this is a plain alias.
    pub fn post_event_from_isr(&self, event: Event) -> Result<(), PostError> {
        self.post_event(event)
    }

    fn try_dequeue(&self) -> Option<Event> {
        critical_section::with(|cs| self.queue.borrow(cs).borrow_mut().pop())
    }

    /// Dequeues the next event, blocking (by spinning and calling `idle`)
    /// until one arrives or `timeout_ms` elapses.
    pub fn get_next_event(
        &self,
        clock: &dyn Clock,
        timeout_ms: Option<u32>,
        mut idle: impl FnMut(),
    ) -> Result<Event, RecvError> {
        let deadline = timeout_ms.map(|t| clock.now_ms() + t as u64);
        loop {
            if let Some(e) = self.try_dequeue() {
                return Ok(e);
            }
            if let Some(deadline) = deadline {
                if clock.now_ms() >= deadline {
                    return Err(RecvError::Timeout);
                }
            }
            idle();
        }
    }

    pub fn has_pending_events(&self) -> bool {
        critical_section::with(|cs| !self.queue.borrow(cs).borrow().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};
    use pf_abi::{Notification, SystemKind};

    struct RecordingTask {
        last: AtomicU32,
    }
    impl Notifiable for RecordingTask {
        fn name(&self) -> &'static str {
            "recording"
        }
        fn notify(&self, value: u32) {
            self.last.store(value, Ordering::SeqCst);
        }
    }

    struct FakeClock;
    impl Clock for FakeClock {
        fn now_ms(&self) -> u64 {
            0
        }
        fn unix_time(&self) -> u64 {
            0
        }
        fn local_time_of_day(&self) -> (u8, u32) {
            (0, 0)
        }
    }

    static A: RecordingTask = RecordingTask {
        last: AtomicU32::new(0),
    };
    static B: RecordingTask = RecordingTask {
        last: AtomicU32::new(0),
    };

    #[test]
    fn broadcast_notifies_every_matching_subscriber() {
        let mgr: EventManager<8, 4> = EventManager::new();
        mgr.register_task(TaskId(0), &A);
        mgr.register_task(TaskId(1), &B);
        mgr.subscribe(Notification::System(SystemKind::NetworkReady).mask(), TaskId(0));
        mgr.subscribe(Notification::System(SystemKind::NetworkReady).mask(), TaskId(1));

        A.last.store(0, Ordering::SeqCst);
        B.last.store(0, Ordering::SeqCst);
        mgr.post_event(Event::new(Notification::System(SystemKind::NetworkReady)))
            .unwrap();

        assert_ne!(A.last.load(Ordering::SeqCst), 0);
        assert_ne!(B.last.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn directed_event_only_notifies_target() {
        let mgr: EventManager<8, 4> = EventManager::new();
        mgr.register_task(TaskId(0), &A);
        mgr.register_task(TaskId(1), &B);

        A.last.store(0, Ordering::SeqCst);
        B.last.store(0, Ordering::SeqCst);
        let event = Event::new(Notification::System(SystemKind::TimeSync)).targeted(TaskId(1));
        mgr.post_event(event).unwrap();

        assert_eq!(A.last.load(Ordering::SeqCst), 0);
        assert_ne!(B.last.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn queue_full_drops_instead_of_blocking() {
        let mgr: EventManager<2, 4> = EventManager::new();
        let e = Event::new(Notification::System(SystemKind::TimeSync));
        assert!(mgr.post_event(e).is_ok());
        assert!(mgr.post_event(e).is_ok());
        assert_eq!(mgr.post_event(e), Err(PostError::Dropped));
    }

    #[test]
    fn get_next_event_is_fifo() {
        let mgr: EventManager<8, 4> = EventManager::new();
        mgr.post_event(Event::new(Notification::System(SystemKind::NetworkDown)))
            .unwrap();
        mgr.post_event(Event::new(Notification::System(SystemKind::NetworkReady)))
            .unwrap();
        let clock = FakeClock;
        let first = mgr.get_next_event(&clock, Some(0), || {}).unwrap();
        let second = mgr.get_next_event(&clock, Some(0), || {}).unwrap();
        assert_eq!(first.kind, Notification::System(SystemKind::NetworkDown));
        assert_eq!(second.kind, Notification::System(SystemKind::NetworkReady));
        assert!(!mgr.has_pending_events());
    }

    #[test]
    fn repeated_subscribe_ors_masks() {
        let mgr: EventManager<8, 4> = EventManager::new();
        mgr.register_task(TaskId(0), &A);
        mgr.subscribe(Notification::System(SystemKind::NetworkDown).mask(), TaskId(0));
        mgr.subscribe(Notification::System(SystemKind::NetworkReady).mask(), TaskId(0));
        assert_eq!(mgr.subscriber_count(), 1);

        A.last.store(0, Ordering::SeqCst);
        mgr.post_event(Event::new(Notification::System(SystemKind::NetworkReady)))
            .unwrap();
        assert_ne!(A.last.load(Ordering::SeqCst), 0);
    }
}
