// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! One underlying clock multiplexed onto many named deadlines.
//!
//! Generalizes `lib/multitimer`'s `Multitimer<E: EnumArray<Timer>>` -- a
//! fixed enum of timer slots, one hardware timer always armed for the
//! minimum deadline -- to a map keyed by the caller's own job id string,
//! because PicoFramework callers pick timer names at runtime rather than
//! from a closed compile-time enum. The technique is unchanged: track every
//! job's next deadline, recompute the minimum whenever one fires or is
//! cancelled, and never let a timer callback block on the job-table lock.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use core::cell::RefCell;
use critical_section::Mutex;
use pf_abi::{Clock, Event};

pf_diag::counters!(TimerCounters { scheduled, fired, cancelled });

/// Process-wide tally of scheduler activity, grounded on the teacher's
/// per-task `counters::Count` instrumentation -- specialized here to the
/// three lifecycle transitions a `TimerJob` goes through (spec.md §4.3),
/// not per-job-id, since job ids are runtime strings with no fixed count.
pub static TIMER_COUNTERS: TimerCounters = TimerCounters::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOfDay {
    pub h: u8,
    pub m: u8,
    pub s: u8,
}

impl TimeOfDay {
    pub const fn new(h: u8, m: u8, s: u8) -> Self {
        TimeOfDay { h, m, s }
    }

    fn seconds_since_midnight(self) -> u32 {
        self.h as u32 * 3600 + self.m as u32 * 60 + self.s as u32
    }
}

/// Bit `d` (0 = Sunday .. 6 = Saturday) set means `scheduleDailyAt` fires on
/// that weekday.
pub fn day_bit(weekday: u8) -> u8 {
    1 << (weekday % 7)
}

/// The seconds-until-next-match algorithm: given a target time-of-day and a
/// weekday bitset, find how many seconds from `(wday, sec_today)` the next
/// matching slot is. An empty mask never matches and falls back to
/// re-checking in a day.
///
/// Note: the `offset != 0` branch is `offset*86400 + target - secToday`.
/// A naive `offset*86400 + (target + 86400 - secToday)` double-counts a
/// day: Sunday 23:59:50 local with Mon/Wed/Fri at 07:00:00 must land on
/// Monday 07:00:00, 25210s away, not a day later than that.
fn seconds_until_next_match(tod: TimeOfDay, days_mask: u8, wday: u8, sec_today: u32) -> u64 {
    let target = tod.seconds_since_midnight();
    for offset in 0..7u64 {
        let day = (wday as u64 + offset) % 7;
        if days_mask & (1 << day) != 0 {
            if offset == 0 && target as u64 <= sec_today as u64 {
                continue;
            }
            return if offset == 0 {
                target as u64 - sec_today as u64
            } else {
                offset * 86_400 + target as u64 - sec_today as u64
            };
        }
    }
    86_400
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The job table is full (host targets have no such limit; this exists
    /// for allocator-less ports that back the map with a fixed arena).
    Full,
}

enum Schedule {
    /// Fires once at an absolute Unix time.
    OneShotUnix(u64),
    /// Fires every `interval_ms` milliseconds, forever.
    Interval(u32),
    /// Fires at the next `(tod, days_mask)` match, then re-arms for the one
    /// after that.
    DailyAt { tod: TimeOfDay, days_mask: u8 },
}

enum Action {
    Post(Event),
    Callback(Option<Box<dyn FnOnce() + Send>>),
}

struct Job {
    schedule: Schedule,
    action: Action,
    /// Monotonic deadline (`Clock::now_ms` units) for the next fire,
    /// recomputed whenever the job is (re)armed.
    next_deadline_ms: u64,
}

/// Multiplexes `scheduleAt`/`scheduleEvery`/`scheduleDailyAt`/
/// `scheduleDuration` jobs onto repeated calls to [`poll`](Self::poll).
/// There is no dedicated timer interrupt in this crate -- the caller (the
/// framework's timer task) is expected to call `poll` from a loop woken by
/// [`next_deadline_ms`](Self::next_deadline_ms), the same "arm for the
/// minimum, recompute on change" discipline `Multitimer` uses.
pub struct TimerService {
    jobs: Mutex<RefCell<BTreeMap<String, Job>>>,
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService {
    pub const fn new() -> Self {
        TimerService {
            jobs: Mutex::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// One-shot at an absolute Unix time. Re-scheduling an existing `id`
    /// cancels and replaces the previous handle atomically. A past
    /// `unix_sec` fires on the next `poll`.
    pub fn schedule_at(&self, clock: &dyn Clock, unix_sec: u64, evt: Event, id: &str) {
        let delay_s = unix_sec.saturating_sub(clock.unix_time());
        let deadline = clock.now_ms() + delay_s * 1000;
        self.insert(
            id,
            Job {
                schedule: Schedule::OneShotUnix(unix_sec),
                action: Action::Post(evt),
                next_deadline_ms: deadline,
            },
        );
    }

    /// Periodic: posts a copy of `evt` every `interval_ms`, forever, until
    /// `cancel`led.
    pub fn schedule_every(&self, clock: &dyn Clock, interval_ms: u32, evt: Event, id: &str) {
        self.insert(
            id,
            Job {
                schedule: Schedule::Interval(interval_ms),
                action: Action::Post(evt),
                next_deadline_ms: clock.now_ms() + interval_ms as u64,
            },
        );
    }

    /// Fires at the next `(tod, days_mask)` match and re-arms itself for
    /// the one after that on every fire.
    pub fn schedule_daily_at(
        &self,
        clock: &dyn Clock,
        tod: TimeOfDay,
        days_mask: u8,
        evt: Event,
        id: &str,
    ) {
        let deadline = self.next_daily_deadline(clock, tod, days_mask);
        self.insert(
            id,
            Job {
                schedule: Schedule::DailyAt { tod, days_mask },
                action: Action::Post(evt),
                next_deadline_ms: deadline,
            },
        );
    }

    /// Creates `{id_base}_start` and `{id_base}_stop`, the stop job armed
    /// `duration_ms` after the start's time-of-day on the same days.
    pub fn schedule_duration(
        &self,
        clock: &dyn Clock,
        tod: TimeOfDay,
        days_mask: u8,
        duration_ms: u32,
        start_evt: Event,
        stop_evt: Event,
        id_base: &str,
    ) {
        let start_id = id_base.to_string() + "_start";
        let stop_id = id_base.to_string() + "_stop";
        self.schedule_daily_at(clock, tod, days_mask, start_evt, &start_id);

        let total_s = tod.seconds_since_midnight() as u64 + (duration_ms as u64 + 999) / 1000;
        let stop_tod = TimeOfDay::new(
            ((total_s / 3600) % 24) as u8,
            ((total_s / 60) % 60) as u8,
            (total_s % 60) as u8,
        );
        self.schedule_daily_at(clock, stop_tod, days_mask, stop_evt, &stop_id);
    }

    /// A one-shot raw callback fired at an absolute Unix time, used
    /// internally by the framework for bookkeeping that doesn't fit the
    /// event model. Not available for recurring jobs.
    pub fn schedule_callback_at(
        &self,
        clock: &dyn Clock,
        unix_sec: u64,
        id: &str,
        callback: Box<dyn FnOnce() + Send>,
    ) {
        let delay_s = unix_sec.saturating_sub(clock.unix_time());
        let deadline = clock.now_ms() + delay_s * 1000;
        self.insert(
            id,
            Job {
                schedule: Schedule::OneShotUnix(unix_sec),
                action: Action::Callback(Some(callback)),
                next_deadline_ms: deadline,
            },
        );
    }

    fn next_daily_deadline(&self, clock: &dyn Clock, tod: TimeOfDay, days_mask: u8) -> u64 {
        let (wday, sec_today) = clock.local_time_of_day();
        let delay_s = seconds_until_next_match(tod, days_mask, wday, sec_today);
        clock.now_ms() + delay_s * 1000
    }

    fn insert(&self, id: &str, job: Job) {
        critical_section::with(|cs| {
            self.jobs.borrow(cs).borrow_mut().insert(id.to_string(), job);
        });
        TIMER_COUNTERS.scheduled.increment();
    }

    /// Stops and deletes the job, if any. Idempotent: cancelling an id that
    /// already fired (one-shot) or never existed returns `false`.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = critical_section::with(|cs| self.jobs.borrow(cs).borrow_mut().remove(id).is_some());
        if removed {
            TIMER_COUNTERS.cancelled.increment();
        }
        removed
    }

    /// Reserved for future catch-up handling after a suspend/resume; the
    /// current behavior, matching the original, is a no-op.
    pub fn check_missed_events(&self, _now_unix: u64) {}

    /// How many jobs are currently scheduled.
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.jobs.borrow(cs).borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The monotonic deadline (in `Clock::now_ms` units) of the
    /// soonest-due job, if any -- the single underlying timer this whole
    /// table is multiplexed onto.
    pub fn next_deadline_ms(&self) -> Option<u64> {
        critical_section::with(|cs| {
            self.jobs
                .borrow(cs)
                .borrow()
                .values()
                .map(|j| j.next_deadline_ms)
                .min()
        })
    }

    /// Fires every job whose deadline has passed, posting its event to
    /// `post` (ordinarily `EventManager::post_event`) or invoking its
    /// callback, then re-arms recurring jobs and deletes one-shots.
    /// Callbacks and event posts happen outside the job-table lock so a
    /// slow `post` never holds up `schedule_*`/`cancel` from another task
    /// or ISR.
    pub fn poll(&self, clock: &dyn Clock, mut post: impl FnMut(Event)) {
        let now = clock.now_ms();

        let due: alloc::vec::Vec<String> = critical_section::with(|cs| {
            self.jobs
                .borrow(cs)
                .borrow()
                .iter()
                .filter(|(_, job)| job.next_deadline_ms <= now)
                .map(|(id, _)| id.clone())
                .collect()
        });

        for id in due {
            let fired = critical_section::with(|cs| {
                let mut jobs = self.jobs.borrow(cs).borrow_mut();
                let Some(job) = jobs.get_mut(&id) else {
                    return None;
                };

                let action = match &mut job.action {
                    Action::Post(evt) => Some(Action::Post(*evt)),
                    Action::Callback(cb) => cb.take().map(|cb| Action::Callback(Some(cb))),
                };

                let recurring = match job.schedule {
                    Schedule::OneShotUnix(_) => false,
                    Schedule::Interval(interval_ms) => {
                        job.next_deadline_ms += interval_ms as u64;
                        true
                    }
                    Schedule::DailyAt { tod, days_mask } => {
                        job.next_deadline_ms = self.next_daily_deadline(clock, tod, days_mask);
                        true
                    }
                };

                if !recurring {
                    jobs.remove(&id);
                }
                action
            });

            match fired {
                Some(Action::Post(evt)) => {
                    TIMER_COUNTERS.fired.increment();
                    post(evt)
                }
                Some(Action::Callback(Some(cb))) => {
                    TIMER_COUNTERS.fired.increment();
                    cb()
                }
                _ => {}
            }
        }
    }
}
