// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bridges a single process-wide GPIO IRQ handler to per-pin listener
//! lists, matching `GpioEventManager`'s `map<pin, vector<callback>>` shape
//! but with fixed capacity instead of `std::map`/`std::vector` growth.
//!
//! Exactly one routing policy applies process-wide
//! ([`HandlingMode`]): post a `GpioChange` event through an [`EventSink`],
//! run the registered callbacks directly, or both. Dispatch is meant to be
//! called from real interrupt context, so it never allocates or blocks.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::boxed::Box;
use bitflags::bitflags;
use core::cell::RefCell;
use critical_section::Mutex;
use heapless::Vec as HVec;
use pf_abi::{Event, GpioEdge, GpioEdgeEvent, Notification, SystemKind};

/// Last-16 `(pin, edge)` pairs that made it past the enabled/edge-mask
/// filter, recorded from ISR context. Grounded on the teacher's
/// `ringbuf!`/`ringbuf_entry!` convention for interrupt-context
/// instrumentation that can't afford to format or block -- a plain
/// `Copy` struct push, nothing else.
pf_diag::ringbuf!(GPIO_RINGBUF, (u32, GpioEdge), 16, (0, GpioEdge::Rising));

bitflags! {
    /// Which edges a pin's interrupt is armed for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct EdgeMask: u32 {
        const RISING = 0b01;
        const FALLING = 0b10;
        const BOTH = Self::RISING.bits() | Self::FALLING.bits();
    }
}

impl EdgeMask {
    fn matches(self, edge: GpioEdge) -> bool {
        match edge {
            GpioEdge::Rising => self.contains(EdgeMask::RISING),
            GpioEdge::Falling => self.contains(EdgeMask::FALLING),
        }
    }
}

/// `GPIO_EVENT_HANDLING`: how a matching edge is routed. Default `Both`,
/// matching the framework's configuration default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlingMode {
    /// Post a `GpioChange` event; no direct callback invocation.
    Notifications,
    /// Invoke registered callbacks directly; no event posted.
    Events,
    /// Both of the above.
    Both,
}

impl Default for HandlingMode {
    fn default() -> Self {
        HandlingMode::Both
    }
}

/// Receives the `GpioChange` event a dispatch produces under
/// `HandlingMode::Notifications`/`Both`. Implemented for `pf_event::EventManager`
/// so `pf-gpio` doesn't need to know its queue/task-table capacities.
pub trait EventSink {
    fn post_gpio_change(&self, evt: Event);
}

impl<const Q: usize, const M: usize> EventSink for pf_event::EventManager<Q, M> {
    fn post_gpio_change(&self, evt: Event) {
        let _ = self.post_event(evt);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    UnknownPin,
    TooManyPins,
    TooManyListeners,
}

type Callback = Box<dyn Fn(GpioEdgeEvent) + Send + Sync>;

struct PinEntry<const L: usize> {
    pin: u32,
    edge_mask: EdgeMask,
    enabled: bool,
    callbacks: HVec<Callback, L>,
}

impl<const L: usize> PinEntry<L> {
    fn new(pin: u32) -> Self {
        PinEntry {
            pin,
            edge_mask: EdgeMask::empty(),
            enabled: false,
            callbacks: HVec::new(),
        }
    }
}

pub const DEFAULT_MAX_PINS: usize = 16;
pub const DEFAULT_MAX_LISTENERS_PER_PIN: usize = 4;

/// Per-pin listener table plus the single process-wide dispatch entry
/// point a real GPIO ISR calls into.
pub struct GpioEventManager<
    const MAX_PINS: usize = DEFAULT_MAX_PINS,
    const MAX_LISTENERS: usize = DEFAULT_MAX_LISTENERS_PER_PIN,
> {
    pins: Mutex<RefCell<HVec<PinEntry<MAX_LISTENERS>, MAX_PINS>>>,
    handling: HandlingMode,
}

impl<const MAX_PINS: usize, const MAX_LISTENERS: usize> Default
    for GpioEventManager<MAX_PINS, MAX_LISTENERS>
{
    fn default() -> Self {
        Self::new(HandlingMode::default())
    }
}

impl<const MAX_PINS: usize, const MAX_LISTENERS: usize> GpioEventManager<MAX_PINS, MAX_LISTENERS> {
    pub const fn new(handling: HandlingMode) -> Self {
        GpioEventManager {
            pins: Mutex::new(RefCell::new(HVec::new())),
            handling,
        }
    }

    fn with_pin_mut<R>(&self, pin: u32, create: bool, f: impl FnOnce(&mut PinEntry<MAX_LISTENERS>) -> R) -> Result<R, Error> {
        critical_section::with(|cs| {
            let mut pins = self.pins.borrow(cs).borrow_mut();
            if let Some(idx) = pins.iter().position(|e| e.pin == pin) {
                return Ok(f(&mut pins[idx]));
            }
            if !create {
                return Err(Error::UnknownPin);
            }
            pins.push(PinEntry::new(pin)).map_err(|_| Error::TooManyPins)?;
            let idx = pins.len() - 1;
            Ok(f(&mut pins[idx]))
        })
    }

    /// Arms `pin` for the given edges. Creates a listener-less entry if the
    /// pin hasn't been seen before.
    pub fn enable_interrupt(&self, pin: u32, edge_mask: EdgeMask) -> Result<(), Error> {
        self.with_pin_mut(pin, true, |entry| {
            entry.edge_mask = edge_mask;
            entry.enabled = true;
        })
    }

    /// Disables `pin`'s interrupt without discarding its registered
    /// callbacks -- mirrors the original leaving `listeners[pin]` intact.
    pub fn disable_interrupt(&self, pin: u32) -> Result<(), Error> {
        self.with_pin_mut(pin, false, |entry| entry.enabled = false)
    }

    pub fn register_callback(
        &self,
        pin: u32,
        callback: impl Fn(GpioEdgeEvent) + Send + Sync + 'static,
    ) -> Result<(), Error> {
        self.with_pin_mut(pin, true, |entry| {
            entry
                .callbacks
                .push(Box::new(callback))
                .map_err(|_| Error::TooManyListeners)
        })?
    }

    pub fn unregister_all(&self, pin: u32) -> Result<(), Error> {
        self.with_pin_mut(pin, false, |entry| entry.callbacks.clear())
    }

    /// The single process-wide IRQ entry point: decodes `(pin, edge)` and
    /// routes it per [`HandlingMode`]. Never allocates on the dispatch
    /// path besides what the caller's own callbacks choose to do, and
    /// never blocks.
    pub fn dispatch(&self, pin: u32, edge: GpioEdge, sink: &dyn EventSink) {
        let gpio = GpioEdgeEvent { pin, edge };
        let fire = critical_section::with(|cs| {
            let pins = self.pins.borrow(cs).borrow();
            pins.iter()
                .find(|e| e.pin == pin)
                .filter(|e| e.enabled && e.edge_mask.matches(edge))
                .is_some()
        });
        if !fire {
            return;
        }
        pf_diag::ringbuf_entry!(GPIO_RINGBUF, (pin, edge));

        if matches!(self.handling, HandlingMode::Events | HandlingMode::Both) {
            critical_section::with(|cs| {
                let pins = self.pins.borrow(cs).borrow();
                if let Some(entry) = pins.iter().find(|e| e.pin == pin) {
                    for cb in entry.callbacks.iter() {
                        cb(gpio);
                    }
                }
            });
        }

        if matches!(self.handling, HandlingMode::Notifications | HandlingMode::Both) {
            sink.post_gpio_change(Event::with_gpio(
                Notification::System(SystemKind::GpioChange),
                gpio,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    struct RecordingSink {
        posted: AtomicU32,
    }
    impl EventSink for RecordingSink {
        fn post_gpio_change(&self, _evt: Event) {
            self.posted.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn disabled_pin_never_fires() {
        let mgr: GpioEventManager<4, 2> = GpioEventManager::new(HandlingMode::Both);
        let sink = RecordingSink { posted: AtomicU32::new(0) };
        mgr.dispatch(3, GpioEdge::Rising, &sink);
        assert_eq!(sink.posted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mismatched_edge_does_not_fire() {
        let mgr: GpioEventManager<4, 2> = GpioEventManager::new(HandlingMode::Notifications);
        mgr.enable_interrupt(3, EdgeMask::RISING).unwrap();
        let sink = RecordingSink { posted: AtomicU32::new(0) };
        mgr.dispatch(3, GpioEdge::Falling, &sink);
        assert_eq!(sink.posted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notifications_mode_posts_without_running_callbacks() {
        let mgr: GpioEventManager<4, 2> = GpioEventManager::new(HandlingMode::Notifications);
        mgr.enable_interrupt(1, EdgeMask::BOTH).unwrap();
        let calls = AtomicU32::new(0);
        let calls_ptr: *const AtomicU32 = &calls;
        mgr.register_callback(1, move |_| unsafe { (*calls_ptr).fetch_add(1, Ordering::SeqCst); })
            .unwrap();
        let sink = RecordingSink { posted: AtomicU32::new(0) };
        mgr.dispatch(1, GpioEdge::Rising, &sink);
        assert_eq!(sink.posted.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn both_mode_runs_callbacks_and_posts() {
        let mgr: GpioEventManager<4, 2> = GpioEventManager::new(HandlingMode::Both);
        mgr.enable_interrupt(2, EdgeMask::BOTH).unwrap();
        let calls = AtomicU32::new(0);
        let calls_ptr: *const AtomicU32 = &calls;
        mgr.register_callback(2, move |_| unsafe { (*calls_ptr).fetch_add(1, Ordering::SeqCst); })
            .unwrap();
        let sink = RecordingSink { posted: AtomicU32::new(0) };
        mgr.dispatch(2, GpioEdge::Falling, &sink);
        assert_eq!(sink.posted.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_all_clears_callbacks_but_keeps_pin_enabled() {
        let mgr: GpioEventManager<4, 2> = GpioEventManager::new(HandlingMode::Events);
        mgr.enable_interrupt(5, EdgeMask::BOTH).unwrap();
        mgr.register_callback(5, |_| {}).unwrap();
        mgr.unregister_all(5).unwrap();
        mgr.disable_interrupt(5).unwrap();
        assert!(mgr.enable_interrupt(5, EdgeMask::BOTH).is_ok());
    }
}
