// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application bring-up: a single [`Config`] carrying the framework's tunable
//! constants, an [`AppContext`] service registry handing out the shared
//! storage/timer/event/clock handles, and a [`FrameworkManager`] that owns
//! the network and application tasks through startup.
//!
//! Grounded on `examples/original_source/framework/include/AppContext.h` and
//! `FrameworkManager.h`: the original exposes its storage/timer singletons
//! through static getters (`AppContext::getFatFsStorage()`,
//! `getTimerService()`) and drives a two-task model (`network_task`,
//! `app_task`) from boot through to serving requests. Static singletons
//! don't fit this crate's testable, `no_std` shape, so `AppContext` holds
//! its handles as fields behind a short-lived reference instead of behind
//! function-local statics -- same one-stop-shop lookup, constructed once at
//! startup rather than lazily on first use.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::cell::RefCell;
use critical_section::Mutex;

use pf_abi::Clock;
use pf_event::manager::{DEFAULT_EVENT_QUEUE_LENGTH, DEFAULT_MAX_TASKS};
use pf_event::task::{Error as TaskError, Task};
use pf_event::EventManager;
use pf_storage::Storage;
use pf_timer::TimerService;

/// The spec's configuration constants table, as one struct with the
/// documented defaults rather than scattered `#define`s. A board-support
/// crate overrides only the fields it cares about via `Config { max_http_body: 4096, ..Default::default() }`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Config {
    pub max_http_body: usize,
    pub http_buffer_size: usize,
    pub http_receive_timeout_ms: u32,
    pub http_idle_timeout_ms: u32,
    pub stream_send_delay_ms: u32,
    pub multipart_upload_path: &'static str,
    pub tcp_listen_backlog: usize,
    pub event_queue_length: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_http_body: pf_http::DEFAULT_MAX_HTTP_BODY,
            http_buffer_size: pf_http::DEFAULT_HTTP_BUFFER_SIZE,
            http_receive_timeout_ms: pf_http::DEFAULT_HTTP_RECEIVE_TIMEOUT_MS,
            http_idle_timeout_ms: pf_http::DEFAULT_HTTP_IDLE_TIMEOUT_MS,
            stream_send_delay_ms: pf_http::DEFAULT_STREAM_SEND_DELAY_MS,
            multipart_upload_path: pf_http::DEFAULT_MULTIPART_UPLOAD_PATH,
            tcp_listen_backlog: pf_http::TCP_LISTEN_BACKLOG,
            event_queue_length: DEFAULT_EVENT_QUEUE_LENGTH,
        }
    }
}

/// The shared service registry: storage, timer service, event manager and
/// clock, each built once at startup and handed out by reference.
/// `AppContext::getFatFsStorage()`'s job, generalized over whichever
/// `Storage` back-end the board actually wired up and made testable by
/// taking borrowed handles instead of reaching into function-local statics.
pub struct AppContext<'a, S: Storage> {
    storage: Mutex<RefCell<&'a mut S>>,
    timer: &'a TimerService,
    events: &'a EventManager<{ DEFAULT_EVENT_QUEUE_LENGTH }, { DEFAULT_MAX_TASKS }>,
    clock: &'a dyn Clock,
    config: Config,
}

impl<'a, S: Storage> AppContext<'a, S> {
    pub fn new(
        storage: &'a mut S,
        timer: &'a TimerService,
        events: &'a EventManager<{ DEFAULT_EVENT_QUEUE_LENGTH }, { DEFAULT_MAX_TASKS }>,
        clock: &'a dyn Clock,
        config: Config,
    ) -> Self {
        AppContext {
            storage: Mutex::new(RefCell::new(storage)),
            timer,
            events,
            clock,
            config,
        }
    }

    /// Runs `f` with exclusive access to the storage back-end. Mirrors
    /// `getFatFsStorage()->readFile(...)`-style call sites, but scoped so
    /// the borrow can't outlive the critical section.
    pub fn with_storage<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        critical_section::with(|cs| {
            let mut guard = self.storage.borrow(cs).borrow_mut();
            f(*guard)
        })
    }

    pub fn timer_service(&self) -> &'a TimerService {
        self.timer
    }

    pub fn event_manager(&self) -> &'a EventManager<{ DEFAULT_EVENT_QUEUE_LENGTH }, { DEFAULT_MAX_TASKS }> {
        self.events
    }

    pub fn clock(&self) -> &'a dyn Clock {
        self.clock
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Startup phase, tracked so a handler or diagnostic route can answer "is
/// the network actually up yet" without reaching into task internals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Boot,
    NetworkInit,
    Running,
    ShuttingDown,
}

/// Owns the two tasks the original's `FrameworkManager` spawns at boot --
/// one for network bring-up and the HTTP accept loop, one for the
/// application's own logic -- and tracks which [`Phase`] startup has
/// reached. Spawning the actual thread of control for each `Task` is still
/// the board-support crate's job (see `pf-event::Task`'s doc comment); this
/// type only sequences `start()` and records phase transitions.
pub struct FrameworkManager<'a, NMsg: Copy, const NN: usize, AMsg: Copy, const AN: usize> {
    network_task: &'a Task<NMsg, NN>,
    app_task: &'a Task<AMsg, AN>,
    phase: Mutex<RefCell<Phase>>,
}

impl<'a, NMsg: Copy, const NN: usize, AMsg: Copy, const AN: usize> FrameworkManager<'a, NMsg, NN, AMsg, AN> {
    pub fn new(network_task: &'a Task<NMsg, NN>, app_task: &'a Task<AMsg, AN>) -> Self {
        FrameworkManager {
            network_task,
            app_task,
            phase: Mutex::new(RefCell::new(Phase::Boot)),
        }
    }

    /// Starts both tasks. Fails if either has already been started, which
    /// also guards against calling `start` twice on the same manager.
    pub fn start(&self) -> Result<(), TaskError> {
        self.network_task.start()?;
        self.app_task.start()?;
        self.set_phase(Phase::NetworkInit);
        Ok(())
    }

    /// Called once the network task has brought up the link and started
    /// accepting HTTP connections (`SystemKind::NetworkReady`/
    /// `HttpServerStarted` having posted).
    pub fn on_network_ready(&self) {
        self.set_phase(Phase::Running);
    }

    pub fn begin_shutdown(&self) {
        self.set_phase(Phase::ShuttingDown);
    }

    pub fn phase(&self) -> Phase {
        critical_section::with(|cs| *self.phase.borrow(cs).borrow())
    }

    fn set_phase(&self, phase: Phase) {
        critical_section::with(|cs| *self.phase.borrow(cs).borrow_mut() = phase);
    }

    pub fn network_task(&self) -> &'a Task<NMsg, NN> {
        self.network_task
    }

    pub fn app_task(&self) -> &'a Task<AMsg, AN> {
        self.app_task
    }
}
