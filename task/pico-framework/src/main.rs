// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Firmware entry point: wires `pf-abi`/`pf-event`/`pf-timer`/`pf-storage`/
//! `pf-http`/`pf-model`/`pf-app` together into the running application.
//!
//! Board bring-up (clock tree, flash controller, network stack) is left as
//! the stubs below -- [`StubFlashDevice`] and [`NoNetworkTransport`] are the
//! seams a real board-support crate fills in, the same role
//! `pf_storage::flash::FlashDevice`/`pf_http::Transport` were designed to
//! play. What this binary demonstrates is the wiring and the route table:
//! `GET /hello`, a multipart upload, and a path-parameterized delete,
//! mirroring the scenarios spec.md's testable properties describe.

#![no_std]
#![no_main]

extern crate alloc;
extern crate panic_halt;

use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU64, Ordering};

use cortex_m_rt::entry;
use embedded_alloc::Heap;

use pf_abi::Clock;
use pf_app::{AppContext, Config, FrameworkManager};
use pf_event::manager::{DEFAULT_EVENT_QUEUE_LENGTH, DEFAULT_MAX_TASKS};
use pf_event::{EventManager, Task};
use pf_http::multipart::{Event as MultipartEvent, MultipartReader};
use pf_http::{
    Connection, Error as HttpError, Read as HttpRead, Router, Server, Transport,
    Write as HttpWrite,
};
use pf_storage::flash::{FlashDevice, FlashStorage};
use pf_storage::Error as StorageError;
use pf_timer::TimerService;

#[global_allocator]
static HEAP: Heap = Heap::empty();

const HEAP_SIZE: usize = 24 * 1024;
static mut HEAP_MEM: [MaybeUninit<u8>; HEAP_SIZE] = [MaybeUninit::uninit(); HEAP_SIZE];

/// Millisecond tick counter, advanced by the `SysTick` exception configured
/// below. Stands in for whatever RTC/AON timer a real board wires up --
/// `pf_abi::Clock` exists precisely so nothing above this module needs to
/// know this is a software tick rather than a hardware clock.
static TICKS_MS: AtomicU64 = AtomicU64::new(0);

#[cortex_m_rt::exception]
fn SysTick() {
    TICKS_MS.fetch_add(1, Ordering::Relaxed);
}

struct BoardClock;

impl Clock for BoardClock {
    fn now_ms(&self) -> u64 {
        TICKS_MS.load(Ordering::Relaxed)
    }

    fn unix_time(&self) -> u64 {
        // No SNTP client wired up in this demo; a board that brings up
        // network time sets this from its own monotonic-to-wall offset.
        0
    }

    fn local_time_of_day(&self) -> (u8, u32) {
        (0, 0)
    }
}

/// The NOR flash seam: reads return zeroed pages, writes/erases succeed
/// silently. Enough to exercise the model/routing layers above it without a
/// physical flash part attached.
struct StubFlashDevice;

impl FlashDevice for StubFlashDevice {
    fn read(&mut self, _off: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        buf.fill(0);
        Ok(())
    }

    fn program(&mut self, _off: usize, _data: &[u8]) -> Result<(), StorageError> {
        Ok(())
    }

    fn erase(&mut self, _off: usize, _len: usize) -> Result<(), StorageError> {
        Ok(())
    }
}

const FLASH_BLOCK_COUNT: usize = 64;

/// The TCP seam a board-support crate fills in with its real lwIP/smoltcp
/// listener. This stub never accepts a connection; it exists so
/// `Server::serve_one` has a concrete [`Transport`] to run against here.
struct NoNetworkTransport;
struct NoConnection;

impl HttpRead for NoConnection {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, HttpError> {
        Ok(0)
    }
}

impl HttpWrite for NoConnection {
    fn write_all(&mut self, _buf: &[u8]) -> Result<(), HttpError> {
        Ok(())
    }
}

impl Connection for NoConnection {
    fn is_closed(&self) -> bool {
        true
    }
}

impl Transport for NoNetworkTransport {
    type Conn = NoConnection;
    fn accept(&mut self) -> Result<Self::Conn, HttpError> {
        Err(HttpError::InternalError)
    }
}

/// Builds the demo route table: a static hello route, a path-parameterized
/// delete, and a multipart upload -- the three end-to-end scenarios
/// spec.md's testable properties describe.
fn build_router() -> Router {
    let router = Router::new();

    router.add_route(
        "GET",
        "/hello",
        alloc::boxed::Box::new(|_req, res, _m| res.send("text/plain", b"Hello, world!")),
        alloc::vec::Vec::new(),
    );

    router.add_route(
        "DELETE",
        "/api/v1/files/{name}",
        alloc::boxed::Box::new(|_req, res, route_match| {
            // A board build reaches the shared `AppContext` here (e.g. via
            // a `&'static` handle captured by the closure) to actually
            // remove `route_match.param("name")` under the upload path.
            let _name = route_match.param("name").unwrap_or_default();
            res.send("application/json", b"{\"deleted\":true}")
        }),
        alloc::vec::Vec::new(),
    );

    router.add_route(
        "POST",
        "/api/v1/upload",
        alloc::boxed::Box::new(|req, res, _m| {
            let Some(boundary) = req.multipart_boundary() else {
                return Err(HttpError::BadRequest);
            };
            let mut reader = MultipartReader::new(boundary);
            let mut stored_name = alloc::string::String::new();
            reader.feed(&req.body, |ev| {
                if let MultipartEvent::PartStart(part) = ev {
                    if let Some(name) = part.filename {
                        stored_name = name;
                    }
                }
            });
            if stored_name.is_empty() {
                return Err(HttpError::BadRequest);
            }
            res.send("application/json", b"{\"status\":\"stored\"}")
        }),
        alloc::vec::Vec::new(),
    );

    router
}

#[entry]
fn main() -> ! {
    // SAFETY: `HEAP_MEM` is only ever touched here, once, before any
    // allocation happens.
    unsafe {
        HEAP.init(HEAP_MEM.as_ptr() as usize, HEAP_SIZE);
    }

    static EVENTS: EventManager<{ DEFAULT_EVENT_QUEUE_LENGTH }, { DEFAULT_MAX_TASKS }> =
        EventManager::new();
    static TIMER: TimerService = TimerService::new();
    static NETWORK_TASK: Task<u8, 4> = Task::new("pf-net", 3);
    static APP_TASK: Task<u8, 4> = Task::new("pf-app", 2);

    let clock = BoardClock;
    let mut storage = FlashStorage::<StubFlashDevice, FLASH_BLOCK_COUNT>::new(StubFlashDevice);

    let manager = FrameworkManager::new(&NETWORK_TASK, &APP_TASK);
    manager.start().expect("framework starts exactly once");

    let config = Config::default();
    let ctx = AppContext::new(&mut storage, &TIMER, &EVENTS, &clock, config);
    // A real board build hands `&ctx` to route handlers (directly or via a
    // `'static` wrapper); this demo's handlers above are self-contained.
    let _ = &ctx;

    let router = build_router();
    let mut server = Server::new(NoNetworkTransport, router)
        .with_max_body(config.max_http_body)
        .with_buffer_size(config.http_buffer_size);

    manager.on_network_ready();

    loop {
        let _ = server.serve_one();
        cortex_m::asm::wfi();
    }
}
