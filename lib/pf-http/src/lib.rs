// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The HTTP routing and request/response pipeline: route table with
//! middleware (`Router`), the parsed `Request`/`Response` lifecycle, and the
//! accept-loop/per-connection state machine (`server`).
//!
//! Grounded on `examples/original_source/framework/include/http/*.h`
//! (`Router.h`, `RouteTypes.h`, `HttpServer.h`): method+regex route table,
//! global/per-route middleware chain, and a `ReadingHeaders -> ReadingBody ->
//! Dispatched -> Responding -> Closing` connection state machine, the same
//! shape the original's `HttpServer::run`/`handleClient` walks through.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod multipart;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod urlencode;

pub use request::Request;
pub use response::Response;
pub use router::{Middleware, Route, RouteHandler, RouteMatch, Router};
pub use server::{Connection, Read, Server, Transport, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    BadRequest,
    PayloadTooLarge,
    Unauthorized,
    NotFound,
    InternalError,
}

impl Error {
    /// The numeric HTTP status this error kind maps to when a handler or the
    /// server itself turns it into a response.
    pub fn status(self) -> u16 {
        match self {
            Error::BadRequest => 400,
            Error::Unauthorized => 401,
            Error::NotFound => 404,
            Error::PayloadTooLarge => 413,
            Error::InternalError => 500,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Error::BadRequest => "Bad Request",
            Error::Unauthorized => "Unauthorized",
            Error::NotFound => "Not Found",
            Error::PayloadTooLarge => "Payload Too Large",
            Error::InternalError => "Internal Server Error",
        }
    }
}

impl From<pf_storage::Error> for Error {
    /// "Storage errors bubble as return values; handlers translate to HTTP
    /// status" (spec.md §7) -- this `From` impl is that translation, used by
    /// handlers that propagate a storage `Result` with `?` into one that
    /// ends in `sendError`.
    fn from(e: pf_storage::Error) -> Self {
        match e {
            pf_storage::Error::NotFound | pf_storage::Error::NotMounted => Error::NotFound,
            pf_storage::Error::InvalidPath => Error::BadRequest,
            pf_storage::Error::Io
            | pf_storage::Error::AlreadyMounted
            | pf_storage::Error::Timeout
            | pf_storage::Error::Unsupported => Error::InternalError,
        }
    }
}

/// `MAX_HTTP_BODY_LENGTH` default from spec.md §6 (the table gives a 4-16
/// KiB range; 8 KiB is the middle the original ships with its demo apps).
pub const DEFAULT_MAX_HTTP_BODY: usize = 8192;
/// `HTTP_BUFFER_SIZE` default.
pub const DEFAULT_HTTP_BUFFER_SIZE: usize = 1460;
/// `HTTP_RECEIVE_TIMEOUT` default, milliseconds.
pub const DEFAULT_HTTP_RECEIVE_TIMEOUT_MS: u32 = 2000;
/// `HTTP_IDLE_TIMEOUT` default, milliseconds.
pub const DEFAULT_HTTP_IDLE_TIMEOUT_MS: u32 = 500;
/// `STREAM_SEND_DELAY_MS` default.
pub const DEFAULT_STREAM_SEND_DELAY_MS: u32 = 20;
/// `MULTIPART_UPLOAD_PATH` default.
pub const DEFAULT_MULTIPART_UPLOAD_PATH: &str = "/uploads";
/// `TCP_LISTEN_BACKLOG` ceiling mentioned in spec.md §4.6.
pub const TCP_LISTEN_BACKLOG: usize = 4;
