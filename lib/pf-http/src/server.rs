// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The accept loop and per-connection state machine: `ReadingHeaders ->
//! ReadingBody -> Dispatched -> Responding -> Closing` (spec.md §4.6).
//!
//! Grounded on `examples/original_source/framework/include/http/HttpServer.h`:
//! `HttpServer::run`/`handleClient`/`receiveRequest` walk the same states,
//! with the socket itself abstracted here behind [`Transport`]/[`Connection`]
//! so the state machine doesn't depend on any particular network stack (the
//! original hardwires lwIP; a board support crate in this workspace can
//! instead hand it whatever TCP/TLS stack it has).

use alloc::vec;
use alloc::vec::Vec;

use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::Error;

pf_diag::counters!(ServerCounters {
    requests_served,
    requests_rejected,
    routes_not_found
});

/// Process-wide request tally, grounded on the teacher's per-task
/// `counters::Count` instrumentation and on `HttpServer.h`'s documented
/// "on parse error -> 400; on oversized body -> 413; on unhandled route ->
/// 404" outcomes (spec.md §4.6) -- each bucketed here rather than broken
/// out per status code, since a full per-code table would need unbounded
/// storage for application-defined handler statuses.
pub static SERVER_COUNTERS: ServerCounters = ServerCounters::new();

/// Writes bytes to a connection. [`Response`] is generic over this rather
/// than a concrete socket type so it can be tested against an in-memory
/// buffer.
pub trait Write {
    fn write_all(&mut self, buf: &[u8]) -> Result<(), Error>;
}

/// Reads bytes from a connection. Mirrors `std::io::Read::read`: `Ok(0)`
/// means the peer closed the connection in an orderly way.
pub trait Read {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error>;
}

/// One accepted socket, readable and writable, with its own notion of
/// whether it has gone idle past `HTTP_IDLE_TIMEOUT` and should be reclaimed.
pub trait Connection: Read + Write {
    fn is_closed(&self) -> bool;
}

/// Something that can accept new connections -- a TCP listener, in the
/// firmware's case, or a test double in this crate's own test suite.
pub trait Transport {
    type Conn: Connection;
    fn accept(&mut self) -> Result<Self::Conn, Error>;
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Reads and dispatches exactly one request off `conn`. Grounded on
/// `HttpServer::handleClient`: accumulate bytes until the header block's
/// terminating blank line is seen, parse the request line and headers, read
/// the declared `Content-Length` worth of body, then hand off to the
/// router. HTTP/1.1 keep-alive is out of scope (spec.md's testable
/// properties describe one request serviced per accepted connection).
pub(crate) fn serve_connection<C: Connection>(
    router: &Router,
    conn: &mut C,
    max_body: usize,
    buffer_size: usize,
) -> Result<(), Error> {
    let mut buf = vec![0u8; buffer_size];
    let mut accumulated: Vec<u8> = Vec::new();

    let header_end = loop {
        if let Some(pos) = find_subslice(&accumulated, b"\r\n\r\n") {
            break pos;
        }
        // No terminator yet and the header block has already grown past
        // any reasonable size: refuse rather than buffer forever.
        if accumulated.len() > buffer_size * 8 {
            return Err(Error::BadRequest);
        }
        let n = conn.read(&mut buf)?;
        if n == 0 {
            return Err(Error::BadRequest);
        }
        accumulated.extend_from_slice(&buf[..n]);
    };

    let head = core::str::from_utf8(&accumulated[..header_end]).map_err(|_| Error::BadRequest)?;
    let request = Request::parse_head(head)?;
    request.check_body_limit(max_body)?;

    let mut body = accumulated[(header_end + 4).min(accumulated.len())..].to_vec();
    while body.len() < request.content_length {
        let n = conn.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(request.content_length);
    let mut request = request.with_body(body);

    let mut response = Response::new(conn);
    if router.handle_request(&mut request, &mut response) {
        SERVER_COUNTERS.requests_served.increment();
    } else {
        SERVER_COUNTERS.routes_not_found.increment();
        let _ = response.send_error(404, "Not Found");
    }
    Ok(())
}

/// Owns the route table and the transport it accepts connections from.
/// `serve_one` accepts and fully services a single connection; a board's
/// main loop calls it in a loop (typically from the dedicated network task
/// spawned by `pf-app`'s `FrameworkManager`).
pub struct Server<T: Transport> {
    transport: T,
    router: Router,
    max_body: usize,
    buffer_size: usize,
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, router: Router) -> Self {
        Server {
            transport,
            router,
            max_body: crate::DEFAULT_MAX_HTTP_BODY,
            buffer_size: crate::DEFAULT_HTTP_BUFFER_SIZE,
        }
    }

    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Accepts one connection and services exactly one request on it.
    pub fn serve_one(&mut self) -> Result<(), Error> {
        let mut conn = self.transport.accept()?;
        let result = serve_connection(&self.router, &mut conn, self.max_body, self.buffer_size);
        if result.is_err() {
            SERVER_COUNTERS.requests_rejected.increment();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use alloc::boxed::Box;
    use alloc::string::String;
    use alloc::vec::Vec as AVec;

    struct MockConn {
        input: AVec<u8>,
        pos: usize,
        pub output: AVec<u8>,
    }

    impl Read for MockConn {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
            let remaining = &self.input[self.pos..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl Write for MockConn {
        fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
            self.output.extend_from_slice(buf);
            Ok(())
        }
    }

    impl Connection for MockConn {
        fn is_closed(&self) -> bool {
            self.pos >= self.input.len()
        }
    }

    fn mock(input: &str) -> MockConn {
        MockConn {
            input: input.as_bytes().to_vec(),
            pos: 0,
            output: AVec::new(),
        }
    }

    #[test]
    fn serves_a_simple_get_request() {
        let router = Router::new();
        router.add_route(
            "GET",
            "/hello",
            Box::new(|_req, res, _m| res.send("text/plain", b"Hello, world!")),
            AVec::new(),
        );
        let mut conn = mock("GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        serve_connection(&router, &mut conn, crate::DEFAULT_MAX_HTTP_BODY, 64).unwrap();
        let out = String::from_utf8(conn.output).unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.ends_with("Hello, world!"));
    }

    #[test]
    fn unmatched_route_yields_404() {
        let router = Router::new();
        let mut conn = mock("GET /missing HTTP/1.1\r\n\r\n");
        serve_connection(&router, &mut conn, crate::DEFAULT_MAX_HTTP_BODY, 64).unwrap();
        let out = String::from_utf8(conn.output).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn reads_declared_content_length_body() {
        let router = Router::new();
        router.add_route(
            "POST",
            "/echo",
            Box::new(|req, res, _m| res.send("text/plain", &req.body)),
            AVec::new(),
        );
        let mut conn = mock("POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello");
        serve_connection(&router, &mut conn, crate::DEFAULT_MAX_HTTP_BODY, 64).unwrap();
        let out = String::from_utf8(conn.output).unwrap();
        assert!(out.ends_with("hello"));
    }

    #[test]
    fn oversized_body_is_rejected_before_reading() {
        let router = Router::new();
        let mut conn = mock("POST /x HTTP/1.1\r\nContent-Length: 999999\r\n\r\n");
        let err = serve_connection(&router, &mut conn, 16, 64).unwrap_err();
        assert_eq!(err, Error::PayloadTooLarge);
    }
}
