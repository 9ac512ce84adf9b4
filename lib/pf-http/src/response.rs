// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The response state machine: `Open -> Started -> Finishing -> Closed`
//! (spec.md §3), writing either a fixed `Content-Length` body or a
//! `Transfer-Encoding: chunked` stream through whatever [`crate::server::Write`]
//! the connection gives it.

use alloc::string::String;
use alloc::vec::Vec;
use heapless::Vec as HVec;

use crate::server::Write;
use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Open,
    Started,
    Closed,
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Escapes a string for inclusion inside a JSON string literal. Minimal on
/// purpose: `sendError`'s message is the only thing this crate itself needs
/// to serialize as JSON without pulling in `serde_json` (owned instead by
/// `pf-model`, which the application layer uses for real payloads).
fn json_escape(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}

/// A single outstanding HTTP response being written to a connection.
pub struct Response<'a> {
    writer: &'a mut dyn Write,
    state: State,
    pending_status: u16,
    extra_headers: HVec<(String, String), 8>,
    chunked: bool,
}

impl<'a> Response<'a> {
    pub fn new(writer: &'a mut dyn Write) -> Self {
        Response {
            writer,
            state: State::Open,
            pending_status: 200,
            extra_headers: HVec::new(),
            chunked: false,
        }
    }

    /// Sets the status code to use when the response is eventually started.
    /// Valid any time before `start`/`send`/`json`.
    pub fn status(&mut self, code: u16) -> &mut Self {
        self.pending_status = code;
        self
    }

    /// Queues an extra header to be written when the response starts.
    /// "Headers may be set only in Open" (spec.md §3).
    pub fn set(&mut self, header: &str, value: &str) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::InternalError);
        }
        let _ = self.extra_headers.push((String::from(header), String::from(value)));
        Ok(())
    }

    /// Writes the status line and headers. `len = Some(n)` writes
    /// `Content-Length: n`; `None` switches to `Transfer-Encoding: chunked`.
    /// Moves `Open -> Started`.
    pub fn start(&mut self, status: u16, len: Option<usize>, content_type: &str) -> Result<(), Error> {
        if self.state != State::Open {
            return Err(Error::InternalError);
        }
        self.pending_status = status;
        let mut head = String::new();
        head.push_str("HTTP/1.1 ");
        push_u16(&mut head, status);
        head.push(' ');
        head.push_str(reason_phrase(status));
        head.push_str("\r\n");
        head.push_str("Content-Type: ");
        head.push_str(content_type);
        head.push_str("\r\n");

        match len {
            Some(n) => {
                head.push_str("Content-Length: ");
                push_usize(&mut head, n);
                head.push_str("\r\n");
                self.chunked = false;
            }
            None => {
                head.push_str("Transfer-Encoding: chunked\r\n");
                self.chunked = true;
            }
        }
        for (k, v) in self.extra_headers.iter() {
            head.push_str(k);
            head.push_str(": ");
            head.push_str(v);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        self.writer.write_all(head.as_bytes())?;
        self.state = State::Started;
        Ok(())
    }

    /// Writes one chunk of body. In chunked mode this is `HEXLEN\r\nBUF\r\n`;
    /// in length mode it's the raw bytes. Valid only once `Started`.
    pub fn write_chunk(&mut self, buf: &[u8]) -> Result<(), Error> {
        if self.state != State::Started {
            return Err(Error::InternalError);
        }
        if self.chunked {
            let mut header = String::new();
            push_hex(&mut header, buf.len());
            header.push_str("\r\n");
            self.writer.write_all(header.as_bytes())?;
            self.writer.write_all(buf)?;
            self.writer.write_all(b"\r\n")?;
        } else {
            self.writer.write_all(buf)?;
        }
        Ok(())
    }

    /// Emits the chunked terminator (`0\r\n\r\n`) if in chunked mode and
    /// closes the response. No-op terminator in length mode, since the
    /// exact byte count was already declared up front.
    pub fn finish(&mut self) -> Result<(), Error> {
        if self.state != State::Started {
            return Err(Error::InternalError);
        }
        if self.chunked {
            self.writer.write_all(b"0\r\n\r\n")?;
        }
        self.state = State::Closed;
        Ok(())
    }

    /// Convenience for the common case: known-length body, one write,
    /// immediate close.
    pub fn send(&mut self, content_type: &str, body: &[u8]) -> Result<(), Error> {
        let status = self.pending_status;
        self.start(status, Some(body.len()), content_type)?;
        self.write_chunk(body)?;
        self.finish()
    }

    /// Sends `json_text` (already-serialized JSON, typically from
    /// `pf-model`'s value tree) with `Content-Type: application/json`.
    pub fn json(&mut self, json_text: &str) -> Result<(), Error> {
        self.send("application/json", json_text.as_bytes())
    }

    /// `sendError(code, msg)`: a JSON `{"error": msg}` body with the given
    /// status.
    pub fn send_error(&mut self, status: u16, msg: &str) -> Result<(), Error> {
        let mut body = String::from("{\"error\":\"");
        json_escape(msg, &mut body);
        body.push_str("\"}");
        self.status(status);
        self.json(&body)
    }

    pub fn is_closed(&self) -> bool {
        self.state == State::Closed
    }
}

fn push_u16(out: &mut String, mut v: u16) {
    let mut digits = HVec::<u8, 5>::new();
    if v == 0 {
        out.push('0');
        return;
    }
    while v > 0 {
        let _ = digits.push((v % 10) as u8);
        v /= 10;
    }
    for d in digits.iter().rev() {
        out.push((b'0' + d) as char);
    }
}

fn push_usize(out: &mut String, mut v: usize) {
    if v == 0 {
        out.push('0');
        return;
    }
    let mut digits = Vec::new();
    while v > 0 {
        digits.push((v % 10) as u8);
        v /= 10;
    }
    for d in digits.iter().rev() {
        out.push((b'0' + d) as char);
    }
}

fn push_hex(out: &mut String, mut v: usize) {
    if v == 0 {
        out.push('0');
        return;
    }
    let mut digits = Vec::new();
    while v > 0 {
        let nibble = (v & 0xf) as u8;
        digits.push(if nibble < 10 { b'0' + nibble } else { b'a' + nibble - 10 });
        v >>= 4;
    }
    for d in digits.iter().rev() {
        out.push(*d as char);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec as AVec;

    struct BufWriter(AVec<u8>);
    impl Write for BufWriter {
        fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
            self.0.extend_from_slice(buf);
            Ok(())
        }
    }

    #[test]
    fn send_writes_content_length_framing() {
        let mut w = BufWriter(AVec::new());
        {
            let mut res = Response::new(&mut w);
            res.status(200);
            res.send("text/plain", b"Hello, world!").unwrap();
        }
        let out = String::from_utf8(w.0).unwrap();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Content-Length: 13\r\n"));
        assert!(out.ends_with("Hello, world!"));
    }

    #[test]
    fn chunked_mode_frames_each_write_and_terminates() {
        let mut w = BufWriter(AVec::new());
        {
            let mut res = Response::new(&mut w);
            res.start(200, None, "text/plain").unwrap();
            res.write_chunk(b"abc").unwrap();
            res.write_chunk(b"de").unwrap();
            res.finish().unwrap();
        }
        let out = String::from_utf8(w.0).unwrap();
        assert!(out.contains("Transfer-Encoding: chunked\r\n"));
        assert!(out.contains("3\r\nabc\r\n"));
        assert!(out.contains("2\r\nde\r\n"));
        assert!(out.ends_with("0\r\n\r\n"));
    }

    #[test]
    fn set_header_after_start_is_rejected() {
        let mut w = BufWriter(AVec::new());
        let mut res = Response::new(&mut w);
        res.start(200, Some(0), "text/plain").unwrap();
        assert_eq!(res.set("X-Foo", "bar"), Err(Error::InternalError));
    }

    #[test]
    fn write_chunk_before_start_is_rejected() {
        let mut w = BufWriter(AVec::new());
        let mut res = Response::new(&mut w);
        assert_eq!(res.write_chunk(b"x"), Err(Error::InternalError));
    }

    #[test]
    fn send_error_produces_escaped_json() {
        let mut w = BufWriter(AVec::new());
        {
            let mut res = Response::new(&mut w);
            res.send_error(404, "File \"a\" not found").unwrap();
        }
        let out = String::from_utf8(w.0).unwrap();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("{\"error\":\"File \\\"a\\\" not found\"}"));
    }
}
