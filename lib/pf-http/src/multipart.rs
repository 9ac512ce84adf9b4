// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming `multipart/form-data` decoding (spec.md §6): given the
//! boundary extracted from `Content-Type`, each part is handed to the
//! caller as it arrives so it can be written straight to storage instead of
//! buffered whole in memory -- the "handler is passed the boundary; each
//! part is streamed to storage" requirement.
//!
//! There is no dedicated `HttpParser`/multipart type in the original (the
//! retrieved `HttpParser.h` is a two-line stub), so this is grounded
//! directly on spec.md §6's prose description and RFC 2046's delimiter
//! grammar.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartHeader {
    pub field_name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug)]
pub enum Event<'a> {
    PartStart(PartHeader),
    PartData(&'a [u8]),
    PartEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Preamble,
    Headers,
    Data,
    Done,
}

/// Strips any path separator from an uploaded `filename="..."` attribute
/// and rejects an empty result, per spec.md §6: "sanitized: strip path
/// separators, reject empty".
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let trimmed = base.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_content_disposition(value: &str) -> (Option<String>, Option<String>) {
    let mut name = None;
    let mut filename = None;
    for part in value.split(';').skip(1) {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("name=") {
            name = Some(v.trim_matches('"').to_string());
        } else if let Some(v) = part.strip_prefix("filename=") {
            filename = Some(v.trim_matches('"').to_string());
        }
    }
    (name, filename)
}

/// Incrementally decodes one `multipart/form-data` body. Feed it bytes as
/// they arrive off the connection; it emits [`Event`]s as soon as it can
/// confirm they aren't a boundary split across two reads.
pub struct MultipartReader {
    marker: Vec<u8>,
    buf: Vec<u8>,
    state: State,
}

impl MultipartReader {
    pub fn new(boundary: &str) -> Self {
        let mut marker = Vec::with_capacity(boundary.len() + 2);
        marker.extend_from_slice(b"--");
        marker.extend_from_slice(boundary.as_bytes());
        MultipartReader {
            marker,
            buf: Vec::new(),
            state: State::Preamble,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Appends `data` to the internal buffer and drains as many complete
    /// events as the buffer currently supports, calling `on_event` for
    /// each. Safe to call repeatedly as more bytes arrive; any bytes that
    /// might still be part of an in-progress boundary match are retained
    /// for the next call.
    pub fn feed(&mut self, data: &[u8], mut on_event: impl FnMut(Event)) {
        self.buf.extend_from_slice(data);
        loop {
            match self.state {
                State::Done => return,
                State::Preamble => {
                    let Some(pos) = find(&self.buf, &self.marker) else {
                        return;
                    };
                    let after = pos + self.marker.len();
                    self.buf.drain(0..after);
                    if !self.advance_past_boundary_tail() {
                        return;
                    }
                }
                State::Headers => {
                    let Some(end) = find(&self.buf, b"\r\n\r\n") else {
                        return;
                    };
                    let header_block = self.buf[..end].to_vec();
                    self.buf.drain(0..end + 4);
                    let mut field_name = String::new();
                    let mut filename = None;
                    let mut content_type = None;
                    for line in header_block.split(|&b| b == b'\n') {
                        let line = core::str::from_utf8(line).unwrap_or("").trim_end_matches('\r');
                        if let Some((key, value)) = line.split_once(':') {
                            let key = key.trim().to_ascii_lowercase();
                            let value = value.trim();
                            if key == "content-disposition" {
                                let (n, f) = parse_content_disposition(value);
                                field_name = n.unwrap_or_default();
                                filename = f.and_then(|f| sanitize_filename(&f));
                            } else if key == "content-type" {
                                content_type = Some(value.to_string());
                            }
                        }
                    }
                    on_event(Event::PartStart(PartHeader {
                        field_name,
                        filename,
                        content_type,
                    }));
                    self.state = State::Data;
                }
                State::Data => {
                    let delimiter = {
                        let mut d = Vec::with_capacity(self.marker.len() + 2);
                        d.extend_from_slice(b"\r\n");
                        d.extend_from_slice(&self.marker);
                        d
                    };
                    match find(&self.buf, &delimiter) {
                        Some(pos) => {
                            if pos > 0 {
                                on_event(Event::PartData(&self.buf[..pos]));
                            }
                            on_event(Event::PartEnd);
                            self.buf.drain(0..pos + delimiter.len());
                            self.state = State::Headers;
                            if !self.advance_past_boundary_tail() {
                                return;
                            }
                        }
                        None => {
                            // Hold back enough trailing bytes that a
                            // boundary straddling this feed and the next
                            // can't be missed.
                            let hold = delimiter.len().saturating_sub(1);
                            if self.buf.len() > hold {
                                let emit_len = self.buf.len() - hold;
                                on_event(Event::PartData(&self.buf[..emit_len]));
                                self.buf.drain(0..emit_len);
                            }
                            return;
                        }
                    }
                }
            }
        }
    }

    /// After consuming a boundary marker, the next two bytes are either
    /// `--` (terminal boundary, body is done) or `\r\n` (another part's
    /// headers follow). Returns `false` if not enough bytes have arrived
    /// yet to decide.
    fn advance_past_boundary_tail(&mut self) -> bool {
        if self.buf.len() < 2 {
            return false;
        }
        if &self.buf[..2] == b"--" {
            self.buf.drain(0..2);
            self.state = State::Done;
        } else if &self.buf[..2] == b"\r\n" {
            self.buf.drain(0..2);
            self.state = State::Headers;
        } else {
            // Malformed separator; bail out rather than loop forever.
            self.state = State::Done;
        }
        true
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn sanitizes_filename_strips_path_and_rejects_empty() {
        assert_eq!(sanitize_filename("a.txt").as_deref(), Some("a.txt"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_filename("dir/sub/name.bin").as_deref(), Some("name.bin"));
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("a/"), None);
    }

    #[test]
    fn parses_single_file_part() {
        let boundary = "----XYZ";
        let body = alloc::format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\r\nabc\r\n--{boundary}--\r\n"
        );
        let mut reader = MultipartReader::new(boundary);
        let mut parts: Vec<PartHeader> = Vec::new();
        let mut data = Vec::new();
        let mut ended = 0;
        reader.feed(body.as_bytes(), |ev| match ev {
            Event::PartStart(h) => parts.push(h),
            Event::PartData(d) => data.extend_from_slice(d),
            Event::PartEnd => ended += 1,
        });
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].field_name, "file");
        assert_eq!(parts[0].filename.as_deref(), Some("a.txt"));
        assert_eq!(data, b"abc");
        assert_eq!(ended, 1);
        assert!(reader.is_done());
    }

    #[test]
    fn boundary_split_across_two_feeds_is_not_missed() {
        let boundary = "BOUND";
        let whole = alloc::format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n\r\nHELLOWORLD\r\n--{boundary}--\r\n"
        );
        let bytes = whole.as_bytes();
        let split = bytes.len() - 5; // split mid-delimiter
        let mut reader = MultipartReader::new(boundary);
        let mut data = Vec::new();
        let mut ended = 0;
        reader.feed(&bytes[..split], |ev| {
            if let Event::PartData(d) = ev {
                data.extend_from_slice(d);
            }
            if let Event::PartEnd = ev {
                ended += 1;
            }
        });
        reader.feed(&bytes[split..], |ev| {
            if let Event::PartData(d) = ev {
                data.extend_from_slice(d);
            }
            if let Event::PartEnd = ev {
                ended += 1;
            }
        });
        assert_eq!(data, b"HELLOWORLD");
        assert_eq!(ended, 1);
    }

    #[test]
    fn multiple_parts_are_each_emitted() {
        let boundary = "B";
        let whole = alloc::format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--{boundary}\r\nContent-Disposition: form-data; name=\"b\"\r\n\r\n2\r\n--{boundary}--\r\n"
        );
        let mut reader = MultipartReader::new(boundary);
        let mut names = Vec::new();
        let mut cur = Vec::new();
        reader.feed(whole.as_bytes(), |ev| match ev {
            Event::PartStart(h) => names.push(h.field_name),
            Event::PartData(d) => cur.extend_from_slice(d),
            Event::PartEnd => {}
        });
        assert_eq!(names, vec![String::from("a"), String::from("b")]);
        assert_eq!(cur, b"12");
    }
}
