// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A line-oriented cursor over a whole file's bytes, returned by
//! `Storage::open_reader`.

use alloc::string::String;
use alloc::vec::Vec;

/// Reads lines out of a byte buffer, stripping `\r`/`\n`. `EOF` is reported
/// by `read_line` returning `None` exactly when there is nothing left to
/// read, not when a line happens to be empty.
pub struct LineReader {
    data: Vec<u8>,
    cursor: usize,
}

impl LineReader {
    pub fn new(data: Vec<u8>) -> Self {
        LineReader { data, cursor: 0 }
    }

    /// Returns the next line, without its trailing `\r`/`\n`, truncated to
    /// at most `max_len - 1` bytes. Returns `None` at EOF.
    pub fn read_line(&mut self, max_len: usize) -> Option<String> {
        if self.cursor >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.cursor..];
        let (line_bytes, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => (&rest[..nl], nl + 1),
            None => (rest, rest.len()),
        };
        self.cursor += consumed;

        let line_bytes = if line_bytes.last() == Some(&b'\r') {
            &line_bytes[..line_bytes.len() - 1]
        } else {
            line_bytes
        };

        let cap = max_len.saturating_sub(1);
        let truncated = &line_bytes[..line_bytes.len().min(cap)];
        Some(String::from_utf8_lossy(truncated).into_owned())
    }

    pub fn is_eof(&self) -> bool {
        self.cursor >= self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_crlf_and_lf() {
        let mut r = LineReader::new(b"one\r\ntwo\nthree".to_vec());
        assert_eq!(r.read_line(64), Some("one".into()));
        assert_eq!(r.read_line(64), Some("two".into()));
        assert_eq!(r.read_line(64), Some("three".into()));
        assert_eq!(r.read_line(64), None);
    }

    #[test]
    fn empty_line_is_not_eof() {
        let mut r = LineReader::new(b"\n\nx".to_vec());
        assert_eq!(r.read_line(64), Some("".into()));
        assert_eq!(r.read_line(64), Some("".into()));
        assert_eq!(r.read_line(64), Some("x".into()));
        assert_eq!(r.read_line(64), None);
    }

    #[test]
    fn truncates_to_max_len_minus_one() {
        let mut r = LineReader::new(b"abcdefgh\n".to_vec());
        assert_eq!(r.read_line(4), Some("abc".into()));
    }

    #[test]
    fn empty_buffer_is_immediate_eof() {
        let mut r = LineReader::new(Vec::new());
        assert_eq!(r.read_line(64), None);
    }
}
