// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The single percent-decode routine shared by `getQueryParams` and
//! `getFormParams` (spec.md §4.5: both are "URL-encoded parsing" over a
//! `key=value&...` string), plus the inverse used by tests and by any
//! handler that needs to build a query string.

use alloc::string::String;
use alloc::vec::Vec;

/// Decodes `%HH` escapes and turns `+` into a space, matching
/// `application/x-www-form-urlencoded` decoding.
pub fn decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = hex_val(bytes[i + 1]);
                let lo = hex_val(bytes[i + 2]);
                match (hi, lo) {
                    (Some(h), Some(l)) => {
                        out.push((h << 4) | l);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Percent-encodes a string so it round-trips back through [`decode`].
/// Reserved for handlers/tests that build query strings; the server itself
/// never needs to encode.
pub fn encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            _ => {
                out.push('%');
                out.push(hex_digit(b >> 4));
                out.push(hex_digit(b & 0x0f));
            }
        }
    }
    out
}

fn hex_digit(v: u8) -> char {
    match v {
        0..=9 => (b'0' + v) as char,
        _ => (b'A' + (v - 10)) as char,
    }
}

/// Parses a `key=value&key2=value2` string (either the `?...` portion of a
/// URL, or an `application/x-www-form-urlencoded` body) into ordered pairs.
pub fn parse_pairs(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if input.is_empty() {
        return out;
    }
    for pair in input.split('&') {
        if pair.is_empty() {
            continue;
        }
        match pair.split_once('=') {
            Some((k, v)) => out.push((decode(k), decode(v))),
            None => out.push((decode(pair), String::new())),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_percent_and_plus() {
        assert_eq!(decode("a+b%20c"), "a b c");
        assert_eq!(decode("100%25"), "100%");
    }

    #[test]
    fn invalid_escape_is_left_alone() {
        assert_eq!(decode("50%2"), "50%2");
        assert_eq!(decode("50%zz"), "50%zz");
    }

    #[test]
    fn parse_pairs_preserves_order_and_handles_bare_keys() {
        let pairs = parse_pairs("a=1&b=2&flag&c=hello+world");
        assert_eq!(
            pairs,
            alloc::vec![
                (String::from("a"), String::from("1")),
                (String::from("b"), String::from("2")),
                (String::from("flag"), String::new()),
                (String::from("c"), String::from("hello world")),
            ]
        );
    }

    #[test]
    fn encode_then_decode_round_trips_ascii_printable() {
        let original = "hello world! key=value; path/to?thing#frag";
        assert_eq!(decode(&encode(original)), original);
    }
}
