// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Parsed request state: request line, headers, query/cookie/form maps,
//! and a bounded body.
//!
//! Grounded on `HttpServer::receiveRequest`'s documented behavior (spec.md
//! §4.5): lowercase header keys, trim whitespace and surrounding quotes from
//! values, later duplicates overwrite earlier ("last write wins").

use alloc::borrow::ToOwned;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use heapless::FnvIndexMap;

use crate::urlencode;
use crate::Error;

/// Header/query/cookie maps are capped so a crate with no allocator-growth
/// budget for `no_std` targets can still back them with a fixed table; 32
/// entries comfortably covers any realistic single request.
const MAX_MAP_ENTRIES: usize = 32;

type StrMap = FnvIndexMap<String, String, MAX_MAP_ENTRIES>;

fn lowercase(s: &str) -> String {
    s.chars().flat_map(|c| c.to_lowercase()).collect()
}

/// Strips one layer of matching `"` or `'` quotes and surrounding
/// whitespace from a raw header value, per spec.md §4.5 and the Testable
/// Properties header invariant (§8).
fn trim_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0] {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    }
}

/// Parsed HTTP/1.1 request. `body` is bounded by `MAX_HTTP_BODY_LENGTH`
/// unless the caller used the streaming/multipart path, in which case
/// `body` stays empty and the server/handler consumed the bytes directly
/// off the connection.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query_string: String,
    headers: StrMap,
    pub content_length: usize,
    pub body: Vec<u8>,
}

impl Request {
    /// Parses the request line and header block (everything up to, not
    /// including, the `CRLF CRLF` that terminates the header section). Does
    /// not touch the body.
    pub fn parse_head(raw: &str) -> Result<Request, Error> {
        let mut lines = raw.split("\r\n");
        let request_line = lines.next().ok_or(Error::BadRequest)?;
        let mut parts = request_line.split_whitespace();
        let method = parts.next().ok_or(Error::BadRequest)?.to_string();
        let target = parts.next().ok_or(Error::BadRequest)?;
        let (path, query_string) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), q.to_string()),
            None => (target.to_string(), String::new()),
        };

        let mut headers = StrMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let key = lowercase(name.trim());
            let value = trim_quotes(value).to_owned();
            // Last-write-wins: a later duplicate header simply overwrites.
            let _ = headers.insert(key, value);
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        Ok(Request {
            method,
            path,
            query_string,
            headers,
            content_length,
            body: Vec::new(),
        })
    }

    /// Attaches a fully-read, bounds-checked body.
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// `getHeaders()[lower(name)]`, matching the Testable Properties
    /// invariant verbatim.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&lowercase(name)).map(|s| s.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Percent-decoded `?key=value&...` pairs from the request target.
    pub fn query_params(&self) -> Vec<(String, String)> {
        urlencode::parse_pairs(&self.query_string)
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.query_params()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// `Cookie: k=v; k2=v2` parsed into pairs. Unlike query/form values,
    /// cookie pairs are not percent-decoded (the original passes them
    /// through raw).
    pub fn cookies(&self) -> Vec<(String, String)> {
        let Some(raw) = self.header("cookie") else {
            return Vec::new();
        };
        raw.split(';')
            .filter_map(|part| {
                let part = part.trim();
                if part.is_empty() {
                    return None;
                }
                match part.split_once('=') {
                    Some((k, v)) => Some((k.trim().to_string(), v.trim().to_string())),
                    None => Some((part.to_string(), String::new())),
                }
            })
            .collect()
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies().into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Parses the body as `application/x-www-form-urlencoded`. Empty if the
    /// content type doesn't match or there's no body.
    pub fn form_params(&self) -> Vec<(String, String)> {
        if self.header("content-type") != Some("application/x-www-form-urlencoded") {
            return Vec::new();
        }
        let body = core::str::from_utf8(&self.body).unwrap_or("");
        urlencode::parse_pairs(body)
    }

    /// True iff `Content-Type` begins with `multipart/form-data;
    /// boundary=...`.
    pub fn is_multipart(&self) -> bool {
        self.multipart_boundary().is_some()
    }

    /// Extracts the `boundary=...` attribute from a multipart content type,
    /// if present.
    pub fn multipart_boundary(&self) -> Option<&str> {
        let ct = self.header("content-type")?;
        if !ct.starts_with("multipart/form-data") {
            return None;
        }
        ct.split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("boundary="))
            .map(|b| b.trim_matches('"'))
    }

    /// Checks the request against `max_body`, per spec.md §4.5: bodies
    /// above the configured limit are refused unless the caller takes the
    /// streaming/multipart path instead of calling this.
    pub fn check_body_limit(&self, max_body: usize) -> Result<(), Error> {
        if self.content_length > max_body {
            Err(Error::PayloadTooLarge)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_path_and_query() {
        let req = Request::parse_head("GET /hello?x=1&y=2 HTTP/1.1\r\nHost: test\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/hello");
        assert_eq!(req.query_param("x").as_deref(), Some("1"));
        assert_eq!(req.query_param("y").as_deref(), Some("2"));
    }

    #[test]
    fn headers_are_lowercased_and_last_write_wins() {
        let req = Request::parse_head(
            "GET / HTTP/1.1\r\nX-Thing: \"first\"\r\nX-THING: second\r\n",
        )
        .unwrap();
        assert_eq!(req.header("x-thing"), Some("second"));
    }

    #[test]
    fn cookies_parse_semicolon_pairs() {
        let req = Request::parse_head("GET / HTTP/1.1\r\nCookie: a=1; b=2\r\n").unwrap();
        assert_eq!(req.cookie("a").as_deref(), Some("1"));
        assert_eq!(req.cookie("b").as_deref(), Some("2"));
    }

    #[test]
    fn form_params_requires_matching_content_type() {
        let mut req = Request::parse_head(
            "POST / HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n",
        )
        .unwrap();
        req = req.with_body(b"a=1&b=hello+world".to_vec());
        let params = req.form_params();
        assert_eq!(params[0], (String::from("a"), String::from("1")));
        assert_eq!(params[1], (String::from("b"), String::from("hello world")));
    }

    #[test]
    fn multipart_boundary_is_extracted() {
        let req = Request::parse_head(
            "POST / HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=----XYZ\r\n",
        )
        .unwrap();
        assert!(req.is_multipart());
        assert_eq!(req.multipart_boundary(), Some("----XYZ"));
    }

    #[test]
    fn body_limit_is_enforced() {
        let mut req = Request::parse_head("POST / HTTP/1.1\r\nContent-Length: 10\r\n").unwrap();
        assert!(req.check_body_limit(10).is_ok());
        req.content_length = 11;
        assert_eq!(req.check_body_limit(10), Err(Error::PayloadTooLarge));
    }
}
