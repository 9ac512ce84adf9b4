// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Method+regex route table with a global and per-route middleware chain.
//!
//! Grounded on `examples/original_source/framework/include/http/Router.h`
//! and `RouteTypes.h`: `addRoute`/`use`/`handleRequest` with the same
//! control flow (auth gate, global middleware, route middleware, handler),
//! and `Route`/`RouteMatch` with the same fields, reimplemented against the
//! `regex` crate's alloc-only build instead of `<regex>`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use critical_section::Mutex;
use regex::Regex;

use crate::request::Request;
use crate::response::Response;
use crate::Error;

/// A match of a compiled route against an incoming request: the ordered
/// positional captures (from raw `(.*)`/`(.+)` groups the caller wrote
/// directly into the pattern) plus the named captures extracted from
/// `{name}` tokens.
#[derive(Debug, Default, Clone)]
pub struct RouteMatch {
    pub ordered: Vec<String>,
    pub named: BTreeMap<String, String>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(|s| s.as_str())
    }
}

pub type RouteHandler = Box<dyn Fn(&mut Request, &mut Response, &RouteMatch) -> Result<(), Error> + Send + Sync>;
/// Middleware may short-circuit the pipeline by returning `false`; it is
/// then responsible for having written a response itself.
pub type Middleware = Box<dyn Fn(&mut Request, &mut Response, &RouteMatch) -> bool + Send + Sync>;

/// An optional gate checked before a route flagged `requires_auth` runs.
/// The framework binary wires a real JWT/session check here; by default no
/// `AuthGate` means `requires_auth` routes always fail closed with 401
/// (fail-safe, rather than silently granting access when nothing is wired).
pub trait AuthGate: Send + Sync {
    fn authorize(&self, req: &Request) -> bool;
}

pub struct Route {
    pub method: String,
    pub path_pattern: String,
    pub is_dynamic: bool,
    pub requires_auth: bool,
    pub param_names: Vec<String>,
    regex: Regex,
    handler: RouteHandler,
    middleware: Vec<Middleware>,
}

/// Translates `{name}` and `{name:subpattern}` tokens into named regex
/// capture groups, escaping literal text in between. A bare `{name}`
/// becomes `(?P<name>.*)` -- greedy, since path parameters in this
/// framework (file names under `/uploads`, `/files`) may themselves
/// contain `/`. A route author who needs a narrower match writes
/// `{name:[^/]+}` explicitly.
fn compile_pattern(pattern: &str) -> (Regex, Vec<String>, bool) {
    let mut source = String::from("^");
    let mut param_names = Vec::new();
    let bytes = pattern.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = pattern[i..].find('}') {
                let token = &pattern[i + 1..i + end];
                let (name, subpattern) = match token.split_once(':') {
                    Some((n, p)) => (n, p),
                    None => (token, ".*"),
                };
                source.push_str("(?P<");
                source.push_str(name);
                source.push('>');
                source.push_str(subpattern);
                source.push(')');
                param_names.push(name.to_string());
                i += end + 1;
                continue;
            }
        }
        // Literal run up to the next `{` (or end of string).
        let next_brace = pattern[i..].find('{').map(|o| i + o).unwrap_or(pattern.len());
        source.push_str(&regex::escape(&pattern[i..next_brace]));
        i = next_brace;
    }
    source.push('$');
    let regex = Regex::new(&source).expect("route pattern compiles");
    let is_dynamic = !param_names.is_empty() || pattern.contains('(');
    (regex, param_names, is_dynamic)
}

impl Route {
    fn matches(&self, path: &str) -> Option<RouteMatch> {
        let caps = self.regex.captures(path)?;
        let mut m = RouteMatch::default();
        for name in &self.param_names {
            if let Some(v) = caps.name(name) {
                m.named.insert(name.clone(), v.as_str().to_string());
            }
        }
        // Positional groups: every capture group that isn't one of the
        // named parameters above, in the order the regex declares them.
        for (idx, group) in self.regex.capture_names().enumerate() {
            if idx == 0 {
                continue;
            }
            if group.is_none() {
                if let Some(v) = caps.get(idx) {
                    m.ordered.push(v.as_str().to_string());
                }
            }
        }
        Some(m)
    }
}

/// Default capacity for the route table and global middleware list --
/// generous enough for any realistic firmware's route count, while keeping
/// the recursive-mutex-guarded table a fixed-size structure.
const MAX_GLOBAL_MIDDLEWARE: usize = 8;

/// The central route table. Guarded by a single `critical_section`-backed
/// lock, standing in for the original's recursive FreeRTOS mutex -- a
/// handler that (rarely) registers or inspects routes from within
/// `handleRequest` re-enters the same logical lock safely because
/// `critical_section::with` on a single core is already non-reentrant-safe
/// by construction (interrupts are masked, not re-acquired).
pub struct Router {
    routes: Mutex<RefCell<BTreeMap<String, Vec<Arc<Route>>>>>,
    global_middleware: Mutex<RefCell<Vec<Middleware>>>,
    auth_gate: Option<Box<dyn AuthGate>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            routes: Mutex::new(RefCell::new(BTreeMap::new())),
            global_middleware: Mutex::new(RefCell::new(Vec::new())),
            auth_gate: None,
        }
    }

    pub fn with_auth_gate(mut self, gate: Box<dyn AuthGate>) -> Self {
        self.auth_gate = Some(gate);
        self
    }

    /// Registers global middleware, run (in registration order) before any
    /// route-specific middleware on every request.
    pub fn use_middleware(&self, middleware: Middleware) {
        critical_section::with(|cs| {
            let mut list = self.global_middleware.borrow(cs).borrow_mut();
            if list.len() < MAX_GLOBAL_MIDDLEWARE {
                list.push(middleware);
            }
        });
    }

    /// Compiles `pattern`, extracts `{name}` parameters in declaration
    /// order, and appends the route. `(method, pattern)` must be unique;
    /// registering a duplicate replaces the prior entry (last registration
    /// wins), matching how the original's `std::vector` push-back means the
    /// *first* registered match wins at dispatch time regardless -- so this
    /// crate keeps insertion order and documents that the first match in
    /// registration order is what `handle_request` dispatches to.
    pub fn add_route(
        &self,
        method: &str,
        pattern: &str,
        handler: RouteHandler,
        middleware: Vec<Middleware>,
    ) {
        self.add_route_inner(method, pattern, handler, middleware, false)
    }

    pub fn add_protected_route(
        &self,
        method: &str,
        pattern: &str,
        handler: RouteHandler,
        middleware: Vec<Middleware>,
    ) {
        self.add_route_inner(method, pattern, handler, middleware, true)
    }

    fn add_route_inner(
        &self,
        method: &str,
        pattern: &str,
        handler: RouteHandler,
        middleware: Vec<Middleware>,
        requires_auth: bool,
    ) {
        let (regex, param_names, is_dynamic) = compile_pattern(pattern);
        let route = Arc::new(Route {
            method: method.to_string(),
            path_pattern: pattern.to_string(),
            is_dynamic,
            requires_auth,
            param_names,
            regex,
            handler,
            middleware,
        });
        critical_section::with(|cs| {
            let mut routes = self.routes.borrow(cs).borrow_mut();
            routes.entry(method.to_string()).or_default().push(route);
        });
    }

    /// Finds the first route (by registration order) whose method and
    /// compiled pattern match, applies the auth gate and middleware chain,
    /// and invokes the handler. Returns `false` if nothing matched, in
    /// which case the server writes a 404.
    pub fn handle_request(&self, req: &mut Request, res: &mut Response) -> bool {
        // Clone the matched route's `Arc` out from under the lock before
        // running any handler/middleware: those may block on socket I/O
        // (writing the response) or even re-enter `add_route`, neither of
        // which should happen while the table lock is held.
        let found = critical_section::with(|cs| {
            let routes = self.routes.borrow(cs).borrow();
            routes.get(&req.method).and_then(|list| {
                list.iter().find_map(|r| r.matches(&req.path).map(|m| (r.clone(), m)))
            })
        });

        let Some((route, route_match)) = found else {
            return false;
        };

        if route.requires_auth {
            let authorized = self.auth_gate.as_ref().is_some_and(|g| g.authorize(req));
            if !authorized {
                let _ = res.send_error(401, "Unauthorized");
                return true;
            }
        }

        let global_ok = critical_section::with(|cs| -> bool {
            let global = self.global_middleware.borrow(cs).borrow();
            for mw in global.iter() {
                if !mw(req, res, &route_match) {
                    return false;
                }
            }
            true
        });
        if !global_ok {
            return true;
        }

        for mw in route.middleware.iter() {
            if !mw(req, res, &route_match) {
                return true;
            }
        }

        if let Err(e) = (route.handler)(req, res, &route_match) {
            let _ = res.send_error(e.status(), e.reason());
        }
        true
    }
}
