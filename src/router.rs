//! Method+path and WebSocket route-key dispatch.
//!
//! Built as a compiled-pattern table with a specificity/ambiguity check,
//! matching literal `:name` path parameters rather than regex wildcards.

use crate::error::{Error, Result};
use crate::handler::Handler;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn split_template(template: &str) -> Vec<Segment> {
    template
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

struct Route {
    method: String,
    segments: Vec<Segment>,
    handler: Arc<dyn Handler>,
}

/// Registers HTTP and WebSocket routes and resolves an incoming request to
/// a handler plus extracted path parameters.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    websocket_routes: HashMap<String, Arc<dyn Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an HTTP route. Rejects a template that would be ambiguous
    /// with an already-registered one for the same method (same literal
    /// segment count, same literal segments in the same positions, with
    /// `:name` segments considered interchangeable).
    pub fn register(&mut self, method: &str, template: &str, handler: Arc<dyn Handler>) -> Result<()> {
        let method = method.to_uppercase();
        let segments = split_template(template);

        for existing in &self.routes {
            if existing.method == method && segments_conflict(&existing.segments, &segments) {
                return Err(Error::AmbiguousRoute(format!(
                    "{method} {template} conflicts with an existing route"
                )));
            }
        }

        self.routes.push(Route {
            method,
            segments,
            handler,
        });
        Ok(())
    }

    pub fn register_websocket(&mut self, route_key: &str, handler: Arc<dyn Handler>) -> Result<()> {
        if self.websocket_routes.contains_key(route_key) {
            return Err(Error::AmbiguousRoute(format!(
                "websocket route key {route_key} already registered"
            )));
        }
        self.websocket_routes.insert(route_key.to_string(), handler);
        Ok(())
    }

    /// Matches a method+path, returning the handler and extracted path
    /// parameters (URL-decoded).
    pub fn matches(&self, method: &str, path: &str) -> Result<(Arc<dyn Handler>, HashMap<String, String>)> {
        let method = method.to_uppercase();
        let parts = split_path(path);

        for route in &self.routes {
            if route.method != method || route.segments.len() != parts.len() {
                continue;
            }
            let mut params = HashMap::new();
            let mut matched = true;
            for (segment, part) in route.segments.iter().zip(parts.iter()) {
                match segment {
                    Segment::Literal(lit) => {
                        if lit != part {
                            matched = false;
                            break;
                        }
                    }
                    Segment::Param(name) => {
                        let decoded = percent_decode(part);
                        params.insert(name.clone(), decoded);
                    }
                }
            }
            if matched {
                return Ok((route.handler.clone(), params));
            }
        }

        Err(Error::RouteNotFound {
            method,
            path: path.to_string(),
        })
    }

    pub fn match_websocket(&self, route_key: &str) -> Result<Arc<dyn Handler>> {
        self.websocket_routes
            .get(route_key)
            .cloned()
            .ok_or_else(|| Error::WebSocketRouteNotFound {
                route_key: route_key.to_string(),
            })
    }
}

/// Two templates are ambiguous if they would match exactly the same set of
/// concrete paths: same segment count and every literal segment lines up
/// (a `:name` segment is compatible with anything in that position).
fn segments_conflict(a: &[Segment], b: &[Segment]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| match (x, y) {
        (Segment::Literal(lx), Segment::Literal(ly)) => lx == ly,
        _ => true,
    })
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).unwrap_or_else(|_| s.to_string())
}
