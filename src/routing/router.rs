//! Route table and dispatch lookup.
//!
//! # Responsibilities
//! - Store routes in registration order
//! - Parse path templates (`/users/{id}`) once, at registration
//! - Look up the first route whose path and matchers accept a request
//!
//! # Design Decisions
//! - Immutable after assembly (shared through `Arc`, no locks)
//! - First match wins, in registration order
//! - A route without a handler never matches

use std::collections::BTreeMap;

use thiserror::Error;

use crate::routing::matcher::{MatchContext, Matcher};

/// Error type for route registration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("route path must start with '/': {0:?}")]
    NotAbsolute(String),

    #[error("malformed path variable in {0:?}")]
    MalformedVariable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A parsed path template. `{name}` segments capture one path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(path: &str) -> Result<Self, RouteError> {
        if !path.starts_with('/') {
            return Err(RouteError::NotAbsolute(path.to_string()));
        }
        let mut segments = Vec::new();
        for seg in path.split('/').skip(1) {
            if let Some(inner) = seg.strip_prefix('{') {
                let name = inner
                    .strip_suffix('}')
                    .filter(|n| !n.is_empty() && !n.contains(['{', '}']))
                    .ok_or_else(|| RouteError::MalformedVariable(path.to_string()))?;
                segments.push(Segment::Variable(name.to_string()));
            } else if seg.contains(['{', '}']) {
                return Err(RouteError::MalformedVariable(path.to_string()));
            } else {
                segments.push(Segment::Literal(seg.to_string()));
            }
        }
        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match a request path, returning captured variables on success.
    pub fn captures(&self, path: &str) -> Option<BTreeMap<String, String>> {
        self.capture(path, false)
    }

    /// Like [`captures`](Self::captures), but trailing request segments are allowed.
    pub fn captures_prefix(&self, path: &str) -> Option<BTreeMap<String, String>> {
        self.capture(path, true)
    }

    fn capture(&self, path: &str, prefix: bool) -> Option<BTreeMap<String, String>> {
        let mut parts = path.split('/').skip(1);
        let mut params = BTreeMap::new();
        let last = self.segments.len().saturating_sub(1);
        for (i, seg) in self.segments.iter().enumerate() {
            // "/" and "/dir/" end in an empty segment that covers any rest.
            if prefix && i == last && *seg == Segment::Literal(String::new()) {
                return Some(params);
            }
            let part = parts.next()?;
            match seg {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return None,
                Segment::Variable(_) if part.is_empty() => return None,
                Segment::Variable(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }
        if !prefix && parts.next().is_some() {
            return None;
        }
        Some(params)
    }
}

#[derive(Debug)]
struct Route<H> {
    pattern: PathPattern,
    prefix: bool,
    matchers: Vec<Box<dyn Matcher>>,
    handler: Option<H>,
}

/// A matched route: the handler plus captured path variables.
#[derive(Debug)]
pub struct RouteMatch<'a, H> {
    pub path: &'a str,
    pub handler: &'a H,
    pub params: BTreeMap<String, String>,
}

/// Ordered collection of routes.
#[derive(Debug)]
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route for `path` and return a handle to configure it.
    /// Nothing is added if the path does not parse.
    pub fn route(&mut self, path: &str) -> Result<RouteHandle<'_, H>, RouteError> {
        let pattern = PathPattern::parse(path)?;
        let index = self.routes.len();
        self.routes.push(Route {
            pattern,
            prefix: false,
            matchers: Vec::new(),
            handler: None,
        });
        Ok(RouteHandle {
            route: &mut self.routes[index],
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered path templates, in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.pattern.as_str())
    }

    /// Find the first route accepting the request.
    pub fn find(&self, ctx: &MatchContext<'_>) -> Option<RouteMatch<'_, H>> {
        let path = ctx.parts.uri.path();
        self.routes.iter().find_map(|route| {
            let handler = route.handler.as_ref()?;
            let params = if route.prefix {
                route.pattern.captures_prefix(path)?
            } else {
                route.pattern.captures(path)?
            };
            if !route.matchers.iter().all(|m| m.matches(ctx)) {
                return None;
            }
            Some(RouteMatch {
                path: route.pattern.as_str(),
                handler,
                params,
            })
        })
    }
}

/// Handle to a freshly registered route.
#[derive(Debug)]
pub struct RouteHandle<'a, H> {
    route: &'a mut Route<H>,
}

impl<H> RouteHandle<'_, H> {
    /// Add a condition; all conditions of a route must hold.
    pub fn matcher(self, matcher: Box<dyn Matcher>) -> Self {
        self.route.matchers.push(matcher);
        self
    }

    /// Match every request path that starts with the route's path.
    pub fn prefix(self) -> Self {
        self.route.prefix = true;
        self
    }

    /// Attach the terminal handler.
    pub fn handler(self, handler: H) -> Self {
        self.route.handler = Some(handler);
        self
    }
}
