//! Route matching logic.
//!
//! # Responsibilities
//! - Match host (exact or `*.` wildcard, case-insensitive, port ignored)
//! - Match method, scheme, header and query predicates
//! - Match path prefix (case-sensitive)
//! - Combine conditions: OR within one category, AND across categories
//!
//! # Design Decisions
//! - Host matching is case-insensitive
//! - Path matching is case-sensitive
//! - Empty condition list = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::request::Parts;
use axum::http::Method;
use url::form_urlencoded;

/// The parts of a request that matchers look at.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub parts: &'a Parts,
    /// `"http"` or `"https"`, decided by the endpoint that accepted the request.
    pub scheme: &'a str,
}

impl<'a> MatchContext<'a> {
    pub fn new(parts: &'a Parts, scheme: &'a str) -> Self {
        Self { parts, scheme }
    }

    /// Host without port, from the Host header or the URI authority.
    pub fn host(&self) -> Option<&'a str> {
        let raw = self
            .parts
            .headers
            .get(axum::http::header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| self.parts.uri.host())?;
        Some(strip_port(raw))
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    }
}

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request matches this condition.
    fn matches(&self, ctx: &MatchContext<'_>) -> bool;
}

/// Matches the request host.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// A leading `*.` matches any subdomain; the host is normalized to lowercase.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let Some(host) = ctx.host() else {
            return false;
        };
        let host = host.to_lowercase();
        match self.expected_host.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|sub| sub.len() > 1 && sub.ends_with('.')),
            None => host == self.expected_host,
        }
    }
}

/// Matches the request method.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    method: Method,
}

impl MethodMatcher {
    pub fn new(method: Method) -> Self {
        Self { method }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.parts.method == self.method
    }
}

/// Matches the scheme of the accepting endpoint.
#[derive(Debug, Clone)]
pub struct SchemeMatcher {
    scheme: String,
}

impl SchemeMatcher {
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into().to_lowercase(),
        }
    }
}

impl Matcher for SchemeMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.scheme.eq_ignore_ascii_case(&self.scheme)
    }
}

/// Matches a header by name. An empty expected value only requires presence.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    name: String,
    value: String,
}

impl HeaderMatcher {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Matcher for HeaderMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.parts
            .headers
            .get_all(self.name.as_str())
            .iter()
            .any(|v| self.value.is_empty() || v.to_str().is_ok_and(|v| v == self.value))
    }
}

/// Matches a decoded query parameter. An empty expected value only requires presence.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    key: String,
    value: String,
}

impl QueryMatcher {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl Matcher for QueryMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let Some(query) = ctx.parts.uri.query() else {
            return false;
        };
        form_urlencoded::parse(query.as_bytes())
            .any(|(k, v)| k == self.key && (self.value.is_empty() || v == self.value))
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.parts.uri.path().starts_with(&self.prefix)
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(ctx))
    }
}

/// Combines multiple matchers with OR semantics. An empty set matches everything.
#[derive(Debug)]
pub struct AnyMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AnyMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AnyMatcher {
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        self.matchers.is_empty() || self.matchers.iter().any(|m| m.matches(ctx))
    }
}
