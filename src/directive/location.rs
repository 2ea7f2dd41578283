//! The `location` directive: routes and the scripts that serve them.
//!
//! ```yaml
//! - location: /api
//!   methods: [GET, POST]
//!   auth: allow
//!   middleware: [cors]
//!   nested:
//!     - location: users/{id}
//!       handler: show_user
//! - location: /static
//!   match:
//!     prefix: /static
//!   file: scripts/static.rhai
//! ```
//!
//! # Design Decisions
//! - A whole location tree is validated and compiled before any route is added
//! - Matchers: AND across categories, OR within one category's list
//! - Children inherit matchers (ANDed), auth and middleware
//! - Child routes are registered before their parent's route

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use axum::http::{HeaderName, Method};
use serde::Deserialize;

use crate::config::Declaration;
use crate::directive::{Directive, DirectiveError, Flow, BUILTIN_PACKAGE};
use crate::routing::matcher::{
    AndMatcher, AnyMatcher, HeaderMatcher, HostMatcher, Matcher, MethodMatcher, PathPrefixMatcher,
    QueryMatcher, SchemeMatcher,
};
use crate::routing::PathPattern;
use crate::script::{compile, ScriptProgram, Stage};
use crate::server::ServerBuilder;

const FIELD: &str = "location";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LocationConfig {
    location: Option<String>,
    content: Option<String>,
    file: Option<String>,
    handler: Option<String>,
    #[serde(rename = "match")]
    matching: Option<MatchConfig>,
    hosts: Vec<String>,
    methods: Vec<String>,
    schemes: Vec<String>,
    headers: Vec<BTreeMap<String, String>>,
    queries: Vec<BTreeMap<String, String>>,
    middleware: Vec<String>,
    auth: Option<String>,
    nested: Vec<LocationConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MatchConfig {
    prefix: Option<String>,
    hosts: Vec<String>,
    methods: Vec<String>,
    schemes: Vec<String>,
    headers: Vec<BTreeMap<String, String>>,
    queries: Vec<BTreeMap<String, String>>,
}

/// Validated request predicates of one location level.
#[derive(Debug, Clone, Default)]
struct Predicates {
    prefix: Option<String>,
    hosts: Vec<String>,
    methods: Vec<Method>,
    schemes: Vec<String>,
    headers: Vec<Vec<(String, String)>>,
    queries: Vec<Vec<(String, String)>>,
}

impl Predicates {
    fn from_config(path: &str, config: &LocationConfig) -> Result<Self, DirectiveError> {
        let empty = MatchConfig::default();
        let block = config.matching.as_ref().unwrap_or(&empty);
        let mut predicates = Self {
            prefix: non_blank(block.prefix.as_deref()).map(str::to_string),
            ..Self::default()
        };

        for host in config.hosts.iter().chain(&block.hosts) {
            let host = host.trim();
            if host.is_empty() {
                return Err(invalid(path, "empty host"));
            }
            predicates.hosts.push(host.to_string());
        }

        for method in config.methods.iter().chain(&block.methods) {
            let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
                .map_err(|_| invalid(path, format!("invalid method {:?}", method)))?;
            predicates.methods.push(method);
        }

        for scheme in config.schemes.iter().chain(&block.schemes) {
            let scheme = scheme.trim().to_ascii_lowercase();
            if scheme != "http" && scheme != "https" {
                return Err(invalid(path, format!("unsupported scheme {:?}", scheme)));
            }
            predicates.schemes.push(scheme);
        }

        for set in config.headers.iter().chain(&block.headers) {
            let mut pairs = Vec::with_capacity(set.len());
            for (name, value) in set {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|_| invalid(path, format!("invalid header name {:?}", name)))?;
                pairs.push((name.to_ascii_lowercase(), value.clone()));
            }
            predicates.headers.push(pairs);
        }

        for set in config.queries.iter().chain(&block.queries) {
            predicates
                .queries
                .push(set.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        }

        Ok(predicates)
    }

    fn matchers(&self, out: &mut Vec<Box<dyn Matcher>>) {
        if let Some(prefix) = &self.prefix {
            out.push(Box::new(PathPrefixMatcher::new(prefix.clone())));
        }
        if !self.hosts.is_empty() {
            out.push(any_of(self.hosts.iter().map(|h| boxed(HostMatcher::new(h.clone())))));
        }
        if !self.methods.is_empty() {
            out.push(any_of(self.methods.iter().map(|m| boxed(MethodMatcher::new(m.clone())))));
        }
        if !self.schemes.is_empty() {
            out.push(any_of(self.schemes.iter().map(|s| boxed(SchemeMatcher::new(s.clone())))));
        }
        if !self.headers.is_empty() {
            out.push(any_of(self.headers.iter().map(|set| {
                all_of(set.iter().map(|(k, v)| boxed(HeaderMatcher::new(k.clone(), v.clone()))))
            })));
        }
        if !self.queries.is_empty() {
            out.push(any_of(self.queries.iter().map(|set| {
                all_of(set.iter().map(|(k, v)| boxed(QueryMatcher::new(k.clone(), v.clone()))))
            })));
        }
    }
}

fn boxed(matcher: impl Matcher + 'static) -> Box<dyn Matcher> {
    Box::new(matcher)
}

fn any_of(matchers: impl Iterator<Item = Box<dyn Matcher>>) -> Box<dyn Matcher> {
    Box::new(AnyMatcher::new(matchers.collect()))
}

fn all_of(matchers: impl Iterator<Item = Box<dyn Matcher>>) -> Box<dyn Matcher> {
    Box::new(AndMatcher::new(matchers.collect()))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(path: &str, message: impl std::fmt::Display) -> DirectiveError {
    DirectiveError::validation(format!("location {}: {}", path, message))
}

/// What a parent location passes to its children.
#[derive(Debug, Default)]
struct Inherited {
    path: String,
    predicates: Vec<Predicates>,
    auth: Option<String>,
    middleware: Vec<String>,
}

/// A fully validated route, ready to be added.
#[derive(Debug)]
struct PlannedRoute {
    path: String,
    prefix: bool,
    predicates: Vec<Predicates>,
    program: ScriptProgram,
}

fn join_path(parent: &str, child: &str) -> String {
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        child.trim_start_matches('/')
    )
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocationDirective;

impl LocationDirective {
    fn plan(
        &self,
        builder: &ServerBuilder,
        config: &LocationConfig,
        parent: Option<&Inherited>,
        out: &mut Vec<PlannedRoute>,
    ) -> Result<(), DirectiveError> {
        let own = non_blank(config.location.as_deref())
            .ok_or_else(|| DirectiveError::validation("location directive missing path"))?;
        let path = match parent {
            Some(parent) => join_path(&parent.path, own),
            None => own.to_string(),
        };
        PathPattern::parse(&path)?;

        let mut predicates = parent.map(|p| p.predicates.clone()).unwrap_or_default();
        let own_predicates = Predicates::from_config(&path, config)?;
        let prefix = own_predicates.prefix.is_some();
        predicates.push(own_predicates);

        let auth = non_blank(config.auth.as_deref())
            .map(str::to_string)
            .or_else(|| parent.and_then(|p| p.auth.clone()));
        let middleware = if config.middleware.is_empty() {
            parent.map(|p| p.middleware.clone()).unwrap_or_default()
        } else {
            config.middleware.iter().map(|m| m.trim().to_string()).collect()
        };

        let mut stages = Vec::new();
        if let Some(name) = &auth {
            check_script_fn(builder, &path, "auth", name)?;
            stages.push(Stage::guard(name)?);
        }
        for name in &middleware {
            check_script_fn(builder, &path, "middleware", name)?;
            stages.push(Stage::middleware(name)?);
        }
        let content = self.content(builder, &path, config)?;

        let scope = Inherited {
            path: path.clone(),
            predicates: predicates.clone(),
            auth,
            middleware,
        };
        for child in &config.nested {
            self.plan(builder, child, Some(&scope), out)?;
        }

        match content {
            Some(stage) => {
                stages.push(stage);
                out.push(PlannedRoute {
                    program: ScriptProgram::new(path.clone(), stages),
                    path,
                    prefix,
                    predicates,
                });
            }
            None if config.nested.is_empty() => {
                return Err(invalid(&path, "needs one of content, file or handler"));
            }
            None => {}
        }
        Ok(())
    }

    fn content(
        &self,
        builder: &ServerBuilder,
        path: &str,
        config: &LocationConfig,
    ) -> Result<Option<Stage>, DirectiveError> {
        let content = non_blank(config.content.as_deref());
        let file = non_blank(config.file.as_deref());
        let handler = non_blank(config.handler.as_deref());

        match (content, file, handler) {
            (None, None, None) => Ok(None),
            (Some(source), None, None) => Ok(Some(Stage::Content(compile(source)?))),
            (None, Some(file), None) => {
                let source = fs::read_to_string(file)
                    .map_err(|e| invalid(path, format!("cannot read {}: {}", file, e)))?;
                tracing::debug!(location = %path, file = %file, "Location script read");
                Ok(Some(Stage::Content(compile(&source)?)))
            }
            (None, None, Some(name)) => {
                check_script_fn(builder, path, "handler", name)?;
                let call = compile(&format!("{}(request, response)", name))?;
                Ok(Some(Stage::Content(call)))
            }
            _ => Err(invalid(path, "content, file and handler are mutually exclusive")),
        }
    }
}

fn check_script_fn(builder: &ServerBuilder, path: &str, kind: &str, name: &str) -> Result<(), DirectiveError> {
    if !is_identifier(name) || !builder.has_script_fn(name) {
        return Err(invalid(
            path,
            format!("{} {:?} is not a function defined by an init script", kind, name),
        ));
    }
    Ok(())
}

impl Directive for LocationDirective {
    fn name(&self) -> &'static str {
        FIELD
    }

    fn package(&self) -> &'static str {
        BUILTIN_PACKAGE
    }

    fn accept(&self, decl: &Declaration) -> bool {
        decl.contains(FIELD)
    }

    fn apply(&self, builder: &mut ServerBuilder, decl: &Declaration) -> Result<Flow, DirectiveError> {
        let config: LocationConfig = decl.remap()?;
        let mut planned = Vec::new();
        self.plan(builder, &config, None, &mut planned)?;

        for route in planned {
            let mut matchers = Vec::new();
            for predicates in &route.predicates {
                predicates.matchers(&mut matchers);
            }
            tracing::debug!(
                location = %route.path,
                prefix = route.prefix,
                matchers = matchers.len(),
                stages = route.program.stages().len(),
                "Route added"
            );

            let mut handle = builder.route(&route.path)?;
            if route.prefix {
                handle = handle.prefix();
            }
            for matcher in matchers {
                handle = handle.matcher(matcher);
            }
            handle.handler(Arc::new(route.program));
        }
        Ok(Flow::Stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{decode, ServerSettings};
    use crate::routing::MatchContext;
    use axum::http::Request;

    fn builder() -> ServerBuilder {
        let mut builder = ServerBuilder::new(ServerSettings::default());
        builder.declare_script_fns(["allow", "cors", "show"]);
        builder
    }

    fn apply(builder: &mut ServerBuilder, yaml: &str) -> Result<Flow, DirectiveError> {
        let decls = decode(yaml.as_bytes()).unwrap();
        let decl = decls.iter().next().unwrap();
        assert!(LocationDirective.accept(decl));
        LocationDirective.apply(builder, decl)
    }

    /// Label of the program serving the request, if any.
    fn served_by(builder: &ServerBuilder, req: Request<()>, scheme: &str) -> Option<String> {
        let (parts, _) = req.into_parts();
        let ctx = MatchContext::new(&parts, scheme);
        builder.routes().find(&ctx).map(|m| m.handler.label().to_string())
    }

    #[test]
    fn inline_content_adds_one_route() {
        let mut b = builder();
        apply(&mut b, "- location: ' / '\n  content: response.write(request.method)\n").unwrap();
        assert_eq!(b.routes().paths().collect::<Vec<_>>(), vec!["/"]);
        let req = Request::builder().uri("/").body(()).unwrap();
        assert_eq!(served_by(&b, req, "http").as_deref(), Some("/"));
    }

    #[test]
    fn missing_or_blank_path_is_rejected() {
        let mut b = builder();
        for yaml in ["- location: ''\n  content: '1'\n", "- location: '   '\n  content: '1'\n", "- location:\n"] {
            let err = apply(&mut b, yaml).unwrap_err();
            assert!(matches!(err, DirectiveError::Validation(_)), "{}", yaml);
        }
        assert!(b.routes().is_empty());
    }

    #[test]
    fn relative_path_is_a_route_error() {
        let err = apply(&mut builder(), "- location: users\n  content: '1'\n").unwrap_err();
        assert!(matches!(err, DirectiveError::Route(_)));
    }

    #[test]
    fn content_sources_are_exclusive_and_required() {
        let mut b = builder();
        let both = apply(&mut b, "- location: /\n  content: '1'\n  handler: show\n").unwrap_err();
        assert!(both.to_string().contains("mutually exclusive"));
        let none = apply(&mut b, "- location: /\n").unwrap_err();
        assert!(none.to_string().contains("needs one of"));
        assert!(b.routes().is_empty());
    }

    #[test]
    fn file_content_is_compiled_at_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.rhai");
        let bad = dir.path().join("bad.rhai");
        fs::write(&good, "response.write(\"from file\")").unwrap();
        fs::write(&bad, "let = ;").unwrap();

        let mut b = builder();
        apply(&mut b, &format!("- location: /good\n  file: {}\n", good.display())).unwrap();
        let err = apply(&mut b, &format!("- location: /bad\n  file: {}\n", bad.display())).unwrap_err();
        assert!(matches!(err, DirectiveError::Script(_)));
        let missing = apply(&mut b, "- location: /missing\n  file: /no/such/file.rhai\n").unwrap_err();
        assert!(matches!(missing, DirectiveError::Validation(_)));
        assert_eq!(b.routes().len(), 1);
    }

    #[test]
    fn unknown_functions_are_rejected() {
        let mut b = builder();
        for yaml in [
            "- location: /\n  handler: nope\n",
            "- location: /\n  content: '1'\n  auth: nope\n",
            "- location: /\n  content: '1'\n  middleware: [cors, nope]\n",
            "- location: /\n  handler: 'show(); evil'\n",
        ] {
            assert!(apply(&mut b, yaml).is_err(), "{}", yaml);
        }
        assert!(b.routes().is_empty());
        apply(&mut b, "- location: /\n  handler: show\n  auth: allow\n  middleware: [cors]\n").unwrap();
        let req = Request::builder().uri("/").body(()).unwrap();
        let (parts, _) = req.into_parts();
        let ctx = MatchContext::new(&parts, "http");
        let found = b.routes().find(&ctx).unwrap();
        assert_eq!(found.handler.stages().len(), 3);
    }

    #[test]
    fn matcher_categories_and_within_or_across() {
        let mut b = builder();
        apply(
            &mut b,
            "- location: /\n  methods: [get, post]\n  match:\n    hosts: [a.test, '*.b.test']\n  content: '1'\n",
        )
        .unwrap();

        let ok = Request::builder().method("POST").header("Host", "x.b.test").body(()).unwrap();
        assert!(served_by(&b, ok, "http").is_some());
        let wrong_method = Request::builder().method("PUT").header("Host", "a.test").body(()).unwrap();
        assert!(served_by(&b, wrong_method, "http").is_none());
        let wrong_host = Request::builder().header("Host", "c.test").body(()).unwrap();
        assert!(served_by(&b, wrong_host, "http").is_none());
    }

    #[test]
    fn header_query_and_scheme_matchers() {
        let mut b = builder();
        apply(
            &mut b,
            "- location: /\n  schemes: [https]\n  headers:\n    - {x-api: v1, x-team: core}\n    - {x-admin: ''}\n  queries:\n    - {debug: '1'}\n  content: '1'\n",
        )
        .unwrap();

        let both_headers = Request::builder()
            .uri("/?debug=1")
            .header("x-api", "v1")
            .header("x-team", "core")
            .body(())
            .unwrap();
        assert!(served_by(&b, both_headers, "https").is_some());

        let admin = Request::builder().uri("/?debug=1").header("x-admin", "yes").body(()).unwrap();
        assert!(served_by(&b, admin, "https").is_some());

        let one_header = Request::builder().uri("/?debug=1").header("x-api", "v1").body(()).unwrap();
        assert!(served_by(&b, one_header, "https").is_none());

        let plain = Request::builder().uri("/?debug=1").header("x-admin", "yes").body(()).unwrap();
        assert!(served_by(&b, plain, "http").is_none());

        let no_query = Request::builder().uri("/").header("x-admin", "yes").body(()).unwrap();
        assert!(served_by(&b, no_query, "https").is_none());
    }

    #[test]
    fn invalid_predicates_are_rejected() {
        let mut b = builder();
        for yaml in [
            "- location: /\n  methods: ['GE T']\n  content: '1'\n",
            "- location: /\n  schemes: [ftp]\n  content: '1'\n",
            "- location: /\n  headers: [{'bad header': x}]\n  content: '1'\n",
            "- location: /\n  hosts: ['']\n  content: '1'\n",
        ] {
            assert!(matches!(apply(&mut b, yaml), Err(DirectiveError::Validation(_))), "{}", yaml);
        }
    }

    #[test]
    fn prefix_routes_cover_the_subtree() {
        let mut b = builder();
        apply(&mut b, "- location: /static\n  match:\n    prefix: /static\n  content: '1'\n").unwrap();
        let asset = Request::builder().uri("/static/css/site.css").body(()).unwrap();
        assert_eq!(served_by(&b, asset, "http").as_deref(), Some("/static"));
        let other = Request::builder().uri("/other").body(()).unwrap();
        assert!(served_by(&b, other, "http").is_none());
    }

    #[test]
    fn nested_locations_join_paths_and_inherit() {
        let mut b = builder();
        apply(
            &mut b,
            "- location: /api/\n  methods: [GET]\n  auth: allow\n  content: '1'\n  nested:\n    - location: users/{id}\n      handler: show\n    - location: /health\n      auth: ''\n      middleware: [cors]\n      content: '2'\n",
        )
        .unwrap();
        assert_eq!(
            b.routes().paths().collect::<Vec<_>>(),
            vec!["/api/users/{id}", "/api/health", "/api/"]
        );

        let get = Request::builder().uri("/api/users/7").body(()).unwrap();
        assert_eq!(served_by(&b, get, "http").as_deref(), Some("/api/users/{id}"));
        let post = Request::builder().method("POST").uri("/api/users/7").body(()).unwrap();
        assert!(served_by(&b, post, "http").is_none());

        let req = Request::builder().uri("/api/health").body(()).unwrap();
        let (parts, _) = req.into_parts();
        let ctx = MatchContext::new(&parts, "http");
        let stages = b.routes().find(&ctx).unwrap().handler.stages().len();
        // inherited guard, own middleware, content
        assert_eq!(stages, 3);
    }

    #[test]
    fn invalid_child_leaves_table_unchanged() {
        let mut b = builder();
        let err = apply(
            &mut b,
            "- location: /api\n  content: '1'\n  nested:\n    - location: ok\n      content: '2'\n    - location: broken\n      content: 'let = ;'\n",
        )
        .unwrap_err();
        assert!(matches!(err, DirectiveError::Script(_)));
        assert!(b.routes().is_empty());
    }
}
