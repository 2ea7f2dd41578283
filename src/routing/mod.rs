//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (scheme, host, method, path, headers, query)
//!     → router.rs (route lookup, path template captures)
//!     → matcher.rs (evaluate match conditions)
//!     → Return: matched handler + params, or NoMatch
//!
//! Route Compilation (at assembly):
//!     location directives
//!     → RouteTable::route(path) (parse template)
//!     → attach matchers and handler
//!     → Freeze as immutable table when the builder is sealed
//! ```
//!
//! # Design Decisions
//! - Routes compiled at assembly, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always matches same route
//! - First match wins (registration order)

pub mod matcher;
pub mod router;

pub use matcher::{MatchContext, Matcher};
pub use router::{PathPattern, RouteError, RouteHandle, RouteMatch, RouteTable};
