//! Request dispatch: route lookup and sandboxed script execution.
//!
//! # Responsibilities
//! - Create the axum router served by every endpoint
//! - Wire up middleware (tracing, request ID, timeout, body and concurrency limits)
//! - Match each request against the route table
//! - Run the location program in a fresh sandbox on a blocking thread
//!
//! # Design Decisions
//! - The router is a single fallback handler; the route table decides
//! - A script never blocks the async runtime, and never outlives its budget
//! - Script failures are logged and never take the server down

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Extension, Router,
};
use tokio::sync::Semaphore;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerSettings;
use crate::routing::{MatchContext, RouteTable};
use crate::script::{Outcome, RequestBinding, ResponseBinding, SandboxFactory, ScriptError};
use crate::server::builder::Handler;

/// Extra time the outer deadline gives the interpreter to stop on its own.
const TERMINATION_GRACE: Duration = Duration::from_millis(250);

/// Application state injected into handlers. Shared by every endpoint.
#[derive(Clone)]
pub struct AppState {
    routes: Arc<RouteTable<Handler>>,
    sandboxes: SandboxFactory,
    script_timeout: Duration,
    max_body_bytes: usize,
    in_flight: Arc<Semaphore>,
}

impl AppState {
    pub fn new(routes: Arc<RouteTable<Handler>>, sandboxes: SandboxFactory, settings: &ServerSettings) -> Self {
        Self {
            routes,
            sandboxes,
            script_timeout: settings.script.timeout(),
            max_body_bytes: settings.limits.max_body_bytes,
            in_flight: Arc::new(Semaphore::new(settings.limits.max_concurrent_requests)),
        }
    }

    pub fn sandboxes(&self) -> &SandboxFactory {
        &self.sandboxes
    }
}

/// The endpoint a request arrived on.
#[derive(Debug, Clone)]
pub struct EndpointInfo {
    pub address: String,
    pub scheme: &'static str,
}

/// Build the router for one endpoint.
#[allow(deprecated)]
pub fn router(state: AppState, endpoint: EndpointInfo, settings: &ServerSettings) -> Router {
    let max_body_bytes = state.max_body_bytes;
    let in_flight = Arc::clone(&state.in_flight);

    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(Extension(endpoint))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(GlobalConcurrencyLimitLayer::with_semaphore(in_flight))
        .layer(TimeoutLayer::new(settings.timeouts.request()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

/// Main handler. Looks up the route and runs its program.
async fn dispatch(
    State(state): State<AppState>,
    Extension(endpoint): Extension<EndpointInfo>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let (parts, body) = request.into_parts();
    let request_id = parts
        .headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let (program, params) = {
        let ctx = MatchContext::new(&parts, endpoint.scheme);
        match state.routes.find(&ctx) {
            Some(found) => (Arc::clone(found.handler), found.params),
            None => {
                tracing::debug!(
                    request_id = %request_id,
                    method = %parts.method,
                    path = %parts.uri.path(),
                    endpoint = %endpoint.address,
                    "No route matched"
                );
                return (StatusCode::NOT_FOUND, "404 page not found\n").into_response();
            }
        }
    };

    let body = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large\n").into_response();
        }
    };

    let binding = RequestBinding::from_parts(&parts, remote, &body, params);
    let response = ResponseBinding::new();
    let cancel = Arc::new(AtomicBool::new(false));

    let task = tokio::task::spawn_blocking({
        let sandboxes = state.sandboxes.clone();
        let program = Arc::clone(&program);
        let response = response.clone();
        let cancel = Arc::clone(&cancel);
        move || {
            let mut sandbox = sandboxes.create(binding, response.clone(), cancel);
            let outcome = program.run(&mut sandbox, &response);
            (sandbox.id(), outcome)
        }
    });

    let budget = state.script_timeout;
    let outcome = match tokio::time::timeout(budget + TERMINATION_GRACE, task).await {
        Ok(Ok((sandbox_id, outcome))) => {
            tracing::trace!(request_id = %request_id, sandbox_id = %sandbox_id, "Sandbox finished");
            outcome
        }
        Ok(Err(join_err)) => Err(ScriptError::Panicked(join_err.to_string())),
        Err(_) => {
            cancel.store(true, Ordering::Relaxed);
            Err(ScriptError::Timeout(budget))
        }
    };

    match outcome {
        Ok(Outcome::Completed) => {}
        Ok(outcome) => {
            tracing::debug!(request_id = %request_id, location = %program.label(), ?outcome, "Program stopped early");
        }
        Err(e @ (ScriptError::Terminated | ScriptError::Timeout(_))) => {
            tracing::warn!(request_id = %request_id, location = %program.label(), error = %e, "Script exceeded its budget");
            if response.is_untouched() {
                return (StatusCode::GATEWAY_TIMEOUT, "script timed out\n").into_response();
            }
        }
        Err(e @ ScriptError::Panicked(_)) => {
            tracing::error!(request_id = %request_id, location = %program.label(), error = %e, "Script panicked");
            if response.is_untouched() {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
        Err(e) => {
            tracing::error!(request_id = %request_id, location = %program.label(), error = %e, "Script error");
        }
    }

    let response = response.take_response();
    tracing::debug!(
        request_id = %request_id,
        location = %program.label(),
        status = response.status().as_u16(),
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Request served"
    );
    response
}
