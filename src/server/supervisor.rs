//! Endpoint supervision.
//!
//! # Responsibilities
//! - Run init hooks on the root state, in order, then freeze it
//! - Bring up one listener per endpoint
//! - Collect every listener failure without stopping the others
//! - Drain all listeners on shutdown
//!
//! # Design Decisions
//! - Each listener task returns its own `Result`; the `JoinSet` join is the
//!   only place failures are merged
//! - State transitions are published on a watch channel

use std::net::SocketAddr;
use std::time::Duration;

use axum_server::Handle;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::lifecycle::Shutdown;
use crate::net::{ListenError, Listener};
use crate::script::{RootState, SandboxFactory, ScriptEngine, ScriptError};
use crate::server::builder::Server;
use crate::server::dispatch::{self, AppState, EndpointInfo};

/// Error type for running a server.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no server endpoints; configuration is missing http and/or https")]
    NoEndpoints,

    #[error("init hook {hook} failed: {source}")]
    InitHook {
        hook: String,
        #[source]
        source: ScriptError,
    },

    #[error("cannot freeze root state: {0}")]
    Freeze(#[source] ScriptError),

    #[error("{} endpoint(s) failed: {}", .0.len(), summarize(.0))]
    Listeners(Vec<ListenError>),
}

fn summarize(errors: &[ListenError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Initializing,
    /// Number of live listeners.
    Listening(usize),
    Draining,
    Stopped,
}

/// A started server.
#[derive(Debug)]
pub struct Running {
    local_addrs: Vec<SocketAddr>,
    state: watch::Receiver<SupervisorState>,
    shutdown: Shutdown,
    sandboxes: SandboxFactory,
    supervisor: tokio::task::JoinHandle<Result<(), RunError>>,
}

impl Running {
    /// Addresses of the listeners that bound, in endpoint order.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// A handle that stops the server when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Begin a graceful shutdown.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Number of request sandboxes currently alive.
    pub fn active_sandboxes(&self) -> u64 {
        self.sandboxes.tracker().active_count()
    }

    /// Wait until every listener has stopped.
    pub async fn wait(self) -> Result<(), RunError> {
        match self.supervisor.await {
            Ok(result) => result,
            Err(e) => Err(RunError::Listeners(vec![ListenError::Aborted {
                endpoint: "supervisor".to_string(),
                reason: e.to_string(),
            }])),
        }
    }
}

impl Server {
    /// Run init hooks, bind every endpoint and start serving.
    ///
    /// Endpoint failures do not fail `start`; they are reported by
    /// [`Running::wait`] once every listener has exited.
    pub async fn start(self) -> Result<Running, RunError> {
        let (state_tx, state_rx) = watch::channel(SupervisorState::Idle);
        if self.endpoints.is_empty() {
            return Err(RunError::NoEndpoints);
        }

        state_tx.send_replace(SupervisorState::Initializing);
        let scripts = ScriptEngine::new(self.settings.script.clone());
        let mut root = RootState::new(&scripts);
        for hook in self.init_hooks {
            let label = hook.label().to_string();
            tracing::debug!(hook = %label, "Running init hook");
            hook.run(&mut root).map_err(|source| {
                tracing::error!(hook = %label, error = %source, "Init hook failed");
                RunError::InitHook {
                    hook: label.clone(),
                    source,
                }
            })?;
        }
        let frozen = root.freeze().map_err(RunError::Freeze)?;
        tracing::info!(globals = ?frozen.names().collect::<Vec<_>>(), "Root state frozen");

        let sandboxes = SandboxFactory::new(scripts, frozen);
        let state = AppState::new(self.routes, sandboxes.clone(), &self.settings);
        let timeouts = self.settings.timeouts.clone();

        let mut listeners = JoinSet::new();
        let mut handles = Vec::new();
        let mut local_addrs = Vec::new();
        let mut failures = Vec::new();
        for endpoint in &self.endpoints {
            let listener = match Listener::bind(endpoint).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(error = %e, "Endpoint failed to start");
                    failures.push(e);
                    continue;
                }
            };
            local_addrs.push(listener.local_addr());

            let info = EndpointInfo {
                address: endpoint.address.clone(),
                scheme: endpoint.scheme(),
            };
            let app = dispatch::router(state.clone(), info, &self.settings);
            let handle = Handle::new();
            handles.push(handle.clone());

            let name = endpoint.to_string();
            let serve = tokio::spawn(listener.serve(app, handle, timeouts.clone()));
            listeners.spawn(async move {
                serve.await.unwrap_or_else(|e| {
                    Err(ListenError::Aborted {
                        endpoint: name,
                        reason: e.to_string(),
                    })
                })
            });
        }

        state_tx.send_replace(SupervisorState::Listening(listeners.len()));
        tracing::info!(
            listening = listeners.len(),
            failed = failures.len(),
            "Endpoints started"
        );

        let shutdown = Shutdown::new();
        let supervisor = tokio::spawn(supervise(
            listeners,
            failures,
            handles,
            self.settings.timeouts.drain(),
            state_tx,
            shutdown.clone(),
        ));

        Ok(Running {
            local_addrs,
            state: state_rx,
            shutdown,
            sandboxes,
            supervisor,
        })
    }

    /// Start the server and serve until `shutdown` resolves, then drain.
    pub async fn run<F>(self, shutdown: F) -> Result<(), RunError>
    where
        F: std::future::Future<Output = ()>,
    {
        let running = self.start().await?;
        let trigger = running.shutdown_handle();
        let wait = running.wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => return result,
            _ = shutdown => trigger.trigger(),
        }
        wait.await
    }
}

async fn supervise(
    mut listeners: JoinSet<Result<(), ListenError>>,
    mut failures: Vec<ListenError>,
    handles: Vec<Handle>,
    drain: Duration,
    state: watch::Sender<SupervisorState>,
    shutdown: Shutdown,
) -> Result<(), RunError> {
    let mut live = listeners.len();
    let mut draining = false;

    loop {
        tokio::select! {
            _ = shutdown.signalled(), if !draining => {
                draining = true;
                state.send_replace(SupervisorState::Draining);
                tracing::info!(listeners = live, drain_secs = drain.as_secs(), "Draining listeners");
                for handle in &handles {
                    handle.graceful_shutdown(Some(drain));
                }
            }
            joined = listeners.join_next() => {
                let Some(joined) = joined else { break };
                live = live.saturating_sub(1);
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "Listener failed");
                        failures.push(e);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Listener task aborted");
                        failures.push(ListenError::Aborted {
                            endpoint: "listener".to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                if !draining {
                    state.send_replace(SupervisorState::Listening(live));
                }
            }
        }
    }

    state.send_replace(SupervisorState::Stopped);
    if failures.is_empty() {
        tracing::info!("All listeners stopped");
        Ok(())
    } else {
        Err(RunError::Listeners(failures))
    }
}
