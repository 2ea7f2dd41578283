//! Per-endpoint listeners.
//!
//! # Responsibilities
//! - Resolve and bind an endpoint's address
//! - Load TLS material for `https` endpoints
//! - Serve an axum router until the endpoint's handle shuts it down
//!
//! # Design Decisions
//! - Binding happens before serving, so the local address is known up front
//!   (port 0 works) and a bind failure never reaches the serve loop
//! - TLS material is loaded before binding; a bad certificate holds no port
//! - Every failure names its endpoint

use std::net::SocketAddr;

use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::config::TimeoutSettings;
use crate::net::idle::IdleTimeout;
use crate::net::tls::load_tls_config;
use crate::net::Endpoint;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenError {
    #[error("{endpoint}: cannot resolve address: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{endpoint}: failed to bind: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{endpoint}: TLS setup failed: {source}")]
    Tls {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{endpoint}: serve failed: {source}")]
    Serve {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{endpoint}: listener task aborted: {reason}")]
    Aborted { endpoint: String, reason: String },
}

impl ListenError {
    /// The endpoint that failed.
    pub fn endpoint(&self) -> &str {
        match self {
            ListenError::Resolve { endpoint, .. }
            | ListenError::Bind { endpoint, .. }
            | ListenError::Tls { endpoint, .. }
            | ListenError::Serve { endpoint, .. }
            | ListenError::Aborted { endpoint, .. } => endpoint,
        }
    }
}

/// A bound, not yet serving, endpoint.
#[derive(Debug)]
pub struct Listener {
    endpoint: Endpoint,
    inner: std::net::TcpListener,
    local_addr: SocketAddr,
    tls: Option<RustlsConfig>,
}

impl Listener {
    /// Resolve, load TLS material (if any) and bind.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, ListenError> {
        let name = endpoint.to_string();
        let address = endpoint.bind_address();

        let addr = tokio::net::lookup_host(address.as_str())
            .await
            .map_err(|source| ListenError::Resolve {
                endpoint: name.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ListenError::Resolve {
                endpoint: name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses found"),
            })?;

        let tls = if endpoint.tls {
            let config = load_tls_config(&endpoint.certfile, &endpoint.keyfile)
                .await
                .map_err(|source| ListenError::Tls {
                    endpoint: name.clone(),
                    source,
                })?;
            Some(config)
        } else {
            None
        };

        let bind_err = |source| ListenError::Bind {
            endpoint: name.clone(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        let inner = listener.into_std().map_err(bind_err)?;

        tracing::info!(
            endpoint = %endpoint,
            address = %local_addr,
            tls = endpoint.tls,
            "Listener bound"
        );

        Ok(Self {
            endpoint: endpoint.clone(),
            inner,
            local_addr,
            tls,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve `app` until `handle` shuts the listener down.
    pub async fn serve(
        self,
        app: Router,
        handle: Handle,
        timeouts: TimeoutSettings,
    ) -> Result<(), ListenError> {
        let name = self.endpoint.to_string();
        let service = app.into_make_service_with_connect_info::<SocketAddr>();

        tracing::info!(endpoint = %name, address = %self.local_addr, "Listener serving");
        let result = match self.tls {
            Some(config) => {
                let acceptor = RustlsAcceptor::new(config).acceptor(IdleTimeout::new(timeouts.idle()));
                let mut server = axum_server::from_tcp(self.inner).acceptor(acceptor).handle(handle);
                tune(server.http_builder(), &timeouts);
                server.serve(service).await
            }
            None => {
                let mut server = axum_server::from_tcp(self.inner)
                    .acceptor(IdleTimeout::new(timeouts.idle()))
                    .handle(handle);
                tune(server.http_builder(), &timeouts);
                server.serve(service).await
            }
        };

        match result {
            Ok(()) => {
                tracing::info!(endpoint = %name, "Listener stopped");
                Ok(())
            }
            Err(source) => Err(ListenError::Serve {
                endpoint: name,
                source,
            }),
        }
    }
}

/// Connection-level deadlines: the HTTP/1 request head and HTTP/2 liveness.
fn tune(builder: &mut Builder<TokioExecutor>, timeouts: &TimeoutSettings) {
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(timeouts.header_read());
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(Some(timeouts.keep_alive()))
        .keep_alive_timeout(timeouts.keep_alive());
}
