//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use directive_server::config::ServerSettings;
use directive_server::{Loader, Running};

/// Assemble `yaml` with default settings and start it.
pub async fn start(yaml: &str) -> Running {
    start_with(yaml, ServerSettings::default()).await
}

/// Assemble `yaml` with `settings` and start it.
pub async fn start_with(yaml: &str, settings: ServerSettings) -> Running {
    Loader::new()
        .with_settings(settings)
        .load_bytes(yaml.as_bytes())
        .expect("configuration should load")
        .start()
        .await
        .expect("server should start")
}

/// First bound address of a running server.
pub fn addr(running: &Running) -> SocketAddr {
    *running.local_addrs().first().expect("no listener bound")
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

pub fn https_url(addr: SocketAddr, path: &str) -> String {
    format!("https://{}{}", addr, path)
}

/// Certificate and key of the self-signed `localhost` pair under `tests/fixtures`.
pub fn tls_fixture() -> (String, String) {
    let dir = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");
    (format!("{}/cert.pem", dir), format!("{}/key.pem", dir))
}

/// The server and the client share rustls' process-wide crypto provider.
fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Non-pooled client that ignores proxy settings from the environment.
pub fn client() -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Like [`client`], but trusts the self-signed test certificate.
pub fn tls_client() -> reqwest::Client {
    install_crypto_provider();
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Stop the server and wait for it.
pub async fn stop(running: Running) {
    running.shutdown();
    tokio::time::timeout(Duration::from_secs(15), running.wait())
        .await
        .expect("server did not stop in time")
        .expect("server stopped with errors");
}
