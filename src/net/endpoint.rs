//! Endpoint descriptions.

use std::path::PathBuf;

/// One network address the server listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Bind address, `host:port` (an empty host binds every interface).
    pub address: String,
    pub certfile: PathBuf,
    pub keyfile: PathBuf,
    /// Serve TLS with `certfile`/`keyfile`.
    pub tls: bool,
}

impl Endpoint {
    /// A plaintext endpoint.
    pub fn plain(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            certfile: PathBuf::new(),
            keyfile: PathBuf::new(),
            tls: false,
        }
    }

    /// A TLS endpoint using PEM certificate and key files.
    pub fn tls(address: impl Into<String>, certfile: impl Into<PathBuf>, keyfile: impl Into<PathBuf>) -> Self {
        Self {
            address: address.into(),
            certfile: certfile.into(),
            keyfile: keyfile.into(),
            tls: true,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls {
            "https"
        } else {
            "http"
        }
    }

    /// The address in a form the resolver accepts (`:8080` → `0.0.0.0:8080`).
    pub fn bind_address(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme(), self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_only_address_binds_all_interfaces() {
        assert_eq!(Endpoint::plain(":8080").bind_address(), "0.0.0.0:8080");
        assert_eq!(Endpoint::plain("127.0.0.1:0").bind_address(), "127.0.0.1:0");
    }

    #[test]
    fn display_includes_scheme() {
        assert_eq!(Endpoint::tls(":443", "c.pem", "k.pem").to_string(), "https://:443");
        assert_eq!(Endpoint::plain("localhost:80").to_string(), "http://localhost:80");
    }
}
