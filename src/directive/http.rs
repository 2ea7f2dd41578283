//! The `http`/`https` directive: endpoints to listen on.
//!
//! ```yaml
//! - http: 127.0.0.1:8080
//! - https: :8443
//!   certfile: /etc/tls/cert.pem
//!   keyfile: /etc/tls/key.pem
//! ```

use serde::Deserialize;

use crate::config::Declaration;
use crate::directive::{Directive, DirectiveError, Flow, BUILTIN_PACKAGE};
use crate::net::Endpoint;
use crate::server::ServerBuilder;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HttpConfig {
    http: Option<String>,
    https: Option<String>,
    certfile: Option<String>,
    keyfile: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDirective;

impl Directive for HttpDirective {
    fn name(&self) -> &'static str {
        "http"
    }

    fn package(&self) -> &'static str {
        BUILTIN_PACKAGE
    }

    fn accept(&self, decl: &Declaration) -> bool {
        decl.contains("http") || decl.contains("https")
    }

    fn apply(&self, builder: &mut ServerBuilder, decl: &Declaration) -> Result<Flow, DirectiveError> {
        let config: HttpConfig = decl.remap()?;
        let certfile = non_blank(config.certfile);
        let keyfile = non_blank(config.keyfile);

        let endpoint = match (non_blank(config.http), non_blank(config.https)) {
            (Some(address), _) => Endpoint::plain(address),
            (None, Some(address)) => match (certfile, keyfile) {
                (Some(cert), Some(key)) => Endpoint::tls(address, cert, key),
                _ => {
                    tracing::warn!(
                        address = %address,
                        "https endpoint without certfile/keyfile; serving plaintext"
                    );
                    Endpoint::plain(address)
                }
            },
            (None, None) => {
                return Err(DirectiveError::validation("http directive missing address"));
            }
        };

        builder.endpoint(endpoint);
        Ok(Flow::Stop)
    }
}
