//! Request and response objects bound into script sandboxes.
//!
//! `request` is a by-value snapshot of the inbound request; scripts may read
//! it freely. `response` is a handle on this request's own response writer.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, ImmutableString, Map};

/// Read-only view of an inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestBinding {
    pub method: String,
    pub url: String,
    pub path: String,
    pub query: String,
    pub remote_addr: String,
    pub proto: String,
    pub content_length: i64,
    pub host: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    pub body: String,
}

impl RequestBinding {
    pub fn from_parts(
        parts: &Parts,
        remote_addr: SocketAddr,
        body: &[u8],
        params: BTreeMap<String, String>,
    ) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &parts.headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            headers
                .entry(name.as_str().to_string())
                .and_modify(|v| {
                    v.push_str(", ");
                    v.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }

        let content_length = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(body.len() as i64);

        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.to_string()))
            .unwrap_or_default();

        Self {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            remote_addr: remote_addr.to_string(),
            proto: format!("{:?}", parts.version),
            content_length,
            host,
            headers,
            params,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }

    /// Value of a header (case-insensitive), empty when absent.
    pub fn header(&self, name: &str) -> String {
        self.headers
            .get(&name.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn user_agent(&self) -> String {
        self.header(USER_AGENT.as_str())
    }
}

#[derive(Debug, Default)]
struct ResponseState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
    committed: bool,
}

/// Handle on one request's response writer.
///
/// Like a network writer, the status line and headers are committed by the
/// first `write` or `status` call; later header or status changes are ignored.
#[derive(Debug, Clone, Default)]
pub struct ResponseBinding {
    inner: Arc<Mutex<ResponseState>>,
}

impl ResponseBinding {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append bytes to the body, returning the number of bytes written.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let mut state = self.state();
        state.committed = true;
        state.body.extend_from_slice(bytes);
        bytes.len()
    }

    /// Set the status code. Returns false if the response was already committed.
    pub fn set_status(&self, status: StatusCode) -> bool {
        let mut state = self.state();
        if state.committed {
            tracing::debug!(status = %status, "Superfluous status call ignored");
            return false;
        }
        state.status = Some(status);
        state.committed = true;
        true
    }

    /// Set a header. Returns false if the response was already committed.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut state = self.state();
        if state.committed {
            tracing::debug!(header = %name, "Header set after commit ignored");
            return false;
        }
        state.headers.insert(name, value);
        true
    }

    /// Append a header value. Returns false if the response was already committed.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) -> bool {
        let mut state = self.state();
        if state.committed {
            tracing::debug!(header = %name, "Header added after commit ignored");
            return false;
        }
        state.headers.append(name, value);
        true
    }

    /// Remove a header. Returns false if the response was already committed.
    pub fn remove_header(&self, name: &HeaderName) -> bool {
        let mut state = self.state();
        if state.committed {
            tracing::debug!(header = %name, "Header removal after commit ignored");
            return false;
        }
        state.headers.remove(name);
        true
    }

    /// Every value of one header, joined with `, `.
    pub fn header(&self, name: &str) -> Option<String> {
        let state = self.state();
        let values: Vec<_> = state
            .headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    /// A live handle on the header map.
    pub fn headers(&self) -> ResponseHeaders {
        ResponseHeaders {
            response: self.clone(),
        }
    }

    /// Snapshot of the current headers as a script map.
    pub fn header_map(&self) -> Map {
        let state = self.state();
        let mut map = Map::new();
        for (name, value) in &state.headers {
            map.insert(
                name.as_str().into(),
                String::from_utf8_lossy(value.as_bytes()).into_owned().into(),
            );
        }
        map
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.state().status
    }

    /// True until the script writes a byte or sets a status.
    pub fn is_untouched(&self) -> bool {
        !self.state().committed
    }

    pub fn body(&self) -> Vec<u8> {
        self.state().body.clone()
    }

    /// Take the buffered response. Later writes through other handles are lost.
    pub fn take_response(&self) -> Response {
        let state = std::mem::take(&mut *self.state());
        let mut response = Response::new(Body::from(state.body));
        *response.status_mut() = state.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = state.headers;
        response
    }
}

/// The header map of a live response, as seen by scripts.
///
/// Reads and writes go straight to the response; writes follow the same
/// commit rule as `set_header`.
#[derive(Debug, Clone)]
pub struct ResponseHeaders {
    response: ResponseBinding,
}

impl ResponseHeaders {
    fn set(&mut self, name: &str, value: &str) -> Result<(), Box<EvalAltResult>> {
        let (name, value) = parse_header(name, value)?;
        self.response.set_header(name, value);
        Ok(())
    }

    fn add(&mut self, name: &str, value: &str) -> Result<(), Box<EvalAltResult>> {
        let (name, value) = parse_header(name, value)?;
        self.response.append_header(name, value);
        Ok(())
    }

    fn del(&mut self, name: &str) -> Result<(), Box<EvalAltResult>> {
        let name = parse_name(name)?;
        self.response.remove_header(&name);
        Ok(())
    }

    fn get(&mut self, name: &str) -> Dynamic {
        self.response.header(name).map(Dynamic::from).unwrap_or(Dynamic::UNIT)
    }

    fn keys(&mut self) -> Array {
        self.response
            .header_map()
            .keys()
            .map(|k| Dynamic::from(k.to_string()))
            .collect()
    }
}

fn parse_name(name: &str) -> Result<HeaderName, Box<EvalAltResult>> {
    HeaderName::try_from(name).map_err(|e| script_err(format!("invalid header name {:?}: {}", name, e)))
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), Box<EvalAltResult>> {
    let value = HeaderValue::try_from(value).map_err(|e| script_err(format!("invalid header value: {}", e)))?;
    Ok((parse_name(name)?, value))
}

fn script_err(message: impl Into<String>) -> Box<EvalAltResult> {
    message.into().into()
}

fn to_map(values: &BTreeMap<String, String>) -> Map {
    values
        .iter()
        .map(|(k, v)| (k.as_str().into(), v.clone().into()))
        .collect()
}

/// Register the `Request` and `Response` types with an interpreter.
pub fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<RequestBinding>("Request")
        .register_get("method", |r: &mut RequestBinding| r.method.clone())
        .register_get("url", |r: &mut RequestBinding| r.url.clone())
        .register_get("path", |r: &mut RequestBinding| r.path.clone())
        .register_get("query", |r: &mut RequestBinding| r.query.clone())
        .register_get("remote_addr", |r: &mut RequestBinding| r.remote_addr.clone())
        .register_get("proto", |r: &mut RequestBinding| r.proto.clone())
        .register_get("content_length", |r: &mut RequestBinding| r.content_length)
        .register_get("host", |r: &mut RequestBinding| r.host.clone())
        .register_get("headers", |r: &mut RequestBinding| to_map(&r.headers))
        .register_get("params", |r: &mut RequestBinding| to_map(&r.params))
        .register_get("body", |r: &mut RequestBinding| r.body.clone())
        .register_get("user_agent", |r: &mut RequestBinding| r.user_agent())
        .register_fn("user_agent", |r: &mut RequestBinding| r.user_agent())
        .register_fn("header", |r: &mut RequestBinding, name: &str| r.header(name));

    engine
        .register_type_with_name::<ResponseBinding>("Response")
        .register_fn("write", |w: &mut ResponseBinding, text: &str| {
            w.write(text.as_bytes()) as i64
        })
        .register_fn("write", |w: &mut ResponseBinding, bytes: Blob| {
            w.write(&bytes) as i64
        })
        .register_fn("write", |w: &mut ResponseBinding, value: Dynamic| {
            w.write(value.to_string().as_bytes()) as i64
        })
        .register_fn(
            "status",
            |w: &mut ResponseBinding, code: i64| -> Result<(), Box<EvalAltResult>> {
                let status = u16::try_from(code)
                    .ok()
                    .and_then(|c| StatusCode::from_u16(c).ok())
                    .ok_or_else(|| script_err(format!("invalid status code {}", code)))?;
                w.set_status(status);
                Ok(())
            },
        )
        .register_fn("headers", |w: &mut ResponseBinding| w.headers())
        .register_fn(
            "set_header",
            |w: &mut ResponseBinding, name: &str, value: &str| -> Result<(), Box<EvalAltResult>> {
                w.headers().set(name, value)
            },
        )
        .register_fn(
            "json",
            |w: &mut ResponseBinding, value: Dynamic| -> Result<i64, Box<EvalAltResult>> {
                let json: serde_json::Value = rhai::serde::from_dynamic(&value)?;
                let bytes = serde_json::to_vec(&json).map_err(|e| script_err(e.to_string()))?;
                w.set_header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok(w.write(&bytes) as i64)
            },
        );

    engine
        .register_type_with_name::<ResponseHeaders>("Headers")
        .register_indexer_get(|h: &mut ResponseHeaders, name: ImmutableString| h.get(&name))
        .register_indexer_set(
            |h: &mut ResponseHeaders, name: ImmutableString, value: ImmutableString| h.set(&name, &value),
        )
        .register_fn("get", |h: &mut ResponseHeaders, name: &str| h.get(name))
        .register_fn("set", |h: &mut ResponseHeaders, name: &str, value: &str| h.set(name, value))
        .register_fn("add", |h: &mut ResponseHeaders, name: &str, value: &str| h.add(name, value))
        .register_fn("del", |h: &mut ResponseHeaders, name: &str| h.del(name))
        .register_fn("contains", |h: &mut ResponseHeaders, name: &str| h.response.header(name).is_some())
        .register_fn("keys", ResponseHeaders::keys)
        .register_fn("len", |h: &mut ResponseHeaders| h.response.header_map().len() as i64)
        .register_fn("to_map", |h: &mut ResponseHeaders| h.response.header_map());
}
