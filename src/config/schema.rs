//! Runtime settings.
//!
//! Settings shape how the assembled server runs (deadlines, script budget,
//! limits). They are not part of the declaration file; the CLI fills them and
//! library users may build them directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root runtime settings for a server instance.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerSettings {
    /// Connection and request deadlines.
    pub timeouts: TimeoutSettings,

    /// Per-request script budget.
    pub script: ScriptSettings,

    /// Request size and concurrency limits.
    pub limits: LimitSettings,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Time allowed for a client to send the request head, in seconds.
    pub header_read_secs: u64,

    /// Total time for one request/response, in seconds.
    pub request_secs: u64,

    /// Time in-flight requests get to finish after shutdown, in seconds.
    pub drain_secs: u64,

    /// Longest a connection may sit without a read or write making progress,
    /// in seconds. Covers idle keep-alive connections and stalled readers.
    pub idle_secs: u64,

    /// HTTP/2 ping interval, in seconds; an unanswered ping closes the
    /// connection after the same interval.
    pub keep_alive_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            header_read_secs: 10,
            request_secs: 10,
            drain_secs: 10,
            idle_secs: 60,
            keep_alive_secs: 20,
        }
    }
}

impl TimeoutSettings {
    pub fn header_read(&self) -> Duration {
        Duration::from_secs(self.header_read_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Script execution budget.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Wall-clock budget for one request's script, in milliseconds.
    pub timeout_ms: u64,

    /// Maximum interpreter operations per evaluation (0 = unlimited).
    pub max_operations: u64,

    /// Maximum function call nesting.
    pub max_call_levels: usize,

    /// Maximum length of a script string, in bytes (0 = unlimited).
    pub max_string_size: usize,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            max_operations: 10_000_000,
            max_call_levels: 64,
            max_string_size: 4 * 1024 * 1024,
        }
    }
}

impl ScriptSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Maximum requests served concurrently across all endpoints.
    pub max_concurrent_requests: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            max_concurrent_requests: 10_000,
        }
    }
}
