//! Per-request render configuration.
//!
//! `RenderOptions` is the structured value every pipeline stage reads and
//! mutates in place. The serializable fields describe what the caller asked
//! for and participate in the request identity; the bookkeeping fields track
//! pipeline progress and are skipped by serde.

use std::collections::BTreeMap;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use rendergate_core::SlotPolicy;

/// Progress of the argument cache-miss recovery protocol for one request.
///
/// `Sent → Done` on success, `Sent → Retrying → Done` when the service
/// reported a cache miss once. A second miss while `Retrying` is a protocol
/// error, never another retry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryState {
    /// No render call has been issued for this request yet.
    #[default]
    Idle,
    /// The render call is out; no cache miss seen so far.
    Sent,
    /// A cache miss was answered with a full-value retry.
    Retrying,
    /// The response has been resolved.
    Done,
}

/// Structured per-request configuration controlling translation into a
/// render-service call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Render endpoint. `None` resolves to the configured default at
    /// rewrite time and is written back, so later stages see the resolved
    /// value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Overrides the configured render-service base URL for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<Url>,

    /// Arguments POSTed to the render service. The default `serde_json::Map`
    /// keeps keys ordered, which the wire contract and the request identity
    /// both rely on.
    #[serde(default)]
    pub args: Map<String, Value>,

    /// Per-request slot policy; `None` falls back to the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_policy: Option<SlotPolicy>,

    /// Cookie-session label. Requests sharing a session id share one jar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Session to store cookies returned by this request under, when it
    /// differs from `session_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_session_id: Option<String>,

    /// Names of args whose values are substituted with fingerprints before
    /// queueing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cache_args: Vec<String>,

    /// Extra headers for the render call itself (not the target page).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Do not fold the request's headers into `args.headers`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dont_send_headers: bool,

    /// Hand the transport response back unclassified.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dont_process_response: bool,

    /// Derive effective status/url/body/headers from the JSON envelope.
    #[serde(default = "default_true")]
    pub magic_response: bool,

    /// When the envelope has no `http_status`, adopt a 3-digit HTTP code
    /// embedded in its error field.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub http_status_from_error_code: bool,

    // Pipeline bookkeeping. Never serialized, never part of the identity.
    #[serde(skip)]
    pub(crate) replaced_args: Vec<String>,

    #[serde(skip)]
    pub(crate) arg_fingerprints: BTreeMap<String, String>,

    #[serde(skip)]
    pub(crate) processed: bool,

    #[serde(skip)]
    pub(crate) retry: RetryState,
}

fn default_true() -> bool {
    true
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            endpoint: None,
            base_url: None,
            args: Map::new(),
            slot_policy: None,
            session_id: None,
            new_session_id: None,
            cache_args: Vec::new(),
            headers: BTreeMap::new(),
            dont_send_headers: false,
            dont_process_response: false,
            magic_response: true,
            http_status_from_error_code: false,
            replaced_args: Vec::new(),
            arg_fingerprints: BTreeMap::new(),
            processed: false,
            retry: RetryState::Idle,
        }
    }
}

impl RenderOptions {
    /// Options for a specific endpoint, e.g. `"execute"`.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self { endpoint: Some(endpoint.into()), ..Default::default() }
    }

    /// Set a render argument.
    pub fn arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.insert(name.into(), value);
        self
    }

    /// Whether the proxy middleware has already rewritten this request.
    pub fn is_processed(&self) -> bool {
        self.processed
    }

    /// Current cache-miss recovery state.
    pub fn retry_state(&self) -> RetryState {
        self.retry
    }
}
