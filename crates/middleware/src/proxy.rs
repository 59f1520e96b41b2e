//! Rewrites crawler requests into render-service calls and resolves the
//! argument-cache protocol on responses.
//!
//! Outbound, a request carrying render options is turned into a JSON POST
//! against the render service: substituted argument values are restored or
//! turned into by-reference loads, defaults are filled in, and scheduling
//! metadata (slot, timeout, priority) is adjusted. Inbound, the middleware
//! records saved-argument acknowledgements, recovers from the reserved
//! cache-miss status with a single full-value retry, and hands the response
//! to the classifier.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use serde_json::{Map, Value};

use rendergate_core::SlotPolicy;

use crate::error::Error;
use crate::options::{RenderOptions, RetryState};
use crate::pipeline::RenderContext;
use crate::request::{CrawlRequest, CrawlResponse};
use crate::response::RenderResponse;

/// Reserved render-service status: one or more `load_args` keys are unknown
/// and the client must resend full values.
pub const CACHE_MISS_STATUS: u16 = 498;

/// Response header acknowledging saved arguments, encoded `name=key;name=key`.
pub const SAVED_ARGUMENTS_HEADER: &str = "x-prerender-saved-arguments";

/// Slot key shared by all render calls under `SlotPolicy::SingleSlot`.
const SINGLE_SLOT_KEY: &str = "__prerender__";

/// Margin added on top of an explicit render timeout when raising the
/// transport timeout.
const EXTRA_TIMEOUT: Duration = Duration::from_secs(5);

/// Priority boost for rewritten render calls.
const RENDER_PRIORITY_ADJUST: i32 = 100;

/// Additional priority boost for the cache-miss recovery retry.
const RETRY_PRIORITY_ADJUST: i32 = 50;

/// Outcome of resolving a render response.
#[derive(Debug)]
pub enum ProxyOutcome {
    /// The request was not rewritten, or response processing is disabled;
    /// the transport response passes through untouched.
    Passthrough(CrawlResponse),

    /// A classified, materialized render response.
    Response(RenderResponse),

    /// The service lost the referenced argument values; resubmit this
    /// request.
    Retry(CrawlRequest),
}

#[derive(Debug, Default)]
pub struct RenderProxyMiddleware;

impl RenderProxyMiddleware {
    pub fn new() -> Self {
        Self
    }

    /// Rewrite a request carrying render options into a render-service call.
    ///
    /// Requests without render options, already-rewritten requests, and
    /// methods other than GET/POST pass through unchanged.
    pub fn process_request(&self, ctx: &RenderContext, request: &mut CrawlRequest) -> Result<(), Error> {
        let Some(mut options) = request.render.take() else {
            return Ok(());
        };
        let result = self.rewrite(ctx, request, &mut options);
        request.render = Some(options);
        result
    }

    fn rewrite(&self, ctx: &RenderContext, request: &mut CrawlRequest, options: &mut RenderOptions) -> Result<(), Error> {
        if options.processed {
            return Ok(());
        }
        if request.method != Method::GET && request.method != Method::POST {
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                "only GET and POST requests can be rendered; handling without the render service"
            );
            return Ok(());
        }
        options.processed = true;

        match options.slot_policy.unwrap_or(ctx.config.slot_policy) {
            SlotPolicy::PerDomain => request.download_slot = Some(slot_key(&request.url)),
            SlotPolicy::SingleSlot => request.download_slot = Some(SINGLE_SLOT_KEY.to_string()),
            SlotPolicy::Default => {}
        }

        if !options.replaced_args.is_empty() {
            resolve_replaced_args(ctx, options)?;
        }

        if !options.args.contains_key("url") {
            options.args.insert("url".to_string(), Value::String(request.url.to_string()));
        }
        if request.method == Method::POST {
            if !options.args.contains_key("http_method") {
                options.args.insert("http_method".to_string(), Value::String("POST".to_string()));
            }
            if !options.args.contains_key("body") {
                // non-UTF-8 bodies are unsupported
                let body = std::str::from_utf8(&request.body)?;
                options.args.insert("body".to_string(), Value::String(body.to_string()));
            }
        }
        if !options.dont_send_headers && !options.args.contains_key("headers") {
            let headers = headers_to_json(&request.headers);
            if !headers.is_empty() {
                options.args.insert("headers".to_string(), Value::Object(headers));
            }
        }

        // An explicit render timeout is never changed (the service validates
        // it), but the transport timeout is raised to cover it.
        if let Some(timeout) = options.args.get("timeout").and_then(Value::as_f64)
            && let Ok(requested) = Duration::try_from_secs_f64(timeout)
            && let Some(current) = request.download_timeout
        {
            let expected = requested + EXTRA_TIMEOUT;
            if expected > current {
                request.download_timeout = Some(expected);
            }
        }

        let endpoint = match &options.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                options.endpoint = Some(ctx.config.endpoint.clone());
                ctx.config.endpoint.clone()
            }
        };
        let base = match &options.base_url {
            Some(base) => base.clone(),
            None => Url::parse(&ctx.config.base_url)?,
        };

        let body = serde_json::to_string(&options.args)?;

        request.url = base.join(&endpoint)?;
        request.method = Method::POST;
        request.body = Bytes::from(body);
        request.headers = render_call_headers(options)?;
        request.priority += RENDER_PRIORITY_ADJUST;

        options.retry = RetryState::Sent;
        ctx.stats.record_request(&endpoint);
        tracing::debug!(url = %request.url, endpoint = %endpoint, "rewrote request into a render call");
        Ok(())
    }

    /// Resolve a response to a rewritten request.
    pub fn process_response(
        &self,
        ctx: &RenderContext,
        request: &mut CrawlRequest,
        response: CrawlResponse,
    ) -> Result<ProxyOutcome, Error> {
        let Some(mut options) = request.render.take() else {
            return Ok(ProxyOutcome::Passthrough(response));
        };
        let result = self.resolve(ctx, request, &mut options, response);
        request.render = Some(options);
        result
    }

    fn resolve(
        &self,
        ctx: &RenderContext,
        request: &CrawlRequest,
        options: &mut RenderOptions,
        response: CrawlResponse,
    ) -> Result<ProxyOutcome, Error> {
        if !options.processed {
            return Ok(ProxyOutcome::Passthrough(response));
        }

        let endpoint = options.endpoint.clone().unwrap_or_else(|| ctx.config.endpoint.clone());
        ctx.stats.record_response(&endpoint, response.status.as_u16());

        track_saved_arguments(ctx, options, &response);

        if response.status.as_u16() == CACHE_MISS_STATUS {
            if options.retry == RetryState::Retrying {
                options.retry = RetryState::Done;
                return Err(Error::RepeatedCacheMiss);
            }
            tracing::debug!(url = %response.url, "render service lost cached arguments; resending full values");
            ctx.stats.record_retry();
            options.retry = RetryState::Done;
            return Ok(ProxyOutcome::Retry(cache_miss_retry(ctx, request, options)?));
        }

        options.retry = RetryState::Done;

        if options.dont_process_response {
            return Ok(ProxyOutcome::Passthrough(response));
        }

        let transport_status = response.status;
        let materialized = RenderResponse::materialize(options, response)?;

        if ctx.config.log_400
            && transport_status == StatusCode::BAD_REQUEST
            && let Some(json) = materialized.as_json()
            && let Ok(data) = json.data()
        {
            tracing::warn!(url = %request.url, "bad request to render service: {data}");
        }

        Ok(ProxyOutcome::Response(materialized))
    }
}

/// Restore substituted arguments for dispatch: fingerprints the service
/// already knows become by-reference loads, the rest are restored to full
/// values and offered for saving.
fn resolve_replaced_args(ctx: &RenderContext, options: &mut RenderOptions) -> Result<(), Error> {
    let mut load_args = Map::new();
    let mut save_args = Vec::new();
    let mut fingerprints = BTreeMap::new();

    for name in std::mem::take(&mut options.replaced_args) {
        let Some(fingerprint) = options.args.get(&name).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };

        if let Some(key) = ctx.remote_keys.get(&fingerprint) {
            load_args.insert(name.clone(), Value::String(key));
            options.args.remove(&name);
        } else {
            let value = ctx
                .local_values
                .get(&fingerprint)
                .ok_or_else(|| Error::MissingLocalValue(fingerprint.clone()))?;
            save_args.push(Value::String(name.clone()));
            options.args.insert(name.clone(), value);
        }

        fingerprints.insert(name, fingerprint);
    }

    if !load_args.is_empty() {
        options.args.insert("load_args".to_string(), Value::Object(load_args));
    }
    if !save_args.is_empty() {
        options.args.insert("save_args".to_string(), Value::Array(save_args));
    }
    options.arg_fingerprints = fingerprints;
    Ok(())
}

/// Record which fingerprints the service acknowledged saving, enabling
/// by-reference loads on later requests.
fn track_saved_arguments(ctx: &RenderContext, options: &RenderOptions, response: &CrawlResponse) {
    let Some(raw) = response
        .headers
        .get(SAVED_ARGUMENTS_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return;
    };

    for (name, key) in parse_saved_arguments(raw) {
        match options.arg_fingerprints.get(&name) {
            Some(fingerprint) => ctx.remote_keys.insert(fingerprint, key),
            None => tracing::debug!(name = %name, "saved-arguments acknowledgement for an unknown argument"),
        }
    }
}

/// Build the one-shot recovery request: full values for every correlated
/// argument, no by-reference loads, stale fingerprints purged.
fn cache_miss_retry(ctx: &RenderContext, request: &CrawlRequest, options: &RenderOptions) -> Result<CrawlRequest, Error> {
    let mut retried = options.clone();
    retried.retry = RetryState::Retrying;

    retried.args.remove("load_args");
    if !retried.arg_fingerprints.is_empty() {
        retried.args.insert(
            "save_args".to_string(),
            Value::Array(
                retried
                    .arg_fingerprints
                    .keys()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
    }
    for (name, fingerprint) in &retried.arg_fingerprints {
        let value = ctx
            .local_values
            .get(fingerprint)
            .ok_or_else(|| Error::MissingLocalValue(fingerprint.clone()))?;
        retried.args.insert(name.clone(), value);
        ctx.remote_keys.remove(fingerprint);
    }

    let body = serde_json::to_string(&retried.args)?;

    let mut retry = request.clone();
    retry.body = Bytes::from(body);
    retry.priority += RETRY_PRIORITY_ADJUST;
    retry.render = Some(retried);
    Ok(retry)
}

fn render_call_headers(options: &RenderOptions) -> Result<HeaderMap, Error> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in &options.headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| Error::InvalidHeader(name.clone()))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader(name.clone()))?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

/// Fold request headers into the JSON argument form, joining repeated
/// headers with a comma.
fn headers_to_json(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            map.insert(name.as_str().to_string(), Value::String(values.join(", ")));
        }
    }
    map
}

fn slot_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Split a `name=key;name=key` acknowledgement header into pairs.
fn parse_saved_arguments(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(name, key)| (name.trim().to_string(), key.trim().to_string()))
        .collect()
}
