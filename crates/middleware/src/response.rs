//! Typed render responses: classification and envelope materialization.
//!
//! A transport response from the render service is classified once by its
//! declared Content-Type into a closed tagged union. The Json variant can
//! additionally derive effective status, URL, body and headers from the
//! service's JSON envelope ("magic response"); the transport-level values
//! stay retrievable for diagnostics.

use std::sync::{LazyLock, OnceLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{StatusCode, Url};
use serde_json::Value;

use rendergate_core::CookieRecord;

use crate::error::Error;
use crate::options::RenderOptions;
use crate::request::CrawlResponse;

/// Error strings like `http504` embed the status of the failed target fetch.
#[allow(clippy::expect_used)]
static HTTP_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^http(\d{3})").expect("error-code regex is valid"));

/// A render response, classified by declared content type.
#[derive(Debug)]
pub enum RenderResponse {
    /// Binary or unknown content.
    Opaque(RenderedPage),
    /// Textual content (html, xml, javascript, any `text/*`).
    Text(RenderedPage),
    /// A JSON envelope from the render service.
    Json(JsonResponse),
}

impl RenderResponse {
    /// Classify a transport response and, for Json envelopes with magic
    /// responses enabled, derive the effective response fields.
    pub fn materialize(options: &RenderOptions, response: CrawlResponse) -> Result<Self, Error> {
        let target_url = options
            .args
            .get("url")
            .and_then(Value::as_str)
            .and_then(|u| Url::parse(u).ok());

        match classify(response.content_type()) {
            Kind::Json => {
                let mut json = JsonResponse::new(target_url, response);
                if options.magic_response {
                    json.apply_magic(options)?;
                }
                Ok(Self::Json(json))
            }
            Kind::Text => Ok(Self::Text(RenderedPage::new(target_url, response))),
            Kind::Opaque => Ok(Self::Opaque(RenderedPage::new(target_url, response))),
        }
    }

    /// Effective URL: the target page for render calls, not the render
    /// service endpoint.
    pub fn url(&self) -> &Url {
        match self {
            Self::Opaque(page) | Self::Text(page) => &page.url,
            Self::Json(json) => json.url(),
        }
    }

    /// The URL the transport actually fetched.
    pub fn real_url(&self) -> &Url {
        match self {
            Self::Opaque(page) | Self::Text(page) => &page.real_url,
            Self::Json(json) => json.real_url(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Opaque(page) | Self::Text(page) => page.status,
            Self::Json(json) => json.status(),
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        match self {
            Self::Opaque(page) | Self::Text(page) => &page.headers,
            Self::Json(json) => json.headers(),
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Self::Opaque(page) | Self::Text(page) => &page.body,
            Self::Json(json) => json.body(),
        }
    }

    pub fn as_json(&self) -> Option<&JsonResponse> {
        match self {
            Self::Json(json) => Some(json),
            _ => None,
        }
    }

    pub(crate) fn as_json_mut(&mut self) -> Option<&mut JsonResponse> {
        match self {
            Self::Json(json) => Some(json),
            _ => None,
        }
    }
}

/// A non-envelope render response. The effective URL is the target page;
/// the transport values are what the render service actually returned.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: Url,
    pub real_url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RenderedPage {
    fn new(target_url: Option<Url>, response: CrawlResponse) -> Self {
        Self {
            url: target_url.unwrap_or_else(|| response.url.clone()),
            real_url: response.url,
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

/// A JSON envelope response.
///
/// Effective fields start as the transport values and are overridden by the
/// envelope when magic responses are enabled. The parsed envelope and the
/// decoded body text are derived lazily and memoized.
#[derive(Debug)]
pub struct JsonResponse {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,

    real_url: Url,
    real_status: StatusCode,
    real_headers: HeaderMap,
    raw_body: Bytes,

    data: OnceLock<Value>,
    text: OnceLock<String>,
    cookies: Vec<CookieRecord>,
}

impl JsonResponse {
    fn new(target_url: Option<Url>, response: CrawlResponse) -> Self {
        Self {
            url: target_url.unwrap_or_else(|| response.url.clone()),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            real_url: response.url,
            real_status: response.status,
            real_headers: response.headers,
            raw_body: response.body,
            data: OnceLock::new(),
            text: OnceLock::new(),
            cookies: Vec::new(),
        }
    }

    /// Effective URL, from the envelope's `url` key when present.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Effective status, from the envelope when present.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Effective headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Effective body: base64-decoded `body`, the `html` text, or the raw
    /// envelope when neither is present.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Transport-level URL of the render call, for diagnostics.
    pub fn real_url(&self) -> &Url {
        &self.real_url
    }

    /// Transport-level status of the render call, for diagnostics.
    pub fn real_status(&self) -> StatusCode {
        self.real_status
    }

    /// Transport-level headers of the render call, for diagnostics.
    pub fn real_headers(&self) -> &HeaderMap {
        &self.real_headers
    }

    /// The parsed envelope. Parsed on first access and memoized.
    pub fn data(&self) -> Result<&Value, Error> {
        if let Some(data) = self.data.get() {
            return Ok(data);
        }
        let parsed: Value = serde_json::from_slice(&self.raw_body)?;
        Ok(self.data.get_or_init(|| parsed))
    }

    /// Effective body decoded as UTF-8. Decoded on first access and memoized.
    pub fn text(&self) -> Result<&str, Error> {
        if let Some(text) = self.text.get() {
            return Ok(text.as_str());
        }
        let decoded = std::str::from_utf8(&self.body)?.to_string();
        Ok(self.text.get_or_init(|| decoded))
    }

    /// Session-jar snapshot after returned cookies were harvested.
    pub fn cookiejar(&self) -> &[CookieRecord] {
        &self.cookies
    }

    pub(crate) fn set_cookiejar(&mut self, cookies: Vec<CookieRecord>) {
        self.cookies = cookies;
    }

    /// Fill effective response fields from the envelope.
    ///
    /// Order matters: the `headers` key is adopted before `html` forces the
    /// Content-Type, so an html-derived Content-Type wins over an explicit
    /// `headers` object.
    fn apply_magic(&mut self, options: &RenderOptions) -> Result<(), Error> {
        let data: Value = serde_json::from_slice(&self.raw_body)?;

        if let Some(status) = data.get("http_status") {
            self.status = envelope_status(status)?;
        } else if options.http_status_from_error_code && data.get("error").is_some() {
            let error = data.pointer("/info/error").and_then(Value::as_str).unwrap_or("");
            if let Some(captures) = HTTP_CODE_PATTERN.captures(error) {
                self.status = envelope_status(&Value::String(captures[1].to_string()))?;
            }
        }

        if let Some(url) = data.get("url").and_then(Value::as_str) {
            match Url::parse(url) {
                Ok(url) => self.url = url,
                Err(e) => tracing::debug!(url, "envelope url does not parse: {e}"),
            }
        }

        if let Some(headers) = data.get("headers").and_then(Value::as_object) {
            self.headers = envelope_headers(headers)?;
        }

        if let Some(encoded) = data.get("body").and_then(Value::as_str) {
            self.body = Bytes::from(STANDARD.decode(encoded)?);
        } else if let Some(html) = data.get("html").and_then(Value::as_str) {
            self.body = Bytes::copy_from_slice(html.as_bytes());
            self.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
            let _ = self.text.set(html.to_string());
        }

        let _ = self.data.set(data);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Opaque,
    Text,
    Json,
}

/// Map a declared content type onto a response kind, defaulting to Opaque
/// when the header is absent or unrecognized.
fn classify(content_type: Option<&str>) -> Kind {
    let Some(raw) = content_type else {
        return Kind::Opaque;
    };
    let mime = raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();

    match mime.as_str() {
        "application/json" | "application/x-json" => Kind::Json,
        "application/xml"
        | "text/xml"
        | "application/xhtml+xml"
        | "application/vnd.wap.xhtml+xml"
        | "application/atom+xml"
        | "application/rdf+xml"
        | "application/rss+xml"
        | "application/javascript"
        | "application/x-javascript" => Kind::Text,
        m if m.starts_with("text/") => Kind::Text,
        _ => Kind::Opaque,
    }
}

fn envelope_status(value: &Value) -> Result<StatusCode, Error> {
    let code = match value {
        Value::Number(n) => n.as_u64().and_then(|c| u16::try_from(c).ok()),
        Value::String(s) => s.parse::<u16>().ok(),
        _ => None,
    };
    code.and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| Error::InvalidStatus(value.to_string()))
}

fn envelope_headers(headers: &serde_json::Map<String, Value>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidHeader(name.clone()))?;
        let values: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => return Err(Error::InvalidHeader(name.clone())),
        };
        for v in values {
            let header_value =
                HeaderValue::from_str(v).map_err(|_| Error::InvalidHeader(name.clone()))?;
            map.append(header_name.clone(), header_value);
        }
    }
    Ok(map)
}
