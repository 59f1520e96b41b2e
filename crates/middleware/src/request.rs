//! Crawler-side request and response values the pipeline transforms.
//!
//! The embedding crawler owns scheduling and transport; these types carry the
//! fields the pipeline reads and rewrites in place: URL, method, headers,
//! body, scheduling metadata, and the optional render options.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Method, StatusCode, Url, header::HeaderMap};
use rendergate_core::CookieRecord;

use crate::options::RenderOptions;

/// A page-fetch request as it moves through the pipeline.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,

    /// Request-level cookies, merged into the session jar before dispatch.
    pub cookies: Vec<CookieRecord>,

    /// Scheduler priority; render calls are boosted so they are serviced
    /// promptly.
    pub priority: i32,

    /// Transport timeout, if the scheduler has set one. The pipeline only
    /// ever raises it.
    pub download_timeout: Option<Duration>,

    /// Concurrency-slot key; `None` leaves the scheduler's host-based
    /// slotting untouched.
    pub download_slot: Option<String>,

    /// Render instructions. `None` means the request bypasses the pipeline.
    pub render: Option<RenderOptions>,
}

impl CrawlRequest {
    /// A plain GET request without render instructions.
    pub fn get(url: Url) -> Self {
        Self::new(url, Method::GET)
    }

    pub fn new(url: Url, method: Method) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            cookies: Vec::new(),
            priority: 0,
            download_timeout: None,
            download_slot: None,
            render: None,
        }
    }

    /// Attach render instructions.
    pub fn with_render(mut self, options: RenderOptions) -> Self {
        self.render = Some(options);
        self
    }
}

/// A transport-level response, before classification.
#[derive(Debug, Clone)]
pub struct CrawlResponse {
    /// The URL the transport actually fetched.
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CrawlResponse {
    /// Content-Type header as a string, if present and readable.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}
