//! Unified error types for the middleware pipeline.
//!
//! Only failures the pipeline itself can detect are listed here; transport
//! errors belong to the embedding crawler's own retry machinery.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Render-argument serialization or envelope decoding failed.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// POST bodies are forwarded as UTF-8 text inside the render arguments;
    /// other encodings are unsupported.
    #[error("request body is not valid UTF-8")]
    NonUtf8Body(#[from] std::str::Utf8Error),

    /// The envelope's `body` field did not decode as base64.
    #[error("invalid base64 in envelope body: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A render URL could not be built or parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The envelope declared a status code outside the valid HTTP range.
    #[error("invalid status code in envelope: {0}")]
    InvalidStatus(String),

    /// A header name or value was not representable on the wire.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// A substituted argument has no stored value to restore. The local
    /// value store is crawl-scoped, so this means the request outlived the
    /// crawl that queued it.
    #[error("missing local value for fingerprint {0}")]
    MissingLocalValue(String),

    /// The render service reported an argument cache miss for a request that
    /// was already retried with full values once.
    #[error("render service reported a repeated argument cache miss")]
    RepeatedCacheMiss,
}
