//! Middleware pipeline translating crawler requests into render-service calls.
//!
//! This crate provides the three cooperating stages an embedding crawler
//! runs a request through:
//!
//! - [`DedupArgsMiddleware`] (spider-side, before queueing) substitutes heavy
//!   render-argument values with content fingerprints.
//! - [`CookieSessionMiddleware`] (downloader-side) moves session cookies into
//!   the render arguments and harvests cookies the rendered page set.
//! - [`RenderProxyMiddleware`] (downloader-side) rewrites the request into a
//!   POST against the render service, runs the argument-cache protocol, and
//!   materializes the response.
//!
//! [`RenderPipeline`] wires the stages together in the required order;
//! [`fingerprint::request_fingerprint`] is the shared request identity the
//! embedding duplicate filter and response cache must use.

pub mod cookies;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod options;
pub mod pipeline;
pub mod proxy;
pub mod request;
pub mod response;

pub use cookies::CookieSessionMiddleware;
pub use dedup::DedupArgsMiddleware;
pub use error::Error;
pub use fingerprint::request_fingerprint;
pub use options::{RenderOptions, RetryState};
pub use pipeline::{RenderContext, RenderPipeline};
pub use proxy::{ProxyOutcome, RenderProxyMiddleware};
pub use request::{CrawlRequest, CrawlResponse};
pub use response::{JsonResponse, RenderResponse, RenderedPage};
