//! Explicit pipeline wiring the stages in their required order.
//!
//! The embedding crawler calls three entry points: [`RenderPipeline::enqueue`]
//! when the spider emits a request, [`RenderPipeline::before_download`] right
//! before dispatch, and [`RenderPipeline::after_download`] on the transport
//! response. Each stage runs exactly once per pass by construction.
//!
//! All crawl-scoped state lives in [`RenderContext`], passed by reference
//! into every stage; there are no ambient singletons. The context is
//! internally synchronized, so one pipeline may serve many concurrent
//! requests.

use std::sync::Arc;

use rendergate_core::{ConfigError, GateConfig, LocalValueStore, RemoteKeyStore, RenderStats, SessionRegistry};

use crate::cookies::CookieSessionMiddleware;
use crate::dedup::DedupArgsMiddleware;
use crate::error::Error;
use crate::fingerprint::request_fingerprint;
use crate::proxy::{ProxyOutcome, RenderProxyMiddleware};
use crate::request::{CrawlRequest, CrawlResponse};

/// Crawl-scoped shared state: configuration, the two argument caches, the
/// session-jar registry, and traffic counters.
#[derive(Debug, Default)]
pub struct RenderContext {
    pub config: GateConfig,
    pub local_values: LocalValueStore,
    pub remote_keys: RemoteKeyStore,
    pub sessions: SessionRegistry,
    pub stats: RenderStats,
}

impl RenderContext {
    pub fn new(config: GateConfig) -> Self {
        Self { config, ..Default::default() }
    }
}

/// The three cooperating stages over one shared context.
pub struct RenderPipeline {
    ctx: Arc<RenderContext>,
    dedup: DedupArgsMiddleware,
    cookies: CookieSessionMiddleware,
    proxy: RenderProxyMiddleware,
}

impl RenderPipeline {
    /// Validate the configuration and build a pipeline with fresh
    /// crawl-scoped state.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an invalid configuration; initialization
    /// must abort rather than run with a misconfigured render service.
    pub fn new(config: GateConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_context(Arc::new(RenderContext::new(config))))
    }

    /// Build a pipeline over existing shared state.
    pub fn with_context(ctx: Arc<RenderContext>) -> Self {
        Self {
            ctx,
            dedup: DedupArgsMiddleware::new(),
            cookies: CookieSessionMiddleware::new(),
            proxy: RenderProxyMiddleware::new(),
        }
    }

    pub fn context(&self) -> &Arc<RenderContext> {
        &self.ctx
    }

    /// Spider-side stage, run before the request enters the queue:
    /// substitutes cacheable argument values with fingerprints.
    pub fn enqueue(&self, request: &mut CrawlRequest) {
        self.dedup.process_request(&self.ctx, request);
    }

    /// Downloader-side stage, run right before dispatch: injects session
    /// cookies, then rewrites the request into a render call.
    pub fn before_download(&self, request: &mut CrawlRequest) -> Result<(), Error> {
        self.cookies.process_request(&self.ctx, request)?;
        self.proxy.process_request(&self.ctx, request)
    }

    /// Downloader-side stage, run on the transport response: resolves the
    /// argument-cache protocol, materializes the response, and harvests
    /// returned cookies.
    pub fn after_download(&self, request: &mut CrawlRequest, response: CrawlResponse) -> Result<ProxyOutcome, Error> {
        match self.proxy.process_response(&self.ctx, request, response)? {
            ProxyOutcome::Response(mut materialized) => {
                self.cookies.process_response(&self.ctx, request, &mut materialized)?;
                Ok(ProxyOutcome::Response(materialized))
            }
            outcome => Ok(outcome),
        }
    }

    /// Request identity for the embedding duplicate filter and response
    /// cache. Both must use this function, or they will disagree with the
    /// pipeline about which requests are the same.
    pub fn fingerprint(&self, request: &CrawlRequest) -> Result<String, Error> {
        request_fingerprint(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, COOKIE};
    use reqwest::{StatusCode, Url};
    use serde_json::{Value, json};

    use crate::options::RenderOptions;
    use crate::response::RenderResponse;

    fn pipeline() -> RenderPipeline {
        RenderPipeline::new(GateConfig::default()).unwrap()
    }

    fn session_request(url: &str, session: &str) -> CrawlRequest {
        let mut options = RenderOptions::for_endpoint("execute").arg("url", json!(url));
        options.session_id = Some(session.to_string());
        CrawlRequest::get(Url::parse(url).unwrap()).with_render(options)
    }

    fn json_response(request: &CrawlRequest, envelope: Value) -> CrawlResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        CrawlResponse {
            url: request.url.clone(),
            status: StatusCode::OK,
            headers,
            body: Bytes::from(envelope.to_string()),
        }
    }

    fn sent_args(request: &CrawlRequest) -> Value {
        serde_json::from_slice(&request.body).unwrap()
    }

    #[test]
    fn test_invalid_config_aborts_construction() {
        let config = GateConfig { base_url: "not a url".into(), ..Default::default() };
        assert!(RenderPipeline::new(config).is_err());
    }

    #[test]
    fn test_end_to_end_session_flow() {
        let pipeline = pipeline();

        // request to /page#foo under session s1 with an empty jar
        let mut request = session_request("https://example.com/page#foo", "s1");
        pipeline.enqueue(&mut request);
        pipeline.before_download(&mut request).unwrap();

        // outbound: empty cookie list in args, no cookie header to the service
        assert_eq!(sent_args(&request)["cookies"], json!([]));
        assert!(request.headers.get(COOKIE).is_none());

        // the rendered page sets a cookie
        let envelope = json!({
            "html": "<p>hello</p>",
            "cookies": [{"name": "a", "value": "1"}],
        });
        let response = json_response(&request, envelope);
        let outcome = pipeline.after_download(&mut request, response).unwrap();
        let ProxyOutcome::Response(RenderResponse::Json(json)) = outcome else {
            panic!("expected a json response");
        };
        assert_eq!(json.text().unwrap(), "<p>hello</p>");

        // the jar now holds exactly a=1
        let jar = pipeline.context().sessions.snapshot("s1").unwrap();
        assert_eq!(jar.len(), 1);
        assert_eq!((jar[0].name.as_str(), jar[0].value.as_str()), ("a", "1"));

        // a subsequent request under s1 carries the cookie
        let mut next = session_request("https://example.com/other", "s1");
        pipeline.enqueue(&mut next);
        pipeline.before_download(&mut next).unwrap();
        assert_eq!(
            sent_args(&next)["cookies"],
            json!([{"name": "a", "value": "1"}])
        );
        assert!(next.headers.get(COOKIE).is_none());
    }

    #[test]
    fn test_cache_args_round_trip_through_pipeline() {
        let pipeline = pipeline();
        let script = "function main(page) return page:html() end";

        let build = |url: &str| {
            let mut options = RenderOptions::for_endpoint("execute")
                .arg("url", json!(url))
                .arg("lua_source", json!(script))
                .arg("x", json!("yy"));
            options.cache_args = vec!["lua_source".to_string()];
            CrawlRequest::get(Url::parse(url).unwrap()).with_render(options)
        };

        // first request carries the full script and offers to save it
        let mut first = build("https://example.com/page");
        pipeline.enqueue(&mut first);
        pipeline.before_download(&mut first).unwrap();
        let args = sent_args(&first);
        assert_eq!(args["lua_source"], script);
        assert_eq!(args["x"], "yy");

        let mut response = json_response(&first, json!({"html": "<p>1</p>"}));
        response.headers.insert(
            crate::proxy::SAVED_ARGUMENTS_HEADER,
            HeaderValue::from_static("lua_source=srv-key-1"),
        );
        pipeline.after_download(&mut first, response).unwrap();

        // second request references the saved script instead of resending it
        let mut second = build("https://example.com/page#foo");
        pipeline.enqueue(&mut second);
        pipeline.before_download(&mut second).unwrap();
        let args = sent_args(&second);
        assert!(args.get("lua_source").is_none());
        assert_eq!(args["load_args"], json!({"lua_source": "srv-key-1"}));
        assert_eq!(args["x"], "yy");
    }

    #[test]
    fn test_cache_miss_retry_resolves_on_resubmission() {
        let pipeline = pipeline();

        let mut options = RenderOptions::for_endpoint("execute").arg("lua_source", json!("main()"));
        options.cache_args = vec!["lua_source".to_string()];
        let mut request =
            CrawlRequest::get(Url::parse("https://example.com/").unwrap()).with_render(options);

        pipeline.enqueue(&mut request);
        pipeline.before_download(&mut request).unwrap();

        let miss = CrawlResponse {
            url: request.url.clone(),
            status: StatusCode::from_u16(498).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        let outcome = pipeline.after_download(&mut request, miss).unwrap();
        let ProxyOutcome::Retry(mut retry) = outcome else {
            panic!("expected a retry");
        };
        assert_eq!(sent_args(&retry)["lua_source"], "main()");

        // the resubmitted retry resolves normally
        let response = json_response(&retry, json!({"html": "<p>ok</p>"}));
        let outcome = pipeline.after_download(&mut retry, response).unwrap();
        assert!(matches!(outcome, ProxyOutcome::Response(_)));
    }

    #[test]
    fn test_fingerprint_distinguishes_render_instructions() {
        let pipeline = pipeline();

        let plain = CrawlRequest::get(Url::parse("https://example.com/page").unwrap());
        let rendered = session_request("https://example.com/page", "s1");
        let fragment = session_request("https://example.com/page#foo", "s1");

        let plain_fp = pipeline.fingerprint(&plain).unwrap();
        let rendered_fp = pipeline.fingerprint(&rendered).unwrap();
        let fragment_fp = pipeline.fingerprint(&fragment).unwrap();

        assert_ne!(plain_fp, rendered_fp);
        // the fragment lives in args.url, so it participates in the identity
        assert_ne!(rendered_fp, fragment_fp);
    }

    #[test]
    fn test_plain_requests_flow_through_untouched() {
        let pipeline = pipeline();
        let mut request = CrawlRequest::get(Url::parse("https://example.com/").unwrap());

        pipeline.enqueue(&mut request);
        pipeline.before_download(&mut request).unwrap();
        assert_eq!(request.url.as_str(), "https://example.com/");

        let response = CrawlResponse {
            url: request.url.clone(),
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"plain"),
        };
        let outcome = pipeline.after_download(&mut request, response).unwrap();
        let ProxyOutcome::Passthrough(passed) = outcome else {
            panic!("expected passthrough");
        };
        assert_eq!(passed.body.as_ref(), b"plain");
    }
}
