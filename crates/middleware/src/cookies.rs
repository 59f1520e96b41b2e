//! Downloader-side middleware keeping session cookie jars in sync with
//! rendered pages.
//!
//! Cookies travel only inside the JSON payload, where the render service
//! applies them to the target page. The outbound `Cookie` header is stripped
//! so nothing leaks to the render service's own transport. On the way back,
//! the `cookies` field of the envelope is merged into the session jar, with
//! the previously sent list as baseline so deletions are detected.
//!
//! Runs before the proxy middleware on requests and after it on responses.

use reqwest::header;

use rendergate_core::CookieRecord;

use crate::error::Error;
use crate::options::RenderOptions;
use crate::pipeline::RenderContext;
use crate::request::CrawlRequest;
use crate::response::RenderResponse;

#[derive(Debug, Default)]
pub struct CookieSessionMiddleware;

impl CookieSessionMiddleware {
    pub fn new() -> Self {
        Self
    }

    /// Fill `args.cookies` from the session jar and strip the outbound
    /// cookie header.
    pub fn process_request(&self, ctx: &RenderContext, request: &mut CrawlRequest) -> Result<(), Error> {
        let Some(mut options) = request.render.take() else {
            return Ok(());
        };
        let result = self.inject(ctx, request, &mut options);
        request.render = Some(options);
        result
    }

    fn inject(&self, ctx: &RenderContext, request: &mut CrawlRequest, options: &mut RenderOptions) -> Result<(), Error> {
        if options.processed {
            request.headers.remove(header::COOKIE);
            return Ok(());
        }

        // cookies set explicitly by the caller win
        if options.args.contains_key("cookies") {
            return Ok(());
        }

        let Some(session) = options.session_id.clone() else {
            return Ok(());
        };

        let records = ctx.sessions.with_jar(&session, |jar| {
            jar.merge(&request.cookies);
            jar.records().to_vec()
        });

        if ctx.config.cookies_debug {
            for cookie in &records {
                tracing::debug!(
                    session = %session,
                    url = %request.url,
                    "sending cookie {}={}",
                    cookie.name,
                    cookie.value
                );
            }
        }

        options.args.insert("cookies".to_string(), serde_json::to_value(&records)?);
        request.headers.remove(header::COOKIE);
        Ok(())
    }

    /// Harvest cookies returned by the rendered page into the session jar.
    pub fn process_response(
        &self,
        ctx: &RenderContext,
        request: &CrawlRequest,
        response: &mut RenderResponse,
    ) -> Result<(), Error> {
        let Some(json) = response.as_json_mut() else {
            return Ok(());
        };
        let Some(options) = request.render.as_ref() else {
            return Ok(());
        };

        if !options.processed {
            tracing::warn!(url = %request.url, "cookie sync needs the render proxy middleware to run first");
            return Ok(());
        }
        if !options.magic_response {
            return Ok(());
        }

        let Some(returned) = json.data()?.get("cookies").cloned() else {
            return Ok(());
        };
        let Some(session) = options.new_session_id.clone().or_else(|| options.session_id.clone()) else {
            return Ok(());
        };

        let returned: Vec<CookieRecord> = serde_json::from_value(returned)?;
        let sent: Vec<CookieRecord> = match options.args.get("cookies") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => Vec::new(),
        };

        if ctx.config.cookies_debug {
            for cookie in &returned {
                tracing::debug!(
                    session = %session,
                    "received cookie {}={}",
                    cookie.name,
                    cookie.value
                );
            }
        }

        let snapshot = ctx.sessions.with_jar(&session, |jar| {
            jar.sync(&returned, &sent);
            jar.records().to_vec()
        });
        json.set_cookiejar(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
    use reqwest::{StatusCode, Url};
    use rendergate_core::GateConfig;
    use serde_json::json;

    use crate::request::CrawlResponse;

    fn context() -> RenderContext {
        RenderContext::new(GateConfig::default())
    }

    fn session_request(session: &str) -> CrawlRequest {
        let mut options = RenderOptions::default();
        options.session_id = Some(session.to_string());
        CrawlRequest::get(Url::parse("https://example.com/page").unwrap()).with_render(options)
    }

    fn json_response(envelope: serde_json::Value) -> CrawlResponse {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        CrawlResponse {
            url: Url::parse("http://127.0.0.1:8050/render.json").unwrap(),
            status: StatusCode::OK,
            headers,
            body: Bytes::from(envelope.to_string()),
        }
    }

    #[test]
    fn test_injects_jar_into_args_and_strips_header() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = session_request("s1");
        request
            .headers
            .insert(header::COOKIE, HeaderValue::from_static("a=1"));
        request.cookies.push(CookieRecord::new("a", "1"));

        middleware.process_request(&ctx, &mut request).unwrap();

        assert!(request.headers.get(header::COOKIE).is_none());
        let options = request.render.as_ref().unwrap();
        assert_eq!(options.args["cookies"], json!([{"name": "a", "value": "1"}]));
    }

    #[test]
    fn test_empty_jar_sends_empty_list() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = session_request("s1");

        middleware.process_request(&ctx, &mut request).unwrap();

        assert_eq!(request.render.as_ref().unwrap().args["cookies"], json!([]));
    }

    #[test]
    fn test_explicit_cookies_arg_wins() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = session_request("s1");
        request.render.as_mut().unwrap().args.insert(
            "cookies".to_string(),
            json!([{"name": "explicit", "value": "1"}]),
        );
        request.cookies.push(CookieRecord::new("a", "1"));

        middleware.process_request(&ctx, &mut request).unwrap();

        let options = request.render.as_ref().unwrap();
        assert_eq!(options.args["cookies"][0]["name"], "explicit");
        // nothing was merged into the jar either
        assert!(ctx.sessions.snapshot("s1").is_none());
    }

    #[test]
    fn test_no_session_id_is_a_noop() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = CrawlRequest::get(Url::parse("https://example.com").unwrap())
            .with_render(RenderOptions::default());

        middleware.process_request(&ctx, &mut request).unwrap();

        assert!(!request.render.as_ref().unwrap().args.contains_key("cookies"));
    }

    #[test]
    fn test_harvests_returned_cookies() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = session_request("s1");
        middleware.process_request(&ctx, &mut request).unwrap();
        request.render.as_mut().unwrap().processed = true;

        let envelope = json!({"cookies": [{"name": "sessionid", "value": "ABCD"}]});
        let mut response = RenderResponse::materialize(
            request.render.as_ref().unwrap(),
            json_response(envelope),
        )
        .unwrap();

        middleware.process_response(&ctx, &request, &mut response).unwrap();

        let jar = ctx.sessions.snapshot("s1").unwrap();
        assert_eq!(jar.len(), 1);
        assert_eq!(jar[0].name, "sessionid");
        assert_eq!(response.as_json().unwrap().cookiejar(), &jar[..]);
    }

    #[test]
    fn test_returned_cookies_go_to_new_session() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = session_request("s1");
        middleware.process_request(&ctx, &mut request).unwrap();
        {
            let options = request.render.as_mut().unwrap();
            options.processed = true;
            options.new_session_id = Some("s2".to_string());
        }

        let envelope = json!({"cookies": [{"name": "a", "value": "1"}]});
        let mut response = RenderResponse::materialize(
            request.render.as_ref().unwrap(),
            json_response(envelope),
        )
        .unwrap();

        middleware.process_response(&ctx, &request, &mut response).unwrap();

        assert_eq!(ctx.sessions.snapshot("s2").unwrap().len(), 1);
        assert_eq!(ctx.sessions.snapshot("s1").unwrap().len(), 0);
    }

    #[test]
    fn test_sessions_do_not_observe_each_other() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();

        let mut first = session_request("s1");
        first.cookies.push(CookieRecord::new("a", "1"));
        middleware.process_request(&ctx, &mut first).unwrap();

        let mut second = session_request("s2");
        middleware.process_request(&ctx, &mut second).unwrap();

        assert_eq!(second.render.as_ref().unwrap().args["cookies"], json!([]));
    }

    #[test]
    fn test_envelope_without_cookies_is_a_noop() {
        let ctx = context();
        let middleware = CookieSessionMiddleware::new();
        let mut request = session_request("s1");
        middleware.process_request(&ctx, &mut request).unwrap();
        request.render.as_mut().unwrap().processed = true;

        let mut response = RenderResponse::materialize(
            request.render.as_ref().unwrap(),
            json_response(json!({"html": "<p>x</p>"})),
        )
        .unwrap();

        middleware.process_response(&ctx, &request, &mut response).unwrap();

        assert_eq!(ctx.sessions.snapshot("s1").unwrap().len(), 0);
    }
}
