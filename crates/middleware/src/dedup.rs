//! Spider-side middleware that substitutes heavy render-argument values with
//! content fingerprints before requests are queued.
//!
//! Large values (typically embedded scripts) repeat across many requests; a
//! queued request only carries the fingerprint string, bounding queue size.
//! The proxy middleware restores the values from [`LocalValueStore`] before
//! dispatch.
//!
//! [`LocalValueStore`]: rendergate_core::LocalValueStore

use serde_json::Value;

use rendergate_core::hash::local_fingerprint;

use crate::pipeline::RenderContext;
use crate::request::CrawlRequest;

#[derive(Debug, Default)]
pub struct DedupArgsMiddleware;

impl DedupArgsMiddleware {
    pub fn new() -> Self {
        Self
    }

    /// Replace each cacheable argument value with its fingerprint, recording
    /// the original in the crawl-scoped value store.
    ///
    /// A request that already carries substitutions is passed through
    /// unchanged: substituting a second time would fingerprint the
    /// fingerprint strings and corrupt the earlier substitution.
    pub fn process_request(&self, ctx: &RenderContext, request: &mut CrawlRequest) {
        let Some(options) = request.render.as_mut() else {
            return;
        };

        if !options.replaced_args.is_empty() {
            tracing::warn!(url = %request.url, "request already carries substituted render arguments");
            return;
        }

        for name in &options.cache_args {
            let Some(value) = options.args.get(name) else {
                continue;
            };

            let fingerprint = local_fingerprint(value);
            ctx.local_values.insert(&fingerprint, value.clone());
            options.args.insert(name.clone(), Value::String(fingerprint));
            options.replaced_args.push(name.clone());
        }

        if !options.replaced_args.is_empty() {
            tracing::debug!(
                url = %request.url,
                count = options.replaced_args.len(),
                "substituted render arguments with fingerprints"
            );
        }
    }
}
