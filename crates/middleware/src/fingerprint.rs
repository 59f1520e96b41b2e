//! Deterministic request identity, render-option-aware.
//!
//! The external duplicate filter and the response cache both key on this
//! function; anything that canonicalizes render arguments differently will
//! disagree with the pipeline about which requests are the same.

use reqwest::Url;
use serde_json::Value;
use sha2::{Digest, Sha256};

use rendergate_core::hash::seeded_hash;

use crate::error::Error;
use crate::request::CrawlRequest;

/// Stable identity for a request.
///
/// Without render options this is the baseline identity: method, canonical
/// URL (fragment dropped), body. With render options, the options are
/// serialized with stable key ordering — after canonicalizing the embedded
/// `args.url`, which keeps its fragment but loses its query-parameter order —
/// and folded into the baseline. Two requests differing only in render
/// instructions therefore never collide, while encoding noise inside the
/// embedded URL does not separate them.
pub fn request_fingerprint(request: &CrawlRequest) -> Result<String, Error> {
    let baseline = baseline_fingerprint(request);

    let Some(options) = &request.render else {
        return Ok(baseline);
    };

    let mut value = serde_json::to_value(options)?;
    if let Some(slot) = value.pointer_mut("/args/url")
        && let Value::String(arg_url) = slot
    {
        *arg_url = canonical_url(arg_url, true);
    }

    Ok(seeded_hash(&baseline, &value))
}

fn baseline_fingerprint(request: &CrawlRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical_url(request.url.as_str(), false).as_bytes());
    hasher.update(b"\n");
    hasher.update(&request.body);
    hex::encode(hasher.finalize())
}

/// Canonical form of a URL string: scheme and host normalized by parsing,
/// query parameters sorted, fragment kept or dropped. A string that does not
/// parse is used as-is.
pub(crate) fn canonical_url(input: &str, keep_fragment: bool) -> String {
    let Ok(mut url) = Url::parse(input) else {
        return input.to_string();
    };

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        let mut serializer = url.query_pairs_mut();
        serializer.clear();
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        drop(serializer);
    }

    if !keep_fragment {
        url.set_fragment(None);
    }

    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::RenderOptions;
    use serde_json::json;

    fn request(url: &str) -> CrawlRequest {
        CrawlRequest::get(Url::parse(url).unwrap())
    }

    fn render_request(url: &str, arg_url: &str) -> CrawlRequest {
        request(url).with_render(RenderOptions::default().arg("url", json!(arg_url)))
    }

    #[test]
    fn test_plain_request_equals_baseline() {
        let fp = request_fingerprint(&request("https://example.com/page")).unwrap();
        let again = request_fingerprint(&request("https://example.com/page")).unwrap();
        assert_eq!(fp, again);
    }

    #[test]
    fn test_baseline_drops_fragment() {
        let fp1 = request_fingerprint(&request("https://example.com/page")).unwrap();
        let fp2 = request_fingerprint(&request("https://example.com/page#foo")).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_render_options_change_identity() {
        let plain = request_fingerprint(&request("https://example.com/page")).unwrap();
        let rendered =
            request_fingerprint(&request("https://example.com/page").with_render(RenderOptions::default())).unwrap();
        assert_ne!(plain, rendered);
    }

    #[test]
    fn test_differing_args_never_collide() {
        let fp1 = request_fingerprint(
            &request("https://example.com/").with_render(RenderOptions::default().arg("wait", json!(0.5))),
        )
        .unwrap();
        let fp2 = request_fingerprint(
            &request("https://example.com/").with_render(RenderOptions::default().arg("wait", json!(1.0))),
        )
        .unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn test_arg_insertion_order_is_irrelevant() {
        let fp1 = request_fingerprint(
            &request("https://example.com/")
                .with_render(RenderOptions::default().arg("a", json!(1)).arg("b", json!(2))),
        )
        .unwrap();
        let fp2 = request_fingerprint(
            &request("https://example.com/")
                .with_render(RenderOptions::default().arg("b", json!(2)).arg("a", json!(1))),
        )
        .unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_embedded_url_keeps_fragment() {
        let fp1 = request_fingerprint(&render_request(
            "https://example.com/page",
            "https://example.com/page",
        ))
        .unwrap();
        let fp2 = request_fingerprint(&render_request(
            "https://example.com/page",
            "https://example.com/page#foo",
        ))
        .unwrap();
        assert_ne!(fp1, fp2);
    }

    #[test]
    fn test_embedded_url_ignores_query_order() {
        let fp1 = request_fingerprint(&render_request(
            "https://example.com/page",
            "https://example.com/page?a=1&b=2#frag",
        ))
        .unwrap();
        let fp2 = request_fingerprint(&render_request(
            "https://example.com/page",
            "https://example.com/page?b=2&a=1#frag",
        ))
        .unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn test_canonical_url_normalizes_host_case() {
        assert_eq!(
            canonical_url("https://EXAMPLE.com/Path", true),
            "https://example.com/Path"
        );
    }

    #[test]
    fn test_canonical_url_unparseable_passthrough() {
        assert_eq!(canonical_url("about:blank", true), "about:blank");
        assert_eq!(canonical_url("not a url", true), "not a url");
    }
}
