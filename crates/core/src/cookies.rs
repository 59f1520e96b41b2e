//! Session cookie jars with HAR-style records.
//!
//! Cookies travel to and from the render service inside the JSON payload
//! rather than in HTTP headers, so the jar works directly on serde records.
//! One jar exists per session id; jars are created lazily and live for the
//! crawl.
//!
//! Merging is name-based and path-blind: a returned cookie replaces a stored
//! cookie of the same name regardless of domain or path.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A single cookie in the record form exchanged with the render service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,

    #[serde(rename = "httpOnly", default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

impl CookieRecord {
    /// A bare name/value cookie, as built from caller-supplied pairs.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            http_only: None,
            secure: None,
        }
    }

    /// Whether the cookie carries an expiry timestamp in the past.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|t| t <= now)
    }
}

/// An ordered set of cookies for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionJar {
    cookies: Vec<CookieRecord>,
}

impl SessionJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current jar contents, in insertion order.
    pub fn records(&self) -> &[CookieRecord] {
        &self.cookies
    }

    pub fn get(&self, name: &str) -> Option<&CookieRecord> {
        self.cookies.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Upsert incoming cookies by name, preserving insertion order for
    /// cookies already present. An incoming cookie that is already expired
    /// evicts the stored cookie of the same name instead.
    pub fn merge(&mut self, incoming: &[CookieRecord]) {
        let now = Utc::now();
        for cookie in incoming {
            if cookie.is_expired(now) {
                self.cookies.retain(|c| c.name != cookie.name);
                continue;
            }
            match self.cookies.iter_mut().find(|c| c.name == cookie.name) {
                Some(existing) => *existing = cookie.clone(),
                None => self.cookies.push(cookie.clone()),
            }
        }
    }

    /// Merge cookies returned by the rendered page, using the previously
    /// sent list as baseline: a cookie that was sent but is absent from the
    /// returned set was deleted by the page and is evicted from the jar.
    pub fn sync(&mut self, returned: &[CookieRecord], sent: &[CookieRecord]) {
        for cookie in sent {
            if !returned.iter().any(|c| c.name == cookie.name) {
                self.cookies.retain(|c| c.name != cookie.name);
            }
        }
        self.merge(returned);
    }
}

/// Lazily-created jars, one per session id, shared across the crawl.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    jars: DashMap<String, SessionJar>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the jar for `session`, creating it if absent.
    pub fn with_jar<R>(&self, session: &str, f: impl FnOnce(&mut SessionJar) -> R) -> R {
        let mut jar = self.jars.entry(session.to_string()).or_default();
        f(&mut jar)
    }

    /// Snapshot of a session's cookies, if the jar exists.
    pub fn snapshot(&self, session: &str) -> Option<Vec<CookieRecord>> {
        self.jars.get(session).map(|jar| jar.cookies.clone())
    }

    pub fn len(&self) -> usize {
        self.jars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jars.is_empty()
    }
}
