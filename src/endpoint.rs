//! Connection endpoints and the access-control contract that issues them.
//!
//! An endpoint is immutable for the lifetime of one connection attempt. The
//! token travels as a `token` query parameter appended at connect time.

use std::fmt;

use anyhow::{Context, Result};
use url::Url;

use crate::error::StreamError;

/// Where to connect and which credential to present.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionEndpoint {
    /// Base WebSocket (or HTTP) URL of the daemon stream.
    pub url: String,
    /// Access token issued by the access-control service.
    pub token: String,
}

impl fmt::Debug for ConnectionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEndpoint")
            .field("url", &self.url)
            .field("token", &"***")
            .finish()
    }
}

impl ConnectionEndpoint {
    /// Create an endpoint from a URL and token.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }

    /// URL actually dialled: `ws(s)://` scheme with `token=` appended.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` does not parse.
    pub fn connect_url(&self) -> Result<String> {
        let ws_url = crate::ws::http_to_ws_scheme(&self.url);
        let mut parsed = Url::parse(&ws_url)
            .with_context(|| format!("invalid endpoint URL: {}", self.url))?;
        if !self.token.is_empty() {
            parsed.query_pairs_mut().append_pair("token", &self.token);
        }
        Ok(parsed.into())
    }
}

/// The pair of endpoints a single daemon instance exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoints {
    /// Console log stream and command sink.
    pub console: ConnectionEndpoint,
    /// Resource-usage stream.
    pub stats: ConnectionEndpoint,
}

impl StreamEndpoints {
    /// Derive the stats endpoint from a console endpoint by swapping a
    /// trailing `/console` path segment for `/stats/ws`.
    ///
    /// Older panels only hand out the console URL. Returns `None` when the
    /// path does not end in `/console`.
    pub fn from_console(console: ConnectionEndpoint) -> Option<Self> {
        let mut parsed = Url::parse(&console.url).ok()?;
        let path = parsed.path().trim_end_matches('/');
        let prefix = path.strip_suffix("/console")?;
        let stats_path = format!("{prefix}/stats/ws");
        parsed.set_path(&stats_path);

        let stats = ConnectionEndpoint::new(String::from(parsed), console.token.clone());
        Some(Self { console, stats })
    }
}

/// Contract of the external service that authorizes a caller for a
/// resource and issues stream endpoints.
pub trait AccessControl: Send + Sync {
    /// Resolve the endpoints for `resource_id` on behalf of `identity`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Unauthorized`] when the caller may not
    /// stream this resource.
    fn endpoints(&self, resource_id: &str, identity: &str) -> Result<StreamEndpoints, StreamError>;
}

/// Access control backed by a fixed set of endpoints, used when the caller
/// already holds credentials (CLI flags, tests).
#[derive(Debug, Clone)]
pub struct StaticAccess {
    endpoints: StreamEndpoints,
}

impl StaticAccess {
    /// Grant every caller the given endpoints.
    pub fn new(endpoints: StreamEndpoints) -> Self {
        Self { endpoints }
    }
}

impl AccessControl for StaticAccess {
    fn endpoints(&self, _resource_id: &str, _identity: &str) -> Result<StreamEndpoints, StreamError> {
        if self.endpoints.console.token.is_empty() {
            return Err(StreamError::Unauthorized("no token configured".to_string()));
        }
        Ok(self.endpoints.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_url_appends_token_and_converts_scheme() {
        let ep = ConnectionEndpoint::new("https://node.example.com/api/servers/abc/console", "t0k");
        assert_eq!(
            ep.connect_url().unwrap(),
            "wss://node.example.com/api/servers/abc/console?token=t0k"
        );
    }

    #[test]
    fn connect_url_keeps_existing_query() {
        let ep = ConnectionEndpoint::new("ws://localhost:8080/console?tail=50", "abc");
        assert_eq!(
            ep.connect_url().unwrap(),
            "ws://localhost:8080/console?tail=50&token=abc"
        );
    }

    #[test]
    fn connect_url_encodes_token() {
        let ep = ConnectionEndpoint::new("ws://h/console", "a b&c");
        assert_eq!(ep.connect_url().unwrap(), "ws://h/console?token=a+b%26c");
    }

    #[test]
    fn connect_url_rejects_garbage() {
        assert!(ConnectionEndpoint::new("::nope::", "t").connect_url().is_err());
    }

    #[test]
    fn debug_hides_token() {
        let ep = ConnectionEndpoint::new("ws://h/console", "supersecret");
        assert!(!format!("{ep:?}").contains("supersecret"));
    }

    #[test]
    fn from_console_derives_stats_path() {
        let console = ConnectionEndpoint::new("wss://node:8080/api/servers/abc/console", "t");
        let eps = StreamEndpoints::from_console(console).unwrap();
        assert_eq!(eps.stats.url, "wss://node:8080/api/servers/abc/stats/ws");
        assert_eq!(eps.stats.token, "t");
        assert_eq!(eps.console.url, "wss://node:8080/api/servers/abc/console");
    }

    #[test]
    fn from_console_requires_console_segment() {
        let other = ConnectionEndpoint::new("wss://node/api/servers/abc/logs", "t");
        assert!(StreamEndpoints::from_console(other).is_none());
    }

    #[test]
    fn static_access_rejects_missing_token() {
        let console = ConnectionEndpoint::new("ws://h/console", "");
        let access = StaticAccess::new(StreamEndpoints::from_console(console).unwrap());
        assert!(matches!(
            access.endpoints("abc", "user"),
            Err(StreamError::Unauthorized(_))
        ));
    }

    #[test]
    fn static_access_returns_endpoints() {
        let console = ConnectionEndpoint::new("ws://h/console", "tok");
        let eps = StreamEndpoints::from_console(console).unwrap();
        let access = StaticAccess::new(eps.clone());
        assert_eq!(access.endpoints("abc", "user").unwrap(), eps);
    }
}
