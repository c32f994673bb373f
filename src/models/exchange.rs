//! Exchange descriptors
//!
//! The request/response shapes the interception engine hands to the core.

use bytes::Bytes;
use url::Url;

/// A request as delivered by the interception engine, before any response
/// exists.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: String,
    /// Absolute URL including the query string
    pub url: String,
    /// Headers in wire order; names may repeat
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Decomposed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
}

impl InterceptedRequest {
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            method: method.to_string(),
            url: url.to_string(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First header value with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }

    pub fn host(&self) -> String {
        self.url_parts().host
    }

    pub fn path(&self) -> String {
        self.url_parts().path
    }

    /// Raw query string without the leading `?`, empty when absent.
    pub fn query(&self) -> String {
        self.url_parts().query.unwrap_or_default()
    }

    /// Split the URL into scheme, host, port, path and query.
    ///
    /// Origin-form targets (`/path?q`) are resolved against the `Host` header.
    pub fn url_parts(&self) -> UrlParts {
        let parsed = Url::parse(&self.url).ok().or_else(|| {
            let host = self.header("host")?;
            Url::parse(&format!("http://{}{}", host, self.url)).ok()
        });

        match parsed {
            Some(url) => UrlParts {
                scheme: url.scheme().to_string(),
                host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
                port: url.port(),
                path: url.path().to_string(),
                query: url.query().map(str::to_string),
            },
            None => {
                let (path, query) = match self.url.split_once('?') {
                    Some((path, query)) => (path.to_string(), Some(query.to_string())),
                    None => (self.url.clone(), None),
                };
                UrlParts {
                    scheme: "http".to_string(),
                    host: String::new(),
                    port: None,
                    path,
                    query,
                }
            }
        }
    }
}

/// A response that exists for a flow, synthesized or relayed from upstream.
#[derive(Debug, Clone)]
pub struct CompletedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl CompletedResponse {
    pub fn from_http(response: &http::Response<Bytes>) -> Self {
        Self {
            status: response.status().as_u16(),
            headers: headers_to_pairs(response.headers()),
            body: response.body().clone(),
        }
    }
}

/// Flatten a header map into name/value pairs, decoding values lossily.
pub fn headers_to_pairs(headers: &http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).to_string(),
            )
        })
        .collect()
}

pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_url_is_decomposed() {
        let req = InterceptedRequest::new("GET", "http://Example.com:8081/ping?x=1&y=2");
        let parts = req.url_parts();
        assert_eq!(parts.host, "example.com");
        assert_eq!(parts.port, Some(8081));
        assert_eq!(parts.path, "/ping");
        assert_eq!(parts.query.as_deref(), Some("x=1&y=2"));
    }

    #[test]
    fn origin_form_uses_host_header() {
        let req = InterceptedRequest::new("GET", "/files/a.bin?v=3").with_header("Host", "cdn.local");
        let parts = req.url_parts();
        assert_eq!(parts.host, "cdn.local");
        assert_eq!(parts.path, "/files/a.bin");
        assert_eq!(parts.query.as_deref(), Some("v=3"));
        assert_eq!(req.host(), "cdn.local");
        assert_eq!(req.path(), "/files/a.bin");
        assert_eq!(req.query(), "v=3");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = InterceptedRequest::new("GET", "http://a/").with_header("X-Trace", "abc");
        assert_eq!(req.header("x-trace"), Some("abc"));
        assert_eq!(req.header("missing"), None);
    }
}
