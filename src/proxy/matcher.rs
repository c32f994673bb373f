//! URL matching
//!
//! Pattern rules (mappings, file downloads) are regular expressions searched
//! anywhere in the full URL, degrading to a literal substring test when the
//! pattern does not compile. Mock rules are exact `METHOD:host/path` keys.

use crate::models::InterceptedRequest;
use regex::Regex;

/// A compiled URL pattern.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Regex(Regex),
    Literal(String),
}

impl UrlPattern {
    pub fn compile(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => UrlPattern::Regex(re),
            Err(err) => {
                tracing::debug!("Pattern {:?} is not a valid regex ({}), using substring match", pattern, err);
                UrlPattern::Literal(pattern.to_string())
            }
        }
    }

    pub fn is_match(&self, url: &str) -> bool {
        match self {
            UrlPattern::Regex(re) => re.is_match(url),
            UrlPattern::Literal(literal) => url.contains(literal.as_str()),
        }
    }
}

/// Lookup key for the exact mock index: `METHOD:host/path`.
///
/// The host is lowercased and the query string dropped.
pub fn mock_key(method: &str, host: &str, path: &str) -> String {
    format!(
        "{}:{}{}",
        method.to_ascii_uppercase(),
        host.to_ascii_lowercase(),
        path
    )
}

/// Key for a configured mock `url` (`host/path`, optionally with a scheme or
/// query string).
pub fn mock_key_for_rule(method: &str, url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let without_query = without_scheme
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or(without_scheme);
    let (authority, path) = match without_query.find('/') {
        Some(idx) => without_query.split_at(idx),
        None => (without_query, "/"),
    };
    mock_key(method, strip_port(authority), path)
}

fn strip_port(authority: &str) -> &str {
    match authority.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// Key for an intercepted request.
pub fn mock_key_for_request(req: &InterceptedRequest) -> String {
    let parts = req.url_parts();
    mock_key(&req.method, &parts.host, &parts.path)
}
