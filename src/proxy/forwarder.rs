//! Request forwarding
//!
//! Re-issues a matched request against a [`MappingRule`]'s `host:port` and
//! relays the upstream response. Connection failures and timeouts become
//! proxy-level 502/504 responses; anything else is reported back to the
//! dispatcher so the next rule can be tried.

use crate::models::{InterceptedRequest, MappingRule};
use bytes::Bytes;
use http::{header, HeaderName, HeaderValue, Response, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Per-request upstream timeout
pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Request headers recomputed for the new hop
const SKIPPED_REQUEST_HEADERS: [&str; 4] = ["host", "content-length", "transfer-encoding", "connection"];

/// Response headers tied to the upstream connection's framing
const SKIPPED_RESPONSE_HEADERS: [HeaderName; 2] = [header::TRANSFER_ENCODING, header::CONNECTION];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("unsupported request method {0:?}")]
    InvalidMethod(String),
    #[error("forwarding to {target} failed: {source}")]
    Request {
        target: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("building relayed response: {0}")]
    Response(#[from] http::Error),
}

/// Issues forwarded requests with a shared connection pool.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(FORWARD_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        // Forwarded traffic goes straight to the target; env proxies could loop back here
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// `http://target_host:target_port<path>[?query]`
    pub fn target_url(rule: &MappingRule, req: &InterceptedRequest) -> String {
        let parts = req.url_parts();
        let path = if parts.path.is_empty() { "/" } else { &parts.path };
        match parts.query {
            Some(query) => format!("http://{}{}?{}", rule.target_authority(), path, query),
            None => format!("http://{}{}", rule.target_authority(), path),
        }
    }

    /// Forward `req` according to `rule`.
    ///
    /// Returns a relayed or synthesized (502/504) response, or an error when
    /// the failure is neither a connection failure nor a timeout.
    pub async fn forward(
        &self,
        rule: &MappingRule,
        req: &InterceptedRequest,
    ) -> Result<Response<Bytes>, ForwardError> {
        let target = rule.target_authority();
        let url = Self::target_url(rule, req);
        let method = reqwest::Method::from_bytes(req.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ForwardError::InvalidMethod(req.method.clone()))?;

        let mut builder = self.client.request(method, &url);
        for (name, value) in &req.headers {
            if SKIPPED_REQUEST_HEADERS
                .iter()
                .any(|skip| name.eq_ignore_ascii_case(skip))
            {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                builder = builder.header(name, value);
            }
        }
        builder = builder.header(header::HOST, target.as_str());
        if !req.body.is_empty() {
            builder = builder.body(req.body.clone());
        }

        tracing::info!("Forwarding {} {} -> {}", req.method, req.url, url);
        let started = Instant::now();

        let upstream = match builder.send().await {
            Ok(upstream) => upstream,
            Err(err) => return self.translate_failure(&target, err),
        };

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = match upstream.bytes().await {
            Ok(body) => body,
            Err(err) => return self.translate_failure(&target, err),
        };

        tracing::debug!(
            "Forwarded {} -> {} {} in {}ms",
            req.url,
            target,
            status.as_u16(),
            started.elapsed().as_millis()
        );

        let mut response = Response::builder().status(status.as_u16());
        for (name, value) in headers.iter() {
            if SKIPPED_RESPONSE_HEADERS.contains(name) {
                continue;
            }
            response = response.header(name, value);
        }
        Ok(response.body(body)?)
    }

    fn translate_failure(
        &self,
        target: &str,
        err: reqwest::Error,
    ) -> Result<Response<Bytes>, ForwardError> {
        if err.is_timeout() {
            tracing::warn!("Upstream {} timed out after {:?}", target, self.timeout);
            return Ok(gateway_error(
                StatusCode::GATEWAY_TIMEOUT,
                "Gateway Timeout",
                &format!("upstream {} did not respond within {}s", target, self.timeout.as_secs_f64()),
            )?);
        }
        if err.is_connect() {
            tracing::warn!("Unable to connect to upstream {}: {}", target, err);
            return Ok(gateway_error(
                StatusCode::BAD_GATEWAY,
                "Bad Gateway",
                &format!("unable to connect to upstream {}", target),
            )?);
        }
        Err(ForwardError::Request {
            target: target.to_string(),
            source: err,
        })
    }
}

/// JSON error response synthesized by the proxy itself.
pub fn gateway_error(
    status: StatusCode,
    error: &str,
    message: &str,
) -> Result<Response<Bytes>, http::Error> {
    let body = serde_json::json!({ "error": error, "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_LENGTH, body.len().to_string())
        .body(Bytes::from(body))
}
