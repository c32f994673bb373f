//! Mock responses
//!
//! Builds the canned response for a [`MockRule`]. The body is always the JSON
//! serialization of the configured value, encoded in the charset named by the
//! rule's `Content-Type`. Characters the charset cannot carry are written as
//! JSON `\uXXXX` escapes instead of failing.

use crate::models::MockRule;
use bytes::Bytes;
use encoding_rs::{EncoderResult, Encoding, UTF_8};
use http::{header, HeaderName, HeaderValue, Response, StatusCode};
use thiserror::Error;

const DEFAULT_CONTENT_TYPE: &str = "application/json";
const FALLBACK_BODY: &str = r#"{"error":"Failed to build mock response"}"#;

#[derive(Debug, Error)]
pub enum MockBuildError {
    #[error("status {0} is outside 100-599")]
    InvalidStatus(u16),
    #[error("invalid header {name:?}")]
    InvalidHeader { name: String },
    #[error("serializing mock body: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("building mock response: {0}")]
    Response(#[from] http::Error),
}

/// Encoding named by the `charset` parameter of a `Content-Type` value;
/// UTF-8 when absent or unknown.
pub fn charset_for(content_type: Option<&str>) -> &'static Encoding {
    let label = content_type.and_then(|content_type| {
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"'))
        })
    });
    match label {
        None => UTF_8,
        Some(label) => Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            tracing::debug!("Unknown mock charset {:?}, using utf-8", label);
            UTF_8
        }),
    }
}

/// Encode `text`, writing characters `encoding` cannot carry as JSON
/// `\uXXXX` escapes (surrogate pairs above the BMP).
pub fn encode_body(encoding: &'static Encoding, text: &str) -> Vec<u8> {
    let (bytes, _, had_errors) = encoding.encode(text);
    if !had_errors {
        return bytes.into_owned();
    }
    tracing::debug!("Mock body not representable in {}, escaping", encoding.name());
    let escaped = escape_unmappable(encoding, text);
    let (bytes, _, _) = encoding.encode(&escaped);
    bytes.into_owned()
}

fn escape_unmappable(encoding: &'static Encoding, text: &str) -> String {
    let mut encoder = encoding.new_encoder();
    let mut scratch = [0u8; 1024];
    let mut escaped = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let (result, read, _) =
            encoder.encode_from_utf8_without_replacement(rest, &mut scratch, true);
        let (consumed, remaining) = rest.split_at(read);
        match result {
            EncoderResult::InputEmpty => {
                escaped.push_str(consumed);
                return escaped;
            }
            EncoderResult::OutputFull => escaped.push_str(consumed),
            EncoderResult::Unmappable(ch) => {
                // `read` includes the unmappable character
                escaped.push_str(&consumed[..consumed.len() - ch.len_utf8()]);
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    escaped.push_str(&format!("\\u{:04x}", unit));
                }
            }
        }
        rest = remaining;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MockResponder;

impl MockResponder {
    pub fn new() -> Self {
        Self
    }

    /// Response for `rule`; construction failures become a fixed 500.
    pub fn respond(&self, rule: &MockRule) -> Response<Bytes> {
        match self.build(rule) {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("Mock {} {} could not be built: {}", rule.method, rule.url, err);
                fallback_response()
            }
        }
    }

    pub fn build(&self, rule: &MockRule) -> Result<Response<Bytes>, MockBuildError> {
        let canned = &rule.response;
        if !(100..=599).contains(&canned.status) {
            return Err(MockBuildError::InvalidStatus(canned.status));
        }
        let status = StatusCode::from_u16(canned.status)
            .map_err(|_| MockBuildError::InvalidStatus(canned.status))?;

        let mut names: Vec<&String> = canned.headers.keys().collect();
        names.sort();

        let mut builder = Response::builder().status(status);
        let mut content_type = None;
        for name in names {
            let value = &canned.headers[name];
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| MockBuildError::InvalidHeader { name: name.clone() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| MockBuildError::InvalidHeader { name: name.clone() })?;
            if header_name == header::CONTENT_TYPE {
                content_type = Some(value.as_str());
            }
            builder = builder.header(header_name, header_value);
        }
        if content_type.is_none() {
            builder = builder.header(header::CONTENT_TYPE, DEFAULT_CONTENT_TYPE);
        }

        let text = serde_json::to_string(&canned.body)?;
        let body = encode_body(charset_for(content_type), &text);

        Ok(builder.body(Bytes::from(body))?)
    }
}

fn fallback_response() -> Response<Bytes> {
    let mut response = Response::new(Bytes::from_static(FALLBACK_BODY.as_bytes()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(DEFAULT_CONTENT_TYPE),
    );
    response
}
