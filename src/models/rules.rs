//! Rule models
//!
//! The three ordered rule sets consulted by the dispatcher, as they appear in
//! the JSON configuration document.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Forward matching requests to an alternate `host:port`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappingRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Regular expression (or literal substring) tested against the full URL
    pub url_pattern: String,
    pub target_host: String,
    pub target_port: u16,
    /// HTTP methods this rule applies to, compared case-insensitively
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl MappingRule {
    pub fn allows_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// `host:port` authority the request is rewritten to.
    pub fn target_authority(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }
}

/// Answer matching requests from a local file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url_pattern: String,
    pub local_file_path: String,
    /// Overrides the type inferred from the file extension
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Canned response returned by a [`MockRule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockResponse {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default = "default_mock_headers")]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_body")]
    pub body: serde_json::Value,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: default_mock_headers(),
            body: default_body(),
        }
    }
}

/// Exact `METHOD:host/path` match answered with a canned response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `host/path`; a scheme prefix and query string are tolerated and ignored
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub response: MockResponse,
}

/// The configuration document the rule store reads on every reload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
    #[serde(default)]
    pub file_downloads: Vec<FileRule>,
    #[serde(default)]
    pub apis: Vec<MockRule>,
}

fn default_enabled() -> bool {
    true
}

fn default_status() -> u16 {
    200
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_mock_headers() -> HashMap<String, String> {
    HashMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

fn default_body() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}
