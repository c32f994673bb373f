//! Dispatch decision engine
//!
//! For each intercepted request the rule sets are consulted in a fixed order:
//! mappings, then file rules, then mocks. The first handler that produces a
//! response wins. A handler that cannot serve its rule moves evaluation on to
//! the next candidate in the same set, then to the next set. If nothing
//! answers, the request passes through untouched.

use crate::models::InterceptedRequest;
use crate::proxy::file_responder::FileResponder;
use crate::proxy::forwarder::Forwarder;
use crate::proxy::mock_responder::MockResponder;
use crate::proxy::rules::{RuleSnapshot, RuleStore};
use bytes::Bytes;
use http::Response;
use std::sync::Arc;

/// Outcome of one dispatch decision.
#[derive(Debug)]
pub enum Dispatch {
    Forwarded(Response<Bytes>),
    FileServed(Response<Bytes>),
    Mocked(Response<Bytes>),
    Passthrough,
}

impl Dispatch {
    /// The synthesized response, if any; `None` means the engine should
    /// forward the original request itself.
    pub fn into_response(self) -> Option<Response<Bytes>> {
        match self {
            Dispatch::Forwarded(resp) | Dispatch::FileServed(resp) | Dispatch::Mocked(resp) => {
                Some(resp)
            }
            Dispatch::Passthrough => None,
        }
    }

    pub fn response(&self) -> Option<&Response<Bytes>> {
        match self {
            Dispatch::Forwarded(resp) | Dispatch::FileServed(resp) | Dispatch::Mocked(resp) => {
                Some(resp)
            }
            Dispatch::Passthrough => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Dispatch::Forwarded(_) => "forwarded",
            Dispatch::FileServed(_) => "file",
            Dispatch::Mocked(_) => "mock",
            Dispatch::Passthrough => "passthrough",
        }
    }
}

pub struct Dispatcher {
    rules: Arc<RuleStore>,
    forwarder: Forwarder,
    files: FileResponder,
    mocks: MockResponder,
}

impl Dispatcher {
    pub fn new(rules: Arc<RuleStore>, forwarder: Forwarder) -> Self {
        Self {
            rules,
            forwarder,
            files: FileResponder::new(),
            mocks: MockResponder::new(),
        }
    }

    /// Reload the rules and decide how to answer `req`.
    pub async fn dispatch(&self, req: &InterceptedRequest) -> Dispatch {
        let rules = Arc::clone(&self.rules);
        let snapshot = match tokio::task::spawn_blocking(move || rules.refresh()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!("Rule reload task failed: {}", err);
                self.rules.snapshot()
            }
        };
        self.dispatch_with(&snapshot, req).await
    }

    /// Decide against an already loaded snapshot.
    pub async fn dispatch_with(&self, snapshot: &RuleSnapshot, req: &InterceptedRequest) -> Dispatch {
        for rule in snapshot.mapping_candidates(req) {
            match self.forwarder.forward(rule, req).await {
                Ok(resp) => {
                    tracing::info!(
                        "Mapped {} {} -> {} ({})",
                        req.method,
                        req.url,
                        rule.target_authority(),
                        resp.status().as_u16()
                    );
                    return Dispatch::Forwarded(resp);
                }
                Err(err) => {
                    tracing::warn!("Mapping {:?} skipped: {}", rule.url_pattern, err);
                }
            }
        }

        for rule in snapshot.file_candidates(req) {
            match self.files.serve(rule, req).await {
                Ok(resp) => {
                    tracing::info!(
                        "Served {} {} from {}",
                        req.method,
                        req.url,
                        rule.local_file_path
                    );
                    return Dispatch::FileServed(resp);
                }
                Err(err) => {
                    tracing::warn!("File rule {:?} skipped: {}", rule.url_pattern, err);
                }
            }
        }

        if let Some(rule) = snapshot.mock_for(req) {
            tracing::info!("Mocked {} {}", req.method, req.url);
            return Dispatch::Mocked(self.mocks.respond(rule));
        }

        Dispatch::Passthrough
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileRule, MappingRule, MockResponse, MockRule, RuleConfig};
    use crate::proxy::rules::StaticRuleSource;
    use http::StatusCode;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn dispatcher(config: RuleConfig) -> (Dispatcher, Arc<StaticRuleSource>) {
        let source = Arc::new(StaticRuleSource::new(config));
        let store = Arc::new(RuleStore::new(Arc::clone(&source)));
        let forwarder = Forwarder::new().expect("client builds");
        (Dispatcher::new(store, forwarder), source)
    }

    fn file_rule(pattern: &str, path: &str) -> FileRule {
        FileRule {
            id: String::new(),
            name: String::new(),
            url_pattern: pattern.into(),
            local_file_path: path.into(),
            content_type: None,
            enabled: true,
        }
    }

    fn mock_rule(method: &str, url: &str, body: serde_json::Value) -> MockRule {
        MockRule {
            id: String::new(),
            name: String::new(),
            url: url.into(),
            method: method.into(),
            enabled: true,
            response: MockResponse {
                body,
                ..MockResponse::default()
            },
        }
    }

    #[tokio::test]
    async fn mock_ignores_query_and_requires_method() {
        let (dispatcher, _) = dispatcher(RuleConfig {
            apis: vec![mock_rule("GET", "example.com/ping", serde_json::json!({"ok": true}))],
            ..RuleConfig::default()
        });

        let hit = dispatcher
            .dispatch(&InterceptedRequest::new("GET", "http://example.com/ping?x=1"))
            .await;
        assert_eq!(hit.kind(), "mock");
        let resp = hit.into_response().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), br#"{"ok":true}"#);

        let miss = dispatcher
            .dispatch(&InterceptedRequest::new("POST", "http://example.com/ping"))
            .await;
        assert!(miss.into_response().is_none());
    }

    #[tokio::test]
    async fn missing_file_falls_through_to_next_file_rule_then_mock() {
        let dir = tempdir().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, "from disk").unwrap();
        let missing = dir.path().join("missing.txt");

        let (dispatcher, source) = dispatcher(RuleConfig {
            file_downloads: vec![
                file_rule("/download", missing.to_str().unwrap()),
                file_rule("/download", present.to_str().unwrap()),
            ],
            apis: vec![mock_rule("GET", "cdn.local/download", serde_json::json!("mock"))],
            ..RuleConfig::default()
        });
        let req = InterceptedRequest::new("GET", "http://cdn.local/download");

        let served = dispatcher.dispatch(&req).await;
        assert_eq!(served.kind(), "file");
        assert_eq!(served.response().unwrap().body().as_ref(), b"from disk");

        // Only the missing file left: the mock answers instead
        source.set(RuleConfig {
            file_downloads: vec![file_rule("/download", missing.to_str().unwrap())],
            apis: vec![mock_rule("GET", "cdn.local/download", serde_json::json!("mock"))],
            ..RuleConfig::default()
        });
        assert_eq!(dispatcher.dispatch(&req).await.kind(), "mock");
    }

    #[tokio::test]
    async fn file_rules_take_precedence_over_mocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.apk");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let (dispatcher, _) = dispatcher(RuleConfig {
            file_downloads: vec![file_rule(r"\.apk$", path.to_str().unwrap())],
            apis: vec![mock_rule("GET", "cdn.local/app.apk", serde_json::json!({}))],
            ..RuleConfig::default()
        });
        let outcome = dispatcher
            .dispatch(&InterceptedRequest::new("GET", "http://cdn.local/app.apk"))
            .await;
        assert_eq!(outcome.kind(), "file");
        assert_eq!(outcome.response().unwrap().body().as_ref(), &[1u8, 2, 3]);
    }

    #[tokio::test]
    async fn mappings_take_precedence_over_file_rules() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = "HTTP/1.1 200 OK\r\nContent-Length: 8\r\nConnection: close\r\n\r\nupstream";
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        let dir = tempdir().unwrap();
        let path = dir.path().join("app.apk");
        std::fs::write(&path, "from disk").unwrap();
        let (dispatcher, _) = dispatcher(RuleConfig {
            mappings: vec![MappingRule {
                id: String::new(),
                name: String::new(),
                url_pattern: "/download/".into(),
                target_host: "127.0.0.1".into(),
                target_port: port,
                methods: vec!["GET".into()],
                enabled: true,
            }],
            file_downloads: vec![file_rule("/download/", path.to_str().unwrap())],
            ..RuleConfig::default()
        });

        let outcome = dispatcher
            .dispatch(&InterceptedRequest::new("GET", "http://cdn.local/download/app.apk"))
            .await;
        assert_eq!(outcome.kind(), "forwarded");
        assert_eq!(outcome.response().unwrap().body().as_ref(), b"upstream");
    }

    #[tokio::test]
    async fn unreachable_mapping_is_not_a_fall_through() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let (dispatcher, _) = dispatcher(RuleConfig {
            mappings: vec![MappingRule {
                id: String::new(),
                name: String::new(),
                url_pattern: "/api/".into(),
                target_host: "127.0.0.1".into(),
                target_port: port,
                methods: vec!["GET".into()],
                enabled: true,
            }],
            apis: vec![mock_rule("GET", "svc.local/api/users", serde_json::json!({}))],
            ..RuleConfig::default()
        });
        let outcome = dispatcher
            .dispatch(&InterceptedRequest::new("GET", "http://svc.local/api/users"))
            .await;
        assert_eq!(outcome.kind(), "forwarded");
        assert_eq!(outcome.response().unwrap().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn empty_rules_pass_through() {
        let (dispatcher, _) = dispatcher(RuleConfig::default());
        let outcome = dispatcher
            .dispatch(&InterceptedRequest::new("GET", "http://anything.local/"))
            .await;
        assert!(matches!(outcome, Dispatch::Passthrough));
    }
}
