//! Proxy server implementation
//!
//! A plain HTTP/1 proxy host for the flow hooks: each absolute-form request
//! is dispatched, answered with the synthesized response or passed through
//! to its original destination, then recorded.

use crate::models::{headers_to_pairs, CompletedResponse, InterceptedRequest};
use crate::proxy::forwarder::gateway_error;
use crate::proxy::hooks::FlowHooks;
use bytes::Bytes;
use http::{header, HeaderName, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Hard cap on inbound request bodies
const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

/// How long open connections get to finish after shutdown is signalled
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Hop-by-hop headers never relayed on passthrough
const HOP_BY_HOP: [&str; 6] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "upgrade",
];

/// Client used for passthrough requests.
pub fn passthrough_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .no_proxy()
        .timeout(timeout)
        .build()?)
}

/// Run the proxy server until `shutdown` flips to `true`.
pub async fn run_server(
    listener: TcpListener,
    hooks: FlowHooks,
    client: reqwest::Client,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    tracing::info!("Proxy server listening on {}", listener.local_addr()?);
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (socket, peer_addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        continue;
                    }
                };
                tracing::debug!("Connection from {}", peer_addr);

                let hooks = hooks.clone();
                let client = client.clone();
                let service = service_fn(move |req| {
                    let hooks = hooks.clone();
                    let client = client.clone();
                    async move { Ok::<_, Infallible>(handle_request(req, hooks, client).await) }
                });
                let conn = http1::Builder::new().serve_connection(TokioIo::new(socket), service);
                let conn = graceful.watch(conn);
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        // Clients dropping keep-alive connections is routine
                        let err_str = e.to_string().to_lowercase();
                        if err_str.contains("connection reset")
                            || err_str.contains("broken pipe")
                            || err_str.contains("connection closed")
                            || err_str.contains("incomplete message")
                        {
                            tracing::debug!("Connection closed by client: {}", e);
                        } else {
                            tracing::error!("Error handling connection: {}", e);
                        }
                    }
                });
            }
        }
    }

    drop(listener);
    if tokio::time::timeout(DRAIN_TIMEOUT, graceful.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Timed out draining proxy connections");
    }
    tracing::info!("Proxy server stopped");
    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    hooks: FlowHooks,
    client: reqwest::Client,
) -> Response<Full<Bytes>> {
    if req.method() == Method::CONNECT {
        tracing::debug!("Rejecting CONNECT {}", req.uri());
        return plain_response(
            StatusCode::NOT_IMPLEMENTED,
            "CONNECT tunnelling is not supported",
        );
    }

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, MAX_REQUEST_BODY_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::debug!("Failed to read request body: {}", e);
            return plain_response(StatusCode::PAYLOAD_TOO_LARGE, "request body rejected");
        }
    };

    let headers = headers_to_pairs(&parts.headers);
    let url = match (parts.uri.scheme(), parts.headers.get(header::HOST)) {
        (Some(_), _) => parts.uri.to_string(),
        (None, Some(host)) => format!(
            "http://{}{}",
            String::from_utf8_lossy(host.as_bytes()),
            parts.uri
        ),
        (None, None) => {
            return plain_response(StatusCode::BAD_REQUEST, "request target has no host");
        }
    };
    let intercepted = InterceptedRequest {
        method: parts.method.to_string(),
        url,
        headers,
        body,
    };

    let (flow_id, outcome) = hooks.on_request(&intercepted).await;
    let response = match outcome.into_response() {
        Some(response) => response,
        None => passthrough(&client, &intercepted).await,
    };
    hooks
        .on_response(flow_id, &CompletedResponse::from_http(&response))
        .await;

    response.map(Full::new)
}

/// Send the request unmodified to its original destination.
async fn passthrough(client: &reqwest::Client, req: &InterceptedRequest) -> Response<Bytes> {
    match try_passthrough(client, req).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!("Passthrough {} {} failed: {:#}", req.method, req.url, err);
            gateway_error(StatusCode::BAD_GATEWAY, "Bad Gateway", &err.to_string())
                .unwrap_or_else(|_| {
                    let mut fallback = Response::new(Bytes::from_static(b"Bad Gateway"));
                    *fallback.status_mut() = StatusCode::BAD_GATEWAY;
                    fallback
                })
        }
    }
}

async fn try_passthrough(
    client: &reqwest::Client,
    req: &InterceptedRequest,
) -> anyhow::Result<Response<Bytes>> {
    let method = reqwest::Method::from_bytes(req.method.as_bytes())?;
    let mut builder = client.request(method, &req.url);
    for (name, value) in &req.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !req.body.is_empty() {
        builder = builder.body(req.body.clone());
    }

    let upstream = builder.send().await?;
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let body = upstream.bytes().await?;

    let mut response = Response::builder().status(status.as_u16());
    for (name, value) in headers.iter() {
        if is_hop_by_hop(name) {
            continue;
        }
        response = response.header(name, value);
    }
    Ok(response.body(body)?)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP
        .iter()
        .any(|h| name.as_str().eq_ignore_ascii_case(h))
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain"),
    );
    response
}
