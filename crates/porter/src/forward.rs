//! Single-target forwarding.
//!
//! Relays an authorized request to the backend and streams the backend's
//! status, headers and body back unmodified. Mirrors the semantics of a
//! single-host reverse proxy: scheme and authority come from the target,
//! the target path prefixes the request path, and hop-by-hop headers are
//! dropped in both directions.
//!
//! Protocol upgrades (`Connection: upgrade`) keep their `Upgrade` header on
//! the way out. When the backend answers `101 Switching Protocols` the two
//! upgraded connections are joined and bytes are copied both ways until
//! either side closes.

use axum::{
    body::{Body, HttpBody},
    extract::{ConnectInfo, Request, State},
    response::{IntoResponse, Response},
};
use http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
    header::{CONNECTION, HOST, UPGRADE},
};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use reqwest::Url;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;

/// Headers that only apply to a single transport hop.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// The backend could not produce a response.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("backend unavailable: {0}")]
    Unavailable(#[source] reqwest::Error),

    #[error("backend sent no response headers within {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        status.into_response()
    }
}

struct ForwarderInner {
    http: reqwest::Client,
    target: Url,
    timeout: Option<Duration>,
}

/// Forwards requests to one fixed backend.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct Forwarder {
    inner: Arc<ForwarderInner>,
}

impl Forwarder {
    /// Build a forwarder for `target`.
    ///
    /// `timeout` bounds the wait for the backend's response headers only; a
    /// body that keeps streaming past it is relayed in full. Redirects are
    /// handed back to the caller, never followed.
    pub fn new(target: Url, timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            inner: Arc::new(ForwarderInner {
                http,
                target,
                timeout,
            }),
        })
    }

    pub fn target(&self) -> &Url {
        &self.inner.target
    }

    /// Relay `req` to the backend and return its response.
    pub async fn forward(&self, req: Request) -> Result<Response, ForwardError> {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let (mut parts, body) = req.into_parts();

        // Only connections that can actually be taken over are upgraded.
        let upgrade = requested_upgrade(&parts.headers)
            .and_then(|proto| Some((proto, parts.extensions.remove::<OnUpgrade>()?)));

        let url = upstream_url(&self.inner.target, &parts.uri);
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        if let Some((proto, _)) = &upgrade {
            headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
            headers.insert(UPGRADE, proto.clone());
        }
        let host = headers.remove(HOST);
        set_forwarded(&mut headers, host, client_ip.as_deref());

        let mut outbound = self
            .inner
            .http
            .request(parts.method.clone(), url.clone())
            .headers(headers);
        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let sent = match self.inner.timeout {
            Some(limit) => tokio::time::timeout(limit, outbound.send())
                .await
                .map_err(|_| ForwardError::Timeout(limit)),
            None => Ok(outbound.send().await),
        };
        let upstream = sent
            .and_then(|result| result.map_err(ForwardError::Unavailable))
            .inspect_err(|err| {
                tracing::error!(
                    method = %parts.method,
                    uri = %parts.uri,
                    upstream = %url,
                    error = %err,
                    "backend request failed"
                );
            })?;

        tracing::debug!(
            method = %parts.method,
            upstream = %url,
            status = %upstream.status(),
            "backend responded"
        );

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let body = match upgrade {
            Some((_, inbound)) if status == StatusCode::SWITCHING_PROTOCOLS => {
                if let Some(proto) = upstream.headers().get(UPGRADE) {
                    headers.insert(UPGRADE, proto.clone());
                }
                headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
                tokio::spawn(tunnel(inbound, upstream));
                Body::empty()
            }
            _ => Body::from_stream(upstream.bytes_stream()),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Join the caller's upgraded connection to the backend's.
async fn tunnel(inbound: OnUpgrade, upstream: reqwest::Response) {
    let mut backend = match upstream.upgrade().await {
        Ok(io) => io,
        Err(err) => {
            tracing::warn!(error = %err, "backend connection could not be upgraded");
            return;
        }
    };
    let mut client = match inbound.await {
        Ok(io) => TokioIo::new(io),
        Err(err) => {
            tracing::warn!(error = %err, "client connection could not be upgraded");
            return;
        }
    };

    match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
        Ok((to_backend, to_client)) => {
            tracing::debug!(to_backend, to_client, "upgraded connection closed");
        }
        Err(err) => tracing::debug!(error = %err, "upgraded connection aborted"),
    }
}

/// Axum handler that forwards every request it receives.
pub async fn forward(
    State(forwarder): State<Forwarder>,
    req: Request,
) -> Result<Response, ForwardError> {
    forwarder.forward(req).await
}

/// Map an inbound request URI onto the backend target.
fn upstream_url(target: &Url, uri: &Uri) -> Url {
    let mut url = target.clone();
    url.set_path(&join_paths(target.path(), uri.path()));

    let query = match (target.query().unwrap_or(""), uri.query().unwrap_or("")) {
        ("", "") => None,
        (base, "") => Some(base.to_string()),
        ("", query) => Some(query.to_string()),
        (base, query) => Some(format!("{base}&{query}")),
    };
    url.set_query(query.as_deref());
    url
}

/// Join two path segments with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

/// The protocol a request asks to switch to, if it asks at all.
fn requested_upgrade(headers: &HeaderMap) -> Option<HeaderValue> {
    let wants_upgrade = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if wants_upgrade {
        headers.get(UPGRADE).cloned()
    } else {
        None
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn set_forwarded(headers: &mut HeaderMap, host: Option<HeaderValue>, client_ip: Option<&str>) {
    if let Some(ip) = client_ip {
        let prior: Vec<&str> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let chain = if prior.is_empty() {
            ip.to_string()
        } else {
            format!("{}, {ip}", prior.join(", "))
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    // The listener is plain HTTP and sees the real Host, so caller-supplied
    // values for these two are replaced rather than trusted.
    match host {
        Some(host) => {
            headers.insert(X_FORWARDED_HOST, host);
        }
        None => {
            headers.remove(X_FORWARDED_HOST);
        }
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}
