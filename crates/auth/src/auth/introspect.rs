//! OAuth2 token introspection (RFC 7662).
//!
//! Asks a remote authority whether a credential is active. The call itself
//! is authenticated with a service credential supplied once at startup.
//! Implements [`Validator`](super::Validator) producing [`Introspection`].
//!
//! ```rust,ignore
//! use porter_auth::auth::{AuthLayer, introspect::IntrospectionClient};
//!
//! let client = IntrospectionClient::builder("https://auth.example.com", "ory_pat_...")
//!     .path("/admin/oauth2/introspect")
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let app = axum::Router::new()
//!     .fallback(forward)
//!     .layer(AuthLayer::new(client));
//! ```

use crate::auth::{Validator, Verdict};
use http::{HeaderMap, HeaderValue, StatusCode, header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use thiserror::Error;

/// Introspection endpoint path used by Ory Hydra and Ory Network.
pub const DEFAULT_INTROSPECTION_PATH: &str = "/admin/oauth2/introspect";

/// Largest authority response body the client will buffer.
pub const RESPONSE_BODY_LIMIT: usize = 64 * 1024;

/// Longest slice of an error response body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 512;

/// Failure to obtain a verdict from the authority.
#[derive(Debug, Error)]
pub enum IntrospectionError {
    #[error("introspection request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("introspection endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed introspection response: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("introspection response exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("invalid introspection client configuration: {0}")]
    Build(String),
}

impl IntrospectionError {
    /// Whether the call was abandoned because the deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}

/// Introspection response as returned by the authority.
///
/// Only `active` is required; every member the authority sends that is not
/// modelled here is kept in `extra`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Introspection {
    /// Granted scopes, split from the space-delimited `scope` member.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.as_deref().unwrap_or_default().split_whitespace()
    }
}

#[derive(Serialize)]
struct IntrospectionForm<'a> {
    token: &'a str,
}

/// Builder for [`IntrospectionClient`].
pub struct IntrospectionClientBuilder {
    base_url: String,
    path: String,
    service_token: String,
    timeout: Option<Duration>,
}

impl IntrospectionClientBuilder {
    /// Override the endpoint path appended to the authority base URL.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Bound each introspection call by this deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolve the endpoint and build the shared HTTP client.
    pub fn build(self) -> Result<IntrospectionClient, IntrospectionError> {
        let endpoint = endpoint(&self.base_url, &self.path)?;

        let mut auth = HeaderValue::from_str(&format!("Bearer {}", self.service_token))
            .map_err(|_| {
                IntrospectionError::Build("service token is not a valid header value".into())
            })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let mut builder = reqwest::Client::builder().default_headers(headers);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| IntrospectionError::Build(e.to_string()))?;

        Ok(IntrospectionClient {
            inner: Arc::new(IntrospectionClientInner { http, endpoint }),
        })
    }
}

struct IntrospectionClientInner {
    http: reqwest::Client,
    endpoint: Url,
}

/// Client for a token-introspection authority.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct IntrospectionClient {
    inner: Arc<IntrospectionClientInner>,
}

impl IntrospectionClient {
    /// Start building a client for the authority at `base_url`.
    pub fn builder(
        base_url: impl Into<String>,
        service_token: impl Into<String>,
    ) -> IntrospectionClientBuilder {
        IntrospectionClientBuilder {
            base_url: base_url.into(),
            path: DEFAULT_INTROSPECTION_PATH.into(),
            service_token: service_token.into(),
            timeout: None,
        }
    }

    /// The fully resolved introspection endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Ask the authority about `token`. No retries.
    pub async fn introspect(&self, token: &str) -> Result<Introspection, IntrospectionError> {
        let resp = self
            .inner
            .http
            .post(self.inner.endpoint.clone())
            .form(&IntrospectionForm { token })
            .send()
            .await
            .map_err(IntrospectionError::Transport)?;

        let status = resp.status();
        // Read to the end unless oversized, so the connection returns to the pool.
        let body = read_limited(resp, RESPONSE_BODY_LIMIT).await?;

        if !status.is_success() {
            let end = body.len().min(ERROR_BODY_LIMIT);
            return Err(IntrospectionError::Status {
                status,
                body: String::from_utf8_lossy(&body[..end]).into_owned(),
            });
        }

        serde_json::from_slice(&body).map_err(IntrospectionError::Malformed)
    }
}

impl Validator for IntrospectionClient {
    type Claims = Introspection;
    type Error = IntrospectionError;

    async fn validate(
        &self,
        credential: &str,
    ) -> Result<Verdict<Introspection>, IntrospectionError> {
        let introspection = self.introspect(credential).await?;
        Ok(if introspection.active {
            Verdict::Active(introspection)
        } else {
            Verdict::Inactive(introspection)
        })
    }
}

async fn read_limited(
    mut resp: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, IntrospectionError> {
    if resp.content_length().is_some_and(|len| len > limit as u64) {
        return Err(IntrospectionError::Oversized { limit });
    }

    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(IntrospectionError::Transport)? {
        if body.len() + chunk.len() > limit {
            return Err(IntrospectionError::Oversized { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn endpoint(base_url: &str, path: &str) -> Result<Url, IntrospectionError> {
    let base = Url::parse(base_url)
        .map_err(|e| IntrospectionError::Build(format!("authority url {base_url:?}: {e}")))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(IntrospectionError::Build(format!(
            "authority url {base_url:?} must use http or https"
        )));
    }

    let mut url = base.clone();
    let joined = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    url.set_path(&joined);
    Ok(url)
}
