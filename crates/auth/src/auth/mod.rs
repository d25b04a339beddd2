//! Introspection-gated authorization middleware.
//!
//! Every request passes through [`decide`] before the wrapped service sees
//! it: the bearer credential is extracted from `Authorization`, submitted to
//! a [`Validator`], and the outcome is folded into a [`Decision`]. Anything
//! other than an explicit active verdict is rejected.
//!
//! Allowed requests get their claims inserted into `http::Extensions` and,
//! when `X-Original-Authorization` is present, have `Authorization` replaced
//! by it (see [`rewrite`]). The substitution happens strictly after the
//! decision, so the authority only ever sees the credential the request
//! arrived with.
//!
//! # Example
//!
//! ```rust,ignore
//! use porter_auth::auth::{AuthLayer, Validator, Verdict};
//!
//! #[derive(Clone)]
//! struct StaticTokens;
//!
//! impl Validator for StaticTokens {
//!     type Claims = String;
//!     type Error = String;
//!
//!     async fn validate(&self, credential: &str) -> Result<Verdict<String>, String> {
//!         if credential == "secret" {
//!             Ok(Verdict::Active("user1".into()))
//!         } else {
//!             Ok(Verdict::Inactive(credential.into()))
//!         }
//!     }
//! }
//!
//! let app = axum::Router::new()
//!     .fallback(forward)
//!     .layer(AuthLayer::new(StaticTokens));
//! ```

pub mod bearer;
pub mod introspect;
pub mod rewrite;

pub use bearer::extract_bearer;
pub use introspect::{Introspection, IntrospectionClient, IntrospectionError};
pub use rewrite::{X_ORIGINAL_AUTHORIZATION, restore_original_authorization};

use futures::future::BoxFuture;
use http::{
    HeaderMap, HeaderName, Request, Response, StatusCode,
    header::{AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION},
    request::Parts,
};
use std::{
    fmt,
    task::{Context, Poll},
};

/// Trait for checking whether a credential is currently active.
///
/// [`IntrospectionClient`] is the production implementation.
pub trait Validator: Clone + Send + Sync + 'static {
    /// Claims reported by the authority for a credential.
    type Claims: Clone + fmt::Debug + Send + Sync + 'static;

    /// Failure to reach a verdict at all.
    type Error: fmt::Display + Send;

    /// Ask for a verdict on `credential`.
    fn validate(
        &self,
        credential: &str,
    ) -> impl Future<Output = Result<Verdict<Self::Claims>, Self::Error>> + Send;
}

/// What the authority said about a credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict<C> {
    Active(C),
    Inactive(C),
}

/// Outcome of authorizing a single request.
///
/// Only [`Decision::Allow`] lets a request through. The two unauthorized
/// outcomes and the introspection failure stay distinct so that an
/// unreachable authority is never mistaken for a bad credential.
#[derive(Debug)]
pub enum Decision<C, E> {
    /// The credential is active.
    Allow(C),
    /// No usable bearer credential on the request.
    MissingCredential,
    /// The authority reported the credential as inactive.
    InactiveCredential(C),
    /// The authority could not be asked, or its answer was unusable.
    IntrospectionFailed(E),
}

impl<C, E> Decision<C, E> {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }

    /// Claims of an allowed request, or the status to reject it with.
    pub fn into_result(self) -> Result<C, StatusCode> {
        match self {
            Self::Allow(claims) => Ok(claims),
            Self::MissingCredential | Self::InactiveCredential(_) => Err(StatusCode::UNAUTHORIZED),
            Self::IntrospectionFailed(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Authorize a request from its headers.
///
/// The validator is not called when no credential is present.
pub async fn decide<V>(validator: &V, headers: &HeaderMap) -> Decision<V::Claims, V::Error>
where
    V: Validator,
{
    let Some(credential) = extract_bearer(headers) else {
        return Decision::MissingCredential;
    };

    match validator.validate(credential).await {
        Ok(Verdict::Active(claims)) => Decision::Allow(claims),
        Ok(Verdict::Inactive(claims)) => Decision::InactiveCredential(claims),
        Err(err) => Decision::IntrospectionFailed(err),
    }
}

/// Tower [`Layer`](tower::Layer) that applies [`AuthService`].
#[derive(Clone)]
pub struct AuthLayer<V> {
    validator: V,
}

impl<V> AuthLayer<V> {
    pub fn new(validator: V) -> Self {
        Self { validator }
    }
}

impl<V, S> tower::Layer<S> for AuthLayer<V>
where
    V: Clone,
{
    type Service = AuthService<V, S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            validator: self.validator.clone(),
            inner,
        }
    }
}

/// Tower service that authorizes requests before forwarding them.
#[derive(Clone)]
pub struct AuthService<V, S> {
    validator: V,
    inner: S,
}

impl<V, S, B> tower::Service<Request<B>> for AuthService<V, S>
where
    V: Validator,
    S: tower::Service<Request<B>, Response = Response<axum::body::Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let validator = self.validator.clone();
        let mut inner = self.inner.clone();
        // swap to ensure poll_ready state is preserved
        std::mem::swap(&mut self.inner, &mut inner);

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            let decision = decide(&validator, &parts.headers).await;
            log_decision(&decision, &parts);

            let claims = match decision.into_result() {
                Ok(claims) => claims,
                Err(status) => return Ok(status_response(status)),
            };

            if restore_original_authorization(&mut parts.headers) {
                tracing::debug!(
                    uri = %parts.uri,
                    "forwarding X-Original-Authorization as Authorization"
                );
            }
            parts.extensions.insert(claims);
            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

fn status_response(status: StatusCode) -> Response<axum::body::Body> {
    let mut response = Response::new(axum::body::Body::empty());
    *response.status_mut() = status;
    response
}

fn log_decision<C, E>(decision: &Decision<C, E>, parts: &Parts)
where
    C: fmt::Debug,
    E: fmt::Display,
{
    let headers = HeaderSnapshot(&parts.headers);
    match decision {
        Decision::Allow(_) => {
            tracing::info!(
                method = %parts.method,
                uri = %parts.uri,
                ?headers,
                "request authorized"
            );
        }
        Decision::MissingCredential => {
            tracing::info!(
                method = %parts.method,
                uri = %parts.uri,
                ?headers,
                "request rejected: missing bearer credential"
            );
        }
        Decision::InactiveCredential(verdict) => {
            tracing::warn!(
                method = %parts.method,
                uri = %parts.uri,
                ?headers,
                ?verdict,
                "request rejected: credential inactive"
            );
        }
        Decision::IntrospectionFailed(error) => {
            tracing::error!(
                method = %parts.method,
                uri = %parts.uri,
                ?headers,
                %error,
                "request rejected: introspection failed"
            );
        }
    }
}

/// Headers whose values never reach the logs.
fn is_redacted(name: &HeaderName) -> bool {
    name == AUTHORIZATION
        || name == PROXY_AUTHORIZATION
        || name == COOKIE
        || name == X_ORIGINAL_AUTHORIZATION
}

/// Debug view of a header map with credentials masked.
struct HeaderSnapshot<'a>(&'a HeaderMap);

impl fmt::Debug for HeaderSnapshot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(name, value)| {
                let value: &dyn fmt::Debug = if is_redacted(name) {
                    &"<redacted>"
                } else {
                    value
                };
                (name.as_str(), value)
            }))
            .finish()
    }
}
