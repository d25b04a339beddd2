//! # porter-auth
//!
//! Tower middleware that authorizes every request against an OAuth2
//! token-introspection authority before it reaches the wrapped service.
//!
//! ```rust,ignore
//! use porter_auth::auth::{AuthLayer, introspect::IntrospectionClient};
//!
//! let client = IntrospectionClient::builder("https://auth.example.com", service_token)
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//!
//! let app = axum::Router::new()
//!     .fallback(forward)
//!     .layer(AuthLayer::new(client));
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:9200").await?;
//! axum::serve(listener, app).await?;
//! ```

pub use axum;

pub mod auth;
