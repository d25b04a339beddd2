//! # porter
//!
//! Authenticating reverse proxy. Every inbound request must carry a bearer
//! credential that a remote OAuth2 introspection authority reports as
//! active; only then is it relayed to the single configured backend.
//!
//! ```text
//! caller ──▶ extract bearer ──▶ introspect ──▶ decide ──▶ rewrite ──▶ backend
//!                                                │
//!                                                └── 401 / 500
//! ```
//!
//! The gate lives in [`porter_auth`]; this crate wires it to the
//! [`forward`] engine and owns configuration and serving.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod forward;
