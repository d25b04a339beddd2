//! Bearer credential extraction.
//!
//! Pulls the token out of `Authorization: Bearer <token>`. Absence is a
//! normal outcome and is reported as `None`, never as an error.

use http::HeaderMap;

/// Extract the bearer credential from the first `Authorization` header.
///
/// The value must split on single spaces into exactly two parts, the first
/// being `bearer` in any case and the second non-empty.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;

    let mut parts = value.split(' ');
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() {
        return None;
    }

    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
