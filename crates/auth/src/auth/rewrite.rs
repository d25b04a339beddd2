//! Credential substitution for authorized requests.
//!
//! A caller may present one credential for introspection and ask for a
//! different one to be forwarded by sending it in `X-Original-Authorization`.

use http::{HeaderMap, HeaderName, header::AUTHORIZATION};

/// Header carrying the credential to forward in place of `Authorization`.
pub const X_ORIGINAL_AUTHORIZATION: HeaderName =
    HeaderName::from_static("x-original-authorization");

/// Replace `Authorization` with a non-empty `X-Original-Authorization`.
///
/// Must only run after the request was allowed. Returns whether the
/// header was replaced.
pub fn restore_original_authorization(headers: &mut HeaderMap) -> bool {
    let Some(original) = headers
        .get(&X_ORIGINAL_AUTHORIZATION)
        .filter(|v| !v.is_empty())
        .cloned()
    else {
        return false;
    };

    headers.insert(AUTHORIZATION, original);
    true
}
