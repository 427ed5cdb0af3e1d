//! HTTP status code helpers.
//!
//! Status codes are carried as plain `i32` values so that the invalid
//! sentinel (-1) can flow through the same channels as real codes, e.g.
//! when a reply was stale or the transport failed before a status was
//! available.

/// HTTP status code, or [`INVALID`] when none is available.
pub type HttpStatusCode = i32;

/// Sentinel for a missing or unreadable status code.
pub const INVALID: HttpStatusCode = -1;

pub const OK: HttpStatusCode = 200;
pub const CREATED: HttpStatusCode = 201;
pub const ACCEPTED: HttpStatusCode = 202;
pub const NO_CONTENT: HttpStatusCode = 204;

/// Returns true for any well-formed HTTP status code.
#[inline]
pub fn is_valid(code: HttpStatusCode) -> bool {
    (100..600).contains(&code)
}

/// Returns true for 2xx codes.
#[inline]
pub fn is_success(code: HttpStatusCode) -> bool {
    (200..300).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_invalid_sentinel() {
        assert!(!is_valid(INVALID));
        assert!(!is_success(INVALID));
    }

    #[test]
    fn test_known_codes() {
        assert!(is_success(OK));
        assert!(is_success(CREATED));
        assert!(is_success(ACCEPTED));
        assert!(is_success(NO_CONTENT));
        assert!(!is_success(404));
        assert!(is_valid(404));
    }

    proptest! {
        #[test]
        fn prop_success_implies_valid(code in -1000i32..1000) {
            if is_success(code) {
                prop_assert!(is_valid(code));
                prop_assert!((200..300).contains(&code));
            }
        }
    }
}
