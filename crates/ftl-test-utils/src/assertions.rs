//! Custom assertion helpers for integration tests.

use ftl_runtime::routing::CallRequest;
use serde_json::Value;

/// Asserts that the body of `call` is the JSON `expected`.
///
/// # Panics
///
/// Panics if the body is not JSON or differs from `expected`.
pub fn assert_call_json(call: &CallRequest, expected: &Value) {
    let body: Value = serde_json::from_slice(&call.body).unwrap_or_else(|e| {
        panic!(
            "call to {} has a non-JSON body ({e}): {:?}",
            call.verb,
            String::from_utf8_lossy(&call.body)
        )
    });
    assert_eq!(&body, expected, "unexpected body for call to {}", call.verb);
}

/// Asserts that `message` mentions every one of `needles`.
///
/// # Panics
///
/// Panics on the first missing needle.
pub fn assert_mentions(message: &str, needles: &[&str]) {
    for needle in needles {
        assert!(
            message.contains(needle),
            "expected {needle:?} in error message: {message}"
        );
    }
}
