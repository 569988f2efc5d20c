//! Tests for the retry helper.
//!
//! Validates that retryability is driven by the explicit error marker, that
//! attempts are bounded, and that the final error surfaces unwrapped.

use cloister::error::Error;
use cloister::retry::retry;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const DELAY: Duration = Duration::from_secs(5);

#[tokio::test(start_paused = true)]
async fn test_success_on_first_attempt() {
    let calls = AtomicU32::new(0);
    let value = retry(10, DELAY, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, Error>(42) }
    })
    .await
    .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retryable_error_retries_until_success() {
    let calls = AtomicU32::new(0);
    let value = retry(10, DELAY, || {
        let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if attempt < 4 {
                Err(Error::MissingToken.retryable())
            } else {
                Ok("token")
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(value, "token");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_aborts_immediately() {
    let calls = AtomicU32::new(0);
    let err = retry(10, DELAY, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(Error::Internal("permanent".to_string())) }
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(matches!(err, Error::Internal(_)));
}

#[tokio::test(start_paused = true)]
async fn test_attempts_are_bounded() {
    let calls = AtomicU32::new(0);
    let result = retry(3, DELAY, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(Error::MissingToken.retryable()) }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_final_error_surfaces_without_marker() {
    let err = retry(2, DELAY, || async {
        Err::<(), _>(
            Error::DigestMismatch {
                expected: "sha256:aa".to_string(),
                computed: "sha256:bb".to_string(),
            }
            .retryable(),
        )
    })
    .await
    .unwrap_err();

    // The marker is consumed by the helper; callers see the real error.
    assert!(!err.is_retryable());
    assert!(matches!(err, Error::DigestMismatch { .. }));
}

#[test]
fn test_retryable_marker_is_idempotent() {
    let err = Error::MissingToken.retryable().retryable();
    assert!(err.is_retryable());
    assert!(matches!(err.into_inner(), Error::MissingToken));
}
