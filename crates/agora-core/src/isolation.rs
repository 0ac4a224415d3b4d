//! Isolation for callbacks that must not take their caller down
//!
//! The hub runs every subscriber handler through [`isolate`] so that one
//! misbehaving agent, whether it returns an error or panics, cannot stop
//! the dispatch loop or starve the other subscribers.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::warn;

use crate::{AgoraError, Result};

/// Run `fut`, turning a panic into an error
///
/// Errors returned by `fut` pass through unchanged. A panic is caught,
/// logged via `tracing::warn!`, and reported as [`AgoraError::Other`].
///
/// # Usage
///
/// ```no_run
/// use agora_core::isolation::isolate;
/// use agora_core::Result;
///
/// async fn flaky() -> Result<u32> {
///     panic!("boom")
/// }
///
/// async fn example() {
///     let outcome = isolate("flaky", flaky()).await;
///     // outcome is Err(..) instead of unwinding through the caller
/// }
/// ```
pub async fn isolate<Fut, T>(operation_name: &str, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!("{} panicked (isolated): {}", operation_name, reason);
            Err(AgoraError::Other(format!("panicked: {}", reason)))
        }
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_isolate_success() {
        let result = isolate("test_op", async { Ok::<_, AgoraError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_isolate_passes_errors_through() {
        let result = isolate("test_op", async {
            Err::<i32, _>(AgoraError::Other("handler said no".to_string()))
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "handler said no");
    }

    #[tokio::test]
    async fn test_isolate_catches_panics() {
        let result: Result<()> = isolate("test_op", async { panic!("kaboom") }).await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
