//! Fault isolation for concurrent tasks
//!
//! A panic inside an isolated future is caught at the task boundary and
//! turned into [`Error::TaskPanicked`], so it never reaches sibling tasks
//! or the scheduler loop.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::error::{Error, Result};

/// Run `fut`, converting a panic into an error value.
pub async fn isolate<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::TaskPanicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_passes_results_through() {
        assert_eq!(isolate(async { Ok::<_, Error>(7) }).await.unwrap(), 7);

        let err = isolate(async { Err::<(), _>(Error::NoMetrics("q".into())) }).await;
        assert_matches!(err, Err(Error::NoMetrics(_)));
    }

    #[tokio::test]
    async fn test_catches_panics() {
        let result: Result<()> = isolate(async { panic!("widget exploded") }).await;
        assert_matches!(result, Err(Error::TaskPanicked(ref msg)) if msg == "widget exploded");

        let id = 3;
        let result: Result<()> = isolate(async move { panic!("widget {} exploded", id) }).await;
        assert_matches!(result, Err(Error::TaskPanicked(ref msg)) if msg == "widget 3 exploded");
    }
}
