//! Runs a batch job while holding a [`BatchLock`] key.
//!
//! The key is released however the job ends, including by panic, so a
//! crashed run never leaves later triggers reporting "already in progress".

use crate::domain::ports::BatchLock;
use crate::error::{ProcessorError, Result};
use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::error;

/// Polls the inner future, turning a panic during any poll into an `Err`.
struct CatchUnwind<F>(Pin<Box<F>>);

impl<F: Future> Future for CatchUnwind<F> {
    type Output = std::thread::Result<F::Output>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let inner = self.0.as_mut();
        match panic::catch_unwind(AssertUnwindSafe(|| inner.poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Acquires `key`, drives `job` to completion and releases `key`.
///
/// Returns `Ok(None)` without polling `job` when the key is already held.
/// A panicking job yields [`ProcessorError::Panicked`].
pub async fn run_exclusive<T, F>(lock: &dyn BatchLock, key: i64, job: F) -> Result<Option<T>>
where
    F: Future<Output = Result<T>>,
{
    if !lock.try_acquire(key).await? {
        return Ok(None);
    }

    let outcome = match CatchUnwind(Box::pin(job)).await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_payload_to_string(payload.as_ref());
            error!(key, panic = %message, "batch job panicked");
            Err(ProcessorError::Panicked(message))
        }
    };

    if let Err(e) = lock.release(key).await {
        error!(key, error = %e, "failed to release batch lock");
    }
    outcome.map(Some)
}
