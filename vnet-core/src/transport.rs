//! Thin adapter over `quinn`: transient-error classification for the accept loops, and a
//! deadline helper for handshake I/O, since `quinn` streams carry no native per-call deadline
//! the way a `net.Conn` does in the reference implementation.

use std::io;
use std::time::Duration;

use quinn::ConnectionError;
use tokio::time::timeout;

/// `quinn`'s `ConnectionError` has no `Temporary()`-style flag (unlike the Go `net.Error` the
/// reference implementation keys its backoff off of, a concept upstream itself is deprecating).
/// This defines the equivalent predicate for the stream-accept loop: resource exhaustion and a
/// locally-triggered reset are worth retrying, everything else tears the session down.
pub fn is_transient(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::Reset | ConnectionError::CidsExhausted)
}

/// Runs `fut` with `deadline` as a timeout, mapping expiry to [`io::ErrorKind::TimedOut`].
pub async fn with_deadline<F, T>(deadline: Duration, fut: F) -> io::Result<T>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_and_cids_exhausted_are_transient() {
        assert!(is_transient(&ConnectionError::Reset));
        assert!(is_transient(&ConnectionError::CidsExhausted));
    }

    #[test]
    fn locally_closed_is_not_transient() {
        assert!(!is_transient(&ConnectionError::LocallyClosed));
    }

    #[tokio::test]
    async fn with_deadline_times_out() {
        let result: io::Result<()> = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn with_deadline_passes_through_success() {
        let result = with_deadline(Duration::from_secs(5), async { Ok::<_, io::Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }
}
