//! Cancellable fixed-interval polling

use crate::error::{Result, VolumeError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls a check until it yields a value
///
/// Unbounded unless a deadline is set. Cancelling the token stops the wait
/// at the next sleep.
#[derive(Debug, Clone)]
pub struct PollWait {
    interval: Duration,
    deadline: Option<Duration>,
    cancel: CancellationToken,
}

impl PollWait {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `check` now and then once per interval until it returns `Some`
    pub async fn until<T, F>(&self, what: &str, mut check: F) -> Result<T>
    where
        F: FnMut() -> Result<Option<T>>,
    {
        let poll = async {
            let mut attempt = 0u32;
            loop {
                attempt += 1;
                if let Some(value) = check()? {
                    return Ok(value);
                }
                debug!(what = %what, attempt, "Not ready, waiting {:?}", self.interval);

                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(VolumeError::Cancelled(what.to_string()));
                    }
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        };

        match self.deadline {
            Some(deadline) => tokio::time::timeout(deadline, poll)
                .await
                .unwrap_or_else(|_| {
                    Err(VolumeError::Timeout {
                        what: what.to_string(),
                        waited: deadline,
                    })
                }),
            None => poll.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_returns_when_ready() {
        let wait = PollWait::new(Duration::from_secs(3));
        let mut calls = 0;

        let value = wait
            .until("device", || {
                calls += 1;
                Ok((calls == 4).then_some("/dev/sdf"))
            })
            .await
            .unwrap();

        assert_eq!(value, "/dev/sdf");
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline() {
        let wait =
            PollWait::new(Duration::from_secs(3)).with_deadline(Some(Duration::from_secs(10)));
        let mut calls = 0;

        let err = wait
            .until("device", || -> Result<Option<()>> {
                calls += 1;
                Ok(None)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VolumeError::Timeout { waited, .. } if waited == Duration::from_secs(10)
        ));
        // checks at 0, 3, 6 and 9 seconds
        assert_eq!(calls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled() {
        let cancel = CancellationToken::new();
        let wait = PollWait::new(Duration::from_secs(3)).with_cancellation(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            cancel.cancel();
        });

        let err = wait
            .until("device", || -> Result<Option<()>> { Ok(None) })
            .await
            .unwrap_err();

        assert!(matches!(err, VolumeError::Cancelled(_)));
        canceller.await.unwrap();
    }

    #[tokio::test]
    async fn test_check_error_stops_polling() {
        let wait = PollWait::new(Duration::from_millis(1));

        let err = wait
            .until("device", || -> Result<Option<()>> {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "/proc/partitions").into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, VolumeError::Io(_)));
    }
}
