use std::error::Error;
use std::fmt::Display;
use std::future::Future;
use std::io;
use std::slice::Iter;
use std::time::Duration;

use lazy_static::lazy_static;
use thiserror::Error;

lazy_static! {
    static ref DEFAULT_INTERVALS: Vec<Duration> = vec![
        Duration::from_secs(1),
        Duration::from_secs(3),
        Duration::from_secs(5),
    ];
}

/// Decides whether a failed attempt is worth another try.
///
/// Any `Fn(&E) -> bool` is a classifier, so call sites can pass a closure or a
/// prepared matcher such as [`NetworkErrorKinds`].
pub trait RetryClassifier<E> {
    fn is_retryable(&self, err: &E) -> bool;
}

impl<E, F> RetryClassifier<E> for F
where
    F: Fn(&E) -> bool,
{
    fn is_retryable(&self, err: &E) -> bool {
        self(err)
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("Non retryable error - {0}")]
    Aborted(E),
    #[error("Max retries reached after {attempts} attempts due to error: {last}")]
    Exhausted { attempts: usize, last: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Aborted(_) => 1,
            RetryError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn into_inner(self) -> E {
        match self {
            RetryError::Aborted(err) => err,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Re-executes a fallible operation following a fixed list of waits.
///
/// Each wait is consumed once, in order: with `n` intervals an operation runs at
/// most `n + 1` times. The policy holds no state between calls and can be shared
/// freely.
#[derive(Clone, Debug)]
pub struct Retry {
    intervals: Vec<Duration>,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            intervals: DEFAULT_INTERVALS.clone(),
        }
    }
}

impl Retry {
    pub fn new(intervals: Vec<Duration>) -> Self {
        Self { intervals }
    }

    pub fn from_secs(intervals: &[u64]) -> Self {
        Self::new(intervals.iter().copied().map(Duration::from_secs).collect())
    }

    pub fn intervals(&self) -> &[Duration] {
        &self.intervals
    }

    /// Blocking flavour, sleeps the current thread between attempts.
    pub fn run<T, E, C, F>(&self, classifier: &C, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Display,
        C: RetryClassifier<E> + ?Sized,
        F: FnMut() -> Result<T, E>,
    {
        let mut waits = self.intervals.iter();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let wait = next_wait(attempts, err, classifier, &mut waits)?;
                    std::thread::sleep(wait);
                }
            }
        }
    }

    pub async fn run_async<T, E, C, F, Fut>(
        &self,
        classifier: &C,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        C: RetryClassifier<E> + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut waits = self.intervals.iter();
        let mut attempts = 0;
        loop {
            attempts += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let wait = next_wait(attempts, err, classifier, &mut waits)?;
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

fn next_wait<E, C>(
    attempts: usize,
    err: E,
    classifier: &C,
    waits: &mut Iter<Duration>,
) -> Result<Duration, RetryError<E>>
where
    E: Display,
    C: RetryClassifier<E> + ?Sized,
{
    if !classifier.is_retryable(&err) {
        return Err(RetryError::Aborted(err));
    }
    match waits.next() {
        Some(wait) => {
            log::warn!("Attempt {attempts} failed - {err}. Retrying in {wait:?}");
            Ok(*wait)
        }
        None => {
            log::error!("Giving up after {attempts} attempts - {err}");
            Err(RetryError::Exhausted {
                attempts,
                last: err,
            })
        }
    }
}

/// Matches errors carrying one of the configured I/O kinds anywhere in their
/// source chain, including I/O errors nested inside other I/O errors.
#[derive(Clone, Debug)]
pub struct NetworkErrorKinds {
    kinds: Vec<io::ErrorKind>,
}

impl Default for NetworkErrorKinds {
    fn default() -> Self {
        Self::new(vec![
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
        ])
    }
}

impl NetworkErrorKinds {
    pub fn new(kinds: Vec<io::ErrorKind>) -> Self {
        Self { kinds }
    }

    pub fn matches(&self, err: &(dyn Error + 'static)) -> bool {
        let mut current = Some(err);
        while let Some(err) = current {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                if self.kinds.contains(&io_err.kind()) {
                    return true;
                }
                if let Some(inner) = io_err.get_ref() {
                    if self.matches(inner) {
                        return true;
                    }
                }
            }
            current = err.source();
        }
        false
    }
}

impl<E: Error + 'static> RetryClassifier<E> for NetworkErrorKinds {
    fn is_retryable(&self, err: &E) -> bool {
        self.matches(err)
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::io;
    use std::time::Duration;

    use thiserror::Error;

    use crate::utils::retry::{NetworkErrorKinds, Retry, RetryClassifier, RetryError};

    #[derive(Debug, Error)]
    enum ClientError {
        #[error("Request failed - {0}")]
        Transport(#[source] io::Error),
        #[error("Bad payload")]
        BadPayload,
    }

    fn refused() -> ClientError {
        ClientError::Transport(io::Error::new(
            io::ErrorKind::Other,
            io::Error::new(io::ErrorKind::ConnectionRefused, "dial tcp: connection refused"),
        ))
    }

    #[test]
    fn test_default_intervals() {
        assert_eq!(
            Retry::default().intervals(),
            &[
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5)
            ]
        );
    }

    #[test]
    fn test_success_after_transient_failures() {
        let calls = Cell::new(0);
        let retry = Retry::new(vec![Duration::from_millis(1); 3]);
        let out = retry.run(&NetworkErrorKinds::default(), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(refused())
            } else {
                Ok("sent")
            }
        });

        assert_eq!(out.unwrap(), "sent");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_non_retryable_returns_immediately() {
        let calls = Cell::new(0);
        let retry = Retry::new(vec![Duration::from_secs(60)]);
        let out: Result<(), _> = retry.run(&NetworkErrorKinds::default(), || {
            calls.set(calls.get() + 1);
            Err(ClientError::BadPayload)
        });

        assert!(matches!(out, Err(RetryError::Aborted(ClientError::BadPayload))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_exhausted_wraps_last_error() {
        let calls = Cell::new(0);
        let retry = Retry::new(vec![Duration::from_millis(1); 3]);
        let out: Result<(), _> = retry.run(&|_: &String| true, || {
            calls.set(calls.get() + 1);
            Err(format!("failure {}", calls.get()))
        });

        let err = out.unwrap_err();
        assert_eq!(err.attempts(), 4);
        assert_eq!(err.into_inner(), "failure 4");
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_classifier_walks_source_chain() {
        let kinds = NetworkErrorKinds::default();
        assert!(kinds.is_retryable(&refused()));
        assert!(kinds.is_retryable(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!kinds.is_retryable(&ClientError::BadPayload));
        assert!(!kinds.is_retryable(&io::Error::from(io::ErrorKind::PermissionDenied)));

        let custom = NetworkErrorKinds::new(vec![io::ErrorKind::PermissionDenied]);
        assert!(custom.is_retryable(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_consumes_intervals_in_order() {
        let start = tokio::time::Instant::now();
        let mut calls = 0;
        let out = Retry::default()
            .run_async(&NetworkErrorKinds::default(), || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt <= 2 {
                        Err(refused())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(out.unwrap(), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4), "elapsed = {elapsed:?}");
        assert!(elapsed < Duration::from_secs(9), "elapsed = {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_non_retryable_does_not_wait() {
        let start = tokio::time::Instant::now();
        let out: Result<(), _> = Retry::default()
            .run_async(&NetworkErrorKinds::default(), || async {
                Err(ClientError::BadPayload)
            })
            .await;

        assert!(matches!(out, Err(RetryError::Aborted(_))));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
