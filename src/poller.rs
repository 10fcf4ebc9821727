//! Blocking readiness check for remote endpoints.
//!
//! The dashboard of a freshly deployed job takes a while to come up. The
//! poller issues a GET once per interval until the expected status comes
//! back. It is the only place where the provisioner sleeps.

use std::io::Write;
use std::thread;
use std::time::Duration;

use crate::error::{Result, TestbedError};

/// Production polling interval
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Source of HTTP status codes for a URL
pub trait StatusProbe {
    fn status(&self, url: &str) -> Result<u16>;
}

/// Probe backed by a blocking reqwest client
pub struct HttpProbe {
    http: reqwest::blocking::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self {
            http: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusProbe for HttpProbe {
    fn status(&self, url: &str) -> Result<u16> {
        Ok(self.http.get(url).send()?.status().as_u16())
    }
}

/// Polls a URL until it answers with the expected status
pub struct Poller<P: StatusProbe> {
    probe: P,
    interval: Duration,
}

impl Poller<HttpProbe> {
    /// HTTP poller with the production interval
    pub fn http() -> Self {
        Self::new(HttpProbe::new(), POLL_INTERVAL)
    }
}

impl<P: StatusProbe> Poller<P> {
    pub fn new(probe: P, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Block until `url` answers with `expected_status`.
    ///
    /// Transport errors count as a miss. With `max_attempts = Some(n)` the
    /// poll gives up on the miss that exceeds `n` retries; `None` retries
    /// forever. Returns the number of misses before the URL was ready.
    ///
    /// # Errors
    ///
    /// `Timeout` carrying the number of attempts made.
    pub fn wait_for_url(
        &self,
        url: &str,
        expected_status: u16,
        max_attempts: Option<u32>,
    ) -> Result<u32> {
        let mut attempt: u32 = 0;
        loop {
            match self.probe.status(url) {
                Ok(status) if status == expected_status => break,
                Ok(status) => tracing::debug!(url, status, attempt, "endpoint not ready"),
                Err(e) => tracing::debug!(url, error = %e, attempt, "endpoint unreachable"),
            }

            attempt += 1;
            if let Some(max) = max_attempts {
                if attempt > max {
                    println!();
                    return Err(TestbedError::Timeout {
                        url: url.to_string(),
                        attempts: attempt,
                        max_attempts: max,
                    });
                }
            }
            if attempt == 1 {
                tracing::info!("waiting for dashboard at {} to be ready", url);
            }
            progress_mark();
            thread::sleep(self.interval);
        }

        if attempt > 0 {
            println!();
        }
        Ok(attempt)
    }
}

fn progress_mark() {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, ".");
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replays a fixed list of answers, then keeps returning the last one
    struct Scripted {
        answers: RefCell<VecDeque<Result<u16>>>,
        calls: RefCell<u32>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<u16>>) -> Self {
            Self {
                answers: RefCell::new(answers.into()),
                calls: RefCell::new(0),
            }
        }
    }

    impl StatusProbe for Scripted {
        fn status(&self, _url: &str) -> Result<u16> {
            *self.calls.borrow_mut() += 1;
            let mut answers = self.answers.borrow_mut();
            if answers.len() > 1 {
                answers.pop_front().unwrap_or(Ok(0))
            } else {
                match answers.front() {
                    Some(Ok(s)) => Ok(*s),
                    _ => Ok(503),
                }
            }
        }
    }

    #[test]
    fn test_ready_immediately() {
        let poller = Poller::new(Scripted::new(vec![Ok(200)]), Duration::ZERO);
        assert_eq!(poller.wait_for_url("http://d", 200, Some(0)).unwrap(), 0);
        assert_eq!(*poller.probe.calls.borrow(), 1);
    }

    #[test]
    fn test_ready_after_misses_and_transport_errors() {
        let probe = Scripted::new(vec![
            Err(TestbedError::config("connection refused")),
            Ok(502),
            Ok(200),
        ]);
        let poller = Poller::new(probe, Duration::ZERO);
        assert_eq!(poller.wait_for_url("http://d", 200, None).unwrap(), 2);
    }

    #[test]
    fn test_timeout_reports_attempts() {
        let poller = Poller::new(Scripted::new(vec![Ok(503)]), Duration::ZERO);
        let err = poller.wait_for_url("http://d", 200, Some(3)).unwrap_err();
        match err {
            TestbedError::Timeout {
                attempts,
                max_attempts,
                ..
            } => {
                assert_eq!(attempts, 4);
                assert_eq!(max_attempts, 3);
            }
            other => panic!("Expected Timeout, got {other:?}"),
        }
        assert_eq!(*poller.probe.calls.borrow(), 4);
    }

    #[test]
    fn test_other_expected_status() {
        let poller = Poller::new(Scripted::new(vec![Ok(200), Ok(401)]), Duration::ZERO);
        assert_eq!(poller.wait_for_url("http://d", 401, Some(5)).unwrap(), 1);
    }
}
