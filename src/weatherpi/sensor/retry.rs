// Weatherpi - Environmental sampling job for a Raspberry PI
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::sensor::core::SensorError;
use std::thread;
use std::time::Duration;

/// Result of reading a sensor that is allowed to fail several times.
///
/// `value` is `None` when every attempt failed with a transient error. It is never
/// filled in with a previous or made-up reading.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: Option<T>,
    pub attempts: u32,
    pub last_error: Option<SensorError>,
}

/// Bounded number of attempts to read a sensor and the time to wait between them.
///
/// DHT sensors can't be polled more than once every second or two (depending on the
/// model). Reading them faster than that fails nearly every time, so the interval
/// must not be shortened to "speed up" retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// Create a new policy. A `max_attempts` of zero is treated as one attempt.
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Call `attempt` until it succeeds, fails with a permanent error, or the maximum
    /// number of attempts is reached, sleeping the current thread between attempts.
    pub fn run<T, F>(&self, attempt: F) -> Result<Retried<T>, SensorError>
    where
        F: FnMut() -> Result<T, SensorError>,
    {
        self.run_with_sleep(attempt, thread::sleep)
    }

    /// Like `run` but using `sleep` to wait between attempts.
    ///
    /// Permanent errors are returned immediately as `Err`. Transient errors are logged
    /// and followed by a call to `sleep` unless that was the last allowed attempt.
    pub fn run_with_sleep<T, F, S>(&self, mut attempt: F, mut sleep: S) -> Result<Retried<T>, SensorError>
    where
        F: FnMut() -> Result<T, SensorError>,
        S: FnMut(Duration),
    {
        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_attempts {
            attempts += 1;

            match attempt() {
                Ok(v) => {
                    tracing::debug!(message = "sensor read succeeded", attempts = attempts);
                    return Ok(Retried {
                        value: Some(v),
                        attempts,
                        last_error,
                    });
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        message = "transient sensor read failure",
                        attempt = attempts,
                        max_attempts = self.max_attempts,
                        kind = e.kind().as_label(),
                        error = %e
                    );

                    last_error = Some(e);
                    if attempts < self.max_attempts {
                        sleep(self.interval);
                    }
                }
                Err(e) => {
                    tracing::error!(message = "permanent sensor read failure", attempt = attempts, error = %e);
                    return Err(e);
                }
            }
        }

        Ok(Retried {
            value: None,
            attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod test {
    use super::RetryPolicy;
    use crate::sensor::core::{SensorError, SensorErrorKind};
    use std::time::Duration;

    fn timeout() -> SensorError {
        SensorError::KindMsg(SensorErrorKind::ReadTimeout, "timeout")
    }

    #[test]
    fn test_all_attempts_fail() {
        for max in 1..=10 {
            let policy = RetryPolicy::new(max, Duration::from_secs(2));
            let mut calls = 0;
            let mut sleeps = Vec::new();

            let res = policy
                .run_with_sleep(
                    || -> Result<(), SensorError> {
                        calls += 1;
                        Err(timeout())
                    },
                    |d| sleeps.push(d),
                )
                .unwrap();

            assert!(res.value.is_none());
            assert_eq!(max, res.attempts);
            assert_eq!(max, calls);
            assert_eq!(max as usize - 1, sleeps.len());
            assert!(sleeps.iter().all(|&d| d == Duration::from_secs(2)));
            assert_eq!(SensorErrorKind::ReadTimeout, res.last_error.unwrap().kind());
        }
    }

    #[test]
    fn test_first_success_stops() {
        let policy = RetryPolicy::new(100, Duration::from_millis(1));
        let mut calls = 0;
        let mut sleeps = 0;

        let res = policy
            .run_with_sleep(
                || {
                    calls += 1;
                    if calls < 3 {
                        Err(SensorError::CheckSum(1, 2))
                    } else {
                        Ok(calls)
                    }
                },
                |_| sleeps += 1,
            )
            .unwrap();

        assert_eq!(Some(3), res.value);
        assert_eq!(3, res.attempts);
        assert_eq!(2, sleeps);
        assert_eq!(SensorErrorKind::Checksum, res.last_error.unwrap().kind());
    }

    #[test]
    fn test_success_on_last_attempt() {
        let policy = RetryPolicy::new(4, Duration::ZERO);
        let mut calls = 0;

        let res = policy
            .run_with_sleep(
                || {
                    calls += 1;
                    if calls == 4 {
                        Ok("reading")
                    } else {
                        Err(timeout())
                    }
                },
                |_| {},
            )
            .unwrap();

        assert_eq!(Some("reading"), res.value);
        assert_eq!(4, res.attempts);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let policy = RetryPolicy::new(10, Duration::ZERO);
        let mut calls = 0;

        let res = policy.run_with_sleep(
            || -> Result<(), SensorError> {
                calls += 1;
                Err(SensorError::KindMsg(SensorErrorKind::Initialization, "broken"))
            },
            |_| panic!("should not sleep after a permanent error"),
        );

        assert_eq!(1, calls);
        assert_eq!(SensorErrorKind::Initialization, res.unwrap_err().kind());
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(1, policy.max_attempts());

        let res = policy.run(|| Ok::<_, SensorError>(42)).unwrap();
        assert_eq!(Some(42), res.value);
        assert_eq!(1, res.attempts);
    }
}
