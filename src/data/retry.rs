//! Retry/backoff for rate-limited requests, as an explicit state machine.
//!
//! The machine only decides; the caller performs requests and waits:
//!
//! ```text
//! Ready{n} --record(Succeeded)--------------------> Succeeded
//! Ready{n} --record(Failed)-----------------------> Abandoned{Fatal}
//! Ready{n} --record(RateLimited), n == budget-----> Abandoned{Exhausted}
//! Ready{n} --record(RateLimited), n <  budget-----> Backoff{wait, n+1} --resume()--> Ready{n+1}
//! ```
//!
//! The wait is the server's `Retry-After` when given, else the running delay
//! (starting at `base_delay`). The delay used is doubled for the next wait.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of requests allowed for one batch.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// What happened on one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Succeeded,
    RateLimited { retry_after: Option<Duration> },
    /// Non-retryable: other HTTP errors, network errors, bad payloads.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    Exhausted,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Issue request number `attempt` (1-based).
    Ready { attempt: u32 },
    /// Wait `wait`, then `resume()`.
    Backoff { wait: Duration, next_attempt: u32 },
    Succeeded { attempts: u32 },
    Abandoned { attempts: u32, reason: AbandonReason },
}

impl RetryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RetryState::Succeeded { .. } | RetryState::Abandoned { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    state: RetryState,
    attempts: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let state = if policy.max_attempts == 0 {
            RetryState::Abandoned {
                attempts: 0,
                reason: AbandonReason::Exhausted,
            }
        } else {
            RetryState::Ready { attempt: 1 }
        };
        Self {
            policy,
            state,
            attempts: 0,
            delay: policy.base_delay,
        }
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Feed the outcome of the request issued in `Ready`.
    ///
    /// Outside `Ready` this is a no-op and returns the current state.
    pub fn record(&mut self, outcome: Attempt) -> RetryState {
        if !matches!(self.state, RetryState::Ready { .. }) {
            return self.state;
        }
        self.attempts += 1;
        let attempts = self.attempts;

        self.state = match outcome {
            Attempt::Succeeded => RetryState::Succeeded { attempts },
            Attempt::Failed => RetryState::Abandoned {
                attempts,
                reason: AbandonReason::Fatal,
            },
            Attempt::RateLimited { .. } if attempts >= self.policy.max_attempts => RetryState::Abandoned {
                attempts,
                reason: AbandonReason::Exhausted,
            },
            Attempt::RateLimited { retry_after } => {
                let wait = retry_after.unwrap_or(self.delay);
                self.delay = wait.saturating_mul(2);
                RetryState::Backoff {
                    wait,
                    next_attempt: attempts + 1,
                }
            }
        };
        self.state
    }

    /// Leave `Backoff` once the wait has been served.
    pub fn resume(&mut self) -> RetryState {
        if let RetryState::Backoff { next_attempt, .. } = self.state {
            self.state = RetryState::Ready {
                attempt: next_attempt,
            };
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(30),
        }
    }

    fn limited() -> Attempt {
        Attempt::RateLimited { retry_after: None }
    }

    #[test]
    fn success_on_first_attempt() {
        let mut b = Backoff::new(policy(5));
        assert_eq!(b.state(), RetryState::Ready { attempt: 1 });
        assert_eq!(b.record(Attempt::Succeeded), RetryState::Succeeded { attempts: 1 });
    }

    #[test]
    fn always_rate_limited_abandons_after_budget() {
        let mut b = Backoff::new(policy(5));
        let mut waits = Vec::new();
        while !b.state().is_terminal() {
            match b.state() {
                RetryState::Ready { .. } => {
                    b.record(limited());
                }
                RetryState::Backoff { wait, .. } => {
                    waits.push(wait.as_secs());
                    b.resume();
                }
                _ => unreachable!(),
            }
        }
        assert_eq!(
            b.state(),
            RetryState::Abandoned {
                attempts: 5,
                reason: AbandonReason::Exhausted
            }
        );
        assert_eq!(waits, vec![30, 60, 120, 240]);
    }

    #[test]
    fn retry_after_overrides_and_seeds_the_doubling() {
        let mut b = Backoff::new(policy(5));
        let s = b.record(Attempt::RateLimited {
            retry_after: Some(Duration::from_secs(7)),
        });
        assert_eq!(
            s,
            RetryState::Backoff {
                wait: Duration::from_secs(7),
                next_attempt: 2
            }
        );
        b.resume();
        assert_eq!(
            b.record(limited()),
            RetryState::Backoff {
                wait: Duration::from_secs(14),
                next_attempt: 3
            }
        );
    }

    #[test]
    fn other_failures_are_not_retried() {
        let mut b = Backoff::new(policy(5));
        assert_eq!(
            b.record(Attempt::Failed),
            RetryState::Abandoned {
                attempts: 1,
                reason: AbandonReason::Fatal
            }
        );
        // Terminal states ignore further input.
        assert!(b.record(Attempt::Succeeded).is_terminal());
        assert_eq!(b.attempts(), 1);
    }

    #[test]
    fn recovers_after_rate_limit() {
        let mut b = Backoff::new(policy(3));
        b.record(limited());
        assert_eq!(b.resume(), RetryState::Ready { attempt: 2 });
        assert_eq!(b.record(Attempt::Succeeded), RetryState::Succeeded { attempts: 2 });
    }

    #[test]
    fn zero_budget_never_requests() {
        let b = Backoff::new(policy(0));
        assert!(b.state().is_terminal());
        assert_eq!(b.attempts(), 0);
    }
}
