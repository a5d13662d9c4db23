//! # Retry Policy
//!
//! One bounded retry-with-pause loop shared by the modem operations
//! (connect probing, initialization, SMS send) instead of three hand-rolled
//! copies. The operation itself decides whether a given failure is worth
//! another attempt ([`Attempt::Retry`]) or terminal ([`Attempt::Fail`],
//! e.g. an explicit error reply to a required init command).

use std::thread;
use std::time::Duration;

/// Outcome of a single attempt inside a retry loop.
pub enum Attempt<T> {
    /// Operation succeeded with this value; stop retrying
    Done(T),
    /// Transient failure; try again after the pause if budget remains
    Retry,
    /// Definite failure; abort immediately without burning more attempts
    Fail,
}

/// Bounded retry budget with a fixed pause between attempts.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep between attempts (not after the last)
    pub pause: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, pause: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            pause,
        }
    }

    /// Run `op` until it succeeds, fails hard, or the budget is exhausted.
    ///
    /// `op` receives the 1-based attempt number so failures can be logged
    /// with enough context to diagnose from the journal alone.
    pub fn run<T>(&self, label: &str, mut op: impl FnMut(u32) -> Attempt<T>) -> Option<T> {
        for attempt in 1..=self.max_attempts {
            match op(attempt) {
                Attempt::Done(value) => return Some(value),
                Attempt::Fail => {
                    log::warn!(
                        "{}: hard failure on attempt {}/{}, not retrying",
                        label,
                        attempt,
                        self.max_attempts
                    );
                    return None;
                }
                Attempt::Retry => {
                    log::warn!("{}: attempt {}/{} failed", label, attempt, self.max_attempts);
                    if attempt < self.max_attempts {
                        thread::sleep(self.pause);
                    }
                }
            }
        }
        log::warn!("{}: giving up after {} attempts", label, self.max_attempts);
        None
    }
}
