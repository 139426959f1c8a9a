//! Time-bounded evaluation of predicates against a telemetry backend.
//!
//! Presence polls until the first match. Absence has to watch the whole
//! window, so an absence predicate can only be satisfied once its deadline has
//! passed; a match found late in the window is still caught.

use std::{fmt, time::Duration};

use futures::future::join_all;
use tokio::time::{Instant, sleep_until, timeout_at};

use crate::{
    backend::{BackendError, TelemetryBackend},
    internal_events::{BackendQueryError, PredicatePolled, PredicateUnsatisfied},
    predicate::{Polarity, Predicate},
};

/// Upper bound on the polls spent on a single predicate. Long windows stretch
/// the interval rather than poll more often.
pub const MAX_POLL_ATTEMPTS: usize = 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    /// Presence: nothing matched before the deadline.
    NeverMatched,
    /// Absence: a matching record showed up.
    Matched,
    /// Absence: the backend never answered, so nothing was observed at all.
    NoSuccessfulPoll { last_error: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationFailure {
    pub predicate: Predicate,
    pub attempts: usize,
    pub reason: FailureReason,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::NeverMatched => write!(
                f,
                "{} was not satisfied after {} polls",
                self.predicate, self.attempts
            ),
            FailureReason::Matched => write!(
                f,
                "{} was violated on poll {}",
                self.predicate, self.attempts
            ),
            FailureReason::NoSuccessfulPoll { last_error } => write!(
                f,
                "{} could not be checked, every one of {} polls failed (last error: {})",
                self.predicate,
                self.attempts,
                last_error.as_deref().unwrap_or("none")
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Satisfied { attempts: usize },
    Unsatisfied(ValidationFailure),
}

impl Outcome {
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied { .. })
    }
}

/// Widens `interval` so that covering `window` never takes more than
/// [`MAX_POLL_ATTEMPTS`] polls.
fn effective_interval(window: Duration, interval: Duration) -> Duration {
    // One poll at the start, one clipped to the deadline.
    let floor = window / (MAX_POLL_ATTEMPTS as u32 - 2);
    interval.max(floor).max(Duration::from_millis(1))
}

/// Polls `backend` for `predicate` at a fixed interval until the outcome is
/// known or `deadline` passes. Backend errors are logged and retried; a poll
/// still pending at the deadline is abandoned and counts as failed.
pub async fn evaluate(
    predicate: &Predicate,
    backend: &dyn TelemetryBackend,
    deadline: Instant,
    interval: Duration,
) -> Outcome {
    let query = predicate.query();
    let rendered = query.to_string();
    let polarity = predicate.polarity();
    let interval = effective_interval(deadline.saturating_duration_since(Instant::now()), interval);

    let mut attempts = 0;
    let mut successes = 0;
    let mut last_error = None;
    loop {
        attempts += 1;
        let polled = timeout_at(deadline, backend.has_match(query))
            .await
            .unwrap_or(Err(BackendError::DeadlineExceeded));
        match polled {
            Ok(matched) => {
                successes += 1;
                emit!(PredicatePolled {
                    query: &rendered,
                    polarity,
                    matched,
                    attempt: attempts,
                });
                match (polarity, matched) {
                    (Polarity::Presence, true) => return Outcome::Satisfied { attempts },
                    (Polarity::Absence, true) => {
                        return unsatisfied(predicate, &rendered, attempts, FailureReason::Matched);
                    }
                    _ => {}
                }
            }
            Err(error) => {
                emit!(BackendQueryError {
                    query: &rendered,
                    error: &error,
                });
                last_error = Some(error.to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline || attempts >= MAX_POLL_ATTEMPTS {
            break;
        }
        // The last poll lands on the deadline itself.
        sleep_until((now + interval).min(deadline)).await;
    }

    match polarity {
        Polarity::Presence => {
            unsatisfied(predicate, &rendered, attempts, FailureReason::NeverMatched)
        }
        Polarity::Absence if successes == 0 => unsatisfied(
            predicate,
            &rendered,
            attempts,
            FailureReason::NoSuccessfulPoll { last_error },
        ),
        Polarity::Absence => Outcome::Satisfied { attempts },
    }
}

fn unsatisfied(
    predicate: &Predicate,
    rendered: &str,
    attempts: usize,
    reason: FailureReason,
) -> Outcome {
    emit!(PredicateUnsatisfied {
        query: rendered,
        polarity: predicate.polarity(),
        attempts,
    });
    Outcome::Unsatisfied(ValidationFailure {
        predicate: predicate.clone(),
        attempts,
        reason,
    })
}

/// Evaluates every predicate concurrently over the same window and returns
/// the ones that did not hold. An empty result means all of them did.
pub async fn evaluate_all(
    predicates: &[Predicate],
    backend: &dyn TelemetryBackend,
    deadline: Instant,
    interval: Duration,
) -> Vec<ValidationFailure> {
    join_all(
        predicates
            .iter()
            .map(|predicate| evaluate(predicate, backend, deadline, interval)),
    )
    .await
    .into_iter()
    .filter_map(|outcome| match outcome {
        Outcome::Satisfied { .. } => None,
        Outcome::Unsatisfied(failure) => Some(failure),
    })
    .collect()
}
