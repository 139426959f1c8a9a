use metrics::counter;

use super::{InternalEvent, error_stage, error_type};
use crate::predicate::Polarity;

#[derive(Debug)]
pub struct PredicatePolled<'a> {
    pub query: &'a str,
    pub polarity: Polarity,
    pub matched: bool,
    pub attempt: usize,
}

impl InternalEvent for PredicatePolled<'_> {
    fn emit(self) {
        trace!(
            message = "Polled telemetry backend.",
            query = %self.query,
            polarity = ?self.polarity,
            matched = self.matched,
            attempt = self.attempt,
        );
        counter!("e2e_predicate_polls_total").increment(1);
    }
}

#[derive(Debug)]
pub struct BackendQueryError<'a, E> {
    pub query: &'a str,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for BackendQueryError<'_, E> {
    fn emit(self) {
        warn!(
            message = "Telemetry backend query failed; will retry.",
            query = %self.query,
            error = %self.error,
            error_type = error_type::REQUEST_FAILED,
            stage = error_stage::VALIDATING,
        );
        counter!(
            "e2e_errors_total",
            "error_type" => error_type::REQUEST_FAILED,
            "stage" => error_stage::VALIDATING,
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct PredicateUnsatisfied<'a> {
    pub query: &'a str,
    pub polarity: Polarity,
    pub attempts: usize,
}

impl InternalEvent for PredicateUnsatisfied<'_> {
    fn emit(self) {
        warn!(
            message = "Predicate did not hold within its window.",
            query = %self.query,
            polarity = ?self.polarity,
            attempts = self.attempts,
        );
        counter!("e2e_predicates_unsatisfied_total").increment(1);
    }
}
