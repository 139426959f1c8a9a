use std::time::Duration;

use metrics::counter;

use super::{InternalEvent, error_stage, error_type};
use crate::{gate::SkipReason, runner::Stage};

#[derive(Debug)]
pub struct CaseStageTransition<'a> {
    pub case: &'a str,
    pub from: Stage,
    pub to: Stage,
}

impl InternalEvent for CaseStageTransition<'_> {
    fn emit(self) {
        debug!(
            message = "Case stage transitioned.",
            case = %self.case,
            from = ?self.from,
            to = ?self.to,
        );
    }
}

#[derive(Debug)]
pub struct CaseSkipped<'a> {
    pub case: &'a str,
    pub reason: &'a SkipReason,
}

impl InternalEvent for CaseSkipped<'_> {
    fn emit(self) {
        info!(
            message = "Case skipped by compatibility gate.",
            case = %self.case,
            reason = %self.reason,
        );
        counter!("e2e_cases_total", "verdict" => "skipped").increment(1);
    }
}

#[derive(Debug)]
pub struct CasePassed<'a> {
    pub case: &'a str,
    pub elapsed: Duration,
}

impl InternalEvent for CasePassed<'_> {
    fn emit(self) {
        info!(
            message = "Case passed.",
            case = %self.case,
            elapsed_ms = self.elapsed.as_millis() as u64,
        );
        counter!("e2e_cases_total", "verdict" => "passed").increment(1);
    }
}

#[derive(Debug)]
pub struct CaseFailed<'a, E> {
    pub case: &'a str,
    pub error: &'a E,
    pub stage: &'static str,
}

impl<E: std::fmt::Display> InternalEvent for CaseFailed<'_, E> {
    fn emit(self) {
        error!(
            message = "Case failed.",
            case = %self.case,
            error = %self.error,
            stage = self.stage,
        );
        counter!(
            "e2e_cases_total",
            "verdict" => "failed",
            "stage" => self.stage,
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct ReadinessTimedOut<'a> {
    pub case: &'a str,
    pub object: &'a str,
    pub last_status: Option<&'a str>,
}

impl InternalEvent for ReadinessTimedOut<'_> {
    fn emit(self) {
        warn!(
            message = "Primary resource never became ready.",
            case = %self.case,
            object = %self.object,
            last_status = ?self.last_status,
            error_type = error_type::TIMED_OUT,
            stage = error_stage::WAITING,
        );
        counter!("e2e_readiness_timeouts_total").increment(1);
    }
}

#[derive(Debug)]
pub struct TeardownGuardTriggered<'a> {
    pub case: &'a str,
    pub objects: usize,
}

impl InternalEvent for TeardownGuardTriggered<'_> {
    fn emit(self) {
        warn!(
            message = "Case was abandoned before teardown; cleaning up in the background.",
            case = %self.case,
            objects = self.objects,
        );
        counter!("e2e_abandoned_cases_total").increment(1);
    }
}
