use metrics::counter;

use super::{InternalEvent, error_stage, error_type};

#[derive(Debug)]
pub struct ObjectApplied<'a> {
    pub object: &'a str,
}

impl InternalEvent for ObjectApplied<'_> {
    fn emit(self) {
        debug!(message = "Applied object.", object = %self.object);
        counter!("e2e_objects_applied_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ObjectApplyError<'a, E> {
    pub object: &'a str,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for ObjectApplyError<'_, E> {
    fn emit(self) {
        error!(
            message = "Failed to apply object.",
            object = %self.object,
            error = %self.error,
            error_type = error_type::COMMAND_FAILED,
            stage = error_stage::APPLYING,
        );
        counter!(
            "e2e_errors_total",
            "error_type" => error_type::COMMAND_FAILED,
            "stage" => error_stage::APPLYING,
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct ObjectDeleted<'a> {
    pub object: &'a str,
}

impl InternalEvent for ObjectDeleted<'_> {
    fn emit(self) {
        debug!(message = "Deleted object.", object = %self.object);
        counter!("e2e_objects_deleted_total").increment(1);
    }
}

#[derive(Debug)]
pub struct ObjectDeleteError<'a, E> {
    pub object: &'a str,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for ObjectDeleteError<'_, E> {
    fn emit(self) {
        error!(
            message = "Failed to delete object; it may leak into later runs.",
            object = %self.object,
            error = %self.error,
            error_type = error_type::COMMAND_FAILED,
            stage = error_stage::TEARDOWN,
        );
        counter!("e2e_teardown_errors_total").increment(1);
    }
}
