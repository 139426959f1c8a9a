//! Harness-internal events.
//!
//! Every noteworthy thing the harness does is described by a small struct that
//! knows how to log itself and which counters to bump. Call sites go through
//! [`emit!`] so that the logging and the metrics can never drift apart.

mod backend;
mod cluster;
mod runner;

pub use self::backend::*;
pub use self::cluster::*;
pub use self::runner::*;

pub trait InternalEvent: Sized {
    fn emit(self);
}

#[doc(hidden)]
pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}

pub mod error_stage {
    pub const LOADING: &str = "loading";
    pub const APPLYING: &str = "applying";
    pub const WAITING: &str = "waiting";
    pub const VALIDATING: &str = "validating";
    pub const TEARDOWN: &str = "teardown";
}

pub mod error_type {
    pub const COMMAND_FAILED: &str = "command_failed";
    pub const REQUEST_FAILED: &str = "request_failed";
    pub const TIMED_OUT: &str = "timed_out";
}
