//! A recipe-driven integration test harness.
//!
//! A test case loads a declarative recipe, isolates it with a per-run suffix,
//! customizes it through a fold of pure functions, applies it to a cluster and
//! then polls a telemetry backend until the expected records show up (or
//! provably don't). Every applied object is torn down again, whatever the
//! verdict.

#![deny(unreachable_pub)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;

pub mod backend;
pub mod beat;
pub mod builder;
pub mod cluster;
pub mod context;
pub mod evaluate;
pub mod gate;
pub mod predicate;
pub mod recipe;
pub mod resource;
pub mod runner;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_util;
mod util;
pub mod version;

pub use self::{
    builder::{Builder, Customization, Plan},
    context::Context,
    predicate::{Predicate, Query},
    runner::{CaseReport, Runner, TestCase, Verdict},
    version::Version,
};
