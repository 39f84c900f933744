//! Shared test helpers for integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]` so these helpers
//! are available in unit tests, integration tests, and benchmarks (via the
//! `test-utils` feature).

use std::cell::Cell;
use std::rc::Rc;

use crate::event::{Repeat, ScheduledEvent};
use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::scheduler::{Scheduler, SchedulerMutation};

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    f64_to_fixed64(v)
}

// ===========================================================================
// Scheduler helpers
// ===========================================================================

/// Shared fire counter handed out by [`install_counter`].
pub type FireCounter = Rc<Cell<u32>>;

/// Register a callback named `name` that counts how often it is invoked.
pub fn install_counter(scheduler: &mut Scheduler, name: &str) -> FireCounter {
    let counter: FireCounter = Rc::new(Cell::new(0));
    let c = Rc::clone(&counter);
    scheduler.register_callback(name, move |_| {
        c.set(c.get() + 1);
        Vec::<SchedulerMutation>::new()
    });
    counter
}

/// A repeating event bound to `callback`.
pub fn every(name: &str, callback: &str, seconds: f64) -> ScheduledEvent {
    ScheduledEvent::repeating(name, callback, fixed(seconds))
}

/// A finite event bound to `callback` that fires `times` times.
pub fn times(name: &str, callback: &str, seconds: f64, times: u32) -> ScheduledEvent {
    ScheduledEvent::new(name, callback, fixed(seconds)).with_repeat(Repeat::Times(times))
}

/// Advance the scheduler `steps` times by `dt` seconds each.
pub fn run_for(scheduler: &mut Scheduler, steps: u32, dt: f64) {
    for _ in 0..steps {
        scheduler.update(fixed(dt));
    }
}
