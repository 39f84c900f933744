//! Outpost Core -- shared simulation primitives for colony-sim games.
//!
//! This crate provides the deterministic fixed-point arithmetic, identifiers,
//! state hashing and the event [`scheduler::Scheduler`] that the utility
//! network and simulation crates build on.
//!
//! # Scheduler Update Pipeline
//!
//! Each call to [`scheduler::Scheduler::update`] runs three phases:
//!
//! 1. **Countdown** -- Subtract the elapsed time from every active event and
//!    fire the due ones in registration order.
//! 2. **Purge** -- Remove finite events whose last repeat just fired.
//! 3. **Apply** -- Apply mutations returned by callbacks (register, replace,
//!    cancel) and collect emitted signals into the report.
//!
//! # Key Types
//!
//! - [`scheduler::Scheduler`] -- Active events plus named callbacks.
//! - [`event::ScheduledEvent`] -- Plain-data timer descriptor.
//! - [`prototype::EventPrototype`] -- Data-driven event template.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.
//! - [`id::NodeId`] / [`id::GridId`] -- Utility network identifiers.
//! - [`sim::StateHash`] -- FNV-1a hash for desync detection.

pub mod event;
pub mod fixed;
pub mod id;
pub mod prototype;
pub mod scheduler;
pub mod sim;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
