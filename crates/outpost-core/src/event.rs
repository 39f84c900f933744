//! Scheduled event descriptors.
//!
//! A [`ScheduledEvent`] is a named, possibly repeating timer bound to a
//! callback by name. Events carry only plain data (the callback is resolved
//! through the [`Scheduler`](crate::scheduler::Scheduler)'s callback table at
//! fire time), so they can be cloned, compared and snapshotted freely.

use crate::fixed::Fixed64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// A primitive value handed to a callback every time its event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventParam {
    Bool(bool),
    Int(i64),
    Number(Fixed64),
    Text(String),
}

impl EventParam {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventParam::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            EventParam::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view. Integers widen to fixed-point.
    pub fn as_number(&self) -> Option<Fixed64> {
        match self {
            EventParam::Number(v) => Some(*v),
            EventParam::Int(v) => Fixed64::checked_from_num(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventParam::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for EventParam {
    fn from(v: bool) -> Self {
        EventParam::Bool(v)
    }
}

impl From<i64> for EventParam {
    fn from(v: i64) -> Self {
        EventParam::Int(v)
    }
}

impl From<Fixed64> for EventParam {
    fn from(v: Fixed64) -> Self {
        EventParam::Number(v)
    }
}

impl From<&str> for EventParam {
    fn from(v: &str) -> Self {
        EventParam::Text(v.to_string())
    }
}

impl From<String> for EventParam {
    fn from(v: String) -> Self {
        EventParam::Text(v)
    }
}

// ---------------------------------------------------------------------------
// Repeat
// ---------------------------------------------------------------------------

/// How many more times an event will fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    /// Fires every cooldown until cancelled.
    Forever,
    /// Fires this many more times, then is removed.
    Times(u32),
}

impl Repeat {
    /// Remaining fires, or `None` for [`Repeat::Forever`].
    pub fn remaining(self) -> Option<u32> {
        match self {
            Repeat::Forever => None,
            Repeat::Times(n) => Some(n),
        }
    }
}

impl Default for Repeat {
    fn default() -> Self {
        Repeat::Times(1)
    }
}

// ---------------------------------------------------------------------------
// ScheduledEvent
// ---------------------------------------------------------------------------

/// A single timed callback descriptor.
///
/// `time_to_wait` counts down from `cooldown`. When an update drives it to
/// zero or below the event fires and either rearms (repeating) or completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Unique name among the scheduler's active events.
    pub name: String,
    /// Name of the registered callback invoked on fire.
    pub callback: String,
    /// Parameters passed to the callback on every fire.
    #[serde(default)]
    pub params: Vec<EventParam>,
    /// Seconds between fires.
    pub cooldown: Fixed64,
    /// Seconds until the next fire.
    pub time_to_wait: Fixed64,
    /// Remaining fire budget.
    pub repeat: Repeat,
    /// Whether the event is included in scheduler snapshots.
    #[serde(default = "default_persistent")]
    pub persistent: bool,
}

fn default_persistent() -> bool {
    true
}

impl ScheduledEvent {
    /// A one-shot event firing `cooldown` seconds from now.
    pub fn new(name: impl Into<String>, callback: impl Into<String>, cooldown: Fixed64) -> Self {
        Self {
            name: name.into(),
            callback: callback.into(),
            params: Vec::new(),
            cooldown,
            time_to_wait: cooldown,
            repeat: Repeat::Times(1),
            persistent: true,
        }
    }

    /// An event that fires every `cooldown` seconds until cancelled.
    pub fn repeating(
        name: impl Into<String>,
        callback: impl Into<String>,
        cooldown: Fixed64,
    ) -> Self {
        Self::new(name, callback, cooldown).with_repeat(Repeat::Forever)
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    /// Override the initial wait (defaults to the cooldown).
    pub fn with_time_to_wait(mut self, time_to_wait: Fixed64) -> Self {
        self.time_to_wait = time_to_wait;
        self
    }

    pub fn with_param(mut self, param: impl Into<EventParam>) -> Self {
        self.params.push(param.into());
        self
    }

    pub fn with_params(mut self, params: Vec<EventParam>) -> Self {
        self.params = params;
        self
    }

    /// Mark the event as transient: it is skipped by snapshots.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    /// True when this event will be removed after its next fire.
    pub fn is_last_shot(&self) -> bool {
        self.repeat == Repeat::Times(1)
    }

    /// True once a finite event has used up its fires.
    pub fn is_finished(&self) -> bool {
        self.repeat == Repeat::Times(0)
    }

    /// Change the cooldown while keeping the time already elapsed since the
    /// last fire. The new wait never drops below zero.
    pub fn set_cooldown(&mut self, cooldown: Fixed64) {
        let elapsed = self.cooldown - self.time_to_wait;
        self.time_to_wait = (cooldown - elapsed).max(Fixed64::ZERO);
        self.cooldown = cooldown;
    }
}
