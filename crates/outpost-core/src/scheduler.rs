//! Deterministic event scheduler.
//!
//! The [`Scheduler`] owns the active [`ScheduledEvent`]s and a table of named
//! callbacks. Each [`Scheduler::update`] call advances every event by the
//! elapsed time, fires the due ones (at most once per event per call) and
//! rearms or retires them.
//!
//! # Deferred mutation
//!
//! Callbacks never touch the scheduler directly. Like reactive event
//! handlers, they return [`SchedulerMutation`]s that are applied after the
//! pass completes and after finished events are purged. A callback can
//! therefore register, replace or cancel events, but the effect is only
//! visible on the next update.

use std::collections::{BTreeMap, BTreeSet};

use crate::event::{EventParam, Repeat, ScheduledEvent};
use crate::fixed::Fixed64;
use crate::prototype::{EventPrototype, PrototypeRegistry, ScheduleOverrides};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors reported by scheduler operations. None of them leave the active
/// set partially modified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("an event named '{0}' is already scheduled")]
    DuplicateName(String),
    #[error("no scheduled event named '{0}'")]
    NotFound(String),
    #[error("no callback registered as '{0}'")]
    UnknownCallback(String),
    #[error("no event prototype named '{0}'")]
    UnknownPrototype(String),
    #[error("event '{0}' has a negative cooldown or wait")]
    InvalidCooldown(String),
    #[error("event '{0}' has no repeats left")]
    NoRepeatsLeft(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What happens to the time by which an update overshoots a fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Rearm to the full cooldown. Long frames drift the schedule later.
    #[default]
    Discard,
    /// Rearm to `cooldown - overflow`, never below zero.
    Carry,
}

/// Default firing tolerance: 2^-20 seconds, just under a microsecond.
pub const DEFAULT_FIRE_TOLERANCE: Fixed64 = Fixed64::from_bits(1 << 12);

fn default_fire_tolerance() -> Fixed64 {
    DEFAULT_FIRE_TOLERANCE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub overflow: OverflowPolicy,
    /// An event is due once its wait is at or below this. Frame times such
    /// as 1/60 s round in fixed point, so a zero cutoff would fire a frame
    /// late.
    #[serde(default = "default_fire_tolerance")]
    pub fire_tolerance: Fixed64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            overflow: OverflowPolicy::default(),
            fire_tolerance: DEFAULT_FIRE_TOLERANCE,
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks and mutations
// ---------------------------------------------------------------------------

/// What a callback sees when its event fires.
#[derive(Debug, Clone, Copy)]
pub struct Firing<'a> {
    pub name: &'a str,
    pub params: &'a [EventParam],
    /// Fires left after this one, `None` when repeating forever.
    pub remaining: Option<u32>,
    /// How far past zero the countdown went this update.
    pub overflow: Fixed64,
}

/// A request from a callback to its host, passed through untouched in
/// [`UpdateReport::signals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub params: Vec<EventParam>,
}

impl Signal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, param: impl Into<EventParam>) -> Self {
        self.params.push(param.into());
        self
    }
}

/// A change a callback wants applied once the current pass is over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerMutation {
    Register(ScheduledEvent),
    Replace(ScheduledEvent),
    Unregister(String),
    Signal(Signal),
}

/// A named callback. Returns the mutations to apply after the pass.
pub type EventCallback = Box<dyn FnMut(&Firing<'_>) -> Vec<SchedulerMutation>>;

/// Outcome of a single [`Scheduler::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Names of events that fired, in firing order.
    pub fired: Vec<String>,
    /// Names of events removed because their last repeat fired.
    pub completed: Vec<String>,
    /// Signals emitted by callbacks, for the host to act on.
    pub signals: Vec<Signal>,
    /// Deferred mutations that could not be applied.
    pub rejected: Vec<SchedulerError>,
}

/// The persistent part of a scheduler's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub events: Vec<ScheduledEvent>,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Tracks and dispatches scheduled events.
///
/// Events fire in registration order. Names are unique among active events.
pub struct Scheduler {
    events: Vec<ScheduledEvent>,
    callbacks: BTreeMap<String, EventCallback>,
    prototypes: PrototypeRegistry,
    config: SchedulerConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("events", &self.events)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .field("prototypes", &self.prototypes)
            .field("config", &self.config)
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            events: Vec::new(),
            callbacks: BTreeMap::new(),
            prototypes: PrototypeRegistry::new(),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SchedulerConfig) {
        self.config = config;
    }

    // -- Callbacks ----------------------------------------------------------

    /// Install a named callback, replacing any previous one of that name.
    pub fn register_callback<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: FnMut(&Firing<'_>) -> Vec<SchedulerMutation> + 'static,
    {
        let name = name.into();
        debug!(callback = %name, "callback registered");
        self.callbacks.insert(name, Box::new(callback));
    }

    /// Remove a callback. Events still bound to it keep counting down but
    /// fire into the void.
    pub fn unregister_callback(&mut self, name: &str) -> bool {
        self.callbacks.remove(name).is_some()
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    // -- Prototypes ---------------------------------------------------------

    pub fn register_prototype(&mut self, prototype: EventPrototype) {
        self.prototypes.insert(prototype);
    }

    pub fn prototypes(&self) -> &PrototypeRegistry {
        &self.prototypes
    }

    pub fn prototypes_mut(&mut self) -> &mut PrototypeRegistry {
        &mut self.prototypes
    }

    /// Instantiate a prototype by name and register the resulting event.
    pub fn schedule(
        &mut self,
        prototype: &str,
        overrides: ScheduleOverrides,
    ) -> Result<(), SchedulerError> {
        let event = self
            .prototypes
            .get(prototype)
            .ok_or_else(|| SchedulerError::UnknownPrototype(prototype.to_string()))?
            .instantiate(&overrides);
        self.register_event(event)
    }

    // -- Registration -------------------------------------------------------

    fn validate(&self, event: &ScheduledEvent) -> Result<(), SchedulerError> {
        if event.cooldown < Fixed64::ZERO || event.time_to_wait < Fixed64::ZERO {
            return Err(SchedulerError::InvalidCooldown(event.name.clone()));
        }
        if event.is_finished() {
            return Err(SchedulerError::NoRepeatsLeft(event.name.clone()));
        }
        if !self.callbacks.contains_key(&event.callback) {
            return Err(SchedulerError::UnknownCallback(event.callback.clone()));
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.events.iter().position(|e| e.name == name)
    }

    /// Add an event to the active set.
    pub fn register_event(&mut self, event: ScheduledEvent) -> Result<(), SchedulerError> {
        if self.position(&event.name).is_some() {
            return Err(SchedulerError::DuplicateName(event.name));
        }
        self.validate(&event)?;
        debug!(event = %event.name, wait = %event.time_to_wait, "event registered");
        self.events.push(event);
        Ok(())
    }

    /// Add an event, replacing an active event of the same name in place.
    /// Returns the replaced event, if any.
    pub fn replace_event(
        &mut self,
        event: ScheduledEvent,
    ) -> Result<Option<ScheduledEvent>, SchedulerError> {
        self.validate(&event)?;
        match self.position(&event.name) {
            Some(idx) => {
                debug!(event = %event.name, "event replaced");
                Ok(Some(std::mem::replace(&mut self.events[idx], event)))
            }
            None => {
                self.events.push(event);
                Ok(None)
            }
        }
    }

    /// Cancel an event by name, returning it.
    pub fn unregister_event(&mut self, name: &str) -> Result<ScheduledEvent, SchedulerError> {
        let idx = self
            .position(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        debug!(event = %name, "event cancelled");
        Ok(self.events.remove(idx))
    }

    /// Change an event's cooldown, keeping the time elapsed since it last
    /// fired.
    pub fn set_cooldown(&mut self, name: &str, cooldown: Fixed64) -> Result<(), SchedulerError> {
        if cooldown < Fixed64::ZERO {
            return Err(SchedulerError::InvalidCooldown(name.to_string()));
        }
        let idx = self
            .position(name)
            .ok_or_else(|| SchedulerError::NotFound(name.to_string()))?;
        self.events[idx].set_cooldown(cooldown);
        Ok(())
    }

    /// Cancel every event. Callbacks and prototypes are kept.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    // -- Queries ------------------------------------------------------------

    /// Active events in firing order.
    pub fn events(&self) -> &[ScheduledEvent] {
        &self.events
    }

    pub fn get(&self, name: &str) -> Option<&ScheduledEvent> {
        self.events.iter().find(|e| e.name == name)
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Seconds until the soonest event fires, `None` when nothing is
    /// scheduled.
    pub fn time_to_next_event(&self) -> Option<Fixed64> {
        self.events.iter().map(|e| e.time_to_wait).min()
    }

    // -- Update -------------------------------------------------------------

    /// Advance every active event by `dt` seconds, firing the due ones.
    ///
    /// Each event fires at most once per call, however large `dt` is. An
    /// event is due when its wait is within
    /// [`SchedulerConfig::fire_tolerance`] of zero. Negative `dt` is treated
    /// as zero.
    pub fn update(&mut self, dt: Fixed64) -> UpdateReport {
        let dt = dt.max(Fixed64::ZERO);
        let tolerance = self.config.fire_tolerance.max(Fixed64::ZERO);
        let mut report = UpdateReport::default();
        let mut pending: Vec<SchedulerMutation> = Vec::new();

        for event in &mut self.events {
            event.time_to_wait -= dt;
            if event.time_to_wait > tolerance {
                continue;
            }

            // Negative when the event fired within tolerance of zero.
            let late_by = -event.time_to_wait;
            let overflow = late_by.max(Fixed64::ZERO);
            let remaining = event.repeat.remaining().map(|n| n.saturating_sub(1));

            match self.callbacks.get_mut(&event.callback) {
                Some(callback) => {
                    let firing = Firing {
                        name: &event.name,
                        params: &event.params,
                        remaining,
                        overflow,
                    };
                    pending.extend(callback(&firing));
                }
                None => {
                    warn!(event = %event.name, callback = %event.callback, "callback missing at fire time");
                }
            }
            trace!(event = %event.name, %overflow, "event fired");
            report.fired.push(event.name.clone());

            let rearm = match self.config.overflow {
                OverflowPolicy::Discard => event.cooldown,
                OverflowPolicy::Carry => (event.cooldown - late_by).max(Fixed64::ZERO),
            };
            match event.repeat {
                Repeat::Forever => event.time_to_wait = rearm,
                Repeat::Times(n) if n > 1 => {
                    event.repeat = Repeat::Times(n - 1);
                    event.time_to_wait = rearm;
                }
                Repeat::Times(_) => {
                    event.repeat = Repeat::Times(0);
                    event.time_to_wait = Fixed64::ZERO;
                }
            }
        }

        let completed = &mut report.completed;
        self.events.retain(|e| {
            if e.is_finished() {
                completed.push(e.name.clone());
                false
            } else {
                true
            }
        });

        for mutation in pending {
            let result = match mutation {
                SchedulerMutation::Register(event) => self.register_event(event),
                SchedulerMutation::Replace(event) => self.replace_event(event).map(|_| ()),
                SchedulerMutation::Unregister(name) => self.unregister_event(&name).map(|_| ()),
                SchedulerMutation::Signal(signal) => {
                    report.signals.push(signal);
                    Ok(())
                }
            };
            if let Err(err) = result {
                warn!(error = %err, "deferred scheduler mutation rejected");
                report.rejected.push(err);
            }
        }

        report
    }

    // -- Save / restore -----------------------------------------------------

    /// Capture all persistent events.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            events: self.events.iter().filter(|e| e.persistent).cloned().collect(),
        }
    }

    /// Replace the active set with the events of a snapshot.
    ///
    /// Every record is validated before anything changes; on error the
    /// scheduler is left as it was.
    pub fn restore(&mut self, snapshot: SchedulerSnapshot) -> Result<(), SchedulerError> {
        let mut seen = BTreeSet::new();
        for event in &snapshot.events {
            if !seen.insert(event.name.as_str()) {
                return Err(SchedulerError::DuplicateName(event.name.clone()));
            }
            self.validate(event)?;
        }
        debug!(count = snapshot.events.len(), "scheduler restored");
        self.events = snapshot.events;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn fixed(v: f64) -> Fixed64 {
        Fixed64::from_num(v)
    }

    fn noop(_: &Firing<'_>) -> Vec<SchedulerMutation> {
        Vec::new()
    }

    /// Scheduler with a `"count"` callback that bumps the returned counter.
    fn counting_scheduler() -> (Scheduler, Rc<Cell<u32>>) {
        let mut scheduler = Scheduler::new();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        scheduler.register_callback("count", move |_| {
            c.set(c.get() + 1);
            Vec::new()
        });
        (scheduler, count)
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    #[test]
    fn register_and_unregister() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(3.0)))
            .unwrap();
        assert!(scheduler.is_registered("tick"));
        assert_eq!(scheduler.len(), 1);

        let removed = scheduler.unregister_event("tick").unwrap();
        assert_eq!(removed.name, "tick");
        assert!(scheduler.is_empty());
    }

    #[test]
    fn duplicate_name_rejected_and_original_untouched() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("raid", "count", fixed(10.0)))
            .unwrap();
        scheduler.update(fixed(4.0));

        let err = scheduler
            .register_event(ScheduledEvent::repeating("raid", "count", fixed(1.0)))
            .unwrap_err();
        assert_eq!(err, SchedulerError::DuplicateName("raid".into()));

        let evt = scheduler.get("raid").unwrap();
        assert_eq!(evt.cooldown, fixed(10.0));
        assert_eq!(evt.time_to_wait, fixed(6.0));
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn unregister_missing_is_not_found() {
        let mut scheduler = Scheduler::new();
        assert_eq!(
            scheduler.unregister_event("ghost").unwrap_err(),
            SchedulerError::NotFound("ghost".into())
        );
    }

    #[test]
    fn registration_validates_before_mutating() {
        let mut scheduler = Scheduler::new();
        scheduler.register_callback("noop", noop);

        let err = scheduler
            .register_event(ScheduledEvent::new("a", "missing", fixed(1.0)))
            .unwrap_err();
        assert_eq!(err, SchedulerError::UnknownCallback("missing".into()));

        let err = scheduler
            .register_event(ScheduledEvent::new("b", "noop", fixed(-1.0)))
            .unwrap_err();
        assert_eq!(err, SchedulerError::InvalidCooldown("b".into()));

        let err = scheduler
            .register_event(ScheduledEvent::new("c", "noop", fixed(1.0)).with_repeat(Repeat::Times(0)))
            .unwrap_err();
        assert_eq!(err, SchedulerError::NoRepeatsLeft("c".into()));

        assert!(scheduler.is_empty());
    }

    #[test]
    fn replace_event_swaps_in_place() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("a", "count", fixed(5.0)))
            .unwrap();
        scheduler
            .register_event(ScheduledEvent::repeating("b", "count", fixed(5.0)))
            .unwrap();

        let old = scheduler
            .replace_event(ScheduledEvent::repeating("a", "count", fixed(1.0)))
            .unwrap();
        assert_eq!(old.map(|e| e.cooldown), Some(fixed(5.0)));

        let names: Vec<&str> = scheduler.events().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(scheduler.get("a").unwrap().cooldown, fixed(1.0));
    }

    // -----------------------------------------------------------------------
    // Firing
    // -----------------------------------------------------------------------

    #[test]
    fn repeating_event_fires_once_per_cooldown_and_rearms() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(1.0)))
            .unwrap();

        for _ in 0..4 {
            scheduler.update(fixed(0.25));
        }

        assert_eq!(count.get(), 1);
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, fixed(1.0));
    }

    #[test]
    fn finite_event_fires_n_times_then_is_removed() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler
            .register_event(
                ScheduledEvent::new("trader", "count", fixed(2.0)).with_repeat(Repeat::Times(3)),
            )
            .unwrap();

        let mut completed = Vec::new();
        for _ in 0..20 {
            let report = scheduler.update(fixed(1.0));
            completed.extend(report.completed);
        }

        assert_eq!(count.get(), 3);
        assert!(!scheduler.is_registered("trader"));
        assert_eq!(completed, vec!["trader".to_string()]);
    }

    #[test]
    fn tally_matches_interleaved_cooldowns() {
        let mut scheduler = Scheduler::new();
        let tally = Rc::new(Cell::new(0));

        let t = Rc::clone(&tally);
        scheduler.register_callback("plus_one", move |_| {
            t.set(t.get() + 1);
            Vec::new()
        });
        let t = Rc::clone(&tally);
        scheduler.register_callback("plus_ten", move |_| {
            t.set(t.get() + 10);
            Vec::new()
        });

        scheduler
            .register_event(ScheduledEvent::repeating("one", "plus_one", fixed(2.0)))
            .unwrap();
        scheduler
            .register_event(ScheduledEvent::repeating("ten", "plus_ten", fixed(3.0)))
            .unwrap();

        let expected = [0, 0, 1, 11, 12, 12, 23, 23, 24, 34, 35];
        for want in expected {
            assert_eq!(tally.get(), want);
            scheduler.update(fixed(1.0));
        }
    }

    #[test]
    fn large_delta_fires_only_once() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(1.0)))
            .unwrap();

        let report = scheduler.update(fixed(5.0));

        assert_eq!(count.get(), 1);
        assert_eq!(report.fired, vec!["tick".to_string()]);
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, fixed(1.0));
    }

    #[test]
    fn carry_policy_keeps_overflow() {
        let mut scheduler = Scheduler::with_config(SchedulerConfig {
            overflow: OverflowPolicy::Carry,
            ..SchedulerConfig::default()
        });
        let overflow_seen = Rc::new(Cell::new(Fixed64::ZERO));
        let o = Rc::clone(&overflow_seen);
        scheduler.register_callback("watch", move |f| {
            o.set(f.overflow);
            Vec::new()
        });
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "watch", fixed(2.0)))
            .unwrap();

        scheduler.update(fixed(2.5));
        assert_eq!(overflow_seen.get(), fixed(0.5));
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, fixed(1.5));

        // Overflow larger than the cooldown clamps the wait at zero.
        scheduler.update(fixed(10.0));
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, Fixed64::ZERO);
    }

    #[test]
    fn rounded_frame_times_fire_on_the_last_frame() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(1.0)))
            .unwrap();

        for _ in 0..59 {
            scheduler.update(fixed(1.0 / 60.0));
        }
        assert_eq!(count.get(), 0);
        scheduler.update(fixed(1.0 / 60.0));
        assert_eq!(count.get(), 1);
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, fixed(1.0));

        // Nine more seconds at 60 fps: no drift under the default discard.
        for _ in 0..9 * 60 {
            scheduler.update(fixed(1.0 / 60.0));
        }
        assert_eq!(count.get(), 10);

        let (mut thirds, thirds_count) = counting_scheduler();
        thirds
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(1.0)))
            .unwrap();
        for _ in 0..3 {
            thirds.update(fixed(1.0 / 3.0));
        }
        assert_eq!(thirds_count.get(), 1);
    }

    #[test]
    fn zero_fire_tolerance_compares_exactly() {
        let mut scheduler = Scheduler::with_config(SchedulerConfig {
            fire_tolerance: Fixed64::ZERO,
            ..SchedulerConfig::default()
        });
        let count = Rc::new(Cell::new(0u32));
        let c = Rc::clone(&count);
        scheduler.register_callback("count", move |_| {
            c.set(c.get() + 1);
            Vec::new()
        });
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(1.0)))
            .unwrap();

        // 1/3 rounds down, so three thirds fall one ulp short.
        for _ in 0..3 {
            scheduler.update(fixed(1.0 / 3.0));
        }
        assert_eq!(count.get(), 0);
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, Fixed64::DELTA);
    }

    #[test]
    fn carry_keeps_phase_when_firing_within_tolerance() {
        let mut scheduler = Scheduler::with_config(SchedulerConfig {
            overflow: OverflowPolicy::Carry,
            ..SchedulerConfig::default()
        });
        let overflow_seen = Rc::new(Cell::new(fixed(1.0)));
        let o = Rc::clone(&overflow_seen);
        scheduler.register_callback("watch", move |f| {
            o.set(f.overflow);
            Vec::new()
        });
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "watch", fixed(1.0)))
            .unwrap();

        for _ in 0..3 {
            scheduler.update(fixed(1.0 / 3.0));
        }
        assert_eq!(overflow_seen.get(), Fixed64::ZERO);
        // The unspent ulp carries into the next wait.
        assert_eq!(
            scheduler.get("tick").unwrap().time_to_wait,
            fixed(1.0) + Fixed64::DELTA
        );
    }

    #[test]
    fn zero_delta_fires_nothing_pending() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::new("later", "count", fixed(1.0)))
            .unwrap();
        let report = scheduler.update(Fixed64::ZERO);
        assert!(report.fired.is_empty());
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn negative_delta_is_ignored() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::new("later", "count", fixed(1.0)))
            .unwrap();
        scheduler.update(fixed(-3.0));
        assert_eq!(scheduler.get("later").unwrap().time_to_wait, fixed(1.0));
    }

    #[test]
    fn firing_exposes_params_and_remaining() {
        let mut scheduler = Scheduler::new();
        let seen: Rc<RefCell<Vec<(Vec<EventParam>, Option<u32>)>>> = Rc::default();
        let s = Rc::clone(&seen);
        scheduler.register_callback("spawn", move |f| {
            s.borrow_mut().push((f.params.to_vec(), f.remaining));
            Vec::new()
        });
        scheduler
            .register_event(
                ScheduledEvent::new("wave", "spawn", fixed(1.0))
                    .with_repeat(Repeat::Times(2))
                    .with_param("raiders")
                    .with_param(4i64),
            )
            .unwrap();

        scheduler.update(fixed(1.0));
        scheduler.update(fixed(1.0));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, vec![EventParam::from("raiders"), EventParam::Int(4)]);
        assert_eq!(seen[0].1, Some(1));
        assert_eq!(seen[1].1, Some(0));
    }

    // -----------------------------------------------------------------------
    // Deferred mutations
    // -----------------------------------------------------------------------

    #[test]
    fn callback_registration_is_visible_next_update() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler.register_callback("spawn_child", |_| {
            vec![SchedulerMutation::Register(ScheduledEvent::new(
                "child",
                "count",
                Fixed64::ZERO,
            ))]
        });
        scheduler
            .register_event(ScheduledEvent::new("parent", "spawn_child", fixed(1.0)))
            .unwrap();

        let report = scheduler.update(fixed(1.0));
        assert_eq!(report.fired, vec!["parent".to_string()]);
        assert_eq!(count.get(), 0, "child must not fire during the same pass");
        assert!(scheduler.is_registered("child"));

        scheduler.update(Fixed64::ZERO);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn callback_cancel_does_not_disturb_current_pass() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler.register_callback("cancel_b", |_| {
            vec![SchedulerMutation::Unregister("b".into())]
        });
        scheduler
            .register_event(ScheduledEvent::new("a", "cancel_b", fixed(1.0)))
            .unwrap();
        scheduler
            .register_event(ScheduledEvent::repeating("b", "count", fixed(1.0)))
            .unwrap();

        let report = scheduler.update(fixed(1.0));

        // b was due in the same pass, so it still fires; then it is gone.
        assert_eq!(report.fired, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(count.get(), 1);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn finished_event_can_reschedule_itself_by_name() {
        fn rebind_to_count(f: &Firing<'_>) -> Vec<SchedulerMutation> {
            vec![SchedulerMutation::Register(ScheduledEvent::new(
                f.name,
                "count",
                Fixed64::ONE,
            ))]
        }

        let (mut scheduler, count) = counting_scheduler();
        scheduler.register_callback("again", rebind_to_count);
        scheduler
            .register_event(ScheduledEvent::new("loop", "again", fixed(1.0)))
            .unwrap();

        let report = scheduler.update(fixed(1.0));
        assert!(report.rejected.is_empty());
        assert_eq!(scheduler.get("loop").unwrap().callback, "count");

        scheduler.update(fixed(1.0));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn rejected_mutations_are_reported() {
        let mut scheduler = Scheduler::new();
        scheduler.register_callback("bad", |_| {
            vec![
                SchedulerMutation::Unregister("nobody".into()),
                SchedulerMutation::Register(ScheduledEvent::new("x", "missing", Fixed64::ONE)),
            ]
        });
        scheduler
            .register_event(ScheduledEvent::new("a", "bad", fixed(1.0)))
            .unwrap();

        let report = scheduler.update(fixed(1.0));
        assert_eq!(
            report.rejected,
            vec![
                SchedulerError::NotFound("nobody".into()),
                SchedulerError::UnknownCallback("missing".into()),
            ]
        );
        assert!(scheduler.is_empty());
    }

    #[test]
    fn signals_pass_through_to_report() {
        let mut scheduler = Scheduler::new();
        scheduler.register_callback("recalc", |_| {
            vec![SchedulerMutation::Signal(
                Signal::new("tick_network").with_param("power"),
            )]
        });
        scheduler
            .register_event(ScheduledEvent::repeating("grid", "recalc", fixed(1.0)))
            .unwrap();

        let report = scheduler.update(fixed(1.0));
        assert_eq!(report.signals, vec![Signal::new("tick_network").with_param("power")]);
    }

    #[test]
    fn missing_callback_at_fire_time_still_counts_down() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::new("orphan", "count", fixed(1.0)))
            .unwrap();
        assert!(scheduler.unregister_callback("count"));

        let report = scheduler.update(fixed(1.0));
        assert_eq!(report.fired, vec!["orphan".to_string()]);
        assert!(scheduler.is_empty());
    }

    // -----------------------------------------------------------------------
    // Prototypes and queries
    // -----------------------------------------------------------------------

    #[test]
    fn schedule_from_prototype() {
        let (mut scheduler, count) = counting_scheduler();
        scheduler.register_prototype(
            EventPrototype::new("ping", fixed(2.0))
                .with_callback("count")
                .with_repeat(Repeat::Forever),
        );

        scheduler
            .schedule("ping", ScheduleOverrides::default())
            .unwrap();
        scheduler
            .schedule("ping", ScheduleOverrides::named("ping_fast").cooldown(fixed(1.0)))
            .unwrap();

        scheduler.update(fixed(2.0));
        assert_eq!(count.get(), 2);
        assert_eq!(
            scheduler.schedule("nope", ScheduleOverrides::default()).unwrap_err(),
            SchedulerError::UnknownPrototype("nope".into())
        );
    }

    #[test]
    fn time_to_next_event_is_minimum_wait() {
        let (mut scheduler, _) = counting_scheduler();
        assert_eq!(scheduler.time_to_next_event(), None);

        scheduler
            .register_event(ScheduledEvent::repeating("slow", "count", fixed(3.0)))
            .unwrap();
        assert_eq!(scheduler.time_to_next_event(), Some(fixed(3.0)));

        scheduler
            .register_event(ScheduledEvent::repeating("fast", "count", fixed(2.0)))
            .unwrap();
        assert_eq!(scheduler.time_to_next_event(), Some(fixed(2.0)));
    }

    #[test]
    fn set_cooldown_through_scheduler() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("tick", "count", fixed(10.0)))
            .unwrap();
        scheduler.update(fixed(4.0));

        scheduler.set_cooldown("tick", fixed(5.0)).unwrap();
        assert_eq!(scheduler.get("tick").unwrap().time_to_wait, fixed(1.0));
        assert!(matches!(
            scheduler.set_cooldown("missing", fixed(5.0)),
            Err(SchedulerError::NotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_skips_transient_events() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("autosave", "count", fixed(60.0)))
            .unwrap();
        scheduler
            .register_event(ScheduledEvent::new("tooltip", "count", fixed(1.0)).transient())
            .unwrap();

        let snap = scheduler.snapshot();
        assert_eq!(snap.events.len(), 1);
        assert_eq!(snap.events[0].name, "autosave");
    }

    #[test]
    fn restore_replaces_active_set() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("a", "count", fixed(5.0)))
            .unwrap();
        scheduler.update(fixed(2.0));
        let snap = scheduler.snapshot();

        let (mut other, _) = counting_scheduler();
        other
            .register_event(ScheduledEvent::repeating("b", "count", fixed(1.0)))
            .unwrap();
        other.restore(snap).unwrap();

        assert!(!other.is_registered("b"));
        assert_eq!(other.get("a").unwrap().time_to_wait, fixed(3.0));
    }

    #[test]
    fn failed_restore_leaves_state_untouched() {
        let (mut scheduler, _) = counting_scheduler();
        scheduler
            .register_event(ScheduledEvent::repeating("keep", "count", fixed(5.0)))
            .unwrap();

        let bad = SchedulerSnapshot {
            events: vec![
                ScheduledEvent::new("x", "count", fixed(1.0)),
                ScheduledEvent::new("x", "count", fixed(2.0)),
            ],
        };
        assert_eq!(
            scheduler.restore(bad).unwrap_err(),
            SchedulerError::DuplicateName("x".into())
        );

        let bad = SchedulerSnapshot {
            events: vec![ScheduledEvent::new("y", "unknown", fixed(1.0))],
        };
        assert!(scheduler.restore(bad).is_err());
        assert!(scheduler.is_registered("keep"));
        assert_eq!(scheduler.len(), 1);
    }
}
