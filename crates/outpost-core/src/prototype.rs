//! Named event templates.
//!
//! Game content declares events (raids, trader arrivals, autosaves) as
//! prototypes in data files. The scheduler instantiates them by name via
//! [`Scheduler::schedule`](crate::scheduler::Scheduler::schedule), optionally
//! overriding the timing with [`ScheduleOverrides`].

use std::collections::BTreeMap;

use crate::event::{EventParam, Repeat, ScheduledEvent};
use crate::fixed::Fixed64;
use serde::{Deserialize, Serialize};

/// A declarative event template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPrototype {
    pub name: String,
    /// Callback to bind. Defaults to the prototype name when omitted in data.
    #[serde(default)]
    pub callback: Option<String>,
    pub cooldown: Fixed64,
    #[serde(default)]
    pub repeat: Repeat,
    #[serde(default)]
    pub params: Vec<EventParam>,
}

impl EventPrototype {
    pub fn new(name: impl Into<String>, cooldown: Fixed64) -> Self {
        Self {
            name: name.into(),
            callback: None,
            cooldown,
            repeat: Repeat::default(),
            params: Vec::new(),
        }
    }

    pub fn with_callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_param(mut self, param: impl Into<EventParam>) -> Self {
        self.params.push(param.into());
        self
    }

    /// The callback name this prototype binds to.
    pub fn callback_name(&self) -> &str {
        self.callback.as_deref().unwrap_or(&self.name)
    }

    /// Build a live event from this template.
    pub fn instantiate(&self, overrides: &ScheduleOverrides) -> ScheduledEvent {
        let cooldown = overrides.cooldown.unwrap_or(self.cooldown);
        ScheduledEvent {
            name: overrides.name.clone().unwrap_or_else(|| self.name.clone()),
            callback: self.callback_name().to_string(),
            params: overrides.params.clone().unwrap_or_else(|| self.params.clone()),
            cooldown,
            time_to_wait: overrides.time_to_wait.unwrap_or(cooldown),
            repeat: overrides.repeat.unwrap_or(self.repeat),
            persistent: true,
        }
    }
}

/// Per-call adjustments applied when instantiating a prototype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleOverrides {
    /// Instance name. Lets one prototype back several concurrent events.
    pub name: Option<String>,
    pub cooldown: Option<Fixed64>,
    pub time_to_wait: Option<Fixed64>,
    pub repeat: Option<Repeat>,
    pub params: Option<Vec<EventParam>>,
}

impl ScheduleOverrides {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn cooldown(mut self, cooldown: Fixed64) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn time_to_wait(mut self, time_to_wait: Fixed64) -> Self {
        self.time_to_wait = Some(time_to_wait);
        self
    }

    pub fn repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = Some(repeat);
        self
    }

    pub fn params(mut self, params: Vec<EventParam>) -> Self {
        self.params = Some(params);
        self
    }
}

/// Prototypes keyed by name. Later registrations replace earlier ones, so
/// mods can override base content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrototypeRegistry {
    prototypes: BTreeMap<String, EventPrototype>,
}

impl PrototypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prototype, returning the one it replaced.
    pub fn insert(&mut self, prototype: EventPrototype) -> Option<EventPrototype> {
        self.prototypes.insert(prototype.name.clone(), prototype)
    }

    pub fn get(&self, name: &str) -> Option<&EventPrototype> {
        self.prototypes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.prototypes.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<EventPrototype> {
        self.prototypes.remove(name)
    }

    pub fn len(&self) -> usize {
        self.prototypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prototypes.is_empty()
    }

    /// Iterate prototypes in name order.
    pub fn iter(&self) -> impl Iterator<Item = &EventPrototype> {
        self.prototypes.values()
    }
}

impl Extend<EventPrototype> for PrototypeRegistry {
    fn extend<I: IntoIterator<Item = EventPrototype>>(&mut self, iter: I) {
        for prototype in iter {
            self.insert(prototype);
        }
    }
}
