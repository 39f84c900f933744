//! Pluggable node specs.
//!
//! A node is described purely by the capability components it carries. The
//! balancing code asks "does this node produce / consume / store?" and never
//! "is this a battery?", so new node kinds only need a new combination of
//! components.

use outpost_core::fixed::Fixed64;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Capability components
// ---------------------------------------------------------------------------

/// A node that feeds the resource into its grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    /// Units supplied per tick.
    pub output_rate: Fixed64,
}

/// A node that draws the resource from its grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    /// Units demanded per tick.
    pub input_rate: Fixed64,
    /// Availability at or above which this consumer counts as powered.
    /// Falls back to the network's threshold when `None`.
    #[serde(default)]
    pub min_availability: Option<Fixed64>,
}

/// A node that buffers the resource (battery, tank).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    /// Maximum amount held.
    pub capacity: Fixed64,
    /// Amount currently held. Kept within `[0, capacity]`.
    #[serde(default)]
    pub stored: Fixed64,
    /// Cap on units absorbed per tick. Unlimited when `None`.
    #[serde(default)]
    pub charge_rate: Option<Fixed64>,
    /// Cap on units released per tick. Unlimited when `None`.
    #[serde(default)]
    pub discharge_rate: Option<Fixed64>,
}

impl Storage {
    pub fn new(capacity: Fixed64) -> Self {
        Self {
            capacity,
            stored: Fixed64::ZERO,
            charge_rate: None,
            discharge_rate: None,
        }
    }

    pub fn headroom(&self) -> Fixed64 {
        (self.capacity - self.stored).max(Fixed64::ZERO)
    }

    pub fn is_empty(&self) -> bool {
        self.stored <= Fixed64::ZERO
    }

    pub fn is_full(&self) -> bool {
        self.stored >= self.capacity
    }

    /// Absorb up to `amount`, limited by headroom and charge rate. Returns
    /// the amount actually taken.
    pub fn fill(&mut self, amount: Fixed64) -> Fixed64 {
        let mut take = amount.min(self.headroom());
        if let Some(rate) = self.charge_rate {
            take = take.min(rate);
        }
        let take = take.max(Fixed64::ZERO);
        self.stored += take;
        take
    }

    /// Release up to `amount`, limited by the stored amount and discharge
    /// rate. Returns the amount actually released.
    pub fn drain(&mut self, amount: Fixed64) -> Fixed64 {
        let mut give = amount.min(self.stored);
        if let Some(rate) = self.discharge_rate {
            give = give.min(rate);
        }
        let give = give.max(Fixed64::ZERO);
        self.stored -= give;
        give
    }

    /// The highest of the 0/25/50/75/100 percent marks the fill level is at
    /// or above.
    pub fn fill_threshold(&self) -> u8 {
        let four = Fixed64::from_num(4);
        let scaled = self.stored.saturating_mul(four);
        (0..=4u8)
            .rev()
            .find(|&k| scaled >= self.capacity.saturating_mul(Fixed64::from_num(k)))
            .map_or(0, |k| k * 25)
    }
}

// ---------------------------------------------------------------------------
// Capability flags
// ---------------------------------------------------------------------------

/// Compact capability set derived from a [`Pluggable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const PRODUCER: Self = Self(1);
    pub const CONSUMER: Self = Self(1 << 1);
    pub const STORAGE: Self = Self(1 << 2);
    pub const PASSTHROUGH: Self = Self(1 << 3);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ---------------------------------------------------------------------------
// Pluggable
// ---------------------------------------------------------------------------

/// Everything the network knows about one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pluggable {
    #[serde(default)]
    pub producer: Option<Producer>,
    #[serde(default)]
    pub consumer: Option<Consumer>,
    #[serde(default)]
    pub storage: Option<Storage>,
    /// Carries the resource without producing, consuming or storing it.
    #[serde(default)]
    pub passthrough: bool,
    /// Resource tag (e.g. `"water"`). Tagged nodes only join grids carrying
    /// the same tag. Untagged nodes join any grid.
    #[serde(default)]
    pub resource: Option<String>,
}

impl Pluggable {
    pub fn producer(output_rate: Fixed64) -> Self {
        Self {
            producer: Some(Producer { output_rate }),
            ..Self::default()
        }
    }

    pub fn consumer(input_rate: Fixed64) -> Self {
        Self {
            consumer: Some(Consumer {
                input_rate,
                min_availability: None,
            }),
            ..Self::default()
        }
    }

    pub fn storage(capacity: Fixed64, stored: Fixed64) -> Self {
        Self {
            storage: Some(Storage {
                stored: stored.clamp(Fixed64::ZERO, capacity.max(Fixed64::ZERO)),
                ..Storage::new(capacity)
            }),
            ..Self::default()
        }
    }

    pub fn conduit() -> Self {
        Self {
            passthrough: true,
            ..Self::default()
        }
    }

    pub fn with_producer(mut self, output_rate: Fixed64) -> Self {
        self.producer = Some(Producer { output_rate });
        self
    }

    pub fn with_consumer(mut self, input_rate: Fixed64) -> Self {
        self.consumer = Some(Consumer {
            input_rate,
            min_availability: None,
        });
        self
    }

    /// Set the consumer's own powered threshold. No effect on non-consumers.
    pub fn with_min_availability(mut self, threshold: Fixed64) -> Self {
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.min_availability = Some(threshold);
        }
        self
    }

    /// Limit charge and discharge rates. No effect on non-storage nodes.
    pub fn with_rates(mut self, charge: Option<Fixed64>, discharge: Option<Fixed64>) -> Self {
        if let Some(storage) = self.storage.as_mut() {
            storage.charge_rate = charge;
            storage.discharge_rate = discharge;
        }
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::NONE;
        if self.producer.is_some() {
            caps |= Capabilities::PRODUCER;
        }
        if self.consumer.is_some() {
            caps |= Capabilities::CONSUMER;
        }
        if self.storage.is_some() {
            caps |= Capabilities::STORAGE;
        }
        if self.passthrough {
            caps |= Capabilities::PASSTHROUGH;
        }
        caps
    }

    pub fn output_rate(&self) -> Fixed64 {
        self.producer.as_ref().map_or(Fixed64::ZERO, |p| p.output_rate)
    }

    pub fn input_rate(&self) -> Fixed64 {
        self.consumer.as_ref().map_or(Fixed64::ZERO, |c| c.input_rate)
    }

    /// Output counted as grid supply. Storage nodes only release through
    /// discharge, so theirs is zero.
    pub fn supply_rate(&self) -> Fixed64 {
        if self.storage.is_some() {
            Fixed64::ZERO
        } else {
            self.output_rate()
        }
    }

    /// Input counted as grid demand. Zero for storage nodes, which only
    /// absorb surplus.
    pub fn demand_rate(&self) -> Fixed64 {
        if self.storage.is_some() {
            Fixed64::ZERO
        } else {
            self.input_rate()
        }
    }

    /// Most a storage node may absorb per tick: its consumer input rate, if
    /// it has a consumer component.
    pub fn charge_limit(&self) -> Option<Fixed64> {
        self.storage.as_ref()?;
        self.consumer.as_ref().map(|c| c.input_rate)
    }

    /// Most a storage node may release per tick: its producer output rate,
    /// if it has a producer component.
    pub fn discharge_limit(&self) -> Option<Fixed64> {
        self.storage.as_ref()?;
        self.producer.as_ref().map(|p| p.output_rate)
    }

    /// Whether this node draws from the grid as a consumer.
    pub fn is_load(&self) -> bool {
        self.consumer.is_some() && self.storage.is_none()
    }
}
