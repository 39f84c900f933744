//! Scheduler-driven scenarios spanning the scheduler, networks, and the
//! simulation host.

use std::cell::RefCell;
use std::rc::Rc;

use outpost_core::event::{EventParam, ScheduledEvent};
use outpost_core::fixed::Fixed64;
use outpost_core::scheduler::{OverflowPolicy, SchedulerConfig, SchedulerMutation};
use outpost_core::test_utils::{every, fixed, times};
use outpost_network::{Network, NetworkEvent, Pluggable};
use outpost_sim::{Simulation, TICK_NETWORK};

/// Uneven frame times that add up to 1.5 seconds per cycle.
const FRAMES: [f64; 3] = [0.25, 0.75, 0.5];

fn ticks_after_frames(overflow: OverflowPolicy, cycles: usize) -> u64 {
    let mut sim = Simulation::with_scheduler_config(SchedulerConfig {
        overflow,
        ..SchedulerConfig::default()
    });
    sim.add_network("power", Network::new()).unwrap();
    sim.schedule_network_ticks("power", fixed(1.0)).unwrap();
    for _ in 0..cycles {
        for dt in FRAMES {
            sim.update(fixed(dt));
        }
    }
    sim.network("power").unwrap().ticks()
}

// ---------------------------------------------------------------------------
// Test 1: Carrying overflow keeps network ticks on schedule
// ---------------------------------------------------------------------------
#[test]
fn carry_keeps_network_ticks_on_schedule() {
    // 8 cycles = 12 seconds.
    assert_eq!(ticks_after_frames(OverflowPolicy::Carry, 8), 12);
    // Discarding overflow rearms late every time a frame overshoots.
    assert_eq!(ticks_after_frames(OverflowPolicy::Discard, 8), 8);
}

// ---------------------------------------------------------------------------
// Test 2: A quest chain registers its next stage from a callback
// ---------------------------------------------------------------------------
#[test]
fn quest_chain_advances_through_deferred_registration() {
    let mut sim = Simulation::new();
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let l = Rc::clone(&log);
    sim.scheduler_mut().register_callback("quest_stage", move |firing| {
        l.borrow_mut().push(firing.name.to_string());
        let stage = firing.params.first().and_then(EventParam::as_int).unwrap_or(0);
        if stage >= 3 {
            return Vec::new();
        }
        let next = stage + 1;
        vec![SchedulerMutation::Register(
            ScheduledEvent::new(format!("quest_{next}"), "quest_stage", fixed(2.0))
                .with_param(next),
        )]
    });
    sim.scheduler_mut()
        .register_event(ScheduledEvent::new("quest_1", "quest_stage", fixed(2.0)).with_param(1i64))
        .unwrap();

    let mut fired_per_update = Vec::new();
    for _ in 0..8 {
        fired_per_update.push(sim.update(fixed(1.0)).scheduler.fired.len());
    }

    assert_eq!(*log.borrow(), vec!["quest_1", "quest_2", "quest_3"]);
    // Each stage registers after its pass, then waits its full 2 seconds.
    assert_eq!(fired_per_update, vec![0, 1, 0, 1, 0, 1, 0, 0]);
    assert!(sim.scheduler().is_empty());
}

// ---------------------------------------------------------------------------
// Test 3: A blackout event cancels a network's ticks
// ---------------------------------------------------------------------------
#[test]
fn blackout_event_stops_network_ticks() {
    let mut sim = Simulation::new();
    sim.add_network("power", Network::new()).unwrap();
    sim.schedule_network_ticks("power", fixed(1.0)).unwrap();
    sim.scheduler_mut().register_callback("blackout", |_| {
        vec![SchedulerMutation::Unregister(format!("{TICK_NETWORK}:power"))]
    });
    sim.scheduler_mut()
        .register_event(ScheduledEvent::new("blackout", "blackout", fixed(3.0)))
        .unwrap();

    for _ in 0..6 {
        sim.update(fixed(1.0));
    }

    // The tick at 3 fires before the blackout is applied.
    assert_eq!(sim.network("power").unwrap().ticks(), 3);
    assert!(sim.scheduler().is_empty());
}

// ---------------------------------------------------------------------------
// Test 4: A fuel shortage throttles a factory until resupply
// ---------------------------------------------------------------------------
#[test]
fn storage_threshold_events_follow_scheduled_ticks() {
    let mut net = Network::new();
    let generator = net.add_node(Pluggable::producer(fixed(4.0)));
    let capacitor = net.add_node(Pluggable::storage(fixed(16.0), fixed(16.0)));
    let factory = net.add_node(Pluggable::consumer(fixed(8.0)));
    net.connect(generator, capacitor).unwrap();
    net.connect(capacitor, factory).unwrap();

    let mut sim = Simulation::new();
    sim.add_network("power", net).unwrap();
    sim.schedule_network_ticks("power", fixed(0.5)).unwrap();

    let mut marks = Vec::new();
    let mut unpowered_at = None;
    for step in 1..=6u32 {
        for (_, event) in sim.update(fixed(0.5)).network_events {
            match event {
                NetworkEvent::StorageThreshold { percent, .. } => marks.push(percent),
                NetworkEvent::Unpowered { .. } => unpowered_at = Some(step),
                NetworkEvent::Powered { .. } => {}
            }
        }
    }

    // 4 short per tick: 16 -> 12 -> 8 -> 4 -> 0, then half availability.
    assert_eq!(marks, vec![75, 50, 25, 0]);
    assert_eq!(unpowered_at, Some(5));
    let power = sim.network("power").unwrap();
    assert_eq!(power.supplied(factory), Some(fixed(4.0)));
    assert_eq!(power.stored(capacitor), Some(Fixed64::ZERO));
}

// ---------------------------------------------------------------------------
// Test 5: Finite events and network ticks share one update loop
// ---------------------------------------------------------------------------
#[test]
fn finite_events_complete_between_network_ticks() {
    let mut sim = Simulation::new();
    sim.add_network("water", Network::new()).unwrap();
    sim.schedule_network_ticks("water", fixed(2.0)).unwrap();

    let hits: Rc<RefCell<u32>> = Rc::new(RefCell::new(0));
    let h = Rc::clone(&hits);
    sim.scheduler_mut().register_callback("drip", move |_| {
        *h.borrow_mut() += 1;
        Vec::new()
    });
    sim.scheduler_mut()
        .register_event(times("drip", "drip", 1.0, 3))
        .unwrap();
    sim.scheduler_mut()
        .register_event(every("drip_forever", "drip", 4.0))
        .unwrap();

    let mut completed = Vec::new();
    for _ in 0..8 {
        completed.extend(sim.update(fixed(1.0)).scheduler.completed);
    }

    assert_eq!(*hits.borrow(), 3 + 2);
    assert_eq!(completed, vec!["drip".to_string()]);
    assert_eq!(sim.network("water").unwrap().ticks(), 4);
}
