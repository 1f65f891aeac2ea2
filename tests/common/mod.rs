#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use meshi_physx::{BridgeConfig, BridgeEvent, PhysicsHost};

pub const DT: f32 = 1.0 / 60.0;
const TIMEOUT: Duration = Duration::from_secs(5);

/// Poll until `done` accepts an event, returning everything seen so far.
/// Panics after a few seconds so a stuck engine host fails the test.
pub fn pump_until(host: &mut PhysicsHost, mut done: impl FnMut(&BridgeEvent) -> bool) -> Vec<BridgeEvent> {
    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    loop {
        let events = host.poll().expect("bridge failed while pumping");
        let finished = events.iter().any(&mut done);
        seen.extend(events);
        if finished {
            return seen;
        }
        assert!(Instant::now() < deadline, "timed out, saw {:?}", seen);
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn ready_host(config: BridgeConfig) -> PhysicsHost {
    let mut host = PhysicsHost::with_config(config).expect("bridge should start");
    pump_until(&mut host, |e| *e == BridgeEvent::EngineReady);
    host
}

pub fn weightless() -> PhysicsHost {
    ready_host(BridgeConfig {
        gravity: [0.0; 3],
        ..Default::default()
    })
}

/// Wait until every listed entity has been acknowledged.
pub fn await_ready(host: &mut PhysicsHost, ids: &[meshi_physx::protocol::Identity]) {
    let mut pending: Vec<_> = ids.to_vec();
    pending.retain(|id| !host.entity(*id).map_or(false, |e| e.is_live()));
    if pending.is_empty() {
        return;
    }
    pump_until(host, |e| {
        if let BridgeEvent::ObjectReady(id) = e {
            pending.retain(|p| p != id);
        }
        pending.is_empty()
    });
}

/// Request one step and wait for its outcome.
pub fn step(host: &mut PhysicsHost, time_step: f32) -> Vec<BridgeEvent> {
    assert!(host.step(time_step, None), "step was rejected");
    pump_until(host, |e| {
        matches!(e, BridgeEvent::StepComplete | BridgeEvent::StepFailed { .. })
    })
}
