//! The host side of the bridge.
//!
//! [`PhysicsHost`] never blocks on the engine host. Commands are queued,
//! reports are picked up by [`PhysicsHost::poll`], and the only answer a
//! caller ever waits for is the boolean from [`PhysicsHost::step`].

pub mod entity;
pub mod event;
pub mod reconcile;
pub mod touch;

use std::collections::{BTreeSet, VecDeque};
use std::thread::JoinHandle;

use glam::{Quat, Vec3};
use meshi_physx_protocol::report::{CollisionRecord, ConstraintRecord, VehicleRecord, WorldRecord};
use meshi_physx_protocol::{
    BodyDescriptor, BodyKind, Command, ConstraintDescriptor, ConstraintTuning, Identity, Message,
    ReportBuffer, ReportKind, SimulateRequest, TransformOverride, VehicleDescriptor,
    WheelDescriptor,
};
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::engine::EngineHost;
use crate::error::{BridgeError, Result};
use crate::registry::EntityRegistry;
use crate::transport::{self, HostEndpoint};
use entity::{
    ConstraintState, Entity, EntityKind, Lifecycle, SoftBodyState, VehicleState, WheelState,
};
pub use event::BridgeEvent;
use reconcile::BodyState;
use touch::{TouchChange, TouchTracker};

type EventCallback = Box<dyn FnMut(&BridgeEvent) + Send>;

/// A protocol failure. Once seen, the transport is not trusted again.
#[derive(Debug, Clone, Copy)]
struct Desync {
    kind: u32,
    count: usize,
    capacity: usize,
}

impl From<Desync> for BridgeError {
    fn from(d: Desync) -> Self {
        BridgeError::ProtocolDesync {
            kind: d.kind,
            count: d.count,
            capacity: d.capacity,
        }
    }
}

pub struct PhysicsHost {
    endpoint: HostEndpoint,
    worker: Option<JoinHandle<()>>,
    config: BridgeConfig,
    loaded: bool,
    ready: bool,
    simulating: bool,
    failure: Option<Desync>,
    /// Events of a drain cut short by an error, returned by the next poll.
    stranded: Vec<BridgeEvent>,
    entities: EntityRegistry<Entity>,
    touches: TouchTracker,
    /// Commands held back until the engine is ready and their entities are
    /// live, in issue order.
    backlog: VecDeque<Command>,
    report_capacity: [usize; 5],
    event_cb: Option<EventCallback>,
}

impl PhysicsHost {
    pub fn new() -> Result<Self> {
        Self::with_config(BridgeConfig::default())
    }

    /// Start an engine host thread and configure its world.
    pub fn with_config(config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let (host, engine) = transport::connect();
        let worker = EngineHost::spawn(engine)?;
        let mut bridge = Self::from_endpoint(host, config)?;
        bridge.worker = Some(worker);
        Ok(bridge)
    }

    /// Talk to whatever sits on the other end of `endpoint`.
    pub fn from_endpoint(endpoint: HostEndpoint, config: BridgeConfig) -> Result<Self> {
        endpoint.send(Command::Init(config.world_settings()))?;
        Ok(Self {
            endpoint,
            worker: None,
            config,
            loaded: false,
            ready: false,
            simulating: false,
            failure: None,
            stranded: Vec::new(),
            entities: EntityRegistry::new(),
            touches: TouchTracker::default(),
            backlog: VecDeque::new(),
            report_capacity: [0; 5],
            event_cb: None,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_simulating(&self) -> bool {
        self.simulating
    }

    /// Called with every event [`PhysicsHost::poll`] produces.
    pub fn set_event_cb(&mut self, cb: impl FnMut(&BridgeEvent) + Send + 'static) {
        self.event_cb = Some(Box::new(cb));
    }

    ////////////////////////////////////////////////////////////////////////
    // Entities
    ////////////////////////////////////////////////////////////////////////

    pub fn add_body(&mut self, descriptor: BodyDescriptor) -> Result<Identity> {
        let kind = match &descriptor.kind {
            BodyKind::Rigid(_) => EntityKind::RigidBody(BodyState::new(
                descriptor.transform.position,
                descriptor.transform.rotation,
            )),
            BodyKind::Soft(soft) => {
                EntityKind::SoftBody(SoftBodyState::new(soft.geometry.topology()))
            }
        };
        let identity = self.entities.register(Entity::pending(kind))?;
        self.issue(Command::CreateBody {
            identity,
            descriptor,
        })?;
        Ok(identity)
    }

    pub fn add_vehicle(&mut self, descriptor: VehicleDescriptor) -> Result<Identity> {
        self.rigid(descriptor.chassis)?;
        let identity = self.entities.register(Entity::pending(EntityKind::Vehicle(
            VehicleState {
                chassis: descriptor.chassis,
                wheels: Vec::new(),
            },
        )))?;
        self.issue(Command::CreateVehicle {
            identity,
            descriptor,
        })?;
        Ok(identity)
    }

    /// Returns the index the wheel will be reported under.
    pub fn add_wheel(&mut self, vehicle: Identity, wheel: WheelDescriptor) -> Result<u32> {
        let index = match &mut self.entities.resolve_mut(vehicle)?.kind {
            EntityKind::Vehicle(state) => {
                state.wheels.push(WheelState::default());
                (state.wheels.len() - 1) as u32
            }
            _ => return Err(BridgeError::NotFound(vehicle)),
        };
        self.issue(Command::AddWheel { vehicle, wheel })?;
        Ok(index)
    }

    pub fn add_constraint(&mut self, descriptor: ConstraintDescriptor) -> Result<Identity> {
        self.rigid(descriptor.body_a)?;
        if let Some(b) = descriptor.body_b {
            self.rigid(b)?;
        }
        let identity = self
            .entities
            .register(Entity::pending(EntityKind::Constraint(ConstraintState {
                body_a: descriptor.body_a,
                body_b: descriptor.body_b,
                offset: Vec3::ZERO,
                applied_impulse: 0.0,
            })))?;
        self.issue(Command::CreateConstraint {
            identity,
            descriptor,
        })?;
        Ok(identity)
    }

    /// Pin node `node` of a soft body to a rigid body.
    pub fn append_anchor(&mut self, soft_body: Identity, node: u32, body: Identity) -> Result<()> {
        match self.entities.resolve(soft_body)?.kind {
            EntityKind::SoftBody(_) => {}
            _ => return Err(BridgeError::NotFound(soft_body)),
        }
        self.rigid(body)?;
        self.issue(Command::AppendAnchor {
            soft_body,
            node,
            body,
        })
    }

    /// Remove any entity. A body takes its constraints and vehicles with it.
    pub fn remove(&mut self, identity: Identity) -> Result<()> {
        let command = match self.entities.resolve(identity)?.kind {
            EntityKind::RigidBody(_) | EntityKind::SoftBody(_) => Command::RemoveBody(identity),
            EntityKind::Vehicle(_) => Command::RemoveVehicle(identity),
            EntityKind::Constraint(_) => Command::RemoveConstraint(identity),
        };
        self.discard(identity);
        self.issue(command)
    }

    /// Forget an entity along with the constraints and vehicles built on it.
    /// Returns every identity forgotten, `identity` first.
    fn discard(&mut self, identity: Identity) -> Vec<Identity> {
        let mut gone = vec![identity];
        if self.entities.resolve(identity).map_or(false, Entity::is_body) {
            gone.extend(self.entities.find_all(|e| match &e.kind {
                EntityKind::Constraint(c) => c.body_a == identity || c.body_b == Some(identity),
                EntityKind::Vehicle(v) => v.chassis == identity,
                _ => false,
            }));
            self.touches.forget(identity);
        }
        for id in &gone {
            self.forget(*id);
        }
        gone
    }

    /// Drop local knowledge of an entity and any commands still held for it.
    fn forget(&mut self, identity: Identity) {
        self.entities.unregister(identity);
        self.backlog.retain(|command| {
            command.identity() != Some(identity)
                && !command.prerequisites().contains(&Some(identity))
        });
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.entities.contains(identity)
    }

    pub fn lifecycle(&self, identity: Identity) -> Result<Lifecycle> {
        Ok(self.entities.resolve(identity)?.lifecycle)
    }

    pub fn entity(&self, identity: Identity) -> Result<&Entity> {
        self.entities.resolve(identity)
    }

    fn rigid(&self, identity: Identity) -> Result<&BodyState> {
        self.entities
            .resolve(identity)?
            .body()
            .ok_or(BridgeError::NotFound(identity))
    }

    fn rigid_mut(&mut self, identity: Identity) -> Result<&mut BodyState> {
        self.entities
            .resolve_mut(identity)?
            .body_mut()
            .ok_or(BridgeError::NotFound(identity))
    }

    pub fn body_state(&self, identity: Identity) -> Result<&BodyState> {
        self.rigid(identity)
    }

    pub fn position(&self, identity: Identity) -> Result<Vec3> {
        Ok(self.rigid(identity)?.position)
    }

    pub fn rotation(&self, identity: Identity) -> Result<Quat> {
        Ok(self.rigid(identity)?.rotation)
    }

    pub fn linear_velocity(&self, identity: Identity) -> Result<Vec3> {
        Ok(self.rigid(identity)?.linear_velocity)
    }

    pub fn angular_velocity(&self, identity: Identity) -> Result<Vec3> {
        Ok(self.rigid(identity)?.angular_velocity)
    }

    pub fn touching(&self, identity: Identity) -> &[Identity] {
        self.touches.touching(identity)
    }

    pub fn wheels(&self, vehicle: Identity) -> Result<&[WheelState]> {
        match &self.entities.resolve(vehicle)?.kind {
            EntityKind::Vehicle(state) => Ok(&state.wheels),
            _ => Err(BridgeError::NotFound(vehicle)),
        }
    }

    pub fn constraint_state(&self, identity: Identity) -> Result<&ConstraintState> {
        match &self.entities.resolve(identity)?.kind {
            EntityKind::Constraint(state) => Ok(state),
            _ => Err(BridgeError::NotFound(identity)),
        }
    }

    pub fn soft_body_state(&self, identity: Identity) -> Result<&SoftBodyState> {
        match &self.entities.resolve(identity)?.kind {
            EntityKind::SoftBody(state) => Ok(state),
            _ => Err(BridgeError::NotFound(identity)),
        }
    }

    /// Capacity, in scalars, of the last report of `kind` received.
    pub fn report_capacity(&self, kind: ReportKind) -> usize {
        self.report_capacity[kind.index()]
    }

    ////////////////////////////////////////////////////////////////////////
    // Transform writes
    ////////////////////////////////////////////////////////////////////////

    /// Move a body. The move wins over any report already in flight and
    /// reaches the engine host with the next step.
    pub fn set_position(&mut self, identity: Identity, position: Vec3) -> Result<()> {
        self.rigid_mut(identity)?.set_position(position);
        Ok(())
    }

    pub fn set_rotation(&mut self, identity: Identity, rotation: Quat) -> Result<()> {
        self.rigid_mut(identity)?.set_rotation(rotation);
        Ok(())
    }

    /// Teleport a body right away instead of with the next step.
    pub fn update_transform(
        &mut self,
        identity: Identity,
        position: Option<Vec3>,
        rotation: Option<Quat>,
    ) -> Result<()> {
        let state = self.rigid_mut(identity)?;
        if let Some(p) = position {
            state.set_position(p);
        }
        if let Some(q) = rotation {
            state.set_rotation(q);
        }
        self.issue(Command::UpdateTransform(TransformOverride {
            identity,
            position,
            rotation,
        }))
    }

    ////////////////////////////////////////////////////////////////////////
    // Forces and body parameters
    ////////////////////////////////////////////////////////////////////////

    /// Zero makes the body static.
    pub fn update_mass(&mut self, identity: Identity, mass: f32) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::UpdateMass { identity, mass })
    }

    pub fn apply_central_impulse(&mut self, identity: Identity, impulse: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::ApplyCentralImpulse { identity, impulse })
    }

    /// `point` is relative to the body's center, in world orientation.
    pub fn apply_impulse(&mut self, identity: Identity, impulse: Vec3, point: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::ApplyImpulse {
            identity,
            impulse,
            point,
        })
    }

    pub fn apply_torque(&mut self, identity: Identity, torque: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::ApplyTorque { identity, torque })
    }

    pub fn apply_central_force(&mut self, identity: Identity, force: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::ApplyCentralForce { identity, force })
    }

    pub fn apply_force(&mut self, identity: Identity, force: Vec3, point: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::ApplyForce {
            identity,
            force,
            point,
        })
    }

    pub fn set_linear_velocity(&mut self, identity: Identity, velocity: Vec3) -> Result<()> {
        self.rigid_mut(identity)?.linear_velocity = velocity;
        self.issue(Command::SetLinearVelocity { identity, velocity })
    }

    pub fn set_angular_velocity(&mut self, identity: Identity, velocity: Vec3) -> Result<()> {
        self.rigid_mut(identity)?.angular_velocity = velocity;
        self.issue(Command::SetAngularVelocity { identity, velocity })
    }

    pub fn set_linear_factor(&mut self, identity: Identity, factor: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::SetLinearFactor { identity, factor })
    }

    pub fn set_angular_factor(&mut self, identity: Identity, factor: Vec3) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::SetAngularFactor { identity, factor })
    }

    pub fn set_damping(&mut self, identity: Identity, linear: f32, angular: f32) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::SetDamping {
            identity,
            linear,
            angular,
        })
    }

    pub fn set_ccd_thresholds(
        &mut self,
        identity: Identity,
        motion_threshold: f32,
        swept_sphere_radius: f32,
    ) -> Result<()> {
        self.rigid(identity)?;
        self.issue(Command::SetCcdThresholds {
            identity,
            motion_threshold,
            swept_sphere_radius,
        })
    }

    ////////////////////////////////////////////////////////////////////////
    // Vehicles and constraints
    ////////////////////////////////////////////////////////////////////////

    fn wheel_exists(&self, vehicle: Identity, wheel: u32) -> Result<()> {
        if (wheel as usize) < self.wheels(vehicle)?.len() {
            Ok(())
        } else {
            Err(BridgeError::NotFound(vehicle))
        }
    }

    pub fn set_vehicle_steering(&mut self, vehicle: Identity, wheel: u32, steering: f32) -> Result<()> {
        self.wheel_exists(vehicle, wheel)?;
        self.issue(Command::SetVehicleSteering {
            vehicle,
            wheel,
            steering,
        })
    }

    pub fn set_vehicle_brake(&mut self, vehicle: Identity, wheel: u32, brake: f32) -> Result<()> {
        self.wheel_exists(vehicle, wheel)?;
        self.issue(Command::SetVehicleBrake {
            vehicle,
            wheel,
            brake,
        })
    }

    pub fn apply_vehicle_engine_force(
        &mut self,
        vehicle: Identity,
        wheel: u32,
        force: f32,
    ) -> Result<()> {
        self.wheel_exists(vehicle, wheel)?;
        self.issue(Command::ApplyVehicleEngineForce {
            vehicle,
            wheel,
            force,
        })
    }

    pub fn tune_constraint(&mut self, identity: Identity, tuning: ConstraintTuning) -> Result<()> {
        self.constraint_state(identity)?;
        self.issue(Command::TuneConstraint { identity, tuning })
    }

    ////////////////////////////////////////////////////////////////////////
    // World
    ////////////////////////////////////////////////////////////////////////

    pub fn set_gravity(&mut self, gravity: Vec3) -> Result<()> {
        self.config.gravity = gravity.to_array();
        self.issue(Command::SetGravity(gravity))
    }

    pub fn set_fixed_time_step(&mut self, step: f32) -> Result<()> {
        if !(step > 0.0) {
            return Err(BridgeError::Config(format!(
                "fixed time step must be positive, got {}",
                step
            )));
        }
        self.config.fixed_time_step = step;
        self.issue(Command::SetFixedTimeStep(step))
    }

    /// Ask the engine host to advance by `time_step` seconds.
    ///
    /// Returns `false` without doing anything when `time_step` is negative
    /// or not finite, the engine is not ready, the bridge has failed, or the
    /// previous step's world report has not come back yet.
    pub fn step(&mut self, time_step: f32, max_sub_steps: Option<u32>) -> bool {
        if !time_step.is_finite() || time_step < 0.0 {
            warn!("step rejected: time step {} is not usable", time_step);
            return false;
        }
        if self.failure.is_some() || !self.ready {
            return false;
        }
        if self.simulating {
            debug!("step rejected: already simulating");
            return false;
        }

        let overrides: Vec<TransformOverride> = self
            .entities
            .iter_mut()
            .filter(|(_, e)| e.is_live())
            .filter_map(|(identity, e)| e.body_mut()?.take_override(identity))
            .collect();
        let request = SimulateRequest {
            time_step,
            max_sub_steps,
            overrides,
        };
        if let Err(err) = self.endpoint.send(Command::Simulate(request)) {
            warn!("step not sent: {}", err);
            return false;
        }
        self.simulating = true;
        true
    }

    ////////////////////////////////////////////////////////////////////////
    // Messages
    ////////////////////////////////////////////////////////////////////////

    /// Send now, or hold until the engine is ready and every entity the
    /// command depends on is live. A command about an entity with held
    /// commands is held behind them.
    fn issue(&mut self, command: Command) -> Result<()> {
        if self.is_blocked(&command) {
            self.backlog.push_back(command);
            return Ok(());
        }
        self.endpoint.send(command)
    }

    fn is_blocked(&self, command: &Command) -> bool {
        if !self.ready {
            return true;
        }
        let waiting = command.prerequisites().into_iter().flatten().any(|id| {
            self.entities
                .resolve(id)
                .map_or(false, |e| e.lifecycle == Lifecycle::Pending)
        });
        if waiting {
            return true;
        }
        let Some(identity) = command.identity() else {
            return false;
        };
        self.backlog.iter().any(|held| {
            held.identity() == Some(identity) || held.prerequisites().contains(&Some(identity))
        })
    }

    fn flush_backlog(&mut self) -> Result<()> {
        let held = std::mem::take(&mut self.backlog);
        for command in held {
            self.issue(command)?;
        }
        Ok(())
    }

    /// Drain every message the engine host has sent so far. Never blocks.
    ///
    /// A malformed report is a protocol failure: it is returned as
    /// [`BridgeError::ProtocolDesync`] now and on every later call. Events
    /// decoded ahead of any error are not lost; the next call returns them.
    pub fn poll(&mut self) -> Result<Vec<BridgeEvent>> {
        // stranded events already went through the callback
        let mut events = std::mem::take(&mut self.stranded);
        let delivered = events.len();
        if let Some(failure) = self.failure {
            return if events.is_empty() {
                Err(failure.into())
            } else {
                Ok(events)
            };
        }
        let drained = self.drain(&mut events);
        self.dispatch(&events[delivered..]);
        match drained {
            Ok(()) => Ok(events),
            Err(err) => {
                self.stranded = events;
                Err(err)
            }
        }
    }

    fn drain(&mut self, events: &mut Vec<BridgeEvent>) -> Result<()> {
        while let Some(message) = self.endpoint.try_recv()? {
            if let Err(err) = self.handle_message(message, events) {
                if let BridgeError::ProtocolDesync {
                    kind,
                    count,
                    capacity,
                } = err
                {
                    warn!("protocol desync, bridge disabled: {}", err);
                    self.failure = Some(Desync {
                        kind,
                        count,
                        capacity,
                    });
                    self.simulating = false;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, events: &[BridgeEvent]) {
        if let Some(cb) = self.event_cb.as_mut() {
            for event in events {
                cb(event);
            }
        }
    }

    fn handle_message(&mut self, message: Message, events: &mut Vec<BridgeEvent>) -> Result<()> {
        match message {
            Message::EngineLoaded => {
                self.loaded = true;
                debug!("engine host loaded");
            }
            Message::EngineReady => {
                self.ready = true;
                info!("physics bridge ready");
                events.push(BridgeEvent::EngineReady);
                self.flush_backlog()?;
            }
            Message::ObjectReady(identity) => match self.entities.resolve_mut(identity) {
                Ok(entity) => {
                    entity.lifecycle = Lifecycle::Live;
                    events.push(BridgeEvent::ObjectReady(identity));
                    self.flush_backlog()?;
                }
                Err(_) => debug!("{} became ready after removal", identity),
            },
            Message::ObjectFailed(identity) => {
                if self.entities.contains(identity) {
                    warn!("engine host could not create {}", identity);
                    for gone in self.discard(identity) {
                        events.push(BridgeEvent::ObjectFailed(gone));
                    }
                    self.flush_backlog()?;
                } else {
                    debug!("{} failed after removal", identity);
                }
            }
            Message::Report(buffer) => {
                let kind = buffer.kind();
                let decoded = self.decode_report(&buffer, events);
                if let Some(kind) = kind {
                    self.report_capacity[kind.index()] = buffer.capacity();
                }
                if decoded.is_ok() {
                    self.endpoint.send(Command::ReturnBuffer(buffer))?;
                }
                decoded?;
                if kind == Some(ReportKind::World) {
                    self.simulating = false;
                    events.push(BridgeEvent::StepComplete);
                }
            }
            Message::StepFailed { reason } => {
                warn!("step failed: {}", reason);
                self.simulating = false;
                events.push(BridgeEvent::StepFailed { reason });
            }
            Message::Unknown { tag } => warn!("ignoring unknown message tag {}", tag),
        }
        Ok(())
    }

    fn decode_report(&mut self, buffer: &ReportBuffer, events: &mut Vec<BridgeEvent>) -> Result<()> {
        let Some(kind) = buffer.kind() else {
            warn!("ignoring report with unknown tag {}", buffer.kind_tag());
            return Ok(());
        };
        match kind {
            ReportKind::World => {
                for record in buffer.records::<WorldRecord>()? {
                    let Some(identity) = record.identity() else {
                        continue;
                    };
                    match self.rigid_mut(identity) {
                        Ok(state) => {
                            state.reconcile(record);
                        }
                        Err(_) => debug!("world report names unknown body {}", identity),
                    }
                }
            }
            ReportKind::Collision => {
                let records = buffer.records::<CollisionRecord>()?;
                let entities = &self.entities;
                let changes = self.touches.update(records, |id| {
                    entities.resolve(id).map_or(false, |e| e.is_body())
                });
                for change in changes {
                    events.push(match change {
                        TouchChange::Entered {
                            body,
                            other,
                            normal,
                        } => BridgeEvent::Collision {
                            body,
                            other,
                            relative_velocity: self.velocity_of(body) - self.velocity_of(other),
                            normal,
                        },
                        TouchChange::Left { body, other } => {
                            BridgeEvent::Separation { body, other }
                        }
                    });
                }
            }
            ReportKind::Vehicle => {
                let mut updated = BTreeSet::new();
                for record in buffer.records::<VehicleRecord>()? {
                    let Some(identity) = Identity::from_bits(record.vehicle) else {
                        continue;
                    };
                    let Ok(Entity {
                        kind: EntityKind::Vehicle(state),
                        ..
                    }) = self.entities.resolve_mut(identity)
                    else {
                        debug!("vehicle report names unknown vehicle {}", identity);
                        continue;
                    };
                    let index = record.wheel as usize;
                    if index >= state.wheels.len() {
                        state.wheels.resize(index + 1, WheelState::default());
                    }
                    state.wheels[index] = WheelState {
                        position: Vec3::from_array(record.position),
                        rotation: Quat::from_array(record.rotation),
                    };
                    updated.insert(identity);
                }
                events.extend(updated.into_iter().map(BridgeEvent::VehicleUpdated));
            }
            ReportKind::Constraint => {
                for record in buffer.records::<ConstraintRecord>()? {
                    let Some(identity) = Identity::from_bits(record.constraint) else {
                        continue;
                    };
                    let Ok(Entity {
                        kind: EntityKind::Constraint(state),
                        ..
                    }) = self.entities.resolve_mut(identity)
                    else {
                        debug!("constraint report names unknown constraint {}", identity);
                        continue;
                    };
                    state.offset = Vec3::from_array(record.offset);
                    state.applied_impulse = record.applied_impulse;
                    events.push(BridgeEvent::ConstraintUpdated(identity));
                }
            }
            ReportKind::SoftBody => {
                for view in buffer.soft_bodies()? {
                    let view = view?;
                    let Some(identity) = view.identity else {
                        continue;
                    };
                    let Ok(Entity {
                        kind: EntityKind::SoftBody(state),
                        ..
                    }) = self.entities.resolve_mut(identity)
                    else {
                        debug!("soft body report names unknown body {}", identity);
                        continue;
                    };
                    state.apply(&view)?;
                    events.push(BridgeEvent::SoftBodyUpdated(identity));
                }
            }
        }
        Ok(())
    }

    fn velocity_of(&self, identity: Identity) -> Vec3 {
        self.rigid(identity)
            .map_or(Vec3::ZERO, |state| state.linear_velocity)
    }
}

impl Drop for PhysicsHost {
    fn drop(&mut self) {
        let _ = self.endpoint.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("engine host thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{connect, EngineEndpoint};
    use meshi_physx_protocol::ShapeDescriptor;

    fn detached() -> (PhysicsHost, EngineEndpoint) {
        let (host, engine) = connect();
        let bridge = PhysicsHost::from_endpoint(host, BridgeConfig::default()).unwrap();
        assert!(matches!(engine.recv().unwrap(), Command::Init(_)));
        (bridge, engine)
    }

    fn ball() -> BodyDescriptor {
        BodyDescriptor::rigid(ShapeDescriptor::Sphere { radius: 0.5 }, 1.0)
    }

    fn sent(engine: &EngineEndpoint) -> Vec<Command> {
        let mut out = Vec::new();
        while let Ok(Some(command)) = engine.try_recv() {
            out.push(command);
        }
        out
    }

    #[test]
    fn commands_wait_for_engine_ready() {
        let (mut bridge, engine) = detached();
        let body = bridge.add_body(ball()).unwrap();
        assert!(sent(&engine).is_empty());
        assert!(!bridge.step(1.0 / 60.0, None));

        engine.send(Message::EngineLoaded).unwrap();
        engine.send(Message::EngineReady).unwrap();
        let events = bridge.poll().unwrap();
        assert_eq!(events, vec![BridgeEvent::EngineReady]);
        assert!(bridge.is_loaded());
        let commands = sent(&engine);
        assert!(matches!(commands[..], [Command::CreateBody { identity, .. }] if identity == body));
    }

    #[test]
    fn commands_for_pending_bodies_are_held_in_order() {
        let (mut bridge, engine) = detached();
        engine.send(Message::EngineReady).unwrap();
        bridge.poll().unwrap();

        let body = bridge.add_body(ball()).unwrap();
        bridge.apply_central_impulse(body, Vec3::X).unwrap();
        bridge.set_damping(body, 0.1, 0.1).unwrap();
        assert_eq!(sent(&engine).len(), 1);
        assert_eq!(bridge.lifecycle(body).unwrap(), Lifecycle::Pending);

        engine.send(Message::ObjectReady(body)).unwrap();
        assert_eq!(bridge.poll().unwrap(), vec![BridgeEvent::ObjectReady(body)]);
        let commands = sent(&engine);
        assert!(matches!(
            commands[..],
            [Command::ApplyCentralImpulse { .. }, Command::SetDamping { .. }]
        ));
        assert_eq!(bridge.lifecycle(body).unwrap(), Lifecycle::Live);
    }

    #[test]
    fn removing_a_body_drops_children_and_held_commands() {
        let (mut bridge, engine) = detached();
        engine.send(Message::EngineReady).unwrap();
        bridge.poll().unwrap();

        let a = bridge.add_body(ball()).unwrap();
        let b = bridge.add_body(ball()).unwrap();
        let joint = bridge
            .add_constraint(ConstraintDescriptor {
                kind: meshi_physx_protocol::ConstraintKind::Point,
                body_a: a,
                body_b: Some(b),
                pivot_a: Vec3::ZERO,
                pivot_b: Vec3::ZERO,
            })
            .unwrap();
        sent(&engine);

        bridge.remove(b).unwrap();
        assert!(!bridge.contains(joint));
        assert!(!bridge.contains(b));
        assert!(bridge.contains(a));

        engine.send(Message::ObjectReady(a)).unwrap();
        bridge.poll().unwrap();
        let commands = sent(&engine);
        assert!(matches!(commands[..], [Command::RemoveBody(id)] if id == b));
        assert!(matches!(bridge.remove(b), Err(BridgeError::NotFound(_))));
    }

    #[test]
    fn desync_latches() {
        let (mut bridge, engine) = detached();
        engine.send(Message::EngineReady).unwrap();
        bridge.poll().unwrap();
        assert!(bridge.step(1.0 / 60.0, None));

        let mut raw = vec![0.0f32; 2];
        raw[0] = f32::from_bits(ReportKind::World.tag());
        raw[1] = f32::from_bits(5);
        engine
            .send(Message::Report(ReportBuffer::from_raw(raw)))
            .unwrap();

        let err = bridge.poll().unwrap_err();
        assert!(matches!(
            err,
            BridgeError::ProtocolDesync {
                kind: 0,
                count: 5,
                capacity: 2
            }
        ));
        assert!(matches!(
            bridge.poll(),
            Err(BridgeError::ProtocolDesync { count: 5, .. })
        ));
        assert!(!bridge.step(1.0 / 60.0, None));
    }

    #[test]
    fn failed_creation_releases_held_commands() {
        let (mut bridge, engine) = detached();
        engine.send(Message::EngineReady).unwrap();
        bridge.poll().unwrap();

        let broken = bridge.add_body(ball()).unwrap();
        let fine = bridge.add_body(ball()).unwrap();
        let joint = bridge
            .add_constraint(ConstraintDescriptor {
                kind: meshi_physx_protocol::ConstraintKind::Point,
                body_a: broken,
                body_b: Some(fine),
                pivot_a: Vec3::ZERO,
                pivot_b: Vec3::ZERO,
            })
            .unwrap();
        bridge.set_linear_velocity(fine, Vec3::X).unwrap();
        assert_eq!(sent(&engine).len(), 2);

        engine.send(Message::ObjectReady(fine)).unwrap();
        engine.send(Message::ObjectFailed(broken)).unwrap();
        assert_eq!(
            bridge.poll().unwrap(),
            vec![
                BridgeEvent::ObjectReady(fine),
                BridgeEvent::ObjectFailed(broken),
                BridgeEvent::ObjectFailed(joint),
            ]
        );
        assert!(!bridge.contains(broken));
        assert!(!bridge.contains(joint));
        let commands = sent(&engine);
        assert!(matches!(
            commands[..],
            [Command::SetLinearVelocity { identity, .. }] if identity == fine
        ));

        // a late failure for something already removed changes nothing
        engine.send(Message::ObjectFailed(broken)).unwrap();
        assert!(bridge.poll().unwrap().is_empty());
    }

    #[test]
    fn unusable_time_steps_are_rejected() {
        let (mut bridge, engine) = detached();
        engine.send(Message::EngineReady).unwrap();
        bridge.poll().unwrap();

        assert!(!bridge.step(-1.0 / 60.0, None));
        assert!(!bridge.step(f32::NAN, None));
        assert!(!bridge.step(f32::INFINITY, Some(1)));
        assert!(!bridge.is_simulating());
        assert!(sent(&engine).is_empty());

        assert!(bridge.step(0.0, None));
        assert!(matches!(sent(&engine)[..], [Command::Simulate(_)]));
    }

    #[test]
    fn events_ahead_of_a_desync_are_kept() {
        let (mut bridge, engine) = detached();
        engine.send(Message::EngineReady).unwrap();
        bridge.poll().unwrap();
        let body = bridge.add_body(ball()).unwrap();
        assert!(bridge.step(1.0 / 60.0, None));

        let mut raw = vec![0.0f32; 2];
        raw[0] = f32::from_bits(ReportKind::World.tag());
        raw[1] = f32::from_bits(5);
        engine.send(Message::ObjectReady(body)).unwrap();
        engine
            .send(Message::Report(ReportBuffer::from_raw(raw)))
            .unwrap();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge.set_event_cb(move |e| sink.lock().unwrap().push(e.clone()));

        assert!(matches!(
            bridge.poll(),
            Err(BridgeError::ProtocolDesync { .. })
        ));
        assert_eq!(bridge.poll().unwrap(), vec![BridgeEvent::ObjectReady(body)]);
        assert!(matches!(
            bridge.poll(),
            Err(BridgeError::ProtocolDesync { .. })
        ));
        // the callback heard about it once
        assert_eq!(*seen.lock().unwrap(), vec![BridgeEvent::ObjectReady(body)]);
    }
}
