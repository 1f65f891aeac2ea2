//! The engine host: owns the physics simulation on its own thread.
//!
//! Commands arrive in order and are handled one at a time. Nothing here
//! fails the loop: a command about an entity that is gone is skipped, a
//! body with a broken shape is never created, and a step whose reports
//! cannot be encoded is announced with [`Message::StepFailed`].

pub mod encoder;
pub mod shape_cache;

use std::io;
use std::thread::{self, JoinHandle};

use glam::Vec3;
use meshi_physics::{
    Constraint, ConstraintInfo, ConstraintType, ForceMotor, Handle, MaterialInfo, Motor,
    PhysicsSimulation, RigidBody, RigidBodyInfo, SimulationInfo, SoftBody, SoftBodyInfo,
    SoftBodyShape, Vehicle, VehicleInfo, WheelInfo,
};
use meshi_physx_protocol::{
    BodyDescriptor, BodyKind, Command, ConstraintDescriptor, ConstraintKind, ConstraintTuning,
    Identity, Message, SimulateRequest, SoftGeometry, TransformOverride, VehicleDescriptor,
    WheelDescriptor, WorldSettings,
};
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::registry::EntityRegistry;
use crate::transport::EngineEndpoint;
use encoder::ReportEncoder;
use shape_cache::{ShapeCache, ShapeRef};

#[derive(Debug)]
pub(crate) enum BodyEntry {
    Rigid {
        handle: Handle<RigidBody>,
        shape: ShapeRef,
    },
    Soft {
        handle: Handle<SoftBody>,
    },
}

#[derive(Debug)]
pub(crate) struct VehicleEntry {
    pub(crate) handle: Handle<Vehicle>,
    pub(crate) chassis: Identity,
}

#[derive(Debug)]
pub(crate) struct ConstraintEntry {
    pub(crate) handle: Handle<Constraint>,
    pub(crate) kind: ConstraintKind,
    pub(crate) body_a: Identity,
    pub(crate) body_b: Option<Identity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct EngineHost {
    endpoint: EngineEndpoint,
    sim: PhysicsSimulation,
    settings: WorldSettings,
    ready: bool,
    bodies: EntityRegistry<BodyEntry>,
    vehicles: EntityRegistry<VehicleEntry>,
    constraints: EntityRegistry<ConstraintEntry>,
    shapes: ShapeCache,
    encoder: ReportEncoder,
}

impl EngineHost {
    /// Build the simulation and announce it with [`Message::EngineLoaded`].
    pub fn new(endpoint: EngineEndpoint) -> Self {
        let settings = WorldSettings::default();
        let sim = PhysicsSimulation::new(&SimulationInfo {
            gravity: settings.gravity,
            fixed_time_step: settings.fixed_time_step,
            ..Default::default()
        });
        let host = Self {
            endpoint,
            sim,
            settings,
            ready: false,
            bodies: EntityRegistry::new(),
            vehicles: EntityRegistry::new(),
            constraints: EntityRegistry::new(),
            shapes: ShapeCache::default(),
            encoder: ReportEncoder::new(settings.report_chunk_size, settings.max_report_scalars),
        };
        if host.endpoint.send(Message::EngineLoaded).is_err() {
            warn!("engine host loaded but nobody is listening");
        } else {
            info!("physics engine loaded");
        }
        host
    }

    /// Run an engine host on its own thread until `Shutdown` or until the
    /// host hangs up.
    pub fn spawn(endpoint: EngineEndpoint) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("physx-engine-host".to_string())
            .spawn(move || EngineHost::new(endpoint).run())
    }

    pub fn run(mut self) {
        loop {
            let command = match self.endpoint.recv() {
                Ok(command) => command,
                Err(_) => {
                    debug!("host hung up");
                    break;
                }
            };
            if self.handle(command) == Flow::Stop {
                break;
            }
        }
        info!("engine host stopped");
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn handle(&mut self, command: Command) -> Flow {
        match self.dispatch(command) {
            Ok(flow) => flow,
            Err(BridgeError::NotFound(identity)) => {
                debug!("skipping command for unknown entity {}", identity);
                Flow::Continue
            }
            Err(BridgeError::Disconnected) => {
                debug!("host hung up");
                Flow::Stop
            }
            Err(err) => {
                error!("{}", err);
                Flow::Continue
            }
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Flow> {
        match command {
            Command::Init(settings) => self.init(settings)?,
            Command::CreateBody {
                identity,
                descriptor,
            } => {
                let created = self.create_body(identity, descriptor);
                self.reject_on_failure(identity, created)?
            }
            Command::CreateVehicle {
                identity,
                descriptor,
            } => {
                let created = self.create_vehicle(identity, descriptor);
                self.reject_on_failure(identity, created)?
            }
            Command::AddWheel { vehicle, wheel } => self.add_wheel(vehicle, wheel)?,
            Command::CreateConstraint {
                identity,
                descriptor,
            } => {
                let created = self.create_constraint(identity, descriptor);
                self.reject_on_failure(identity, created)?
            }
            Command::RemoveBody(identity) => self.remove_body(identity)?,
            Command::RemoveVehicle(identity) => self.remove_vehicle(identity)?,
            Command::RemoveConstraint(identity) => self.remove_constraint(identity)?,
            Command::UpdateTransform(o) => self.apply_override(&o)?,
            Command::UpdateMass { identity, mass } => self.rigid_mut(identity)?.set_mass(mass),
            Command::ApplyCentralImpulse { identity, impulse } => {
                self.rigid_mut(identity)?.apply_central_impulse(impulse)
            }
            Command::ApplyImpulse {
                identity,
                impulse,
                point,
            } => self.rigid_mut(identity)?.apply_impulse(impulse, point),
            Command::ApplyTorque { identity, torque } => {
                self.rigid_mut(identity)?.apply_torque(torque)
            }
            Command::ApplyCentralForce { identity, force } => {
                self.rigid_mut(identity)?.apply_central_force(force)
            }
            Command::ApplyForce {
                identity,
                force,
                point,
            } => self.rigid_mut(identity)?.apply_force(force, point),
            Command::SetLinearVelocity { identity, velocity } => {
                self.rigid_mut(identity)?.set_linear_velocity(velocity)
            }
            Command::SetAngularVelocity { identity, velocity } => {
                self.rigid_mut(identity)?.set_angular_velocity(velocity)
            }
            Command::SetLinearFactor { identity, factor } => {
                self.rigid_mut(identity)?.set_linear_factor(factor)
            }
            Command::SetAngularFactor { identity, factor } => {
                self.rigid_mut(identity)?.set_angular_factor(factor)
            }
            Command::SetDamping {
                identity,
                linear,
                angular,
            } => self.rigid_mut(identity)?.set_damping(linear, angular),
            Command::SetCcdThresholds {
                identity,
                motion_threshold,
                swept_sphere_radius,
            } => self
                .rigid_mut(identity)?
                .set_ccd(motion_threshold, swept_sphere_radius),
            Command::SetVehicleSteering {
                vehicle,
                wheel,
                steering,
            } => self.vehicle_mut(vehicle)?.set_steering(wheel, steering)?,
            Command::SetVehicleBrake {
                vehicle,
                wheel,
                brake,
            } => self.vehicle_mut(vehicle)?.set_brake(wheel, brake)?,
            Command::ApplyVehicleEngineForce {
                vehicle,
                wheel,
                force,
            } => self.vehicle_mut(vehicle)?.apply_engine_force(wheel, force)?,
            Command::TuneConstraint { identity, tuning } => self.tune_constraint(identity, tuning)?,
            Command::AppendAnchor {
                soft_body,
                node,
                body,
            } => self.append_anchor(soft_body, node, body)?,
            Command::Simulate(request) => self.simulate(request)?,
            Command::SetGravity(gravity) => {
                self.settings.gravity = gravity;
                self.sim.set_gravity(gravity);
            }
            Command::SetFixedTimeStep(step) => {
                if step > 0.0 {
                    self.settings.fixed_time_step = step;
                    self.sim.set_fixed_time_step(step);
                } else {
                    warn!("ignoring non-positive fixed time step {}", step);
                }
            }
            Command::ReturnBuffer(buffer) => self.encoder.restore(buffer),
            Command::Shutdown => {
                info!("engine host shutting down");
                return Ok(Flow::Stop);
            }
            Command::Unknown { tag } => warn!("ignoring unknown command tag {}", tag),
        }
        Ok(Flow::Continue)
    }

    fn init(&mut self, settings: WorldSettings) -> Result<()> {
        self.settings = settings;
        self.sim.set_gravity(settings.gravity);
        self.sim.set_fixed_time_step(settings.fixed_time_step);
        self.encoder
            .configure(settings.report_chunk_size, settings.max_report_scalars);
        self.ready = true;
        info!(
            "physics world ready: gravity {}, fixed step {}s",
            settings.gravity, settings.fixed_time_step
        );
        self.endpoint.send(Message::EngineReady)
    }

    /// A creation that failed for any reason but a lost host is answered
    /// with [`Message::ObjectFailed`], so the host stops waiting on it.
    fn reject_on_failure(&mut self, identity: Identity, created: Result<()>) -> Result<()> {
        match created {
            Ok(()) => Ok(()),
            Err(BridgeError::Disconnected) => Err(BridgeError::Disconnected),
            Err(err) => {
                error!("could not create {}: {}", identity, err);
                self.endpoint.send(Message::ObjectFailed(identity))
            }
        }
    }

    fn rigid_handle(&self, identity: Identity) -> Result<Handle<RigidBody>> {
        match self.bodies.resolve(identity)? {
            BodyEntry::Rigid { handle, .. } => Ok(*handle),
            BodyEntry::Soft { .. } => Err(BridgeError::NotFound(identity)),
        }
    }

    fn rigid_mut(&mut self, identity: Identity) -> Result<&mut RigidBody> {
        let handle = self.rigid_handle(identity)?;
        self.sim
            .rigid_body_mut(handle)
            .map_err(|_| BridgeError::NotFound(identity))
    }

    fn vehicle_mut(&mut self, identity: Identity) -> Result<&mut Vehicle> {
        let handle = self.vehicles.resolve(identity)?.handle;
        self.sim
            .vehicle_mut(handle)
            .map_err(|_| BridgeError::NotFound(identity))
    }

    fn create_body(&mut self, identity: Identity, desc: BodyDescriptor) -> Result<()> {
        if self.bodies.contains(identity) {
            warn!("body {} already exists", identity);
            return Ok(());
        }
        let entry = match &desc.kind {
            BodyKind::Rigid(shape_desc) => {
                let shape = self
                    .shapes
                    .get_or_create(&mut self.sim, shape_desc)
                    .map_err(|err| match err {
                        BridgeError::MalformedShape(reason) => {
                            BridgeError::MalformedShape(format!("body {}: {}", identity, reason))
                        }
                        other => other,
                    })?;
                let info = RigidBodyInfo {
                    shape: shape.handle(),
                    scale: desc.scale,
                    mass: desc.mass,
                    material: MaterialInfo {
                        friction: desc.material.friction,
                        restitution: desc.material.restitution,
                    },
                    position: desc.transform.position,
                    rotation: desc.transform.rotation,
                    linear_damping: desc.linear_damping,
                    angular_damping: desc.angular_damping,
                    user_index: identity.get(),
                };
                match self.sim.create_rigid_body(&info) {
                    Ok(handle) => BodyEntry::Rigid { handle, shape },
                    Err(err) => {
                        self.shapes.release(&mut self.sim, shape);
                        return Err(err.into());
                    }
                }
            }
            BodyKind::Soft(soft) => {
                let shape = match &soft.geometry {
                    SoftGeometry::Rope {
                        start,
                        end,
                        segments,
                    } => SoftBodyShape::Rope {
                        start: *start,
                        end: *end,
                        segments: *segments,
                    },
                    SoftGeometry::Cloth {
                        corners,
                        segments_x,
                        segments_y,
                    } => SoftBodyShape::Cloth {
                        corners: *corners,
                        segments_x: *segments_x,
                        segments_y: *segments_y,
                    },
                    SoftGeometry::Volume { vertices, indices } => SoftBodyShape::Volume {
                        vertices: vertices.clone(),
                        indices: indices.clone(),
                    },
                };
                let handle = self
                    .sim
                    .create_soft_body(&SoftBodyInfo {
                        shape,
                        mass: desc.mass,
                        stiffness: soft.stiffness,
                        iterations: soft.iterations,
                        position: desc.transform.position,
                        rotation: desc.transform.rotation,
                        scale: desc.scale,
                    })
                    .map_err(|err| {
                        BridgeError::MalformedShape(format!("soft body {}: {}", identity, err))
                    })?;
                BodyEntry::Soft { handle }
            }
        };
        self.bodies.bind(identity, entry);
        debug!("created body {}", identity);
        self.endpoint.send(Message::ObjectReady(identity))
    }

    fn create_vehicle(&mut self, identity: Identity, desc: VehicleDescriptor) -> Result<()> {
        let chassis = self.rigid_handle(desc.chassis)?;
        let t = desc.tuning;
        let handle = self.sim.create_vehicle(
            chassis,
            &VehicleInfo {
                suspension_stiffness: t.suspension_stiffness,
                suspension_compression: t.suspension_compression,
                suspension_damping: t.suspension_damping,
                max_suspension_travel_cm: t.max_suspension_travel,
                friction_slip: t.friction_slip,
                max_suspension_force: t.max_suspension_force,
            },
        )?;
        self.vehicles.bind(
            identity,
            VehicleEntry {
                handle,
                chassis: desc.chassis,
            },
        );
        debug!("created vehicle {} on chassis {}", identity, desc.chassis);
        self.endpoint.send(Message::ObjectReady(identity))
    }

    fn add_wheel(&mut self, vehicle: Identity, wheel: WheelDescriptor) -> Result<()> {
        let handle = self.vehicles.resolve(vehicle)?.handle;
        let index = self.sim.add_wheel(
            handle,
            &WheelInfo {
                connection_point: wheel.connection_point,
                direction: wheel.direction,
                axle: wheel.axle,
                suspension_rest_length: wheel.suspension_rest_length,
                radius: wheel.radius,
                is_front: wheel.is_front,
            },
        )?;
        debug!("vehicle {} gained wheel {}", vehicle, index);
        Ok(())
    }

    fn create_constraint(&mut self, identity: Identity, desc: ConstraintDescriptor) -> Result<()> {
        let body_a = self.rigid_handle(desc.body_a)?;
        let body_b = desc.body_b.map(|b| self.rigid_handle(b)).transpose()?;
        let (kind, axis) = match desc.kind {
            ConstraintKind::Point => (ConstraintType::Point, Vec3::Y),
            ConstraintKind::Hinge { axis } => (ConstraintType::Hinge, axis),
            ConstraintKind::Slider { axis } => (ConstraintType::Slider, axis),
            ConstraintKind::ConeTwist { axis } => (ConstraintType::ConeTwist, axis),
            ConstraintKind::Dof => (ConstraintType::Dof, Vec3::X),
        };
        let handle = self.sim.create_constraint(&ConstraintInfo {
            kind,
            body_a,
            body_b,
            pivot_a: desc.pivot_a,
            pivot_b: desc.pivot_b,
            axis,
        })?;
        self.constraints.bind(
            identity,
            ConstraintEntry {
                handle,
                kind: desc.kind,
                body_a: desc.body_a,
                body_b: desc.body_b,
            },
        );
        debug!("created {:?} constraint {}", kind, identity);
        self.endpoint.send(Message::ObjectReady(identity))
    }

    /// Removing a body takes its constraints and any vehicle riding on it
    /// along.
    fn remove_body(&mut self, identity: Identity) -> Result<()> {
        if !self.bodies.contains(identity) {
            return Err(BridgeError::NotFound(identity));
        }
        for child in self.constraints.find_all(|c| {
            c.body_a == identity || c.body_b == Some(identity)
        }) {
            self.remove_constraint(child)?;
        }
        for child in self.vehicles.find_all(|v| v.chassis == identity) {
            self.remove_vehicle(child)?;
        }
        match self.bodies.unregister(identity) {
            Some(BodyEntry::Rigid { handle, shape }) => {
                self.sim.release_rigid_body(handle);
                self.shapes.release(&mut self.sim, shape);
            }
            Some(BodyEntry::Soft { handle }) => self.sim.release_soft_body(handle),
            None => return Err(BridgeError::NotFound(identity)),
        }
        debug!("removed body {}", identity);
        Ok(())
    }

    fn remove_vehicle(&mut self, identity: Identity) -> Result<()> {
        let entry = self
            .vehicles
            .unregister(identity)
            .ok_or(BridgeError::NotFound(identity))?;
        self.sim.release_vehicle(entry.handle);
        debug!("removed vehicle {}", identity);
        Ok(())
    }

    fn remove_constraint(&mut self, identity: Identity) -> Result<()> {
        let entry = self
            .constraints
            .unregister(identity)
            .ok_or(BridgeError::NotFound(identity))?;
        self.sim.release_constraint(entry.handle);
        debug!("removed constraint {}", identity);
        Ok(())
    }

    fn apply_override(&mut self, o: &TransformOverride) -> Result<()> {
        let handle = self.rigid_handle(o.identity)?;
        self.sim
            .set_rigid_body_transform(handle, o.position, o.rotation)
            .map_err(|_| BridgeError::NotFound(o.identity))
    }

    fn tune_constraint(&mut self, identity: Identity, tuning: ConstraintTuning) -> Result<()> {
        let entry = self.constraints.resolve(identity)?;
        if !tuning.applies_to(&entry.kind) {
            warn!(
                "{:?} does not apply to {:?} constraint {}",
                tuning, entry.kind, identity
            );
            return Ok(());
        }
        let handle = entry.handle;
        let constraint = self
            .sim
            .constraint_mut(handle)
            .map_err(|_| BridgeError::NotFound(identity))?;

        use ConstraintTuning::*;
        match tuning {
            HingeLimits {
                low,
                high,
                bias_factor,
                relaxation_factor,
            } => {
                let hinge = constraint.hinge_mut()?;
                hinge.low = low;
                hinge.high = high;
                hinge.bias_factor = bias_factor;
                hinge.relaxation_factor = relaxation_factor;
            }
            HingeMotor {
                velocity,
                max_impulse,
            } => {
                constraint.hinge_mut()?.motor = Some(Motor {
                    velocity,
                    max_impulse,
                })
            }
            HingeDisableMotor => constraint.hinge_mut()?.motor = None,
            SliderLimits {
                linear_lower,
                linear_upper,
                angular_lower,
                angular_upper,
            } => {
                let slider = constraint.slider_mut()?;
                slider.linear_lower = linear_lower;
                slider.linear_upper = linear_upper;
                slider.angular_lower = angular_lower;
                slider.angular_upper = angular_upper;
            }
            SliderRestitution { linear, angular } => {
                let slider = constraint.slider_mut()?;
                slider.linear_restitution = linear;
                slider.angular_restitution = angular;
            }
            SliderLinearMotor {
                velocity,
                max_force,
            } => {
                constraint.slider_mut()?.linear_motor = Some(ForceMotor {
                    velocity,
                    max_force,
                })
            }
            SliderDisableLinearMotor => constraint.slider_mut()?.linear_motor = None,
            SliderAngularMotor {
                velocity,
                max_force,
            } => {
                constraint.slider_mut()?.angular_motor = Some(ForceMotor {
                    velocity,
                    max_force,
                })
            }
            SliderDisableAngularMotor => constraint.slider_mut()?.angular_motor = None,
            ConeTwistLimit { x, y, z } => {
                // swing spans are taken about z then y, twist about x
                let cone = constraint.cone_twist_mut()?;
                cone.swing_span1 = z;
                cone.swing_span2 = y;
                cone.twist_span = x;
            }
            ConeTwistEnableMotor => constraint.cone_twist_mut()?.motor_enabled = true,
            ConeTwistDisableMotor => constraint.cone_twist_mut()?.motor_enabled = false,
            ConeTwistMaxMotorImpulse(impulse) => {
                constraint.cone_twist_mut()?.max_motor_impulse = impulse
            }
            ConeTwistMotorTarget(target) => {
                constraint.cone_twist_mut()?.motor_target = target.normalize()
            }
            DofLinearLowerLimit(v) => constraint.dof_mut()?.linear_lower = v,
            DofLinearUpperLimit(v) => constraint.dof_mut()?.linear_upper = v,
            DofAngularLowerLimit(v) => constraint.dof_mut()?.angular_lower = v,
            DofAngularUpperLimit(v) => constraint.dof_mut()?.angular_upper = v,
            DofConfigureAngularMotor {
                axis,
                low,
                high,
                velocity,
                max_force,
            } => {
                let dof = constraint.dof_mut()?;
                let i = motor_axis(identity, axis)?;
                dof.angular_lower[i] = low;
                dof.angular_upper[i] = high;
                dof.angular_motors[i].velocity = velocity;
                dof.angular_motors[i].max_force = max_force;
            }
            DofEnableAngularMotor(axis) => {
                let i = motor_axis(identity, axis)?;
                constraint.dof_mut()?.angular_motors[i].enabled = true;
            }
            DofDisableAngularMotor(axis) => {
                let i = motor_axis(identity, axis)?;
                constraint.dof_mut()?.angular_motors[i].enabled = false;
            }
        }
        Ok(())
    }

    fn append_anchor(&mut self, soft_body: Identity, node: u32, body: Identity) -> Result<()> {
        let soft = match self.bodies.resolve(soft_body)? {
            BodyEntry::Soft { handle } => *handle,
            BodyEntry::Rigid { .. } => return Err(BridgeError::NotFound(soft_body)),
        };
        let rigid = self.rigid_handle(body)?;
        self.sim.append_anchor(soft, node, rigid)?;
        debug!("anchored node {} of {} to {}", node, soft_body, body);
        Ok(())
    }

    fn simulate(&mut self, request: SimulateRequest) -> Result<()> {
        for o in &request.overrides {
            if let Err(err) = self.apply_override(o) {
                debug!("transform override skipped: {}", err);
            }
        }

        let fixed = self.sim.fixed_time_step();
        let time_step = if request.time_step.is_finite() {
            request.time_step.max(fixed)
        } else {
            warn!("time step {} replaced by one fixed step", request.time_step);
            fixed
        };
        let max_sub_steps = request
            .max_sub_steps
            .unwrap_or_else(|| (time_step / fixed).ceil() as u32);
        let taken = self.sim.step(time_step, max_sub_steps);
        debug!("advanced {}s in {} substeps", time_step, taken);

        match self.encoder.encode_step(
            &self.sim,
            &self.bodies,
            &self.vehicles,
            &self.constraints,
            self.settings.soft_bodies,
        ) {
            Ok(reports) => {
                for report in reports {
                    self.endpoint.send(Message::Report(report))?;
                }
                Ok(())
            }
            Err(err) => {
                error!("step produced no reports: {}", err);
                self.endpoint.send(Message::StepFailed {
                    reason: err.to_string(),
                })
            }
        }
    }
}

fn motor_axis(identity: Identity, axis: u8) -> Result<usize> {
    if axis < 3 {
        Ok(axis as usize)
    } else {
        warn!("constraint {} has no angular axis {}", identity, axis);
        Err(BridgeError::NotFound(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{connect, HostEndpoint};
    use glam::vec3;
    use meshi_physx_protocol::report::WorldRecord;
    use meshi_physx_protocol::{ReportKind, ShapeDescriptor};

    fn id(raw: u32) -> Identity {
        Identity::new(raw).unwrap()
    }

    fn engine() -> (EngineHost, HostEndpoint) {
        let (host, endpoint) = connect();
        let mut engine = EngineHost::new(endpoint);
        assert!(matches!(host.try_recv().unwrap(), Some(Message::EngineLoaded)));
        engine.handle(Command::Init(WorldSettings {
            gravity: Vec3::ZERO,
            ..Default::default()
        }));
        assert!(matches!(host.try_recv().unwrap(), Some(Message::EngineReady)));
        assert!(engine.is_ready());
        (engine, host)
    }

    fn ball(engine: &mut EngineHost, identity: Identity, position: Vec3) {
        engine.handle(Command::CreateBody {
            identity,
            descriptor: BodyDescriptor::rigid(ShapeDescriptor::Sphere { radius: 0.5 }, 1.0)
                .with_position(position),
        });
    }

    fn drain(host: &HostEndpoint) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(Some(message)) = host.try_recv() {
            out.push(message);
        }
        out
    }

    #[test]
    fn created_bodies_are_acknowledged() {
        let (mut engine, host) = engine();
        ball(&mut engine, id(1), Vec3::ZERO);
        let messages = drain(&host);
        assert!(matches!(messages[..], [Message::ObjectReady(i)] if i == id(1)));

        engine.handle(Command::CreateBody {
            identity: id(2),
            descriptor: BodyDescriptor::rigid(ShapeDescriptor::Unknown { tag: 40 }, 1.0),
        });
        let messages = drain(&host);
        assert!(matches!(messages[..], [Message::ObjectFailed(i)] if i == id(2)));
        assert!(!engine.bodies.contains(id(2)));
    }

    #[test]
    fn children_of_failed_bodies_are_rejected() {
        let (mut engine, host) = engine();
        engine.handle(Command::CreateVehicle {
            identity: id(5),
            descriptor: VehicleDescriptor {
                chassis: id(9),
                tuning: Default::default(),
            },
        });
        engine.handle(Command::CreateConstraint {
            identity: id(6),
            descriptor: ConstraintDescriptor {
                kind: ConstraintKind::Point,
                body_a: id(9),
                body_b: None,
                pivot_a: Vec3::ZERO,
                pivot_b: Vec3::ZERO,
            },
        });
        let messages = drain(&host);
        assert!(matches!(
            messages[..],
            [Message::ObjectFailed(v), Message::ObjectFailed(c)] if v == id(5) && c == id(6)
        ));
        assert!(engine.vehicles.is_empty());
        assert!(engine.constraints.is_empty());
    }

    #[test]
    fn commands_for_missing_entities_are_skipped() {
        let (mut engine, host) = engine();
        let flow = engine.handle(Command::ApplyCentralImpulse {
            identity: id(77),
            impulse: Vec3::X,
        });
        assert_eq!(flow, Flow::Continue);
        assert_eq!(engine.handle(Command::Unknown { tag: 999 }), Flow::Continue);
        assert_eq!(engine.handle(Command::RemoveVehicle(id(3))), Flow::Continue);
        assert!(drain(&host).is_empty());
        assert_eq!(engine.handle(Command::Shutdown), Flow::Stop);
    }

    #[test]
    fn removing_a_body_removes_its_children() {
        let (mut engine, host) = engine();
        ball(&mut engine, id(1), Vec3::ZERO);
        ball(&mut engine, id(2), vec3(3.0, 0.0, 0.0));
        engine.handle(Command::CreateConstraint {
            identity: id(3),
            descriptor: ConstraintDescriptor {
                kind: ConstraintKind::Point,
                body_a: id(1),
                body_b: Some(id(2)),
                pivot_a: Vec3::ZERO,
                pivot_b: Vec3::ZERO,
            },
        });
        engine.handle(Command::CreateVehicle {
            identity: id(4),
            descriptor: VehicleDescriptor {
                chassis: id(2),
                tuning: Default::default(),
            },
        });
        engine.handle(Command::AddWheel {
            vehicle: id(4),
            wheel: WheelDescriptor::default(),
        });
        assert_eq!(drain(&host).len(), 4);

        engine.handle(Command::RemoveBody(id(2)));
        assert!(!engine.constraints.contains(id(3)));
        assert!(!engine.vehicles.contains(id(4)));
        assert!(engine.bodies.contains(id(1)));
        assert_eq!(engine.sim.rigid_body_count(), 1);
        // the shared sphere stays cached for the next body
        assert_eq!(engine.shapes.refs("sphere_0.5"), Some(1));
    }

    #[test]
    fn simulate_clamps_tiny_steps_and_applies_overrides() {
        let (mut engine, host) = engine();
        ball(&mut engine, id(1), Vec3::ZERO);
        engine.handle(Command::SetLinearVelocity {
            identity: id(1),
            velocity: vec3(6.0, 0.0, 0.0),
        });
        drain(&host);

        engine.handle(Command::Simulate(SimulateRequest {
            time_step: 0.0001,
            max_sub_steps: None,
            overrides: vec![TransformOverride {
                identity: id(1),
                position: Some(vec3(0.0, 2.0, 0.0)),
                rotation: None,
            }],
        }));
        let messages = drain(&host);
        let Some(Message::Report(world)) = messages.last() else {
            panic!("world report must come last");
        };
        assert_eq!(world.kind(), Some(ReportKind::World));
        let record: &WorldRecord = &world.records::<WorldRecord>().unwrap()[0];
        // one whole fixed step was taken from the overridden position
        assert!((record.position[0] - 0.1).abs() < 1e-4);
        assert!((record.position[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn capacity_exhaustion_fails_the_step() {
        let (mut engine, host) = engine();
        engine.handle(Command::Init(WorldSettings {
            gravity: Vec3::ZERO,
            max_report_scalars: Some(20),
            ..Default::default()
        }));
        ball(&mut engine, id(1), Vec3::ZERO);
        ball(&mut engine, id(2), vec3(4.0, 0.0, 0.0));
        drain(&host);

        engine.handle(Command::Simulate(SimulateRequest {
            time_step: 1.0 / 60.0,
            ..Default::default()
        }));
        let messages = drain(&host);
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], Message::StepFailed { .. }));
    }

    #[test]
    fn tuning_is_checked_against_the_constraint_kind() {
        let (mut engine, host) = engine();
        ball(&mut engine, id(1), Vec3::ZERO);
        engine.handle(Command::CreateConstraint {
            identity: id(2),
            descriptor: ConstraintDescriptor {
                kind: ConstraintKind::Hinge { axis: Vec3::Z },
                body_a: id(1),
                body_b: None,
                pivot_a: Vec3::ZERO,
                pivot_b: Vec3::ZERO,
            },
        });
        drain(&host);

        engine.handle(Command::TuneConstraint {
            identity: id(2),
            tuning: ConstraintTuning::SliderDisableLinearMotor,
        });
        engine.handle(Command::TuneConstraint {
            identity: id(2),
            tuning: ConstraintTuning::HingeMotor {
                velocity: 1.5,
                max_impulse: 4.0,
            },
        });
        let handle = engine.constraints.resolve(id(2)).unwrap().handle;
        let hinge = engine.sim.constraint_mut(handle).unwrap().hinge_mut().unwrap();
        assert_eq!(
            hinge.motor,
            Some(Motor {
                velocity: 1.5,
                max_impulse: 4.0
            })
        );
    }
}
