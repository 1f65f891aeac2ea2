//! Rigid and soft body simulation.
//!
//! Every object lives in a [`Pool`] and is addressed by
//! [`Handle`]. Stepping follows a fixed internal time step: [`PhysicsSimulation::step`]
//! accumulates wall-clock time and runs as many fixed substeps as fit, up
//! to a caller-provided maximum.

mod body;
mod constraint;
mod shape;
mod soft;
mod vehicle;

use std::collections::{HashMap, HashSet};

use glam::*;
use thiserror::Error;
use tracing::debug;

pub use body::{ActorStatus, MaterialInfo, RigidBody, RigidBodyInfo};
pub use constraint::{
    AxisMotor, ConeTwist, Constraint, ConstraintInfo, ConstraintType, Dof, ForceMotor, Hinge,
    Motor, Slider,
};
pub use shape::{CompoundPart, Shape, ShapeInfo};
pub use soft::{SoftBody, SoftBodyInfo, SoftBodyShape, SoftNode, SoftTopology};
pub use vehicle::{Vehicle, VehicleInfo, Wheel, WheelInfo};

pub use resource_pool::{Handle, Pool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PhysicsError {
    #[error("handle does not name a live object")]
    InvalidHandle,
    #[error("geometry cannot form a shape")]
    InvalidGeometry,
    #[error("object pool is full")]
    OutOfSlots,
    #[error("constraint is of a different type")]
    WrongConstraintType,
    #[error("wheel index out of range")]
    InvalidWheel,
    #[error("soft body node out of range")]
    InvalidNode,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationInfo {
    pub gravity: Vec3,
    pub fixed_time_step: f32,
    pub solver_iterations: u32,
}

impl Default for SimulationInfo {
    fn default() -> Self {
        Self {
            gravity: vec3(0.0, -9.8, 0.0),
            fixed_time_step: 1.0 / 60.0,
            solver_iterations: 10,
        }
    }
}

/// One contact point found in the last substep. `normal` points from `a`
/// toward `b`. A pair touching at several points produces several contacts.
#[derive(Debug, Clone, Copy)]
pub struct ContactInfo {
    pub a: Handle<RigidBody>,
    pub b: Handle<RigidBody>,
    pub normal: Vec3,
    pub penetration: f32,
}

/// Share of the penetration depth removed per contact per substep.
const CONTACT_CORRECTION: f32 = 0.8;

pub struct PhysicsSimulation {
    info: SimulationInfo,
    shapes: Pool<Shape>,
    rigid_bodies: Pool<RigidBody>,
    constraints: Pool<Constraint>,
    vehicles: Pool<Vehicle>,
    soft_bodies: Pool<SoftBody>,
    contacts: Vec<ContactInfo>,
    accumulator: f32,
    shape_count: usize,
    rigid_body_count: usize,
}

impl PhysicsSimulation {
    pub fn new(info: &SimulationInfo) -> Self {
        let mut info = *info;
        if !(info.fixed_time_step > 0.0) {
            info.fixed_time_step = SimulationInfo::default().fixed_time_step;
        }
        Self {
            info,
            shapes: Default::default(),
            rigid_bodies: Default::default(),
            constraints: Default::default(),
            vehicles: Default::default(),
            soft_bodies: Default::default(),
            contacts: Vec::new(),
            accumulator: 0.0,
            shape_count: 0,
            rigid_body_count: 0,
        }
    }

    pub fn gravity(&self) -> Vec3 {
        self.info.gravity
    }

    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.info.gravity = gravity;
    }

    pub fn fixed_time_step(&self) -> f32 {
        self.info.fixed_time_step
    }

    /// Non-positive values are ignored.
    pub fn set_fixed_time_step(&mut self, step: f32) {
        if step > 0.0 {
            self.info.fixed_time_step = step;
        }
    }

    pub fn create_shape(&mut self, info: &ShapeInfo) -> Result<Handle<Shape>, PhysicsError> {
        let h = shape::create(&mut self.shapes, info)?;
        self.shape_count += 1;
        Ok(h)
    }

    pub fn release_shape(&mut self, h: Handle<Shape>) {
        if self.shapes.get_ref(h).is_some() {
            self.shapes.release(h);
            self.shape_count -= 1;
        }
    }

    pub fn shape_count(&self) -> usize {
        self.shape_count
    }

    pub fn create_rigid_body(&mut self, info: &RigidBodyInfo) -> Result<Handle<RigidBody>, PhysicsError> {
        let mut proxies = Vec::new();
        shape::build_proxies(&self.shapes, info.shape, info.scale, Vec3::ZERO, &mut proxies, 0)?;
        let h = self
            .rigid_bodies
            .insert(RigidBody::new(info, proxies))
            .ok_or(PhysicsError::OutOfSlots)?;
        self.rigid_body_count += 1;
        Ok(h)
    }

    pub fn release_rigid_body(&mut self, h: Handle<RigidBody>) {
        if self.rigid_bodies.get_ref(h).is_some() {
            self.rigid_bodies.release(h);
            self.rigid_body_count -= 1;
        }
    }

    pub fn rigid_body_count(&self) -> usize {
        self.rigid_body_count
    }

    pub fn rigid_body(&self, h: Handle<RigidBody>) -> Option<&RigidBody> {
        self.rigid_bodies.get_ref(h)
    }

    pub fn rigid_body_mut(&mut self, h: Handle<RigidBody>) -> Result<&mut RigidBody, PhysicsError> {
        self.rigid_bodies
            .get_mut_ref(h)
            .ok_or(PhysicsError::InvalidHandle)
    }

    /// Teleport a body. Either component may be left unchanged.
    pub fn set_rigid_body_transform(
        &mut self,
        h: Handle<RigidBody>,
        position: Option<Vec3>,
        rotation: Option<Quat>,
    ) -> Result<(), PhysicsError> {
        let body = self.rigid_body_mut(h)?;
        if let Some(p) = position {
            body.position = p;
        }
        if let Some(q) = rotation {
            body.rotation = q.normalize();
        }
        Ok(())
    }

    pub fn get_rigid_body_status(&self, h: Handle<RigidBody>) -> Option<ActorStatus> {
        self.rigid_bodies.get_ref(h).map(RigidBody::status)
    }

    pub fn create_constraint(&mut self, info: &ConstraintInfo) -> Result<Handle<Constraint>, PhysicsError> {
        let constraint = Constraint::new(info, &self.rigid_bodies)?;
        self.constraints
            .insert(constraint)
            .ok_or(PhysicsError::OutOfSlots)
    }

    pub fn release_constraint(&mut self, h: Handle<Constraint>) {
        self.constraints.release(h);
    }

    pub fn constraint(&self, h: Handle<Constraint>) -> Option<&Constraint> {
        self.constraints.get_ref(h)
    }

    pub fn constraint_mut(&mut self, h: Handle<Constraint>) -> Result<&mut Constraint, PhysicsError> {
        self.constraints
            .get_mut_ref(h)
            .ok_or(PhysicsError::InvalidHandle)
    }

    pub fn create_vehicle(
        &mut self,
        chassis: Handle<RigidBody>,
        info: &VehicleInfo,
    ) -> Result<Handle<Vehicle>, PhysicsError> {
        if self.rigid_bodies.get_ref(chassis).is_none() {
            return Err(PhysicsError::InvalidHandle);
        }
        self.vehicles
            .insert(Vehicle::new(chassis, *info))
            .ok_or(PhysicsError::OutOfSlots)
    }

    pub fn release_vehicle(&mut self, h: Handle<Vehicle>) {
        self.vehicles.release(h);
    }

    pub fn vehicle(&self, h: Handle<Vehicle>) -> Option<&Vehicle> {
        self.vehicles.get_ref(h)
    }

    pub fn vehicle_mut(&mut self, h: Handle<Vehicle>) -> Result<&mut Vehicle, PhysicsError> {
        self.vehicles
            .get_mut_ref(h)
            .ok_or(PhysicsError::InvalidHandle)
    }

    /// Returns the new wheel's index.
    pub fn add_wheel(&mut self, h: Handle<Vehicle>, info: &WheelInfo) -> Result<u32, PhysicsError> {
        let vehicle = self
            .vehicles
            .get_mut_ref(h)
            .ok_or(PhysicsError::InvalidHandle)?;
        let chassis = self
            .rigid_bodies
            .get_ref(vehicle.chassis())
            .ok_or(PhysicsError::InvalidHandle)?;
        Ok(vehicle.add_wheel(*info, chassis))
    }

    pub fn create_soft_body(&mut self, info: &SoftBodyInfo) -> Result<Handle<SoftBody>, PhysicsError> {
        let body = SoftBody::new(info)?;
        self.soft_bodies
            .insert(body)
            .ok_or(PhysicsError::OutOfSlots)
    }

    pub fn release_soft_body(&mut self, h: Handle<SoftBody>) {
        self.soft_bodies.release(h);
    }

    pub fn soft_body(&self, h: Handle<SoftBody>) -> Option<&SoftBody> {
        self.soft_bodies.get_ref(h)
    }

    pub fn append_anchor(
        &mut self,
        h: Handle<SoftBody>,
        node: u32,
        body: Handle<RigidBody>,
    ) -> Result<(), PhysicsError> {
        let soft = self
            .soft_bodies
            .get_mut_ref(h)
            .ok_or(PhysicsError::InvalidHandle)?;
        let rigid = self
            .rigid_bodies
            .get_ref(body)
            .ok_or(PhysicsError::InvalidHandle)?;
        soft.append_anchor(node, body, rigid)
    }

    /// Contacts of the most recent substep.
    pub fn get_contacts(&self) -> &[ContactInfo] {
        &self.contacts
    }

    /// Advance by `time_step` seconds of wall-clock time and return the
    /// number of fixed substeps taken. Time beyond `max_sub_steps` substeps
    /// is dropped. A `max_sub_steps` of zero takes one variable step of
    /// exactly `time_step`.
    pub fn step(&mut self, time_step: f32, max_sub_steps: u32) -> u32 {
        self.constraints.for_each_occupied_mut(Constraint::reset_impulse);
        if max_sub_steps == 0 {
            if time_step > 0.0 {
                self.sub_step(time_step);
                return 1;
            }
            return 0;
        }

        let fixed = self.info.fixed_time_step;
        self.accumulator += time_step.max(0.0);
        let mut steps = ((self.accumulator + fixed * 1e-3) / fixed).floor() as u32;
        if steps > 0 {
            self.accumulator = (self.accumulator - steps as f32 * fixed).max(0.0);
        }
        if steps > max_sub_steps {
            debug!(
                "dropping {} substeps over the limit of {}",
                steps - max_sub_steps,
                max_sub_steps
            );
            steps = max_sub_steps;
        }
        for _ in 0..steps {
            self.sub_step(fixed);
        }
        steps
    }

    fn sub_step(&mut self, dt: f32) {
        let gravity = self.info.gravity;
        let iterations = self.info.solver_iterations.max(1);
        let Self {
            rigid_bodies,
            constraints,
            vehicles,
            soft_bodies,
            ..
        } = self;

        vehicles.for_each_occupied_mut(|v| {
            if let Some(chassis) = rigid_bodies.get_mut_ref(v.chassis()) {
                v.drive(chassis, dt);
            }
        });
        rigid_bodies.for_each_occupied_mut(|b| b.integrate_velocities(gravity, dt));
        for _ in 0..iterations {
            constraints.for_each_occupied_mut(|c| c.solve(rigid_bodies, dt));
        }

        let mut handles = Vec::new();
        rigid_bodies.for_each_occupied_handle_mut(|h| handles.push(h));
        let clamps = continuous_clamps(rigid_bodies, &handles, dt);
        rigid_bodies.for_each_occupied_mut(|b| b.integrate_transform(dt));
        for (h, start, fraction) in clamps {
            if let Some(body) = rigid_bodies.get_mut_ref(h) {
                body.position = start + (body.position - start) * fraction;
            }
        }

        soft_bodies.for_each_occupied_mut(|s| s.step(rigid_bodies, gravity, dt));
        self.detect_and_resolve();

        let Self {
            rigid_bodies,
            vehicles,
            ..
        } = self;
        vehicles.for_each_occupied_mut(|v| {
            if let Some(chassis) = rigid_bodies.get_ref(v.chassis()) {
                v.update_wheel_transforms(chassis);
            }
        });
    }

    fn detect_and_resolve(&mut self) {
        self.contacts.clear();
        let mut handles = Vec::new();
        self.rigid_bodies
            .for_each_occupied_handle_mut(|h| handles.push(h));

        // Cell size follows the largest body so neighbours always share or
        // border a cell.
        let max_radius = handles
            .iter()
            .filter_map(|h| self.rigid_bodies.get_ref(*h))
            .map(|b| b.bounding_radius)
            .fold(0.0f32, f32::max);
        let cell_size = if max_radius > 0.0 {
            max_radius * 2.0
        } else {
            1.0
        };

        let mut grid: HashMap<(i32, i32, i32), Vec<Handle<RigidBody>>> = HashMap::new();
        for &h in &handles {
            if let Some(rb) = self.rigid_bodies.get_ref(h) {
                let cell = (rb.position / cell_size).floor().as_ivec3();
                grid.entry((cell.x, cell.y, cell.z)).or_default().push(h);
            }
        }

        let mut checked: HashSet<(u16, u16)> = HashSet::new();
        let mut pairs = Vec::new();
        let offsets = [-1, 0, 1];
        for (cell, bodies) in grid.iter() {
            for &ha in bodies {
                for dx in offsets {
                    for dy in offsets {
                        for dz in offsets {
                            let neighbor = (cell.0 + dx, cell.1 + dy, cell.2 + dz);
                            let Some(neighbors) = grid.get(&neighbor) else {
                                continue;
                            };
                            for &hb in neighbors {
                                if ha.slot == hb.slot {
                                    continue;
                                }
                                let (lo, hi) = if ha.slot < hb.slot { (ha, hb) } else { (hb, ha) };
                                if checked.insert((lo.slot, hi.slot)) {
                                    pairs.push((lo, hi));
                                }
                            }
                        }
                    }
                }
            }
        }
        pairs.sort_by_key(|(a, b)| (a.slot, b.slot));

        for (ha, hb) in pairs {
            self.resolve_pair(ha, hb);
        }
    }

    fn resolve_pair(&mut self, ha: Handle<RigidBody>, hb: Handle<RigidBody>) {
        let (Some(a), Some(b)) = (self.rigid_bodies.get_ref(ha), self.rigid_bodies.get_ref(hb))
        else {
            return;
        };
        if a.is_static() && b.is_static() {
            return;
        }

        let mut deepest: Option<(Vec3, f32)> = None;
        for pa in &a.proxies {
            for pb in &b.proxies {
                let hit = shape::collide(pa.kind, a.proxy_center(pa), pb.kind, b.proxy_center(pb));
                if let Some((normal, penetration)) = hit {
                    self.contacts.push(ContactInfo {
                        a: ha,
                        b: hb,
                        normal,
                        penetration,
                    });
                    if deepest.map_or(true, |(_, d)| penetration > d) {
                        deepest = Some((normal, penetration));
                    }
                }
            }
        }
        let Some((normal, penetration)) = deepest else {
            return;
        };

        let (ima, imb) = (a.inv_mass, b.inv_mass);
        let total = ima + imb;
        let restitution = a.material.restitution * b.material.restitution;
        let friction = a.material.friction * b.material.friction;
        let mut va = a.linear_velocity;
        let mut vb = b.linear_velocity;

        let vel_along_normal = (vb - va).dot(normal);
        if vel_along_normal < 0.0 {
            let j = -(1.0 + restitution) * vel_along_normal / total;
            va -= normal * (j * ima);
            vb += normal * (j * imb);

            let rel = vb - va;
            let tangent = rel - normal * rel.dot(normal);
            let slip = tangent.length();
            if slip > 1e-6 {
                let t = tangent / slip;
                let jt = (slip / total).min(friction * j);
                va += t * (jt * ima);
                vb -= t * (jt * imb);
            }
        }

        let correction = normal * (penetration * CONTACT_CORRECTION / total);
        if let Some(a) = self.rigid_bodies.get_mut_ref(ha) {
            a.position -= correction * ima;
            a.linear_velocity = va;
        }
        if let Some(b) = self.rigid_bodies.get_mut_ref(hb) {
            b.position += correction * imb;
            b.linear_velocity = vb;
        }
    }
}

/// Bodies with continuous detection enabled whose motion this substep
/// exceeds their threshold are stopped at the first bounding sphere they
/// would sweep into. Returns `(body, start, fraction of motion kept)`.
fn continuous_clamps(
    bodies: &Pool<RigidBody>,
    handles: &[Handle<RigidBody>],
    dt: f32,
) -> Vec<(Handle<RigidBody>, Vec3, f32)> {
    let mut clamps = Vec::new();
    for &h in handles {
        let Some(body) = bodies.get_ref(h) else {
            continue;
        };
        if body.is_static() || body.ccd_motion_threshold <= 0.0 {
            continue;
        }
        let motion = body.linear_velocity * dt;
        let len_sq = motion.length_squared();
        if len_sq <= body.ccd_motion_threshold * body.ccd_motion_threshold {
            continue;
        }
        let mut first = 1.0f32;
        for &other_h in handles {
            if other_h.slot == h.slot {
                continue;
            }
            let Some(other) = bodies.get_ref(other_h) else {
                continue;
            };
            let reach = other.bounding_radius + body.ccd_swept_radius;
            let m = body.position - other.position;
            let b = m.dot(motion);
            let c = m.length_squared() - reach * reach;
            if c <= 0.0 || b >= 0.0 {
                continue;
            }
            let disc = b * b - len_sq * c;
            if disc < 0.0 {
                continue;
            }
            let t = (-b - disc.sqrt()) / len_sq;
            if (0.0..first).contains(&t) {
                first = t;
            }
        }
        if first < 1.0 {
            clamps.push((h, body.position, first));
        }
    }
    clamps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim(gravity: Vec3) -> PhysicsSimulation {
        PhysicsSimulation::new(&SimulationInfo {
            gravity,
            ..Default::default()
        })
    }

    #[test]
    fn substeps_follow_accumulated_time() {
        let mut s = sim(Vec3::ZERO);
        assert_eq!(s.step(1.0 / 60.0, 1), 1);
        assert_eq!(s.step(1.0 / 120.0, 1), 0);
        assert_eq!(s.step(1.0 / 120.0, 1), 1);
        // four fixed steps of time but only two allowed: the rest is dropped
        assert_eq!(s.step(4.0 / 60.0, 2), 2);
        assert_eq!(s.step(1.0 / 60.0, 1), 1);
    }

    #[test]
    fn scale_does_not_touch_the_shared_shape() {
        let mut s = sim(Vec3::ZERO);
        let ball = s.create_shape(&ShapeInfo::Sphere { radius: 0.5 }).unwrap();
        let big = s
            .create_rigid_body(&RigidBodyInfo {
                shape: ball,
                scale: Vec3::splat(4.0),
                ..Default::default()
            })
            .unwrap();
        let small = s
            .create_rigid_body(&RigidBodyInfo {
                shape: ball,
                position: vec3(5.0, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();
        assert!(s.rigid_body(big).unwrap().bounding_radius > 1.9);
        assert!(s.rigid_body(small).unwrap().bounding_radius < 0.6);
    }

    #[test]
    fn released_bodies_leave_constraints_inert() {
        let mut s = sim(vec3(0.0, -10.0, 0.0));
        let ball = s.create_shape(&ShapeInfo::Sphere { radius: 0.5 }).unwrap();
        let body = s
            .create_rigid_body(&RigidBodyInfo {
                shape: ball,
                position: vec3(0.0, 5.0, 0.0),
                ..Default::default()
            })
            .unwrap();
        let joint = s
            .create_constraint(&ConstraintInfo {
                kind: ConstraintType::Point,
                body_a: body,
                body_b: None,
                pivot_a: vec3(0.0, 1.0, 0.0),
                pivot_b: vec3(0.0, 6.0, 0.0),
                axis: Vec3::Y,
            })
            .unwrap();
        for _ in 0..60 {
            s.step(1.0 / 60.0, 1);
        }
        let y = s.get_rigid_body_status(body).unwrap().position.y;
        assert!((y - 5.0).abs() < 0.05, "hanging body sagged to {}", y);
        assert!(s.constraint(joint).unwrap().applied_impulse() > 0.0);

        s.release_rigid_body(body);
        s.step(1.0 / 60.0, 1);
        assert!(s.constraint(joint).is_some());
    }

    #[test]
    fn hinge_motor_spins_body() {
        let mut s = sim(Vec3::ZERO);
        let ball = s.create_shape(&ShapeInfo::Sphere { radius: 0.5 }).unwrap();
        let body = s
            .create_rigid_body(&RigidBodyInfo {
                shape: ball,
                ..Default::default()
            })
            .unwrap();
        let hinge = s
            .create_constraint(&ConstraintInfo {
                kind: ConstraintType::Hinge,
                body_a: body,
                body_b: None,
                pivot_a: Vec3::ZERO,
                pivot_b: Vec3::ZERO,
                axis: Vec3::Z,
            })
            .unwrap();
        s.constraint_mut(hinge).unwrap().hinge_mut().unwrap().motor = Some(Motor {
            velocity: 2.0,
            max_impulse: 10.0,
        });
        assert_eq!(
            s.constraint_mut(hinge).unwrap().slider_mut().unwrap_err(),
            PhysicsError::WrongConstraintType
        );
        s.step(1.0 / 60.0, 1);
        let w = s.get_rigid_body_status(body).unwrap().angular_velocity;
        assert!((w.z - 2.0).abs() < 1e-3);
        assert!(w.x.abs() < 1e-3 && w.y.abs() < 1e-3);
    }

    #[test]
    fn ccd_stops_fast_body_short_of_target() {
        let mut s = sim(Vec3::ZERO);
        let ball = s.create_shape(&ShapeInfo::Sphere { radius: 0.5 }).unwrap();
        let wall = s
            .create_rigid_body(&RigidBodyInfo {
                shape: ball,
                mass: 0.0,
                position: vec3(10.0, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap();
        let bullet = s
            .create_rigid_body(&RigidBodyInfo {
                shape: ball,
                ..Default::default()
            })
            .unwrap();
        let body = s.rigid_body_mut(bullet).unwrap();
        body.set_linear_velocity(vec3(1200.0, 0.0, 0.0));
        body.set_ccd(0.1, 0.2);
        s.step(1.0 / 60.0, 1);
        let x = s.get_rigid_body_status(bullet).unwrap().position.x;
        assert!(x < 10.0, "body tunnelled to {}", x);
        assert!(s.rigid_body(wall).is_some());
    }
}
