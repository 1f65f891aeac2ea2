use meshi_physics::{PhysicsSimulation, SoftBody};
use meshi_physx_protocol::report::{
    encode_soft_record, grown_capacity, soft_record_len, CollisionRecord, ConstraintRecord,
    Record, VehicleRecord, WorldRecord, HEADER_LEN,
};
use meshi_physx_protocol::{Identity, ReportBuffer, ReportError, ReportKind, SoftTopology};
use tracing::{debug, warn};

use super::{BodyEntry, ConstraintEntry, VehicleEntry};
use crate::registry::EntityRegistry;

/// Writes the per-step reports and owns their storage between steps.
///
/// Each kind has at most one spare buffer waiting for reuse. A buffer only
/// grows: when the items of a step do not fit, it is reallocated to the
/// next multiple of `chunk_size` items, and the largest capacity ever
/// handed out for a kind is remembered so a lost buffer is replaced at full
/// size.
///
/// Vehicle, constraint and soft body reports start with the first entity of
/// their kind and are then sent every step, empty or not.
#[derive(Debug)]
pub struct ReportEncoder {
    chunk_size: usize,
    limit: Option<usize>,
    spare: [Option<ReportBuffer>; 5],
    high_water: [usize; 5],
    reporting: [bool; 5],
    scratch: Vec<f32>,
}

impl ReportEncoder {
    pub fn new(chunk_size: usize, limit: Option<usize>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            limit,
            spare: Default::default(),
            high_water: [HEADER_LEN; 5],
            reporting: [false; 5],
            scratch: Vec::new(),
        }
    }

    pub fn configure(&mut self, chunk_size: usize, limit: Option<usize>) {
        self.chunk_size = chunk_size.max(1);
        self.limit = limit;
    }

    /// Largest capacity, in scalars, handed out for `kind` so far.
    pub fn capacity(&self, kind: ReportKind) -> usize {
        self.high_water[kind.index()]
    }

    /// Take back a buffer the host is done with.
    pub fn restore(&mut self, buffer: ReportBuffer) {
        let Some(kind) = buffer.kind() else {
            warn!(
                "dropping returned buffer with unknown report tag {}",
                buffer.kind_tag()
            );
            return;
        };
        let slot = &mut self.spare[kind.index()];
        if slot
            .as_ref()
            .map_or(true, |held| held.capacity() < buffer.capacity())
        {
            *slot = Some(buffer);
        }
    }

    /// A buffer of `kind` with room for `payload` scalars after the header.
    pub fn checkout(&mut self, kind: ReportKind, payload: usize) -> Result<ReportBuffer, ReportError> {
        let slot = kind.index();
        let mut buffer = self.spare[slot]
            .take()
            .unwrap_or_else(|| ReportBuffer::new(kind));
        buffer.reset(kind);

        let required = payload.saturating_add(HEADER_LEN);
        if buffer.capacity() >= required {
            return Ok(buffer);
        }

        let chunk = self.chunk_size * kind.growth_stride();
        let mut target = grown_capacity(payload, chunk).max(self.high_water[slot]);
        if let Some(limit) = self.limit {
            if required > limit {
                self.spare[slot] = Some(buffer);
                return Err(ReportError::CapacityExhausted {
                    kind,
                    requested: required,
                    limit,
                });
            }
            target = target.min(limit);
        }
        if let Err(err) = buffer.reallocate(kind, target) {
            self.spare[slot] = Some(buffer);
            return Err(err);
        }
        debug!(
            "grew {:?} report buffer from {} to {} scalars",
            kind, self.high_water[slot], target
        );
        self.high_water[slot] = self.high_water[slot].max(target);
        Ok(buffer)
    }

    /// Check out a fixed-stride buffer sized for `upper` items and let
    /// `write` fill it. `write` returns how many items it wrote.
    fn fill_records<R: Record>(
        &mut self,
        upper: usize,
        write: impl FnOnce(&mut [R]) -> usize,
    ) -> Result<ReportBuffer, ReportError> {
        let kind = R::KIND;
        let mut buffer = self.checkout(kind, upper * kind.growth_stride())?;
        match buffer.records_mut::<R>(upper).map(write) {
            Ok(written) => {
                buffer.set_item_count(written.min(upper));
                Ok(buffer)
            }
            Err(err) => {
                self.restore(buffer);
                Err(err)
            }
        }
    }

    /// Encode every report for the step that just ran, in send order: world
    /// last. Nothing is returned unless every report was produced.
    pub(crate) fn encode_step(
        &mut self,
        sim: &PhysicsSimulation,
        bodies: &EntityRegistry<BodyEntry>,
        vehicles: &EntityRegistry<VehicleEntry>,
        constraints: &EntityRegistry<ConstraintEntry>,
        soft_bodies: bool,
    ) -> Result<Vec<ReportBuffer>, ReportError> {
        let mut out = Vec::with_capacity(ReportKind::ALL.len());
        let result = self.encode_into(&mut out, sim, bodies, vehicles, constraints, soft_bodies);
        if let Err(err) = result {
            for buffer in out {
                self.restore(buffer);
            }
            return Err(err);
        }
        Ok(out)
    }

    fn encode_into(
        &mut self,
        out: &mut Vec<ReportBuffer>,
        sim: &PhysicsSimulation,
        bodies: &EntityRegistry<BodyEntry>,
        vehicles: &EntityRegistry<VehicleEntry>,
        constraints: &EntityRegistry<ConstraintEntry>,
        soft_bodies: bool,
    ) -> Result<(), ReportError> {
        out.push(self.encode_collisions(sim)?);
        if self.keeps_reporting(ReportKind::Vehicle, !vehicles.is_empty()) {
            out.push(self.encode_vehicles(sim, vehicles)?);
        }
        if self.keeps_reporting(ReportKind::Constraint, !constraints.is_empty()) {
            out.push(self.encode_constraints(sim, constraints)?);
        }
        let any_soft = bodies.iter().any(|(_, e)| matches!(e, BodyEntry::Soft { .. }));
        if soft_bodies && self.keeps_reporting(ReportKind::SoftBody, any_soft) {
            out.push(self.encode_soft_bodies(sim, bodies)?);
        }
        out.push(self.encode_world(sim, bodies)?);
        Ok(())
    }

    fn keeps_reporting(&mut self, kind: ReportKind, present: bool) -> bool {
        let reporting = &mut self.reporting[kind.index()];
        *reporting |= present;
        *reporting
    }

    pub(crate) fn encode_world(
        &mut self,
        sim: &PhysicsSimulation,
        bodies: &EntityRegistry<BodyEntry>,
    ) -> Result<ReportBuffer, ReportError> {
        let upper = bodies
            .iter()
            .filter(|(_, e)| matches!(e, BodyEntry::Rigid { .. }))
            .count();
        self.fill_records(upper, |records: &mut [WorldRecord]| {
            let mut written = 0;
            for (identity, entry) in bodies.iter() {
                let BodyEntry::Rigid { handle, .. } = entry else {
                    continue;
                };
                let (Some(status), Some(slot)) =
                    (sim.get_rigid_body_status(*handle), records.get_mut(written))
                else {
                    continue;
                };
                *slot = WorldRecord {
                    identity: identity.get(),
                    position: status.position.to_array(),
                    rotation: status.rotation.to_array(),
                    linear_velocity: status.linear_velocity.to_array(),
                    angular_velocity: status.angular_velocity.to_array(),
                };
                written += 1;
            }
            written
        })
    }

    pub(crate) fn encode_collisions(
        &mut self,
        sim: &PhysicsSimulation,
    ) -> Result<ReportBuffer, ReportError> {
        let contacts = sim.get_contacts();
        let identity_of = |h| {
            sim.rigid_body(h)
                .and_then(|body| Identity::from_bits(body.user_index()))
        };
        self.fill_records(contacts.len(), |records: &mut [CollisionRecord]| {
            let mut written = 0;
            for contact in contacts {
                let (Some(a), Some(b)) = (identity_of(contact.a), identity_of(contact.b)) else {
                    continue;
                };
                let Some(slot) = records.get_mut(written) else {
                    break;
                };
                *slot = CollisionRecord {
                    body_a: a.get(),
                    body_b: b.get(),
                    normal: contact.normal.to_array(),
                };
                written += 1;
            }
            written
        })
    }

    pub(crate) fn encode_vehicles(
        &mut self,
        sim: &PhysicsSimulation,
        vehicles: &EntityRegistry<VehicleEntry>,
    ) -> Result<ReportBuffer, ReportError> {
        let upper = vehicles
            .iter()
            .filter_map(|(_, e)| sim.vehicle(e.handle))
            .map(|v| v.wheels().len())
            .sum();
        self.fill_records(upper, |records: &mut [VehicleRecord]| {
            let mut written = 0;
            for (identity, entry) in vehicles.iter() {
                let Some(vehicle) = sim.vehicle(entry.handle) else {
                    continue;
                };
                for (index, wheel) in vehicle.wheels().iter().enumerate() {
                    let Some(slot) = records.get_mut(written) else {
                        return written;
                    };
                    let (position, rotation) = wheel.transform();
                    *slot = VehicleRecord {
                        vehicle: identity.get(),
                        wheel: index as u32,
                        position: position.to_array(),
                        rotation: rotation.to_array(),
                    };
                    written += 1;
                }
            }
            written
        })
    }

    pub(crate) fn encode_constraints(
        &mut self,
        sim: &PhysicsSimulation,
        constraints: &EntityRegistry<ConstraintEntry>,
    ) -> Result<ReportBuffer, ReportError> {
        self.fill_records(constraints.len(), |records: &mut [ConstraintRecord]| {
            let mut written = 0;
            for (identity, entry) in constraints.iter() {
                let Some(constraint) = sim.constraint(entry.handle) else {
                    continue;
                };
                let Some(anchor) = sim.get_rigid_body_status(constraint.body_a()) else {
                    continue;
                };
                let Some(slot) = records.get_mut(written) else {
                    break;
                };
                let offset = anchor.position + anchor.rotation * constraint.pivot_a();
                *slot = ConstraintRecord {
                    constraint: identity.get(),
                    body: entry.body_a.get(),
                    offset: offset.to_array(),
                    applied_impulse: constraint.applied_impulse(),
                };
                written += 1;
            }
            written
        })
    }

    pub(crate) fn encode_soft_bodies(
        &mut self,
        sim: &PhysicsSimulation,
        bodies: &EntityRegistry<BodyEntry>,
    ) -> Result<ReportBuffer, ReportError> {
        let soft = || {
            bodies.iter().filter_map(|(identity, entry)| match entry {
                BodyEntry::Soft { handle } => sim.soft_body(*handle).map(|b| (identity, b)),
                BodyEntry::Rigid { .. } => None,
            })
        };
        let payload = soft()
            .map(|(_, body)| {
                let (topology, elements) = soft_layout(body);
                soft_record_len(topology, elements)
            })
            .sum();

        let mut buffer = self.checkout(ReportKind::SoftBody, payload)?;
        let out = buffer.payload_mut();
        let mut cursor = 0;
        let mut written = 0;
        for (identity, body) in soft() {
            let (topology, elements) = soft_layout(body);
            let len = soft_record_len(topology, elements);
            let Some(record) = out.get_mut(cursor..cursor + len) else {
                break;
            };
            self.scratch.clear();
            write_soft_data(body, &mut self.scratch);
            encode_soft_record(record, identity, topology, &self.scratch);
            cursor += len;
            written += 1;
        }
        buffer.set_item_count(written);
        Ok(buffer)
    }
}

fn soft_layout(body: &SoftBody) -> (SoftTopology, usize) {
    match body.topology() {
        meshi_physics::SoftTopology::Rope => (SoftTopology::Rope, body.nodes().len()),
        meshi_physics::SoftTopology::Cloth => (SoftTopology::Cloth, body.nodes().len()),
        meshi_physics::SoftTopology::Volume => (SoftTopology::Volume, body.faces().len()),
    }
}

fn write_soft_data(body: &SoftBody, out: &mut Vec<f32>) {
    let nodes = body.nodes();
    match body.topology() {
        meshi_physics::SoftTopology::Rope => {
            for node in nodes {
                out.extend_from_slice(&node.position.to_array());
            }
        }
        meshi_physics::SoftTopology::Cloth => {
            for node in nodes {
                out.extend_from_slice(&node.position.to_array());
                out.extend_from_slice(&node.normal.to_array());
            }
        }
        meshi_physics::SoftTopology::Volume => {
            for face in body.faces() {
                for &i in face {
                    out.extend_from_slice(&nodes[i].position.to_array());
                    out.extend_from_slice(&nodes[i].normal.to_array());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::shape_cache::ShapeCache;
    use glam::{vec3, Vec3};
    use meshi_physics::{RigidBodyInfo, SimulationInfo, SoftBodyInfo, SoftBodyShape, VehicleInfo};
    use meshi_physx_protocol::ShapeDescriptor;

    fn id(raw: u32) -> Identity {
        Identity::new(raw).unwrap()
    }

    fn world() -> (PhysicsSimulation, ShapeCache, EntityRegistry<BodyEntry>) {
        let sim = PhysicsSimulation::new(&SimulationInfo {
            gravity: Vec3::ZERO,
            ..Default::default()
        });
        (sim, ShapeCache::default(), EntityRegistry::new())
    }

    fn add_ball(
        sim: &mut PhysicsSimulation,
        cache: &mut ShapeCache,
        bodies: &mut EntityRegistry<BodyEntry>,
        identity: Identity,
        position: Vec3,
    ) {
        let shape = cache
            .get_or_create(sim, &ShapeDescriptor::Sphere { radius: 0.5 })
            .unwrap();
        let handle = sim
            .create_rigid_body(&RigidBodyInfo {
                shape: shape.handle(),
                position,
                user_index: identity.get(),
                ..Default::default()
            })
            .unwrap();
        bodies.bind(identity, BodyEntry::Rigid { handle, shape });
    }

    #[test]
    fn growth_rounds_up_to_whole_chunks_and_never_shrinks() {
        let mut encoder = ReportEncoder::new(50, None);
        let buffer = encoder.checkout(ReportKind::World, 60 * 14).unwrap();
        assert_eq!(buffer.capacity(), HEADER_LEN + 100 * 14);
        encoder.restore(buffer);

        let buffer = encoder.checkout(ReportKind::World, 3 * 14).unwrap();
        assert_eq!(buffer.capacity(), HEADER_LEN + 100 * 14);
        drop(buffer);

        // a lost buffer comes back at the remembered size
        let buffer = encoder.checkout(ReportKind::World, 14).unwrap();
        assert_eq!(buffer.capacity(), HEADER_LEN + 100 * 14);
        assert_eq!(encoder.capacity(ReportKind::World), HEADER_LEN + 100 * 14);
        assert_eq!(encoder.capacity(ReportKind::Collision), HEADER_LEN);
    }

    #[test]
    fn growth_past_the_limit_is_refused() {
        let mut encoder = ReportEncoder::new(50, Some(100));
        let err = encoder.checkout(ReportKind::World, 10 * 14).unwrap_err();
        assert!(matches!(
            err,
            ReportError::CapacityExhausted {
                kind: ReportKind::World,
                requested: 142,
                limit: 100
            }
        ));
        // fits exactly, so the chunk rounding is clamped to the limit
        let buffer = encoder.checkout(ReportKind::World, 5 * 14).unwrap();
        assert_eq!(buffer.capacity(), 100);
    }

    #[test]
    fn step_reports_contacts_first_and_world_last() {
        let (mut sim, mut cache, mut bodies) = world();
        add_ball(&mut sim, &mut cache, &mut bodies, id(1), Vec3::ZERO);
        add_ball(&mut sim, &mut cache, &mut bodies, id(2), vec3(0.8, 0.0, 0.0));
        sim.step(1.0 / 60.0, 1);

        let mut encoder = ReportEncoder::new(50, None);
        let reports = encoder
            .encode_step(
                &sim,
                &bodies,
                &EntityRegistry::new(),
                &EntityRegistry::new(),
                true,
            )
            .unwrap();
        let kinds: Vec<_> = reports.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![Some(ReportKind::Collision), Some(ReportKind::World)]);

        let contacts = reports[0].records::<CollisionRecord>().unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].bodies(), Some((id(1), id(2))));
        assert!(contacts[0].normal[0] > 0.9);

        let world = reports[1].records::<WorldRecord>().unwrap();
        let ids: Vec<_> = world.iter().map(|r| r.identity).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn failed_step_keeps_the_buffers() {
        let (mut sim, mut cache, mut bodies) = world();
        add_ball(&mut sim, &mut cache, &mut bodies, id(1), Vec3::ZERO);
        add_ball(&mut sim, &mut cache, &mut bodies, id(2), vec3(5.0, 0.0, 0.0));
        sim.step(1.0 / 60.0, 1);

        let mut encoder = ReportEncoder::new(50, Some(20));
        let err = encoder
            .encode_step(
                &sim,
                &bodies,
                &EntityRegistry::new(),
                &EntityRegistry::new(),
                true,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ReportError::CapacityExhausted {
                kind: ReportKind::World,
                ..
            }
        ));
        assert!(encoder.spare[ReportKind::Collision.index()].is_some());
    }

    #[test]
    fn soft_bodies_are_written_as_variable_records() {
        let (mut sim, _, mut bodies) = world();
        let rope = sim
            .create_soft_body(&SoftBodyInfo {
                shape: SoftBodyShape::Rope {
                    start: Vec3::ZERO,
                    end: vec3(3.0, 0.0, 0.0),
                    segments: 3,
                },
                mass: 1.0,
                stiffness: 1.0,
                iterations: 4,
                position: Vec3::ZERO,
                rotation: glam::Quat::IDENTITY,
                scale: Vec3::ONE,
            })
            .unwrap();
        bodies.bind(id(9), BodyEntry::Soft { handle: rope });

        let mut encoder = ReportEncoder::new(2, None);
        let buffer = encoder.encode_soft_bodies(&sim, &bodies).unwrap();
        assert_eq!(buffer.item_count(), 1);
        let view = buffer.soft_bodies().unwrap().next().unwrap().unwrap();
        assert_eq!(view.identity, Some(id(9)));
        assert_eq!(view.topology, SoftTopology::Rope);
        assert_eq!(view.elements, 4);
        assert_eq!(&view.data[9..12], &[3.0, 0.0, 0.0]);
    }

    #[test]
    fn emptied_kinds_keep_reporting() {
        let (mut sim, mut cache, mut bodies) = world();
        add_ball(&mut sim, &mut cache, &mut bodies, id(1), Vec3::ZERO);
        let chassis = match bodies.resolve(id(1)).unwrap() {
            BodyEntry::Rigid { handle, .. } => *handle,
            BodyEntry::Soft { .. } => panic!("ball must be rigid"),
        };
        let handle = sim.create_vehicle(chassis, &VehicleInfo::default()).unwrap();
        let mut vehicles = EntityRegistry::new();
        vehicles.bind(
            id(2),
            VehicleEntry {
                handle,
                chassis: id(1),
            },
        );

        let mut encoder = ReportEncoder::new(50, None);
        let none = EntityRegistry::new();
        let expected = vec![
            Some(ReportKind::Collision),
            Some(ReportKind::Vehicle),
            Some(ReportKind::World),
        ];
        let reports = encoder
            .encode_step(&sim, &bodies, &vehicles, &none, true)
            .unwrap();
        let kinds: Vec<_> = reports.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, expected);

        vehicles.unregister(id(2));
        sim.release_vehicle(handle);
        let reports = encoder
            .encode_step(&sim, &bodies, &vehicles, &none, true)
            .unwrap();
        let kinds: Vec<_> = reports.iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, expected);
        assert_eq!(reports[1].item_count(), 0);
    }
}
