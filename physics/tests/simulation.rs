use glam::{vec3, Quat, Vec3};
use meshi_physics::{
    Handle, PhysicsError, PhysicsSimulation, RigidBody, RigidBodyInfo, Shape, ShapeInfo,
    SimulationInfo,
};

fn weightless() -> PhysicsSimulation {
    PhysicsSimulation::new(&SimulationInfo {
        gravity: Vec3::ZERO,
        ..Default::default()
    })
}

fn sphere(sim: &mut PhysicsSimulation, radius: f32) -> Handle<Shape> {
    sim.create_shape(&ShapeInfo::Sphere { radius }).unwrap()
}

fn same_pair(
    a: Handle<RigidBody>,
    b: Handle<RigidBody>,
    x: Handle<RigidBody>,
    y: Handle<RigidBody>,
) -> bool {
    (a.slot == x.slot && b.slot == y.slot) || (a.slot == y.slot && b.slot == x.slot)
}

#[test]
fn spheres_generate_contact() {
    let mut sim = weightless();
    let ball = sphere(&mut sim, 0.5);
    let rb1 = sim
        .create_rigid_body(&RigidBodyInfo {
            shape: ball,
            ..Default::default()
        })
        .unwrap();
    let rb2 = sim
        .create_rigid_body(&RigidBodyInfo {
            shape: ball,
            position: vec3(0.5, 0.0, 0.0),
            ..Default::default()
        })
        .unwrap();

    sim.step(1.0 / 60.0, 1);
    let contacts = sim.get_contacts();
    let hit = contacts
        .iter()
        .find(|c| same_pair(c.a, c.b, rb1, rb2))
        .expect("overlapping spheres should touch");
    // normal runs from a to b, and b sits to the +x side of a here
    let sign = if hit.a.slot == rb1.slot { 1.0 } else { -1.0 };
    assert!(hit.normal.x * sign > 0.9);
}

#[test]
fn many_spheres_generate_expected_contacts() {
    let mut sim = weightless();
    let ball = sphere(&mut sim, 0.8);
    let count = 100;
    let bodies: Vec<Handle<RigidBody>> = (0..count)
        .map(|i| {
            sim.create_rigid_body(&RigidBodyInfo {
                shape: ball,
                position: vec3(i as f32 * 1.5, 0.0, 0.0),
                ..Default::default()
            })
            .unwrap()
        })
        .collect();

    sim.step(1.0 / 60.0, 1);
    let contacts = sim.get_contacts();
    assert_eq!(contacts.len(), count - 1);
    for pair in bodies.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        assert!(contacts
            .iter()
            .any(|c| same_pair(c.a, c.b, a, b)));
    }
}

#[test]
fn variable_step_applies_gravity_and_damping() {
    let mut sim = PhysicsSimulation::new(&SimulationInfo::default());
    let ball = sphere(&mut sim, 0.5);
    let rb = sim
        .create_rigid_body(&RigidBodyInfo {
            shape: ball,
            linear_damping: 0.5,
            ..Default::default()
        })
        .unwrap();

    assert_eq!(sim.step(1.0, 0), 1);

    let status = sim.get_rigid_body_status(rb).expect("rigid body should be valid");
    let expected_velocity_y = -9.8 * 0.5;
    assert!((status.linear_velocity.y - expected_velocity_y).abs() < 1e-4);
    assert!((status.position.y - expected_velocity_y).abs() < 1e-4);
}

#[test]
fn static_bodies_do_not_move() {
    let mut sim = PhysicsSimulation::new(&SimulationInfo::default());
    let ball = sphere(&mut sim, 0.5);
    let rb = sim
        .create_rigid_body(&RigidBodyInfo {
            shape: ball,
            mass: 0.0,
            position: vec3(0.0, 3.0, 0.0),
            ..Default::default()
        })
        .unwrap();
    for _ in 0..10 {
        sim.step(1.0 / 60.0, 1);
    }
    assert_eq!(
        sim.get_rigid_body_status(rb).unwrap().position,
        vec3(0.0, 3.0, 0.0)
    );
}

#[test]
fn invalid_handles_are_rejected() {
    let mut sim = weightless();
    let invalid = Handle::<RigidBody>::default();
    assert!(!invalid.valid());
    assert_eq!(
        sim.rigid_body_mut(invalid).err(),
        Some(PhysicsError::InvalidHandle)
    );
    assert_eq!(
        sim.set_rigid_body_transform(invalid, Some(Vec3::ONE), Some(Quat::IDENTITY)),
        Err(PhysicsError::InvalidHandle)
    );
    assert!(sim.get_rigid_body_status(invalid).is_none());
}

#[test]
fn released_bodies_stop_resolving() {
    let mut sim = weightless();
    let ball = sphere(&mut sim, 0.5);
    let rb = sim
        .create_rigid_body(&RigidBodyInfo {
            shape: ball,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(sim.rigid_body_count(), 1);
    sim.release_rigid_body(rb);
    assert!(sim.rigid_body(rb).is_none());
    assert_eq!(sim.rigid_body_count(), 0);
    // releasing twice leaves the count alone
    sim.release_rigid_body(rb);
    assert_eq!(sim.rigid_body_count(), 0);
}

#[test]
fn bodies_need_a_live_shape() {
    let mut sim = weightless();
    assert!(sim.create_rigid_body(&RigidBodyInfo::default()).is_err());
    assert_eq!(
        sim.create_shape(&ShapeInfo::Sphere { radius: -1.0 }).err(),
        Some(PhysicsError::InvalidGeometry)
    );
}
