use glam::*;

use crate::{Handle, PhysicsError, RigidBody};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleInfo {
    pub suspension_stiffness: f32,
    pub suspension_compression: f32,
    pub suspension_damping: f32,
    /// Centimetres.
    pub max_suspension_travel_cm: f32,
    pub friction_slip: f32,
    pub max_suspension_force: f32,
}

impl Default for VehicleInfo {
    fn default() -> Self {
        Self {
            suspension_stiffness: 5.88,
            suspension_compression: 0.83,
            suspension_damping: 0.88,
            max_suspension_travel_cm: 500.0,
            friction_slip: 10.5,
            max_suspension_force: 6000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelInfo {
    /// Chassis-local.
    pub connection_point: Vec3,
    pub direction: Vec3,
    pub axle: Vec3,
    pub suspension_rest_length: f32,
    pub radius: f32,
    pub is_front: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Wheel {
    info: WheelInfo,
    steering: f32,
    brake: f32,
    engine_force: f32,
    spin: f32,
    position: Vec3,
    rotation: Quat,
}

impl Wheel {
    pub fn info(&self) -> &WheelInfo {
        &self.info
    }

    pub fn steering(&self) -> f32 {
        self.steering
    }

    pub fn brake(&self) -> f32 {
        self.brake
    }

    pub fn engine_force(&self) -> f32 {
        self.engine_force
    }

    /// World transform as of the last step.
    pub fn transform(&self) -> (Vec3, Quat) {
        (self.position, self.rotation)
    }

    fn up(&self) -> Vec3 {
        (-self.info.direction).try_normalize().unwrap_or(Vec3::Y)
    }

    fn steer(&self) -> Quat {
        Quat::from_axis_angle(self.up(), self.steering)
    }
}

/// A chassis body with wheels. Wheels ride at their suspension rest length;
/// the chassis is driven by the summed engine forces along each wheel's
/// steered heading.
#[derive(Debug)]
pub struct Vehicle {
    chassis: Handle<RigidBody>,
    tuning: VehicleInfo,
    wheels: Vec<Wheel>,
}

impl Vehicle {
    pub(crate) fn new(chassis: Handle<RigidBody>, tuning: VehicleInfo) -> Self {
        Self {
            chassis,
            tuning,
            wheels: Vec::new(),
        }
    }

    pub fn chassis(&self) -> Handle<RigidBody> {
        self.chassis
    }

    pub fn tuning(&self) -> &VehicleInfo {
        &self.tuning
    }

    pub fn wheels(&self) -> &[Wheel] {
        &self.wheels
    }

    pub(crate) fn add_wheel(&mut self, info: WheelInfo, chassis: &RigidBody) -> u32 {
        let mut wheel = Wheel {
            info,
            steering: 0.0,
            brake: 0.0,
            engine_force: 0.0,
            spin: 0.0,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        };
        self.place(&mut wheel, chassis);
        self.wheels.push(wheel);
        (self.wheels.len() - 1) as u32
    }

    fn wheel_mut(&mut self, index: u32) -> Result<&mut Wheel, PhysicsError> {
        self.wheels
            .get_mut(index as usize)
            .ok_or(PhysicsError::InvalidWheel)
    }

    pub fn set_steering(&mut self, index: u32, steering: f32) -> Result<(), PhysicsError> {
        self.wheel_mut(index)?.steering = steering;
        Ok(())
    }

    pub fn set_brake(&mut self, index: u32, brake: f32) -> Result<(), PhysicsError> {
        self.wheel_mut(index)?.brake = brake.max(0.0);
        Ok(())
    }

    pub fn apply_engine_force(&mut self, index: u32, force: f32) -> Result<(), PhysicsError> {
        self.wheel_mut(index)?.engine_force = force;
        Ok(())
    }

    fn suspension_length(&self, wheel: &Wheel) -> f32 {
        let travel = self.tuning.max_suspension_travel_cm * 0.01;
        wheel.info.suspension_rest_length.clamp(0.0, travel.max(0.0))
    }

    fn place(&self, wheel: &mut Wheel, chassis: &RigidBody) {
        let q = chassis.rotation;
        let down = wheel.info.direction.try_normalize().unwrap_or(Vec3::NEG_Y);
        let local = wheel.info.connection_point + down * self.suspension_length(wheel);
        let axle = wheel.info.axle.try_normalize().unwrap_or(Vec3::NEG_X);
        wheel.position = chassis.position + q * local;
        wheel.rotation = q * wheel.steer() * Quat::from_axis_angle(axle, wheel.spin);
    }

    /// Push engine and brake effort into the chassis before it integrates.
    pub(crate) fn drive(&mut self, chassis: &mut RigidBody, dt: f32) {
        if chassis.is_static() || self.wheels.is_empty() {
            return;
        }
        let q = chassis.rotation;
        for wheel in &mut self.wheels {
            let heading = q * (wheel.steer() * Vec3::Z);
            if wheel.engine_force != 0.0 {
                chassis.apply_central_force(heading * wheel.engine_force);
            }
            let speed = chassis.linear_velocity.dot(heading);
            if wheel.brake > 0.0 {
                let dv = (wheel.brake * dt * chassis.inv_mass).min(speed.abs());
                chassis.linear_velocity -= heading * dv * speed.signum();
            }
            wheel.spin = (wheel.spin + speed * dt / wheel.info.radius.max(0.01)) % std::f32::consts::TAU;
        }
        let right = q * Vec3::X;
        let lateral = chassis.linear_velocity.dot(right);
        let grip = (self.tuning.friction_slip * dt).min(1.0);
        chassis.linear_velocity -= right * lateral * grip;
    }

    pub(crate) fn update_wheel_transforms(&mut self, chassis: &RigidBody) {
        let mut wheels = std::mem::take(&mut self.wheels);
        for wheel in &mut wheels {
            self.place(wheel, chassis);
        }
        self.wheels = wheels;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Proxy, ProxyKind};
    use crate::RigidBodyInfo;

    fn chassis() -> RigidBody {
        RigidBody::new(
            &RigidBodyInfo {
                mass: 100.0,
                ..Default::default()
            },
            vec![Proxy {
                kind: ProxyKind::Box {
                    half_extents: vec3(1.0, 0.5, 2.0),
                },
                offset: Vec3::ZERO,
            }],
        )
    }

    fn wheel() -> WheelInfo {
        WheelInfo {
            connection_point: vec3(1.0, 0.0, 1.5),
            direction: Vec3::NEG_Y,
            axle: Vec3::NEG_X,
            suspension_rest_length: 0.5,
            radius: 0.4,
            is_front: true,
        }
    }

    #[test]
    fn wheels_hang_at_rest_length() {
        let body = chassis();
        let mut vehicle = Vehicle::new(Handle::default(), VehicleInfo::default());
        assert_eq!(vehicle.add_wheel(wheel(), &body), 0);
        let (pos, _) = vehicle.wheels()[0].transform();
        assert!((pos - vec3(1.0, -0.5, 1.5)).length() < 1e-5);
        assert_eq!(vehicle.set_steering(3, 0.1), Err(PhysicsError::InvalidWheel));
    }

    #[test]
    fn engine_force_pushes_forward() {
        let mut body = chassis();
        let mut vehicle = Vehicle::new(Handle::default(), VehicleInfo::default());
        vehicle.add_wheel(wheel(), &body);
        vehicle.apply_engine_force(0, 600.0).unwrap();
        vehicle.drive(&mut body, 1.0 / 60.0);
        body.integrate_velocities(Vec3::ZERO, 1.0 / 60.0);
        assert!(body.linear_velocity.z > 0.0);
    }
}
