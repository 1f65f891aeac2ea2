use glam::*;

use crate::shape::Proxy;
use crate::{Handle, Shape};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialInfo {
    pub friction: f32,
    pub restitution: f32,
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RigidBodyInfo {
    pub shape: Handle<Shape>,
    /// Multiplies the shape's extents for this body only.
    pub scale: Vec3,
    /// Zero makes the body static.
    pub mass: f32,
    pub material: MaterialInfo,
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_damping: f32,
    pub angular_damping: f32,
    /// Opaque value handed back in contacts.
    pub user_index: u32,
}

impl Default for RigidBodyInfo {
    fn default() -> Self {
        Self {
            shape: Handle::default(),
            scale: Vec3::ONE,
            mass: 1.0,
            material: MaterialInfo::default(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            linear_damping: 0.0,
            angular_damping: 0.0,
            user_index: 0,
        }
    }
}

/// Snapshot of a body's motion state.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ActorStatus {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

#[derive(Debug)]
pub struct RigidBody {
    pub(crate) position: Vec3,
    pub(crate) rotation: Quat,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    mass: f32,
    pub(crate) inv_mass: f32,
    pub(crate) inv_inertia: f32,
    force: Vec3,
    torque: Vec3,
    linear_factor: Vec3,
    angular_factor: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    pub(crate) material: MaterialInfo,
    pub(crate) shape: Handle<Shape>,
    pub(crate) proxies: Vec<Proxy>,
    pub(crate) bounding_radius: f32,
    pub(crate) ccd_motion_threshold: f32,
    pub(crate) ccd_swept_radius: f32,
    pub(crate) user_index: u32,
}

impl RigidBody {
    pub(crate) fn new(info: &RigidBodyInfo, proxies: Vec<Proxy>) -> Self {
        let bounding_radius = proxies.iter().map(Proxy::extent).fold(0.0, f32::max);
        let mut body = Self {
            position: info.position,
            rotation: info.rotation.normalize(),
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            mass: 0.0,
            inv_mass: 0.0,
            inv_inertia: 0.0,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            linear_factor: Vec3::ONE,
            angular_factor: Vec3::ONE,
            linear_damping: info.linear_damping.clamp(0.0, 1.0),
            angular_damping: info.angular_damping.clamp(0.0, 1.0),
            material: info.material,
            shape: info.shape,
            proxies,
            bounding_radius,
            ccd_motion_threshold: 0.0,
            ccd_swept_radius: 0.0,
            user_index: info.user_index,
        };
        body.set_mass(info.mass);
        body
    }

    pub fn is_static(&self) -> bool {
        self.inv_mass == 0.0
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn shape(&self) -> Handle<Shape> {
        self.shape
    }

    pub fn user_index(&self) -> u32 {
        self.user_index
    }

    /// Inertia is approximated as a solid sphere of the body's bounding radius.
    pub fn set_mass(&mut self, mass: f32) {
        if mass > 0.0 && mass.is_finite() {
            let radius = self.bounding_radius.max(0.05);
            self.mass = mass;
            self.inv_mass = 1.0 / mass;
            self.inv_inertia = 1.0 / (0.4 * mass * radius * radius);
        } else {
            self.mass = 0.0;
            self.inv_mass = 0.0;
            self.inv_inertia = 0.0;
            self.linear_velocity = Vec3::ZERO;
            self.angular_velocity = Vec3::ZERO;
        }
    }

    pub fn set_linear_velocity(&mut self, v: Vec3) {
        self.linear_velocity = v;
    }

    pub fn set_angular_velocity(&mut self, w: Vec3) {
        self.angular_velocity = w;
    }

    pub fn set_linear_factor(&mut self, f: Vec3) {
        self.linear_factor = f;
    }

    pub fn set_angular_factor(&mut self, f: Vec3) {
        self.angular_factor = f;
    }

    pub fn set_damping(&mut self, linear: f32, angular: f32) {
        self.linear_damping = linear.clamp(0.0, 1.0);
        self.angular_damping = angular.clamp(0.0, 1.0);
    }

    pub fn set_ccd(&mut self, motion_threshold: f32, swept_radius: f32) {
        self.ccd_motion_threshold = motion_threshold.max(0.0);
        self.ccd_swept_radius = swept_radius.max(0.0);
    }

    pub fn apply_central_impulse(&mut self, impulse: Vec3) {
        self.linear_velocity += impulse * self.linear_factor * self.inv_mass;
    }

    pub fn apply_torque_impulse(&mut self, torque: Vec3) {
        self.angular_velocity += torque * self.angular_factor * self.inv_inertia;
    }

    /// `rel_pos` is relative to the center of mass, in world orientation.
    pub fn apply_impulse(&mut self, impulse: Vec3, rel_pos: Vec3) {
        self.apply_central_impulse(impulse);
        self.apply_torque_impulse(rel_pos.cross(impulse * self.linear_factor));
    }

    pub fn apply_central_force(&mut self, force: Vec3) {
        self.force += force * self.linear_factor;
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        self.torque += torque * self.angular_factor;
    }

    pub fn apply_force(&mut self, force: Vec3, rel_pos: Vec3) {
        self.apply_central_force(force);
        self.apply_torque(rel_pos.cross(force * self.linear_factor));
    }

    pub fn velocity_at(&self, rel_pos: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(rel_pos)
    }

    pub fn status(&self) -> ActorStatus {
        ActorStatus {
            position: self.position,
            rotation: self.rotation,
            linear_velocity: self.linear_velocity,
            angular_velocity: self.angular_velocity,
        }
    }

    pub(crate) fn integrate_velocities(&mut self, gravity: Vec3, dt: f32) {
        if self.is_static() {
            self.force = Vec3::ZERO;
            self.torque = Vec3::ZERO;
            return;
        }
        let acceleration = gravity * self.linear_factor + self.force * self.inv_mass;
        self.linear_velocity += acceleration * dt;
        self.angular_velocity += self.torque * self.inv_inertia * dt;
        self.linear_velocity *= (1.0 - self.linear_damping).powf(dt);
        self.angular_velocity *= (1.0 - self.angular_damping).powf(dt);
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    pub(crate) fn integrate_transform(&mut self, dt: f32) {
        if self.is_static() {
            return;
        }
        self.position += self.linear_velocity * dt;
        if self.angular_velocity != Vec3::ZERO {
            self.rotation =
                (Quat::from_scaled_axis(self.angular_velocity * dt) * self.rotation).normalize();
        }
    }

    pub(crate) fn proxy_center(&self, proxy: &Proxy) -> Vec3 {
        self.position + self.rotation * proxy.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ProxyKind;

    fn ball() -> RigidBody {
        RigidBody::new(
            &RigidBodyInfo::default(),
            vec![Proxy {
                kind: ProxyKind::Sphere { radius: 0.5 },
                offset: Vec3::ZERO,
            }],
        )
    }

    #[test]
    fn zero_mass_is_static() {
        let mut body = ball();
        body.set_linear_velocity(Vec3::X);
        body.set_mass(0.0);
        assert!(body.is_static());
        assert_eq!(body.linear_velocity, Vec3::ZERO);
        body.apply_central_impulse(Vec3::Y);
        assert_eq!(body.linear_velocity, Vec3::ZERO);
    }

    #[test]
    fn factors_mask_impulses() {
        let mut body = ball();
        body.set_linear_factor(vec3(1.0, 0.0, 1.0));
        body.apply_central_impulse(vec3(1.0, 1.0, 1.0));
        assert_eq!(body.linear_velocity, vec3(1.0, 0.0, 1.0));
    }

    #[test]
    fn forces_clear_after_integration() {
        let mut body = ball();
        body.apply_central_force(vec3(60.0, 0.0, 0.0));
        body.integrate_velocities(Vec3::ZERO, 1.0 / 60.0);
        assert!((body.linear_velocity.x - 1.0).abs() < 1e-5);
        body.integrate_velocities(Vec3::ZERO, 1.0 / 60.0);
        assert!((body.linear_velocity.x - 1.0).abs() < 1e-5);
    }
}
