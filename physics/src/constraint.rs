use std::f32::consts::{PI, TAU};

use glam::*;

use crate::{Handle, PhysicsError, Pool, RigidBody};

/// Fraction of positional error removed per substep.
const ERP: f32 = 0.2;

const BASIS: [Vec3; 3] = [Vec3::X, Vec3::Y, Vec3::Z];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    Point,
    Hinge,
    Slider,
    ConeTwist,
    Dof,
}

#[derive(Debug, Clone, Copy)]
pub struct ConstraintInfo {
    pub kind: ConstraintType,
    pub body_a: Handle<RigidBody>,
    /// `None` anchors the constraint to the world.
    pub body_b: Option<Handle<RigidBody>>,
    /// Local to `body_a`.
    pub pivot_a: Vec3,
    /// Local to `body_b`, or a world position without one.
    pub pivot_b: Vec3,
    /// Hinge, slider or cone axis, local to `body_a`.
    pub axis: Vec3,
}

/// Angular motor bounded by an impulse per substep. Like every motor here
/// it drives body `a` relative to body `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motor {
    pub velocity: f32,
    pub max_impulse: f32,
}

/// Motor bounded by a force, so its impulse scales with the substep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceMotor {
    pub velocity: f32,
    pub max_force: f32,
}

/// Limits with `low > high` leave the hinge free.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hinge {
    pub low: f32,
    pub high: f32,
    pub bias_factor: f32,
    pub relaxation_factor: f32,
    pub motor: Option<Motor>,
}

impl Default for Hinge {
    fn default() -> Self {
        Self {
            low: 1.0,
            high: -1.0,
            bias_factor: 0.3,
            relaxation_factor: 1.0,
            motor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slider {
    pub linear_lower: f32,
    pub linear_upper: f32,
    pub angular_lower: f32,
    pub angular_upper: f32,
    pub linear_restitution: f32,
    pub angular_restitution: f32,
    pub linear_motor: Option<ForceMotor>,
    pub angular_motor: Option<ForceMotor>,
}

impl Default for Slider {
    fn default() -> Self {
        Self {
            linear_lower: 1.0,
            linear_upper: -1.0,
            angular_lower: 0.0,
            angular_upper: 0.0,
            linear_restitution: 0.7,
            angular_restitution: 0.7,
            linear_motor: None,
            angular_motor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeTwist {
    pub swing_span1: f32,
    pub swing_span2: f32,
    pub twist_span: f32,
    pub motor_enabled: bool,
    /// Negative means unbounded.
    pub max_motor_impulse: f32,
    pub motor_target: Quat,
}

impl Default for ConeTwist {
    fn default() -> Self {
        Self {
            swing_span1: f32::MAX,
            swing_span2: f32::MAX,
            twist_span: f32::MAX,
            motor_enabled: false,
            max_motor_impulse: -1.0,
            motor_target: Quat::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisMotor {
    pub enabled: bool,
    pub velocity: f32,
    pub max_force: f32,
}

/// Six-degree-of-freedom joint. Per axis, `lower == upper` locks,
/// `lower > upper` frees and anything else limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dof {
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub angular_motors: [AxisMotor; 3],
}

impl Default for Dof {
    fn default() -> Self {
        Self {
            linear_lower: Vec3::ZERO,
            linear_upper: Vec3::ZERO,
            angular_lower: Vec3::ONE,
            angular_upper: Vec3::NEG_ONE,
            angular_motors: [AxisMotor::default(); 3],
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Joint {
    Point,
    Hinge(Hinge),
    Slider(Slider),
    ConeTwist(ConeTwist),
    Dof(Dof),
}

#[derive(Debug)]
pub struct Constraint {
    body_a: Handle<RigidBody>,
    body_b: Option<Handle<RigidBody>>,
    pivot_a: Vec3,
    pivot_b: Vec3,
    axis_a: Vec3,
    axis_b: Vec3,
    /// Relative rotation of `b` in `a`'s frame at creation.
    reference: Quat,
    joint: Joint,
    applied_impulse: f32,
}

#[derive(Clone, Copy)]
struct SolverBody {
    x: Vec3,
    q: Quat,
    v: Vec3,
    w: Vec3,
    ima: f32,
    ia: f32,
}

impl SolverBody {
    fn world() -> Self {
        Self {
            x: Vec3::ZERO,
            q: Quat::IDENTITY,
            v: Vec3::ZERO,
            w: Vec3::ZERO,
            ima: 0.0,
            ia: 0.0,
        }
    }

    fn of(body: &RigidBody) -> Self {
        Self {
            x: body.position,
            q: body.rotation,
            v: body.linear_velocity,
            w: body.angular_velocity,
            ima: body.inv_mass,
            ia: body.inv_inertia,
        }
    }

    fn velocity_at(&self, r: Vec3) -> Vec3 {
        self.v + self.w.cross(r)
    }

    fn apply(&mut self, impulse: Vec3, r: Vec3) {
        self.v += impulse * self.ima;
        self.w += r.cross(impulse) * self.ia;
    }
}

fn push_linear(a: &mut SolverBody, b: &mut SolverBody, impulse: Vec3) {
    a.v -= impulse * a.ima;
    b.v += impulse * b.ima;
}

fn push_angular(a: &mut SolverBody, b: &mut SolverBody, impulse: Vec3) {
    a.w -= impulse * a.ia;
    b.w += impulse * b.ia;
}

/// `-[r]x [r]x * inv_inertia` for a scalar inertia.
fn arm(r: Vec3, inv_inertia: f32) -> Mat3 {
    (Mat3::from_diagonal(Vec3::splat(r.length_squared()))
        - Mat3::from_cols(r * r.x, r * r.y, r * r.z))
        * inv_inertia
}

fn wrap_angle(angle: f32) -> f32 {
    let a = (angle + PI).rem_euclid(TAU) - PI;
    if a < -PI {
        a + TAU
    } else {
        a
    }
}

/// Rotation of `rel` about the unit local `axis`.
fn twist_angle(rel: Quat, axis: Vec3) -> f32 {
    wrap_angle(2.0 * vec3(rel.x, rel.y, rel.z).dot(axis).atan2(rel.w))
}

enum Bound {
    Free,
    Inside,
    Below(f32),
    Above(f32),
    Locked(f32),
}

fn bound(value: f32, lower: f32, upper: f32, rate: f32) -> Bound {
    if lower > upper {
        Bound::Free
    } else if lower == upper {
        Bound::Locked((lower - value) * rate)
    } else if value < lower {
        Bound::Below((lower - value) * rate)
    } else if value > upper {
        Bound::Above((upper - value) * rate)
    } else {
        Bound::Inside
    }
}

/// Impulse along one axis enforcing `bound`, given the current relative
/// `speed` and inverse effective mass `k`.
fn limit_impulse(bound: Bound, speed: f32, k: f32, restitution: f32) -> Option<f32> {
    if k <= 0.0 {
        return None;
    }
    match bound {
        Bound::Free | Bound::Inside => None,
        Bound::Locked(target) => Some((target - speed) / k),
        Bound::Below(target) => {
            let target = target.max(-speed * restitution);
            Some(((target - speed) / k).max(0.0))
        }
        Bound::Above(target) => {
            let target = target.min(-speed * restitution);
            Some(((target - speed) / k).min(0.0))
        }
    }
}

fn solve_point(a: &mut SolverBody, b: &mut SolverBody, ra: Vec3, rb: Vec3, error: Vec3, dt: f32) -> f32 {
    let k = Mat3::from_diagonal(Vec3::splat(a.ima + b.ima)) + arm(ra, a.ia) + arm(rb, b.ia);
    if k.determinant().abs() <= f32::EPSILON {
        return 0.0;
    }
    let vrel = b.velocity_at(rb) - a.velocity_at(ra);
    let impulse = k.inverse() * (-vrel - error * (ERP / dt));
    a.apply(-impulse, ra);
    b.apply(impulse, rb);
    impulse.length()
}

/// Keep `nb` parallel to `na`, leaving spin about `na` free.
fn align_axes(a: &mut SolverBody, b: &mut SolverBody, na: Vec3, nb: Vec3, dt: f32) {
    let k = a.ia + b.ia;
    if k <= 0.0 {
        return;
    }
    let wrel = b.w - a.w;
    let w_perp = wrel - na * wrel.dot(na);
    let error = na.cross(nb);
    push_angular(a, b, -(w_perp + error * (ERP / dt)) / k);
}

fn spin_about(a: &SolverBody, b: &SolverBody, axis: Vec3) -> f32 {
    (b.w - a.w).dot(axis)
}

impl Constraint {
    pub(crate) fn new(info: &ConstraintInfo, bodies: &Pool<RigidBody>) -> Result<Self, PhysicsError> {
        let a = bodies
            .get_ref(info.body_a)
            .ok_or(PhysicsError::InvalidHandle)?;
        let qb = match info.body_b {
            Some(h) => bodies.get_ref(h).ok_or(PhysicsError::InvalidHandle)?.rotation,
            None => Quat::IDENTITY,
        };
        let axis_a = info.axis.try_normalize().unwrap_or(Vec3::Y);
        let axis_b = qb.inverse() * (a.rotation * axis_a);
        let joint = match info.kind {
            ConstraintType::Point => Joint::Point,
            ConstraintType::Hinge => Joint::Hinge(Hinge::default()),
            ConstraintType::Slider => Joint::Slider(Slider::default()),
            ConstraintType::ConeTwist => Joint::ConeTwist(ConeTwist::default()),
            ConstraintType::Dof => Joint::Dof(Dof::default()),
        };
        Ok(Self {
            body_a: info.body_a,
            body_b: info.body_b,
            pivot_a: info.pivot_a,
            pivot_b: info.pivot_b,
            axis_a,
            axis_b,
            reference: a.rotation.inverse() * qb,
            joint,
            applied_impulse: 0.0,
        })
    }

    pub fn kind(&self) -> ConstraintType {
        match self.joint {
            Joint::Point => ConstraintType::Point,
            Joint::Hinge(_) => ConstraintType::Hinge,
            Joint::Slider(_) => ConstraintType::Slider,
            Joint::ConeTwist(_) => ConstraintType::ConeTwist,
            Joint::Dof(_) => ConstraintType::Dof,
        }
    }

    pub fn body_a(&self) -> Handle<RigidBody> {
        self.body_a
    }

    pub fn body_b(&self) -> Option<Handle<RigidBody>> {
        self.body_b
    }

    pub fn pivot_a(&self) -> Vec3 {
        self.pivot_a
    }

    /// Sum of impulse magnitudes applied during the last step.
    pub fn applied_impulse(&self) -> f32 {
        self.applied_impulse
    }

    pub(crate) fn reset_impulse(&mut self) {
        self.applied_impulse = 0.0;
    }

    pub fn hinge_mut(&mut self) -> Result<&mut Hinge, PhysicsError> {
        match &mut self.joint {
            Joint::Hinge(h) => Ok(h),
            _ => Err(PhysicsError::WrongConstraintType),
        }
    }

    pub fn slider_mut(&mut self) -> Result<&mut Slider, PhysicsError> {
        match &mut self.joint {
            Joint::Slider(s) => Ok(s),
            _ => Err(PhysicsError::WrongConstraintType),
        }
    }

    pub fn cone_twist_mut(&mut self) -> Result<&mut ConeTwist, PhysicsError> {
        match &mut self.joint {
            Joint::ConeTwist(c) => Ok(c),
            _ => Err(PhysicsError::WrongConstraintType),
        }
    }

    pub fn dof_mut(&mut self) -> Result<&mut Dof, PhysicsError> {
        match &mut self.joint {
            Joint::Dof(d) => Ok(d),
            _ => Err(PhysicsError::WrongConstraintType),
        }
    }

    /// One velocity pass. Constraints naming a released body are skipped.
    pub(crate) fn solve(&mut self, bodies: &mut Pool<RigidBody>, dt: f32) {
        let Some(mut a) = bodies.get_ref(self.body_a).map(SolverBody::of) else {
            return;
        };
        let mut b = match self.body_b {
            Some(h) => match bodies.get_ref(h) {
                Some(body) => SolverBody::of(body),
                None => return,
            },
            None => SolverBody::world(),
        };
        if a.ima == 0.0 && b.ima == 0.0 {
            return;
        }

        let ra = a.q * self.pivot_a;
        let rb = b.q * self.pivot_b;
        let error = (b.x + rb) - (a.x + ra);
        let na = a.q * self.axis_a;
        let nb = b.q * self.axis_b;
        let rel = a.q.inverse() * b.q * self.reference.inverse();
        let rate = ERP / dt;

        let mut impulse = 0.0;
        match self.joint {
            Joint::Point => {
                impulse += solve_point(&mut a, &mut b, ra, rb, error, dt);
            }
            Joint::Hinge(h) => {
                impulse += solve_point(&mut a, &mut b, ra, rb, error, dt);
                align_axes(&mut a, &mut b, na, nb, dt);
                let k = a.ia + b.ia;
                let angle = twist_angle(rel, self.axis_a);
                let spin = spin_about(&a, &b, na);
                let limit = bound(angle, h.low, h.high, h.bias_factor / dt);
                if let Some(l) = limit_impulse(limit, spin, k, 0.0) {
                    push_angular(&mut a, &mut b, na * l * h.relaxation_factor);
                }
                if let Some(m) = h.motor {
                    let spin = spin_about(&a, &b, na);
                    if k > 0.0 {
                        let l = ((-m.velocity - spin) / k).clamp(-m.max_impulse, m.max_impulse);
                        push_angular(&mut a, &mut b, na * l);
                    }
                }
            }
            Joint::Slider(s) => {
                let k = a.ima + b.ima;
                if k > 0.0 {
                    let vrel = b.v - a.v;
                    let along = error.dot(na);
                    let speed = vrel.dot(na);
                    let p = -((vrel - na * speed) + (error - na * along) * rate) / k;
                    push_linear(&mut a, &mut b, p);
                    impulse += p.length();
                    let limit = bound(along, s.linear_lower, s.linear_upper, rate);
                    if let Some(l) = limit_impulse(limit, speed, k, s.linear_restitution) {
                        push_linear(&mut a, &mut b, na * l);
                        impulse += l.abs();
                    }
                    if let Some(m) = s.linear_motor {
                        let speed = (b.v - a.v).dot(na);
                        let cap = m.max_force * dt;
                        let l = ((-m.velocity - speed) / k).clamp(-cap, cap);
                        push_linear(&mut a, &mut b, na * l);
                        impulse += l.abs();
                    }
                }
                align_axes(&mut a, &mut b, na, nb, dt);
                let k = a.ia + b.ia;
                let angle = twist_angle(rel, self.axis_a);
                let limit = bound(angle, s.angular_lower, s.angular_upper, rate);
                let spin = spin_about(&a, &b, na);
                if let Some(l) = limit_impulse(limit, spin, k, s.angular_restitution) {
                    push_angular(&mut a, &mut b, na * l);
                }
                if let Some(m) = s.angular_motor {
                    if k > 0.0 {
                        let spin = spin_about(&a, &b, na);
                        let cap = m.max_force * dt;
                        let l = ((-m.velocity - spin) / k).clamp(-cap, cap);
                        push_angular(&mut a, &mut b, na * l);
                    }
                }
            }
            Joint::ConeTwist(c) => {
                impulse += solve_point(&mut a, &mut b, ra, rb, error, dt);
                let k = a.ia + b.ia;
                if k > 0.0 {
                    let swing = na.dot(nb).clamp(-1.0, 1.0).acos();
                    let span = c.swing_span1.min(c.swing_span2);
                    if swing > span {
                        let n = na.cross(nb).normalize_or_zero();
                        let speed = spin_about(&a, &b, n);
                        let l = (((span - swing) * rate - speed) / k).min(0.0);
                        push_angular(&mut a, &mut b, n * l);
                    }
                    let angle = twist_angle(rel, self.axis_a);
                    let limit = bound(angle, -c.twist_span, c.twist_span, rate);
                    let spin = spin_about(&a, &b, na);
                    if let Some(l) = limit_impulse(limit, spin, k, 0.0) {
                        push_angular(&mut a, &mut b, na * l);
                    }
                    if c.motor_enabled {
                        let (axis, angle) = (c.motor_target * rel.inverse()).to_axis_angle();
                        let desired = (a.q * axis) * (wrap_angle(angle) * rate);
                        let mut l = (desired - (b.w - a.w)) / k;
                        if c.max_motor_impulse >= 0.0 {
                            l = l.clamp_length_max(c.max_motor_impulse);
                        }
                        push_angular(&mut a, &mut b, l);
                    }
                }
            }
            Joint::Dof(d) => {
                let k_lin = a.ima + b.ima;
                for (i, axis) in BASIS.iter().enumerate() {
                    let e = a.q * *axis;
                    let speed = (b.velocity_at(rb) - a.velocity_at(ra)).dot(e);
                    let limit = bound(error.dot(e), d.linear_lower[i], d.linear_upper[i], rate);
                    if let Some(l) = limit_impulse(limit, speed, k_lin, 0.0) {
                        push_linear(&mut a, &mut b, e * l);
                        impulse += l.abs();
                    }
                }
                let k_ang = a.ia + b.ia;
                let (ex, ey, ez) = rel.to_euler(EulerRot::XYZ);
                for (i, angle) in [ex, ey, ez].into_iter().enumerate() {
                    let e = a.q * BASIS[i];
                    let limit = bound(angle, d.angular_lower[i], d.angular_upper[i], rate);
                    if let Some(l) = limit_impulse(limit, spin_about(&a, &b, e), k_ang, 0.0) {
                        push_angular(&mut a, &mut b, e * l);
                    }
                    let m = d.angular_motors[i];
                    if m.enabled && k_ang > 0.0 {
                        let cap = m.max_force * dt;
                        let l = ((-m.velocity - spin_about(&a, &b, e)) / k_ang).clamp(-cap, cap);
                        push_angular(&mut a, &mut b, e * l);
                    }
                }
            }
        }
        self.applied_impulse += impulse;

        if let Some(body) = bodies.get_mut_ref(self.body_a) {
            body.linear_velocity = a.v;
            body.angular_velocity = a.w;
        }
        if let Some(body) = self.body_b.and_then(|h| bodies.get_mut_ref(h)) {
            body.linear_velocity = b.v;
            body.angular_velocity = b.w;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_follow_free_locked_limited_convention() {
        assert!(matches!(bound(0.5, 1.0, -1.0, 1.0), Bound::Free));
        assert!(matches!(bound(0.5, 0.0, 0.0, 1.0), Bound::Locked(_)));
        assert!(matches!(bound(0.5, 0.0, 1.0, 1.0), Bound::Inside));
        assert!(matches!(bound(-0.5, 0.0, 1.0, 1.0), Bound::Below(_)));
        assert!(matches!(bound(1.5, 0.0, 1.0, 1.0), Bound::Above(_)));
    }

    #[test]
    fn limit_impulse_only_pushes_back_inside() {
        // already moving back inside: no impulse needed beyond the bias
        let l = limit_impulse(Bound::Below(0.1), 1.0, 1.0, 0.0).unwrap();
        assert_eq!(l, 0.0);
        let l = limit_impulse(Bound::Above(-0.1), 1.0, 1.0, 0.0).unwrap();
        assert!(l < 0.0);
        assert!(limit_impulse(Bound::Free, 1.0, 1.0, 0.0).is_none());
    }

    #[test]
    fn twist_is_measured_about_axis() {
        let q = Quat::from_axis_angle(Vec3::Z, 0.7);
        assert!((twist_angle(q, Vec3::Z) - 0.7).abs() < 1e-5);
        assert!(twist_angle(q, Vec3::X).abs() < 1e-5);
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-4 || (wrap_angle(3.0 * PI) + PI).abs() < 1e-4);
    }
}
