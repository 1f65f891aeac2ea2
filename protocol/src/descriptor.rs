use glam::{Quat, Vec3};

use crate::{Identity, ShapeDescriptor};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialInfo {
    pub friction: f32,
    pub restitution: f32,
}

impl Default for MaterialInfo {
    fn default() -> Self {
        Self {
            friction: 0.8,
            restitution: 0.2,
        }
    }
}

/// Node layout of a soft body, which also fixes its report stride.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftTopology {
    Rope = 0,
    Cloth = 1,
    Volume = 2,
}

impl SoftTopology {
    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(SoftTopology::Rope),
            1 => Some(SoftTopology::Cloth),
            2 => Some(SoftTopology::Volume),
            _ => None,
        }
    }

    /// Scalars written per reported element.
    ///
    /// Ropes report node positions, cloths report node position + normal and
    /// volumes report every triangle as three (position + normal) vertices.
    pub const fn scalars_per_element(self) -> usize {
        match self {
            SoftTopology::Rope => 3,
            SoftTopology::Cloth => 6,
            SoftTopology::Volume => 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoftGeometry {
    /// `segments + 1` nodes spaced evenly between `start` and `end`.
    Rope { start: Vec3, end: Vec3, segments: u32 },
    /// A patch spanned by corners `[00, 10, 01, 11]`.
    Cloth {
        corners: [Vec3; 4],
        segments_x: u32,
        segments_y: u32,
    },
    Volume {
        vertices: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
    },
}

impl SoftGeometry {
    pub fn topology(&self) -> SoftTopology {
        match self {
            SoftGeometry::Rope { .. } => SoftTopology::Rope,
            SoftGeometry::Cloth { .. } => SoftTopology::Cloth,
            SoftGeometry::Volume { .. } => SoftTopology::Volume,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftBodyDescriptor {
    pub geometry: SoftGeometry,
    /// Link stiffness in `(0, 1]`.
    pub stiffness: f32,
    /// Link relaxation passes per step.
    pub iterations: u32,
}

impl SoftBodyDescriptor {
    pub fn new(geometry: SoftGeometry) -> Self {
        Self {
            geometry,
            stiffness: 0.9,
            iterations: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyKind {
    Rigid(ShapeDescriptor),
    Soft(SoftBodyDescriptor),
}

/// Everything the engine host needs to create a body.
///
/// A `mass` of zero creates a static body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDescriptor {
    pub kind: BodyKind,
    pub mass: f32,
    pub material: MaterialInfo,
    pub transform: Transform,
    pub scale: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
}

impl BodyDescriptor {
    pub fn rigid(shape: ShapeDescriptor, mass: f32) -> Self {
        Self {
            kind: BodyKind::Rigid(shape),
            mass,
            material: MaterialInfo::default(),
            transform: Transform::default(),
            scale: Vec3::ONE,
            linear_damping: 0.0,
            angular_damping: 0.0,
        }
    }

    pub fn soft(desc: SoftBodyDescriptor, mass: f32) -> Self {
        Self {
            kind: BodyKind::Soft(desc),
            ..Self::rigid(ShapeDescriptor::Sphere { radius: 0.0 }, mass)
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.transform.rotation = rotation;
        self
    }

    pub fn with_material(mut self, material: MaterialInfo) -> Self {
        self.material = material;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintKind {
    Point,
    Hinge { axis: Vec3 },
    Slider { axis: Vec3 },
    ConeTwist { axis: Vec3 },
    Dof,
}

/// A joint anchored on `body_a` and either `body_b` or the world.
///
/// `pivot_a` is local to `body_a`; `pivot_b` is local to `body_b`, or a world
/// position when there is no second body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintDescriptor {
    pub kind: ConstraintKind,
    pub body_a: Identity,
    pub body_b: Option<Identity>,
    pub pivot_a: Vec3,
    pub pivot_b: Vec3,
}

/// Post-creation adjustments, one family per constraint kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstraintTuning {
    HingeLimits {
        low: f32,
        high: f32,
        bias_factor: f32,
        relaxation_factor: f32,
    },
    HingeMotor {
        velocity: f32,
        max_impulse: f32,
    },
    HingeDisableMotor,
    SliderLimits {
        linear_lower: f32,
        linear_upper: f32,
        angular_lower: f32,
        angular_upper: f32,
    },
    SliderRestitution {
        linear: f32,
        angular: f32,
    },
    SliderLinearMotor {
        velocity: f32,
        max_force: f32,
    },
    SliderDisableLinearMotor,
    SliderAngularMotor {
        velocity: f32,
        max_force: f32,
    },
    SliderDisableAngularMotor,
    ConeTwistLimit {
        x: f32,
        y: f32,
        z: f32,
    },
    ConeTwistEnableMotor,
    ConeTwistDisableMotor,
    ConeTwistMaxMotorImpulse(f32),
    ConeTwistMotorTarget(Quat),
    DofLinearLowerLimit(Vec3),
    DofLinearUpperLimit(Vec3),
    DofAngularLowerLimit(Vec3),
    DofAngularUpperLimit(Vec3),
    DofConfigureAngularMotor {
        axis: u8,
        low: f32,
        high: f32,
        velocity: f32,
        max_force: f32,
    },
    DofEnableAngularMotor(u8),
    DofDisableAngularMotor(u8),
}

impl ConstraintTuning {
    /// Whether this adjustment means anything for a constraint of `kind`.
    pub fn applies_to(&self, kind: &ConstraintKind) -> bool {
        use ConstraintTuning::*;
        match self {
            HingeLimits { .. } | HingeMotor { .. } | HingeDisableMotor => {
                matches!(kind, ConstraintKind::Hinge { .. })
            }
            SliderLimits { .. }
            | SliderRestitution { .. }
            | SliderLinearMotor { .. }
            | SliderDisableLinearMotor
            | SliderAngularMotor { .. }
            | SliderDisableAngularMotor => matches!(kind, ConstraintKind::Slider { .. }),
            ConeTwistLimit { .. }
            | ConeTwistEnableMotor
            | ConeTwistDisableMotor
            | ConeTwistMaxMotorImpulse(_)
            | ConeTwistMotorTarget(_) => matches!(kind, ConstraintKind::ConeTwist { .. }),
            DofLinearLowerLimit(_)
            | DofLinearUpperLimit(_)
            | DofAngularLowerLimit(_)
            | DofAngularUpperLimit(_)
            | DofConfigureAngularMotor { .. }
            | DofEnableAngularMotor(_)
            | DofDisableAngularMotor(_) => matches!(kind, ConstraintKind::Dof),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleTuning {
    pub suspension_stiffness: f32,
    pub suspension_compression: f32,
    pub suspension_damping: f32,
    /// Centimetres.
    pub max_suspension_travel: f32,
    pub friction_slip: f32,
    pub max_suspension_force: f32,
}

impl Default for VehicleTuning {
    fn default() -> Self {
        Self {
            suspension_stiffness: 5.88,
            suspension_compression: 0.83,
            suspension_damping: 0.88,
            max_suspension_travel: 500.0,
            friction_slip: 10.5,
            max_suspension_force: 6000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleDescriptor {
    pub chassis: Identity,
    pub tuning: VehicleTuning,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelDescriptor {
    /// Chassis-local attachment point.
    pub connection_point: Vec3,
    pub direction: Vec3,
    pub axle: Vec3,
    pub suspension_rest_length: f32,
    pub radius: f32,
    pub is_front: bool,
}

impl Default for WheelDescriptor {
    fn default() -> Self {
        Self {
            connection_point: Vec3::ZERO,
            direction: Vec3::NEG_Y,
            axle: Vec3::NEG_X,
            suspension_rest_length: 0.5,
            radius: 0.5,
            is_front: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuning_only_applies_to_matching_kind() {
        let hinge = ConstraintKind::Hinge { axis: Vec3::Y };
        assert!(ConstraintTuning::HingeDisableMotor.applies_to(&hinge));
        assert!(!ConstraintTuning::SliderDisableLinearMotor.applies_to(&hinge));
        assert!(ConstraintTuning::DofEnableAngularMotor(1).applies_to(&ConstraintKind::Dof));
        assert!(!ConstraintTuning::ConeTwistEnableMotor.applies_to(&ConstraintKind::Point));
    }

    #[test]
    fn soft_strides_follow_topology() {
        assert_eq!(SoftTopology::Rope.scalars_per_element(), 3);
        assert_eq!(SoftTopology::Cloth.scalars_per_element(), 6);
        assert_eq!(SoftTopology::Volume.scalars_per_element(), 18);
        assert_eq!(SoftTopology::from_u32(1), Some(SoftTopology::Cloth));
        assert_eq!(SoftTopology::from_u32(3), None);
    }
}
