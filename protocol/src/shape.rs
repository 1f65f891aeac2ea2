use glam::{Quat, Vec3};

/// Wire discriminator for [`ShapeDescriptor`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeTag {
    Box = 0,
    Sphere = 1,
    Cylinder = 2,
    Capsule = 3,
    Cone = 4,
    ConvexHull = 5,
    TriangleMesh = 6,
    HeightField = 7,
    Compound = 8,
}

impl ShapeTag {
    pub fn from_u32(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => ShapeTag::Box,
            1 => ShapeTag::Sphere,
            2 => ShapeTag::Cylinder,
            3 => ShapeTag::Capsule,
            4 => ShapeTag::Cone,
            5 => ShapeTag::ConvexHull,
            6 => ShapeTag::TriangleMesh,
            7 => ShapeTag::HeightField,
            8 => ShapeTag::Compound,
            _ => return None,
        })
    }
}

/// One child of a compound shape, placed relative to the compound's origin.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundChild {
    pub shape: ShapeDescriptor,
    pub position: Vec3,
    pub rotation: Quat,
}

/// Collision geometry requested by the host.
///
/// Only the scalar-parameterised primitives are cacheable; geometry carrying
/// arrays is always built fresh on the engine host.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeDescriptor {
    Box {
        half_extents: Vec3,
    },
    Sphere {
        radius: f32,
    },
    Cylinder {
        half_extents: Vec3,
    },
    /// `height` is the length of the cylindrical section between the caps.
    Capsule {
        radius: f32,
        height: f32,
    },
    Cone {
        radius: f32,
        height: f32,
    },
    ConvexHull {
        points: Vec<Vec3>,
    },
    TriangleMesh {
        triangles: Vec<[Vec3; 3]>,
    },
    /// Row-major height samples, `columns * rows` of them.
    HeightField {
        columns: u32,
        rows: u32,
        heights: Vec<f32>,
        scale: Vec3,
    },
    Compound {
        children: Vec<CompoundChild>,
    },
    /// A tag this build does not know about.
    Unknown {
        tag: u32,
    },
}

impl ShapeDescriptor {
    pub fn tag(&self) -> Option<ShapeTag> {
        Some(match self {
            ShapeDescriptor::Box { .. } => ShapeTag::Box,
            ShapeDescriptor::Sphere { .. } => ShapeTag::Sphere,
            ShapeDescriptor::Cylinder { .. } => ShapeTag::Cylinder,
            ShapeDescriptor::Capsule { .. } => ShapeTag::Capsule,
            ShapeDescriptor::Cone { .. } => ShapeTag::Cone,
            ShapeDescriptor::ConvexHull { .. } => ShapeTag::ConvexHull,
            ShapeDescriptor::TriangleMesh { .. } => ShapeTag::TriangleMesh,
            ShapeDescriptor::HeightField { .. } => ShapeTag::HeightField,
            ShapeDescriptor::Compound { .. } => ShapeTag::Compound,
            ShapeDescriptor::Unknown { .. } => return None,
        })
    }

    /// Canonical cache key, or `None` when the shape must not be shared.
    ///
    /// Two descriptors with the same key describe the same native shape.
    pub fn cache_key(&self) -> Option<String> {
        match self {
            ShapeDescriptor::Box { half_extents: h } => {
                Some(format!("box_{}_{}_{}", h.x, h.y, h.z))
            }
            ShapeDescriptor::Sphere { radius } => Some(format!("sphere_{}", radius)),
            ShapeDescriptor::Cylinder { half_extents: h } => {
                Some(format!("cylinder_{}_{}_{}", h.x, h.y, h.z))
            }
            ShapeDescriptor::Capsule { radius, height } => {
                Some(format!("capsule_{}_{}", radius, height))
            }
            ShapeDescriptor::Cone { radius, height } => Some(format!("cone_{}_{}", radius, height)),
            ShapeDescriptor::ConvexHull { .. }
            | ShapeDescriptor::TriangleMesh { .. }
            | ShapeDescriptor::HeightField { .. }
            | ShapeDescriptor::Compound { .. }
            | ShapeDescriptor::Unknown { .. } => None,
        }
    }

    /// Reason this descriptor can never produce a shape, if any.
    ///
    /// Compound children are checked recursively.
    pub fn defect(&self) -> Option<String> {
        match self {
            ShapeDescriptor::Unknown { tag } => Some(format!("unrecognized shape tag {}", tag)),
            ShapeDescriptor::ConvexHull { points } if points.is_empty() => {
                Some("convex hull without points".to_string())
            }
            ShapeDescriptor::TriangleMesh { triangles } if triangles.is_empty() => {
                Some("triangle mesh without triangles".to_string())
            }
            ShapeDescriptor::HeightField {
                columns,
                rows,
                heights,
                ..
            } => {
                let expected = *columns as usize * *rows as usize;
                if *columns < 2 || *rows < 2 || heights.len() != expected {
                    Some(format!(
                        "height field {}x{} with {} samples",
                        columns,
                        rows,
                        heights.len()
                    ))
                } else {
                    None
                }
            }
            ShapeDescriptor::Compound { children } => {
                if children.is_empty() {
                    return Some("compound without children".to_string());
                }
                children.iter().find_map(|c| c.shape.defect())
            }
            _ => None,
        }
    }
}
