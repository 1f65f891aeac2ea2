use glam::*;

use crate::{Handle, PhysicsError, Pool};

/// Construction parameters of a collision shape.
#[derive(Debug, Clone)]
pub enum ShapeInfo {
    Sphere {
        radius: f32,
    },
    Box {
        half_extents: Vec3,
    },
    Cylinder {
        half_extents: Vec3,
    },
    /// `half_height` is half the length of the segment between the caps.
    Capsule {
        radius: f32,
        half_height: f32,
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
    HeightField {
        columns: u32,
        rows: u32,
        heights: Vec<f32>,
        scale: Vec3,
    },
    Compound {
        children: Vec<CompoundPart>,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct CompoundPart {
    pub shape: Handle<Shape>,
    pub position: Vec3,
    pub rotation: Quat,
}

/// A shape instance. Bodies reference shapes by handle, so one shape can
/// back any number of bodies.
#[derive(Debug)]
pub struct Shape {
    info: ShapeInfo,
}

impl Shape {
    pub fn info(&self) -> &ShapeInfo {
        &self.info
    }
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

fn aabb(points: impl Iterator<Item = Vec3>) -> Option<(Vec3, Vec3)> {
    points.fold(None, |acc, p| match acc {
        None => Some((p, p)),
        Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
    })
}

impl ShapeInfo {
    pub(crate) fn validate(&self) -> Result<(), PhysicsError> {
        let ok = match self {
            ShapeInfo::Sphere { radius } => positive(*radius),
            ShapeInfo::Box { half_extents } | ShapeInfo::Cylinder { half_extents } => {
                half_extents.is_finite() && half_extents.min_element() > 0.0
            }
            ShapeInfo::Capsule {
                radius,
                half_height,
            } => positive(*radius) && half_height.is_finite() && *half_height >= 0.0,
            ShapeInfo::Cone { radius, height } => positive(*radius) && positive(*height),
            ShapeInfo::ConvexHull { points } => !points.is_empty(),
            ShapeInfo::TriangleMesh { triangles } => !triangles.is_empty(),
            ShapeInfo::HeightField {
                columns,
                rows,
                heights,
                ..
            } => {
                *columns >= 2
                    && *rows >= 2
                    && heights.len() == *columns as usize * *rows as usize
            }
            ShapeInfo::Compound { children } => !children.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(PhysicsError::InvalidGeometry)
        }
    }
}

/// Primitive the narrow phase actually tests. Every shape reduces to one or
/// more axis-aligned proxies placed at an offset from the body origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProxyKind {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Capsule { radius: f32, half_height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proxy {
    pub kind: ProxyKind,
    pub offset: Vec3,
}

impl Proxy {
    pub fn extent(&self) -> f32 {
        let reach = match self.kind {
            ProxyKind::Sphere { radius } => radius,
            ProxyKind::Box { half_extents } => half_extents.length(),
            ProxyKind::Capsule {
                radius,
                half_height,
            } => radius + half_height,
        };
        reach + self.offset.length()
    }
}

const MAX_COMPOUND_DEPTH: u32 = 8;

/// Scale `shape` into collision proxies without touching the shape itself.
pub(crate) fn build_proxies(
    shapes: &Pool<Shape>,
    shape: Handle<Shape>,
    scale: Vec3,
    offset: Vec3,
    out: &mut Vec<Proxy>,
    depth: u32,
) -> Result<(), PhysicsError> {
    if depth > MAX_COMPOUND_DEPTH {
        return Err(PhysicsError::InvalidGeometry);
    }
    let info = shapes
        .get_ref(shape)
        .map(Shape::info)
        .ok_or(PhysicsError::InvalidHandle)?;
    let scale = scale.abs();
    let mut push = |kind, center: Vec3| out.push(Proxy {
        kind,
        offset: offset + center,
    });
    match info {
        ShapeInfo::Sphere { radius } => push(
            ProxyKind::Sphere {
                radius: radius * scale.max_element(),
            },
            Vec3::ZERO,
        ),
        ShapeInfo::Box { half_extents } | ShapeInfo::Cylinder { half_extents } => push(
            ProxyKind::Box {
                half_extents: *half_extents * scale,
            },
            Vec3::ZERO,
        ),
        ShapeInfo::Capsule {
            radius,
            half_height,
        } => push(
            ProxyKind::Capsule {
                radius: radius * scale.x.max(scale.z),
                half_height: half_height * scale.y,
            },
            Vec3::ZERO,
        ),
        ShapeInfo::Cone { radius, height } => push(
            ProxyKind::Box {
                half_extents: vec3(*radius, height * 0.5, *radius) * scale,
            },
            Vec3::ZERO,
        ),
        ShapeInfo::ConvexHull { points } => {
            if let Some((lo, hi)) = aabb(points.iter().map(|p| *p * scale)) {
                push(box_between(lo, hi), (lo + hi) * 0.5);
            }
        }
        ShapeInfo::TriangleMesh { triangles } => {
            if let Some((lo, hi)) = aabb(triangles.iter().flatten().map(|p| *p * scale)) {
                push(box_between(lo, hi), (lo + hi) * 0.5);
            }
        }
        ShapeInfo::HeightField {
            columns,
            rows,
            heights,
            scale: cell,
        } => {
            let cell = *cell * scale;
            let (lo, hi) = heights
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), h| (lo.min(*h), hi.max(*h)));
            let half = vec3(
                (*columns - 1) as f32 * cell.x * 0.5,
                ((hi - lo) * cell.y * 0.5).max(0.01),
                (*rows - 1) as f32 * cell.z * 0.5,
            );
            push(
                ProxyKind::Box { half_extents: half },
                vec3(0.0, (lo + hi) * 0.5 * cell.y, 0.0),
            );
        }
        ShapeInfo::Compound { children } => {
            for child in children {
                build_proxies(
                    shapes,
                    child.shape,
                    scale,
                    offset + child.position * scale,
                    out,
                    depth + 1,
                )?;
            }
        }
    }
    Ok(())
}

fn box_between(lo: Vec3, hi: Vec3) -> ProxyKind {
    ProxyKind::Box {
        half_extents: ((hi - lo) * 0.5).max(Vec3::splat(0.01)),
    }
}

pub(crate) fn create(shapes: &mut Pool<Shape>, info: &ShapeInfo) -> Result<Handle<Shape>, PhysicsError> {
    info.validate()?;
    if let ShapeInfo::Compound { children } = info {
        if children.iter().any(|c| shapes.get_ref(c.shape).is_none()) {
            return Err(PhysicsError::InvalidHandle);
        }
    }
    shapes
        .insert(Shape { info: info.clone() })
        .ok_or(PhysicsError::OutOfSlots)
}

fn collide_sphere_box(
    sphere_pos: Vec3,
    radius: f32,
    box_pos: Vec3,
    box_half: Vec3,
) -> Option<(Vec3, f32)> {
    let diff = sphere_pos - box_pos;
    let closest = diff.clamp(-box_half, box_half);
    let delta = diff - closest;
    let dist_sq = delta.length_squared();
    if dist_sq >= radius * radius {
        return None;
    }
    let dist = dist_sq.sqrt();
    if dist > 0.0 {
        return Some((-(delta / dist), radius - dist));
    }
    let over = box_half - diff.abs();
    if over.x < over.y && over.x < over.z {
        Some((vec3(-diff.x.signum(), 0.0, 0.0), radius + over.x))
    } else if over.y < over.z {
        Some((vec3(0.0, -diff.y.signum(), 0.0), radius + over.y))
    } else {
        Some((vec3(0.0, 0.0, -diff.z.signum()), radius + over.z))
    }
}

fn closest_point_on_segment(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq <= f32::EPSILON {
        return a;
    }
    let t = (p - a).dot(ab) / len_sq;
    a + ab * t.clamp(0.0, 1.0)
}

fn collide_capsule_sphere(
    cap_pos: Vec3,
    half_height: f32,
    radius: f32,
    sphere_pos: Vec3,
    sphere_radius: f32,
) -> Option<(Vec3, f32)> {
    let a = cap_pos - Vec3::Y * half_height;
    let b = cap_pos + Vec3::Y * half_height;
    let closest = closest_point_on_segment(sphere_pos, a, b);
    let delta = sphere_pos - closest;
    let dist = delta.length();
    let penetration = radius + sphere_radius - dist;
    if penetration > 0.0 {
        let normal = if dist > 0.0 { delta / dist } else { Vec3::Y };
        Some((normal, penetration))
    } else {
        None
    }
}

fn collide_capsule_capsule(
    a_pos: Vec3,
    a_half: f32,
    a_radius: f32,
    b_pos: Vec3,
    b_half: f32,
    b_radius: f32,
) -> Option<(Vec3, f32)> {
    let a_min = a_pos.y - a_half;
    let a_max = a_pos.y + a_half;
    let b_min = b_pos.y - b_half;
    let b_max = b_pos.y + b_half;

    let (ya, yb) = if a_max < b_min {
        (a_max, b_min)
    } else if b_max < a_min {
        (a_min, b_max)
    } else {
        let y = (a_min.max(b_min) + a_max.min(b_max)) * 0.5;
        (y, y)
    };

    let delta = vec3(b_pos.x, yb, b_pos.z) - vec3(a_pos.x, ya, a_pos.z);
    let dist = delta.length();
    let penetration = a_radius + b_radius - dist;
    if penetration > 0.0 {
        let normal = if dist > 0.0 { delta / dist } else { Vec3::Z };
        Some((normal, penetration))
    } else {
        None
    }
}

fn collide_capsule_box(
    cap_pos: Vec3,
    half_height: f32,
    radius: f32,
    box_pos: Vec3,
    box_half: Vec3,
) -> Option<(Vec3, f32)> {
    let seg_min = cap_pos.y - half_height;
    let seg_max = cap_pos.y + half_height;
    let box_min = box_pos - box_half;
    let box_max = box_pos + box_half;

    let closest_y = if seg_max < box_min.y {
        box_min.y
    } else if seg_min > box_max.y {
        box_max.y
    } else {
        cap_pos.y.clamp(box_min.y, box_max.y)
    };
    let box_point = vec3(
        cap_pos.x.clamp(box_min.x, box_max.x),
        closest_y,
        cap_pos.z.clamp(box_min.z, box_max.z),
    );
    let capsule_point = vec3(cap_pos.x, closest_y.clamp(seg_min, seg_max), cap_pos.z);
    let delta = capsule_point - box_point;
    let dist_sq = delta.length_squared();
    if dist_sq < radius * radius {
        let dist = dist_sq.sqrt();
        let normal = if dist > 0.0 { -(delta / dist) } else { Vec3::Y };
        Some((normal, radius - dist))
    } else {
        None
    }
}

fn collide_box_box(a_pos: Vec3, a_half: Vec3, b_pos: Vec3, b_half: Vec3) -> Option<(Vec3, f32)> {
    let delta = b_pos - a_pos;
    let overlap = a_half + b_half - delta.abs();
    if overlap.min_element() <= 0.0 {
        return None;
    }
    let sign = |v: f32| if v < 0.0 { -1.0 } else { 1.0 };
    if overlap.x < overlap.y && overlap.x < overlap.z {
        Some((vec3(sign(delta.x), 0.0, 0.0), overlap.x))
    } else if overlap.y < overlap.z {
        Some((vec3(0.0, sign(delta.y), 0.0), overlap.y))
    } else {
        Some((vec3(0.0, 0.0, sign(delta.z)), overlap.z))
    }
}

/// Test two placed proxies. The returned normal points from `a` toward `b`.
pub(crate) fn collide(a: ProxyKind, a_pos: Vec3, b: ProxyKind, b_pos: Vec3) -> Option<(Vec3, f32)> {
    use ProxyKind::*;
    match (a, b) {
        (Sphere { radius: ra }, Sphere { radius: rb }) => {
            let delta = b_pos - a_pos;
            let dist = delta.length();
            let penetration = ra + rb - dist;
            (penetration > 0.0).then(|| {
                let normal = if dist > 0.0 { delta / dist } else { Vec3::Z };
                (normal, penetration)
            })
        }
        (Box { half_extents: ha }, Box { half_extents: hb }) => {
            collide_box_box(a_pos, ha, b_pos, hb)
        }
        (Sphere { radius }, Box { half_extents }) => {
            collide_sphere_box(a_pos, radius, b_pos, half_extents)
        }
        (Box { half_extents }, Sphere { radius }) => {
            collide_sphere_box(b_pos, radius, a_pos, half_extents).map(|(n, p)| (-n, p))
        }
        (
            Capsule {
                radius: ra,
                half_height: ha,
            },
            Capsule {
                radius: rb,
                half_height: hb,
            },
        ) => collide_capsule_capsule(a_pos, ha, ra, b_pos, hb, rb),
        (
            Capsule {
                radius,
                half_height,
            },
            Sphere { radius: rs },
        ) => collide_capsule_sphere(a_pos, half_height, radius, b_pos, rs),
        (
            Sphere { radius: rs },
            Capsule {
                radius,
                half_height,
            },
        ) => collide_capsule_sphere(b_pos, half_height, radius, a_pos, rs).map(|(n, p)| (-n, p)),
        (
            Capsule {
                radius,
                half_height,
            },
            Box { half_extents },
        ) => collide_capsule_box(a_pos, half_height, radius, b_pos, half_extents),
        (
            Box { half_extents },
            Capsule {
                radius,
                half_height,
            },
        ) => collide_capsule_box(b_pos, half_height, radius, a_pos, half_extents)
            .map(|(n, p)| (-n, p)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normals_point_from_a_to_b() {
        let sphere = ProxyKind::Sphere { radius: 0.5 };
        let cube = ProxyKind::Box {
            half_extents: Vec3::splat(0.5),
        };
        let (n, p) = collide(sphere, Vec3::ZERO, cube, vec3(0.8, 0.0, 0.0)).unwrap();
        assert!((n - Vec3::X).length() < 1e-5);
        assert!((p - 0.2).abs() < 1e-5);
        let (n, _) = collide(cube, vec3(0.8, 0.0, 0.0), sphere, Vec3::ZERO).unwrap();
        assert!((n + Vec3::X).length() < 1e-5);
        assert!(collide(sphere, Vec3::ZERO, sphere, vec3(0.0, 2.0, 0.0)).is_none());
    }

    #[test]
    fn compound_children_are_offset_and_scaled() {
        let mut shapes = Pool::default();
        let ball = create(&mut shapes, &ShapeInfo::Sphere { radius: 1.0 }).unwrap();
        let compound = create(
            &mut shapes,
            &ShapeInfo::Compound {
                children: vec![CompoundPart {
                    shape: ball,
                    position: vec3(1.0, 0.0, 0.0),
                    rotation: Quat::IDENTITY,
                }],
            },
        )
        .unwrap();
        let mut proxies = Vec::new();
        build_proxies(&shapes, compound, Vec3::splat(2.0), Vec3::ZERO, &mut proxies, 0).unwrap();
        assert_eq!(proxies.len(), 1);
        assert_eq!(proxies[0].offset, vec3(2.0, 0.0, 0.0));
        assert_eq!(proxies[0].kind, ProxyKind::Sphere { radius: 2.0 });
        // the shared sphere is untouched
        assert!(matches!(
            shapes.get_ref(ball).unwrap().info(),
            ShapeInfo::Sphere { radius } if *radius == 1.0
        ));
    }

    #[test]
    fn empty_geometry_is_rejected() {
        let mut shapes = Pool::default();
        assert_eq!(
            create(&mut shapes, &ShapeInfo::ConvexHull { points: vec![] }).err(),
            Some(PhysicsError::InvalidGeometry)
        );
        assert_eq!(
            create(&mut shapes, &ShapeInfo::Sphere { radius: -1.0 }).err(),
            Some(PhysicsError::InvalidGeometry)
        );
    }
}
