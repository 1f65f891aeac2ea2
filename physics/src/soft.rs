use std::collections::HashSet;

use glam::*;

use crate::{Handle, PhysicsError, Pool, RigidBody};

#[derive(Debug, Clone, PartialEq)]
pub enum SoftBodyShape {
    Rope {
        start: Vec3,
        end: Vec3,
        segments: u32,
    },
    /// Corners in `[00, 10, 01, 11]` order.
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftTopology {
    Rope,
    Cloth,
    Volume,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftBodyInfo {
    pub shape: SoftBodyShape,
    /// Spread evenly over the nodes. Zero pins every node.
    pub mass: f32,
    pub stiffness: f32,
    pub iterations: u32,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SoftNode {
    pub position: Vec3,
    pub normal: Vec3,
    velocity: Vec3,
    inv_mass: f32,
}

#[derive(Debug, Clone, Copy)]
struct Link {
    a: usize,
    b: usize,
    rest: f32,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    node: usize,
    body: Handle<RigidBody>,
    local: Vec3,
}

/// Position-based node/link body.
#[derive(Debug)]
pub struct SoftBody {
    topology: SoftTopology,
    nodes: Vec<SoftNode>,
    links: Vec<Link>,
    faces: Vec<[usize; 3]>,
    anchors: Vec<Anchor>,
    stiffness: f32,
    iterations: u32,
}

impl SoftBody {
    pub(crate) fn new(info: &SoftBodyInfo) -> Result<Self, PhysicsError> {
        let place = |p: Vec3| info.position + info.rotation * (p * info.scale);
        let mut positions = Vec::new();
        let mut links = Vec::new();
        let mut faces = Vec::new();

        let topology = match &info.shape {
            SoftBodyShape::Rope {
                start,
                end,
                segments,
            } => {
                if *segments == 0 {
                    return Err(PhysicsError::InvalidGeometry);
                }
                for i in 0..=*segments {
                    positions.push(place(start.lerp(*end, i as f32 / *segments as f32)));
                }
                links.extend((0..*segments as usize).map(|i| (i, i + 1)));
                SoftTopology::Rope
            }
            SoftBodyShape::Cloth {
                corners,
                segments_x,
                segments_y,
            } => {
                if *segments_x == 0 || *segments_y == 0 {
                    return Err(PhysicsError::InvalidGeometry);
                }
                let (sx, sy) = (*segments_x as usize, *segments_y as usize);
                let index = |i: usize, j: usize| j * (sx + 1) + i;
                for j in 0..=sy {
                    let v = j as f32 / sy as f32;
                    for i in 0..=sx {
                        let u = i as f32 / sx as f32;
                        let near = corners[0].lerp(corners[1], u);
                        let far = corners[2].lerp(corners[3], u);
                        positions.push(place(near.lerp(far, v)));
                    }
                }
                for j in 0..=sy {
                    for i in 0..=sx {
                        if i < sx {
                            links.push((index(i, j), index(i + 1, j)));
                        }
                        if j < sy {
                            links.push((index(i, j), index(i, j + 1)));
                        }
                        if i < sx && j < sy {
                            links.push((index(i, j), index(i + 1, j + 1)));
                            links.push((index(i + 1, j), index(i, j + 1)));
                            faces.push([index(i, j), index(i + 1, j), index(i + 1, j + 1)]);
                            faces.push([index(i, j), index(i + 1, j + 1), index(i, j + 1)]);
                        }
                    }
                }
                SoftTopology::Cloth
            }
            SoftBodyShape::Volume { vertices, indices } => {
                if vertices.is_empty() || indices.is_empty() {
                    return Err(PhysicsError::InvalidGeometry);
                }
                let mut seen = HashSet::new();
                for tri in indices {
                    let tri = tri.map(|i| i as usize);
                    if tri.iter().any(|i| *i >= vertices.len()) {
                        return Err(PhysicsError::InvalidGeometry);
                    }
                    for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
                        if seen.insert((a.min(b), a.max(b))) {
                            links.push((a, b));
                        }
                    }
                    faces.push(tri);
                }
                positions.extend(vertices.iter().map(|v| place(*v)));
                SoftTopology::Volume
            }
        };

        let inv_mass = if info.mass > 0.0 && info.mass.is_finite() {
            positions.len() as f32 / info.mass
        } else {
            0.0
        };
        let nodes: Vec<SoftNode> = positions
            .into_iter()
            .map(|position| SoftNode {
                position,
                normal: Vec3::ZERO,
                velocity: Vec3::ZERO,
                inv_mass,
            })
            .collect();
        let links = links
            .into_iter()
            .map(|(a, b)| Link {
                a,
                b,
                rest: nodes[a].position.distance(nodes[b].position),
            })
            .collect();

        let mut body = Self {
            topology,
            nodes,
            links,
            faces,
            anchors: Vec::new(),
            stiffness: info.stiffness.clamp(0.0, 1.0),
            iterations: info.iterations.max(1),
        };
        body.update_normals();
        Ok(body)
    }

    pub fn topology(&self) -> SoftTopology {
        self.topology
    }

    pub fn nodes(&self) -> &[SoftNode] {
        &self.nodes
    }

    pub fn faces(&self) -> &[[usize; 3]] {
        &self.faces
    }

    /// Pin `node` to `body` at their current relative placement.
    pub(crate) fn append_anchor(
        &mut self,
        node: u32,
        handle: Handle<RigidBody>,
        body: &RigidBody,
    ) -> Result<(), PhysicsError> {
        let node = node as usize;
        let position = self
            .nodes
            .get(node)
            .ok_or(PhysicsError::InvalidNode)?
            .position;
        let local = body.rotation.inverse() * (position - body.position);
        self.anchors.push(Anchor {
            node,
            body: handle,
            local,
        });
        Ok(())
    }

    pub(crate) fn step(&mut self, bodies: &Pool<RigidBody>, gravity: Vec3, dt: f32) {
        if self.nodes.is_empty() || dt <= 0.0 {
            return;
        }
        let mut weights: Vec<f32> = self.nodes.iter().map(|n| n.inv_mass).collect();
        let mut predicted: Vec<Vec3> = self
            .nodes
            .iter_mut()
            .map(|n| {
                if n.inv_mass > 0.0 {
                    n.velocity += gravity * dt;
                    n.position + n.velocity * dt
                } else {
                    n.position
                }
            })
            .collect();
        for anchor in &self.anchors {
            if let Some(body) = bodies.get_ref(anchor.body) {
                predicted[anchor.node] = body.position + body.rotation * anchor.local;
                weights[anchor.node] = 0.0;
            }
        }

        for _ in 0..self.iterations {
            for link in &self.links {
                let delta = predicted[link.b] - predicted[link.a];
                let len = delta.length();
                let w = weights[link.a] + weights[link.b];
                if len <= f32::EPSILON || w <= 0.0 {
                    continue;
                }
                let correction = delta * ((len - link.rest) / len * self.stiffness / w);
                predicted[link.a] += correction * weights[link.a];
                predicted[link.b] -= correction * weights[link.b];
            }
        }

        for (node, p) in self.nodes.iter_mut().zip(predicted) {
            node.velocity = (p - node.position) / dt;
            node.position = p;
        }
        self.update_normals();
    }

    fn update_normals(&mut self) {
        for node in &mut self.nodes {
            node.normal = Vec3::ZERO;
        }
        for [a, b, c] in &self.faces {
            let (pa, pb, pc) = (
                self.nodes[*a].position,
                self.nodes[*b].position,
                self.nodes[*c].position,
            );
            let n = (pb - pa).cross(pc - pa);
            for i in [*a, *b, *c] {
                self.nodes[i].normal += n;
            }
        }
        for node in &mut self.nodes {
            node.normal = node.normal.normalize_or_zero();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(shape: SoftBodyShape) -> SoftBodyInfo {
        SoftBodyInfo {
            shape,
            mass: 1.0,
            stiffness: 1.0,
            iterations: 10,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }

    #[test]
    fn cloth_grid_has_expected_nodes_and_faces() {
        let body = SoftBody::new(&info(SoftBodyShape::Cloth {
            corners: [
                vec3(0.0, 0.0, 0.0),
                vec3(1.0, 0.0, 0.0),
                vec3(0.0, 0.0, 1.0),
                vec3(1.0, 0.0, 1.0),
            ],
            segments_x: 2,
            segments_y: 3,
        }))
        .unwrap();
        assert_eq!(body.nodes().len(), 3 * 4);
        assert_eq!(body.faces().len(), 2 * 2 * 3);
        assert!(body.nodes().iter().all(|n| n.normal.y.abs() > 0.99));
    }

    #[test]
    fn rope_with_no_segments_is_rejected() {
        let err = SoftBody::new(&info(SoftBodyShape::Rope {
            start: Vec3::ZERO,
            end: Vec3::X,
            segments: 0,
        }))
        .unwrap_err();
        assert_eq!(err, PhysicsError::InvalidGeometry);
    }

    #[test]
    fn volume_indices_are_checked() {
        let err = SoftBody::new(&info(SoftBodyShape::Volume {
            vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            indices: vec![[0, 1, 7]],
        }))
        .unwrap_err();
        assert_eq!(err, PhysicsError::InvalidGeometry);
    }

    #[test]
    fn free_rope_falls() {
        let mut body = SoftBody::new(&info(SoftBodyShape::Rope {
            start: vec3(0.0, 5.0, 0.0),
            end: vec3(2.0, 5.0, 0.0),
            segments: 4,
        }))
        .unwrap();
        let bodies = Pool::default();
        for _ in 0..10 {
            body.step(&bodies, vec3(0.0, -10.0, 0.0), 1.0 / 60.0);
        }
        assert!(body.nodes().iter().all(|n| n.position.y < 5.0));
    }
}
