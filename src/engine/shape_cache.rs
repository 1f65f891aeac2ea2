use std::collections::HashMap;

use meshi_physics::{CompoundPart, Handle, PhysicsSimulation, Shape, ShapeInfo};
use meshi_physx_protocol::ShapeDescriptor;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// A body's claim on a native shape. Hand it back through
/// [`ShapeCache::release`] when the body goes away.
#[derive(Debug)]
pub enum ShapeRef {
    Cached {
        key: String,
        handle: Handle<Shape>,
    },
    /// Built for one body only. Compound children are claims of their own.
    Unique {
        handle: Handle<Shape>,
        children: Vec<ShapeRef>,
    },
}

impl ShapeRef {
    pub fn handle(&self) -> Handle<Shape> {
        match self {
            ShapeRef::Cached { handle, .. } | ShapeRef::Unique { handle, .. } => *handle,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    handle: Handle<Shape>,
    refs: usize,
}

/// Shares native shapes between bodies with identical scalar primitives.
///
/// Cached shapes stay alive at zero references so a later body with the
/// same key reuses them; unique shapes are released with their body.
#[derive(Debug, Default)]
pub struct ShapeCache {
    entries: HashMap<String, CacheEntry>,
}

impl ShapeCache {
    pub fn get_or_create(
        &mut self,
        sim: &mut PhysicsSimulation,
        desc: &ShapeDescriptor,
    ) -> Result<ShapeRef> {
        if let Some(defect) = desc.defect() {
            return Err(BridgeError::MalformedShape(defect));
        }

        if let Some(key) = desc.cache_key() {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.refs += 1;
                debug!("shape cache hit for {} ({} refs)", key, entry.refs);
                return Ok(ShapeRef::Cached {
                    key,
                    handle: entry.handle,
                });
            }
            let handle = create_native(sim, native_info(desc)?)?;
            debug!("shape cache miss for {}", key);
            self.entries.insert(key.clone(), CacheEntry { handle, refs: 1 });
            return Ok(ShapeRef::Cached { key, handle });
        }

        match desc {
            ShapeDescriptor::Compound { children } => {
                let mut claims = Vec::with_capacity(children.len());
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    match self.get_or_create(sim, &child.shape) {
                        Ok(claim) => {
                            parts.push(CompoundPart {
                                shape: claim.handle(),
                                position: child.position,
                                rotation: child.rotation,
                            });
                            claims.push(claim);
                        }
                        Err(err) => {
                            self.release_all(sim, claims);
                            return Err(err);
                        }
                    }
                }
                match create_native(sim, ShapeInfo::Compound { children: parts }) {
                    Ok(handle) => Ok(ShapeRef::Unique {
                        handle,
                        children: claims,
                    }),
                    Err(err) => {
                        self.release_all(sim, claims);
                        Err(err)
                    }
                }
            }
            other => Ok(ShapeRef::Unique {
                handle: create_native(sim, native_info(other)?)?,
                children: Vec::new(),
            }),
        }
    }

    pub fn release(&mut self, sim: &mut PhysicsSimulation, claim: ShapeRef) {
        match claim {
            ShapeRef::Cached { key, .. } => {
                if let Some(entry) = self.entries.get_mut(&key) {
                    entry.refs = entry.refs.saturating_sub(1);
                }
            }
            ShapeRef::Unique { handle, children } => {
                sim.release_shape(handle);
                self.release_all(sim, children);
            }
        }
    }

    fn release_all(&mut self, sim: &mut PhysicsSimulation, claims: Vec<ShapeRef>) {
        for claim in claims {
            self.release(sim, claim);
        }
    }

    /// Live references to the cached shape under `key`.
    pub fn refs(&self, key: &str) -> Option<usize> {
        self.entries.get(key).map(|e| e.refs)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn create_native(sim: &mut PhysicsSimulation, info: ShapeInfo) -> Result<Handle<Shape>> {
    sim.create_shape(&info)
        .map_err(|err| BridgeError::MalformedShape(err.to_string()))
}

/// Native parameters of a non-compound descriptor.
fn native_info(desc: &ShapeDescriptor) -> Result<ShapeInfo> {
    Ok(match desc {
        ShapeDescriptor::Box { half_extents } => ShapeInfo::Box {
            half_extents: *half_extents,
        },
        ShapeDescriptor::Sphere { radius } => ShapeInfo::Sphere { radius: *radius },
        ShapeDescriptor::Cylinder { half_extents } => ShapeInfo::Cylinder {
            half_extents: *half_extents,
        },
        ShapeDescriptor::Capsule { radius, height } => ShapeInfo::Capsule {
            radius: *radius,
            half_height: height * 0.5,
        },
        ShapeDescriptor::Cone { radius, height } => ShapeInfo::Cone {
            radius: *radius,
            height: *height,
        },
        ShapeDescriptor::ConvexHull { points } => ShapeInfo::ConvexHull {
            points: points.clone(),
        },
        ShapeDescriptor::TriangleMesh { triangles } => ShapeInfo::TriangleMesh {
            triangles: triangles.clone(),
        },
        ShapeDescriptor::HeightField {
            columns,
            rows,
            heights,
            scale,
        } => ShapeInfo::HeightField {
            columns: *columns,
            rows: *rows,
            heights: heights.clone(),
            scale: *scale,
        },
        ShapeDescriptor::Compound { .. } => {
            return Err(BridgeError::MalformedShape(
                "compound shapes are assembled from their children".to_string(),
            ))
        }
        ShapeDescriptor::Unknown { tag } => {
            return Err(BridgeError::MalformedShape(format!(
                "unrecognized shape tag {}",
                tag
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};
    use meshi_physics::SimulationInfo;
    use meshi_physx_protocol::CompoundChild;

    fn sim() -> PhysicsSimulation {
        PhysicsSimulation::new(&SimulationInfo::default())
    }

    fn child(shape: ShapeDescriptor) -> CompoundChild {
        CompoundChild {
            shape,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    #[test]
    fn identical_primitives_share_one_shape() {
        let mut sim = sim();
        let mut cache = ShapeCache::default();
        let sphere = ShapeDescriptor::Sphere { radius: 1.0 };
        let a = cache.get_or_create(&mut sim, &sphere).unwrap();
        let b = cache.get_or_create(&mut sim, &sphere).unwrap();
        assert_eq!(a.handle().slot, b.handle().slot);
        assert_eq!(sim.shape_count(), 1);
        assert_eq!(cache.refs("sphere_1"), Some(2));

        cache.release(&mut sim, a);
        cache.release(&mut sim, b);
        assert_eq!(cache.refs("sphere_1"), Some(0));
        assert_eq!(sim.shape_count(), 1);
    }

    #[test]
    fn compound_children_go_through_the_cache() {
        let mut sim = sim();
        let mut cache = ShapeCache::default();
        let compound = ShapeDescriptor::Compound {
            children: vec![
                child(ShapeDescriptor::Box {
                    half_extents: Vec3::ONE,
                }),
                child(ShapeDescriptor::Box {
                    half_extents: Vec3::ONE,
                }),
            ],
        };
        let first = cache.get_or_create(&mut sim, &compound).unwrap();
        let second = cache.get_or_create(&mut sim, &compound).unwrap();
        // one shared box plus two compound containers
        assert_eq!(sim.shape_count(), 3);
        assert_ne!(first.handle().slot, second.handle().slot);
        assert_eq!(cache.refs("box_1_1_1"), Some(4));

        cache.release(&mut sim, first);
        assert_eq!(sim.shape_count(), 2);
        assert_eq!(cache.refs("box_1_1_1"), Some(2));
    }

    #[test]
    fn malformed_child_rolls_back_siblings() {
        let mut sim = sim();
        let mut cache = ShapeCache::default();
        let broken = ShapeDescriptor::Compound {
            children: vec![
                child(ShapeDescriptor::Sphere { radius: 2.0 }),
                child(ShapeDescriptor::Sphere { radius: -1.0 }),
            ],
        };
        let err = cache.get_or_create(&mut sim, &broken).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedShape(_)));
        assert_eq!(cache.refs("sphere_2"), Some(0));
        assert_eq!(sim.shape_count(), 1);

        let empty_hull = ShapeDescriptor::Compound {
            children: vec![child(ShapeDescriptor::ConvexHull { points: vec![] })],
        };
        assert!(matches!(
            cache.get_or_create(&mut sim, &empty_hull),
            Err(BridgeError::MalformedShape(_))
        ));
        assert_eq!(sim.shape_count(), 1);

        let unknown = ShapeDescriptor::Unknown { tag: 42 };
        assert!(matches!(
            cache.get_or_create(&mut sim, &unknown),
            Err(BridgeError::MalformedShape(_))
        ));
    }

    #[test]
    fn native_rejections_become_malformed_shapes() {
        let mut sim = sim();
        let mut cache = ShapeCache::default();
        let flat = ShapeDescriptor::Box {
            half_extents: Vec3::new(1.0, 0.0, 1.0),
        };
        assert!(matches!(
            cache.get_or_create(&mut sim, &flat),
            Err(BridgeError::MalformedShape(_))
        ));
        assert!(cache.is_empty());
    }
}
