use glam::{Quat, Vec3};
use meshi_physx_protocol::report::SoftBodyView;
use meshi_physx_protocol::{Identity, SoftTopology};

use super::reconcile::BodyState;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Creation was sent; the engine host has not acknowledged it yet.
    Pending,
    Live,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelState {
    pub position: Vec3,
    pub rotation: Quat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VehicleState {
    pub chassis: Identity,
    pub wheels: Vec<WheelState>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstraintState {
    pub body_a: Identity,
    pub body_b: Option<Identity>,
    /// World-space pivot on `body_a` as of the last report.
    pub offset: Vec3,
    pub applied_impulse: f32,
}

/// Latest node data of a soft body. Volumes report per triangle corner, so
/// they hold three entries per face.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftBodyState {
    pub topology: SoftTopology,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
}

impl SoftBodyState {
    pub fn new(topology: SoftTopology) -> Self {
        Self {
            topology,
            positions: Vec::new(),
            normals: Vec::new(),
        }
    }

    pub(crate) fn apply(&mut self, view: &SoftBodyView<'_>) -> Result<()> {
        self.topology = view.topology;
        self.positions.clear();
        self.normals.clear();
        match view.topology {
            SoftTopology::Rope => {
                let nodes: &[Vec3] = cast(view)?;
                self.positions.extend_from_slice(nodes);
            }
            SoftTopology::Cloth | SoftTopology::Volume => {
                let vertices: &[[Vec3; 2]] = cast(view)?;
                for [position, normal] in vertices {
                    self.positions.push(*position);
                    self.normals.push(*normal);
                }
            }
        }
        Ok(())
    }
}

fn cast<'a, T: bytemuck::Pod>(view: &SoftBodyView<'a>) -> Result<&'a [T]> {
    bytemuck::try_cast_slice(view.data).map_err(|_| BridgeError::ProtocolDesync {
        kind: meshi_physx_protocol::ReportKind::SoftBody.tag(),
        count: view.elements,
        capacity: view.data.len(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    RigidBody(BodyState),
    SoftBody(SoftBodyState),
    Vehicle(VehicleState),
    Constraint(ConstraintState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub lifecycle: Lifecycle,
    pub kind: EntityKind,
}

impl Entity {
    pub fn pending(kind: EntityKind) -> Self {
        Self {
            lifecycle: Lifecycle::Pending,
            kind,
        }
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle == Lifecycle::Live
    }

    pub fn body(&self) -> Option<&BodyState> {
        match &self.kind {
            EntityKind::RigidBody(state) => Some(state),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut BodyState> {
        match &mut self.kind {
            EntityKind::RigidBody(state) => Some(state),
            _ => None,
        }
    }

    pub fn is_body(&self) -> bool {
        matches!(
            self.kind,
            EntityKind::RigidBody(_) | EntityKind::SoftBody(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloth_data_splits_into_positions_and_normals() {
        let data = [
            0.0, 0.0, 0.0, 0.0, 1.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0,
        ];
        let view = SoftBodyView {
            identity: Identity::new(3),
            topology: SoftTopology::Cloth,
            elements: 2,
            data: &data,
        };
        let mut state = SoftBodyState::new(SoftTopology::Rope);
        state.apply(&view).unwrap();
        assert_eq!(state.topology, SoftTopology::Cloth);
        assert_eq!(state.positions, vec![Vec3::ZERO, Vec3::X]);
        assert_eq!(state.normals, vec![Vec3::Y, Vec3::Y]);
    }
}
