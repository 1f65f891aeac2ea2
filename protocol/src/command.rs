use glam::{Quat, Vec3};

use crate::{
    BodyDescriptor, ConstraintDescriptor, ConstraintTuning, Identity, ReportBuffer,
    VehicleDescriptor, WheelDescriptor,
};

/// World-wide parameters delivered with [`Command::Init`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldSettings {
    pub gravity: Vec3,
    pub fixed_time_step: f32,
    /// Report buffers grow in multiples of this many items.
    pub report_chunk_size: usize,
    /// Largest report buffer, in scalars, the engine host may allocate.
    pub max_report_scalars: Option<usize>,
    pub soft_bodies: bool,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -10.0, 0.0),
            fixed_time_step: 1.0 / 60.0,
            report_chunk_size: 50,
            max_report_scalars: None,
            soft_bodies: true,
        }
    }
}

/// A host-side transform write that must win over the simulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformOverride {
    pub identity: Identity,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimulateRequest {
    pub time_step: f32,
    /// Defaults to `ceil(time_step / fixed_time_step)` when unset.
    pub max_sub_steps: Option<u32>,
    /// Applied before the engine advances.
    pub overrides: Vec<TransformOverride>,
}

/// Wire discriminator of every [`Command`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    Init = 0,
    CreateBody = 1,
    CreateVehicle = 2,
    AddWheel = 3,
    CreateConstraint = 4,
    RemoveBody = 5,
    RemoveVehicle = 6,
    RemoveConstraint = 7,
    UpdateTransform = 8,
    UpdateMass = 9,
    ApplyCentralImpulse = 10,
    ApplyImpulse = 11,
    ApplyTorque = 12,
    ApplyCentralForce = 13,
    ApplyForce = 14,
    SetLinearVelocity = 15,
    SetAngularVelocity = 16,
    SetLinearFactor = 17,
    SetAngularFactor = 18,
    SetDamping = 19,
    SetCcdThresholds = 20,
    SetVehicleSteering = 21,
    SetVehicleBrake = 22,
    ApplyVehicleEngineForce = 23,
    TuneConstraint = 24,
    AppendAnchor = 25,
    Simulate = 26,
    SetGravity = 27,
    SetFixedTimeStep = 28,
    ReturnBuffer = 29,
    Shutdown = 30,
}

impl CommandTag {
    pub fn from_u32(tag: u32) -> Option<Self> {
        use CommandTag::*;
        const ALL: [CommandTag; 31] = [
            Init,
            CreateBody,
            CreateVehicle,
            AddWheel,
            CreateConstraint,
            RemoveBody,
            RemoveVehicle,
            RemoveConstraint,
            UpdateTransform,
            UpdateMass,
            ApplyCentralImpulse,
            ApplyImpulse,
            ApplyTorque,
            ApplyCentralForce,
            ApplyForce,
            SetLinearVelocity,
            SetAngularVelocity,
            SetLinearFactor,
            SetAngularFactor,
            SetDamping,
            SetCcdThresholds,
            SetVehicleSteering,
            SetVehicleBrake,
            ApplyVehicleEngineForce,
            TuneConstraint,
            AppendAnchor,
            Simulate,
            SetGravity,
            SetFixedTimeStep,
            ReturnBuffer,
            Shutdown,
        ];
        ALL.get(tag as usize).copied()
    }
}

/// Host -> engine host.
///
/// Closed set, matched exhaustively by the engine host. [`Command::Unknown`]
/// stands for a tag from a newer peer and is skipped.
#[derive(Debug)]
pub enum Command {
    Init(WorldSettings),
    CreateBody {
        identity: Identity,
        descriptor: BodyDescriptor,
    },
    CreateVehicle {
        identity: Identity,
        descriptor: VehicleDescriptor,
    },
    AddWheel {
        vehicle: Identity,
        wheel: WheelDescriptor,
    },
    CreateConstraint {
        identity: Identity,
        descriptor: ConstraintDescriptor,
    },
    RemoveBody(Identity),
    RemoveVehicle(Identity),
    RemoveConstraint(Identity),
    UpdateTransform(TransformOverride),
    UpdateMass {
        identity: Identity,
        mass: f32,
    },
    ApplyCentralImpulse {
        identity: Identity,
        impulse: Vec3,
    },
    ApplyImpulse {
        identity: Identity,
        impulse: Vec3,
        point: Vec3,
    },
    ApplyTorque {
        identity: Identity,
        torque: Vec3,
    },
    ApplyCentralForce {
        identity: Identity,
        force: Vec3,
    },
    ApplyForce {
        identity: Identity,
        force: Vec3,
        point: Vec3,
    },
    SetLinearVelocity {
        identity: Identity,
        velocity: Vec3,
    },
    SetAngularVelocity {
        identity: Identity,
        velocity: Vec3,
    },
    SetLinearFactor {
        identity: Identity,
        factor: Vec3,
    },
    SetAngularFactor {
        identity: Identity,
        factor: Vec3,
    },
    SetDamping {
        identity: Identity,
        linear: f32,
        angular: f32,
    },
    SetCcdThresholds {
        identity: Identity,
        motion_threshold: f32,
        swept_sphere_radius: f32,
    },
    SetVehicleSteering {
        vehicle: Identity,
        wheel: u32,
        steering: f32,
    },
    SetVehicleBrake {
        vehicle: Identity,
        wheel: u32,
        brake: f32,
    },
    ApplyVehicleEngineForce {
        vehicle: Identity,
        wheel: u32,
        force: f32,
    },
    TuneConstraint {
        identity: Identity,
        tuning: ConstraintTuning,
    },
    AppendAnchor {
        soft_body: Identity,
        node: u32,
        body: Identity,
    },
    Simulate(SimulateRequest),
    SetGravity(Vec3),
    SetFixedTimeStep(f32),
    /// Hands a report buffer back for reuse.
    ReturnBuffer(ReportBuffer),
    Shutdown,
    Unknown {
        tag: u32,
    },
}

impl Command {
    pub fn tag(&self) -> Result<CommandTag, u32> {
        use Command::*;
        Ok(match self {
            Init(_) => CommandTag::Init,
            CreateBody { .. } => CommandTag::CreateBody,
            CreateVehicle { .. } => CommandTag::CreateVehicle,
            AddWheel { .. } => CommandTag::AddWheel,
            CreateConstraint { .. } => CommandTag::CreateConstraint,
            RemoveBody(_) => CommandTag::RemoveBody,
            RemoveVehicle(_) => CommandTag::RemoveVehicle,
            RemoveConstraint(_) => CommandTag::RemoveConstraint,
            UpdateTransform(_) => CommandTag::UpdateTransform,
            UpdateMass { .. } => CommandTag::UpdateMass,
            ApplyCentralImpulse { .. } => CommandTag::ApplyCentralImpulse,
            ApplyImpulse { .. } => CommandTag::ApplyImpulse,
            ApplyTorque { .. } => CommandTag::ApplyTorque,
            ApplyCentralForce { .. } => CommandTag::ApplyCentralForce,
            ApplyForce { .. } => CommandTag::ApplyForce,
            SetLinearVelocity { .. } => CommandTag::SetLinearVelocity,
            SetAngularVelocity { .. } => CommandTag::SetAngularVelocity,
            SetLinearFactor { .. } => CommandTag::SetLinearFactor,
            SetAngularFactor { .. } => CommandTag::SetAngularFactor,
            SetDamping { .. } => CommandTag::SetDamping,
            SetCcdThresholds { .. } => CommandTag::SetCcdThresholds,
            SetVehicleSteering { .. } => CommandTag::SetVehicleSteering,
            SetVehicleBrake { .. } => CommandTag::SetVehicleBrake,
            ApplyVehicleEngineForce { .. } => CommandTag::ApplyVehicleEngineForce,
            TuneConstraint { .. } => CommandTag::TuneConstraint,
            AppendAnchor { .. } => CommandTag::AppendAnchor,
            Simulate(_) => CommandTag::Simulate,
            SetGravity(_) => CommandTag::SetGravity,
            SetFixedTimeStep(_) => CommandTag::SetFixedTimeStep,
            ReturnBuffer(_) => CommandTag::ReturnBuffer,
            Shutdown => CommandTag::Shutdown,
            Unknown { tag } => return Err(*tag),
        })
    }

    /// The entity this command is about, if any.
    pub fn identity(&self) -> Option<Identity> {
        use Command::*;
        match self {
            CreateBody { identity, .. }
            | CreateVehicle { identity, .. }
            | CreateConstraint { identity, .. }
            | UpdateMass { identity, .. }
            | ApplyCentralImpulse { identity, .. }
            | ApplyImpulse { identity, .. }
            | ApplyTorque { identity, .. }
            | ApplyCentralForce { identity, .. }
            | ApplyForce { identity, .. }
            | SetLinearVelocity { identity, .. }
            | SetAngularVelocity { identity, .. }
            | SetLinearFactor { identity, .. }
            | SetAngularFactor { identity, .. }
            | SetDamping { identity, .. }
            | SetCcdThresholds { identity, .. }
            | TuneConstraint { identity, .. } => Some(*identity),
            AddWheel { vehicle, .. }
            | SetVehicleSteering { vehicle, .. }
            | SetVehicleBrake { vehicle, .. }
            | ApplyVehicleEngineForce { vehicle, .. } => Some(*vehicle),
            RemoveBody(identity) | RemoveVehicle(identity) | RemoveConstraint(identity) => {
                Some(*identity)
            }
            UpdateTransform(o) => Some(o.identity),
            AppendAnchor { soft_body, .. } => Some(*soft_body),
            Init(_)
            | Simulate(_)
            | SetGravity(_)
            | SetFixedTimeStep(_)
            | ReturnBuffer(_)
            | Shutdown
            | Unknown { .. } => None,
        }
    }

    /// Entities that must already be live on the engine host before this
    /// command can be delivered.
    ///
    /// Creation commands name their parents, not the entity being created.
    /// Removals name nothing: they are ordered after the creation anyway.
    pub fn prerequisites(&self) -> [Option<Identity>; 2] {
        use Command::*;
        match self {
            CreateBody { .. } => [None, None],
            CreateVehicle { descriptor, .. } => [Some(descriptor.chassis), None],
            CreateConstraint { descriptor, .. } => [Some(descriptor.body_a), descriptor.body_b],
            AppendAnchor {
                soft_body, body, ..
            } => [Some(*soft_body), Some(*body)],
            RemoveBody(_) | RemoveVehicle(_) | RemoveConstraint(_) => [None, None],
            other => [other.identity(), None],
        }
    }
}
