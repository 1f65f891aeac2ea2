use glam::Vec3;
use meshi_physx_protocol::Identity;

/// Something the host learned while draining the engine host's messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    EngineReady,
    ObjectReady(Identity),
    /// The engine host refused to create the entity. It is gone, together
    /// with everything that depended on it.
    ObjectFailed(Identity),
    /// `body` started touching `other`. Each participant gets its own event.
    Collision {
        body: Identity,
        other: Identity,
        /// Velocity of `body` relative to `other`.
        relative_velocity: Vec3,
        /// Points from `body` toward `other`.
        normal: Vec3,
    },
    /// `body` stopped touching `other`.
    Separation { body: Identity, other: Identity },
    /// The world report of a step arrived; the next step may be requested.
    StepComplete,
    StepFailed { reason: String },
    VehicleUpdated(Identity),
    ConstraintUpdated(Identity),
    SoftBodyUpdated(Identity),
}
