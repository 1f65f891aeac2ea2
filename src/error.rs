use meshi_physics::PhysicsError;
use meshi_physx_protocol::{Identity, ReportError, ReportKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The identity was never registered on this side or is already gone.
    #[error("entity {0} does not exist")]
    NotFound(Identity),
    #[error("malformed shape: {0}")]
    MalformedShape(String),
    #[error("{kind:?} report needs {requested} scalars and cannot grow that far")]
    CapacityExhausted { kind: ReportKind, requested: usize },
    /// A report claims more items than its buffer holds. `kind` is the raw
    /// tag found in the header.
    #[error("report tag {kind} claims {count} items beyond its {capacity} scalars")]
    ProtocolDesync {
        kind: u32,
        count: usize,
        capacity: usize,
    },
    #[error("identity counter exhausted")]
    IdentitiesExhausted,
    #[error("the other side of the bridge hung up")]
    Disconnected,
    #[error("physics engine rejected the request: {0}")]
    Physics(#[from] PhysicsError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<ReportError> for BridgeError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::CapacityExhausted {
                kind, requested, ..
            }
            | ReportError::Allocation { kind, requested } => {
                BridgeError::CapacityExhausted { kind, requested }
            }
            ReportError::Desync {
                tag,
                count,
                capacity,
            } => BridgeError::ProtocolDesync {
                kind: tag,
                count,
                capacity,
            },
            ReportError::UnknownKind(tag) | ReportError::KindMismatch { found: tag, .. } => {
                BridgeError::ProtocolDesync {
                    kind: tag,
                    count: 0,
                    capacity: 0,
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
