use crate::{Identity, ReportBuffer};

/// Engine host -> host.
#[derive(Debug)]
pub enum Message {
    /// The engine host constructed its physics backend.
    EngineLoaded,
    /// The world was configured by [`crate::Command::Init`]; bodies may be created.
    EngineReady,
    /// The entity exists on the engine host and may be referenced.
    ObjectReady(Identity),
    /// The entity could not be created and never will be. The identity is
    /// dead on both sides.
    ObjectFailed(Identity),
    /// One encoded report. Ownership of the storage moves to the host.
    Report(ReportBuffer),
    /// A step advanced the engine but its reports could not be produced.
    StepFailed { reason: String },
    Unknown { tag: u32 },
}
