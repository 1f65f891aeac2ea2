//! Types shared by both sides of the physics bridge.
//!
//! The host and the engine host never share memory. Everything they agree
//! on lives here: the identity type, the closed set of commands flowing
//! host -> engine host, the messages flowing back, and the binary layout
//! of every report buffer.

mod command;
mod descriptor;
mod message;
pub mod report;
mod shape;

use std::fmt;
use std::num::NonZeroU32;

pub use command::{Command, CommandTag, SimulateRequest, TransformOverride, WorldSettings};
pub use descriptor::{
    BodyDescriptor, BodyKind, ConstraintDescriptor, ConstraintKind, ConstraintTuning,
    MaterialInfo, SoftBodyDescriptor, SoftGeometry, SoftTopology, Transform, VehicleDescriptor,
    VehicleTuning, WheelDescriptor,
};
pub use message::Message;
pub use report::{ReportBuffer, ReportError, ReportKind};
pub use shape::{CompoundChild, ShapeDescriptor, ShapeTag};

/// Name of one physics entity on both sides of the bridge.
///
/// Identities are handed out by the host from a counter starting at `1`.
/// The raw value `0` is reserved as "no entity", which is why the inner
/// value is a [`NonZeroU32`] and an absent entity is `Option<Identity>`.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(NonZeroU32);

impl Identity {
    /// Wrap a raw identity. Returns `None` for the reserved value `0`.
    pub const fn new(raw: u32) -> Option<Self> {
        match NonZeroU32::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Encode into a report slot. `None` encodes as `0`.
    pub fn to_bits(identity: Option<Identity>) -> u32 {
        identity.map_or(0, Identity::get)
    }

    /// Decode a report slot written by [`Identity::to_bits`].
    pub fn from_bits(bits: u32) -> Option<Identity> {
        Identity::new(bits)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_reserved() {
        assert!(Identity::new(0).is_none());
        assert_eq!(Identity::to_bits(None), 0);
        assert_eq!(Identity::from_bits(0), None);
    }

    #[test]
    fn bits_survive_large_values() {
        let id = Identity::new(u32::MAX - 3).unwrap();
        assert_eq!(Identity::from_bits(Identity::to_bits(Some(id))), Some(id));
        assert_eq!(id.to_string(), format!("#{}", u32::MAX - 3));
    }
}
