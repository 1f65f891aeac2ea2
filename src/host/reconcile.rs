//! Which side owns a body's transform this tick.
//!
//! A host write marks the component dirty. While dirty, reports for the
//! body leave that component alone; the next step carries the host's value
//! to the engine host as an override and clears the flag.

use bitflags::bitflags;
use glam::{Quat, Vec3};
use meshi_physx_protocol::report::WorldRecord;
use meshi_physx_protocol::{Identity, TransformOverride};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyFlags: u8 {
        const POSITION = 1 << 0;
        const ROTATION = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    pub position: Vec3,
    pub rotation: Quat,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    dirty: DirtyFlags,
}

impl BodyState {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            dirty: DirtyFlags::empty(),
        }
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty |= DirtyFlags::POSITION;
    }

    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
        self.dirty |= DirtyFlags::ROTATION;
    }

    /// Apply a world record. Dirty components keep the host's value.
    /// Returns the components that were kept.
    pub fn reconcile(&mut self, record: &WorldRecord) -> DirtyFlags {
        if !self.dirty.contains(DirtyFlags::POSITION) {
            self.position = Vec3::from_array(record.position);
        }
        if !self.dirty.contains(DirtyFlags::ROTATION) {
            self.rotation = Quat::from_array(record.rotation);
        }
        self.linear_velocity = Vec3::from_array(record.linear_velocity);
        self.angular_velocity = Vec3::from_array(record.angular_velocity);
        self.dirty
    }

    /// The override the next step must carry, clearing the flags.
    pub fn take_override(&mut self, identity: Identity) -> Option<TransformOverride> {
        if self.dirty.is_empty() {
            return None;
        }
        let o = TransformOverride {
            identity,
            position: self
                .dirty
                .contains(DirtyFlags::POSITION)
                .then_some(self.position),
            rotation: self
                .dirty
                .contains(DirtyFlags::ROTATION)
                .then_some(self.rotation),
        };
        self.dirty = DirtyFlags::empty();
        Some(o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: [f32; 3]) -> WorldRecord {
        WorldRecord {
            identity: 1,
            position,
            rotation: [0.0, 0.0, 0.0, 1.0],
            linear_velocity: [0.0, -1.0, 0.0],
            angular_velocity: [0.0; 3],
        }
    }

    #[test]
    fn clean_bodies_follow_the_report() {
        let mut state = BodyState::new(Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(state.reconcile(&record([1.0, 2.0, 3.0])), DirtyFlags::empty());
        assert_eq!(state.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(state.linear_velocity, Vec3::NEG_Y);
        assert!(state.take_override(Identity::new(1).unwrap()).is_none());
    }

    #[test]
    fn host_writes_win_until_the_next_step() {
        let id = Identity::new(1).unwrap();
        let mut state = BodyState::new(Vec3::ZERO, Quat::IDENTITY);
        state.set_position(Vec3::new(0.0, 50.0, 0.0));

        let kept = state.reconcile(&record([1.0, 2.0, 3.0]));
        assert_eq!(kept, DirtyFlags::POSITION);
        assert_eq!(state.position, Vec3::new(0.0, 50.0, 0.0));
        // velocity is never host-owned
        assert_eq!(state.linear_velocity, Vec3::NEG_Y);

        let o = state.take_override(id).unwrap();
        assert_eq!(o.position, Some(Vec3::new(0.0, 50.0, 0.0)));
        assert_eq!(o.rotation, None);
        assert!(state.dirty().is_empty());

        state.reconcile(&record([0.0, 49.0, 0.0]));
        assert_eq!(state.position, Vec3::new(0.0, 49.0, 0.0));
    }

    #[test]
    fn rotation_is_tracked_independently() {
        let id = Identity::new(4).unwrap();
        let mut state = BodyState::new(Vec3::ZERO, Quat::IDENTITY);
        let turned = Quat::from_rotation_y(1.0);
        state.set_rotation(turned);
        state.reconcile(&record([5.0, 0.0, 0.0]));
        assert_eq!(state.position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(state.rotation, turned);
        let o = state.take_override(id).unwrap();
        assert_eq!((o.position, o.rotation), (None, Some(turned)));
    }
}
