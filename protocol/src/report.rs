//! Binary report buffers.
//!
//! Every report is one contiguous `f32` buffer:
//!
//! ```text
//! [kind_tag, item_count, item 0 ..., item 1 ..., ... unused capacity ...]
//! ```
//!
//! The two header slots and every identity slot hold raw `u32` bit patterns
//! rather than numeric floats, so identities above 2^24 stay exact. The
//! buffer length is its *capacity*; `item_count` is its *occupancy*.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::{Identity, SoftTopology};

/// Scalars taken by `[kind_tag, item_count]`.
pub const HEADER_LEN: usize = 2;

/// Scalars in front of every soft-body record: identity, topology, element count.
pub const SOFT_RECORD_HEADER_LEN: usize = 3;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportKind {
    World = 0,
    Collision = 1,
    Vehicle = 2,
    Constraint = 3,
    SoftBody = 4,
}

impl ReportKind {
    pub const ALL: [ReportKind; 5] = [
        ReportKind::World,
        ReportKind::Collision,
        ReportKind::Vehicle,
        ReportKind::Constraint,
        ReportKind::SoftBody,
    ];

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    pub const fn tag(self) -> u32 {
        self as u32
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Fixed scalars per item. Soft-body items vary with topology.
    pub const fn stride(self) -> Option<usize> {
        match self {
            ReportKind::World => Some(14),
            ReportKind::Collision => Some(5),
            ReportKind::Vehicle => Some(9),
            ReportKind::Constraint => Some(6),
            ReportKind::SoftBody => None,
        }
    }

    /// Scalars per chunk item when growing a buffer of this kind.
    pub const fn growth_stride(self) -> usize {
        match self.stride() {
            Some(stride) => stride,
            None => SoftTopology::Rope.scalars_per_element(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("{kind:?} report needs {requested} scalars but the limit is {limit}")]
    CapacityExhausted {
        kind: ReportKind,
        requested: usize,
        limit: usize,
    },
    #[error("could not allocate {requested} scalars for the {kind:?} report")]
    Allocation { kind: ReportKind, requested: usize },
    #[error("report tag {tag} claims {count} items beyond its {capacity} allocated scalars")]
    Desync {
        tag: u32,
        count: usize,
        capacity: usize,
    },
    #[error("report tag {0} is not a known report kind")]
    UnknownKind(u32),
    #[error("expected a {expected:?} report, found tag {found}")]
    KindMismatch { expected: ReportKind, found: u32 },
}

/// A fixed-stride item type that can be viewed directly inside a buffer.
pub trait Record: Pod {
    const KIND: ReportKind;
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct WorldRecord {
    pub identity: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub linear_velocity: [f32; 3],
    pub angular_velocity: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CollisionRecord {
    pub body_a: u32,
    pub body_b: u32,
    /// Points from `body_a` toward `body_b`.
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct VehicleRecord {
    pub vehicle: u32,
    pub wheel: u32,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ConstraintRecord {
    pub constraint: u32,
    pub body: u32,
    /// World-space pivot on `body`.
    pub offset: [f32; 3],
    pub applied_impulse: f32,
}

impl Record for WorldRecord {
    const KIND: ReportKind = ReportKind::World;
}
impl Record for CollisionRecord {
    const KIND: ReportKind = ReportKind::Collision;
}
impl Record for VehicleRecord {
    const KIND: ReportKind = ReportKind::Vehicle;
}
impl Record for ConstraintRecord {
    const KIND: ReportKind = ReportKind::Constraint;
}

const SCALAR: usize = std::mem::size_of::<f32>();
const _: () = assert!(std::mem::size_of::<WorldRecord>() == 14 * SCALAR);
const _: () = assert!(std::mem::size_of::<CollisionRecord>() == 5 * SCALAR);
const _: () = assert!(std::mem::size_of::<VehicleRecord>() == 9 * SCALAR);
const _: () = assert!(std::mem::size_of::<ConstraintRecord>() == 6 * SCALAR);

/// Capacity, header included, that fits `payload` scalars when growing in
/// steps of `chunk` scalars.
pub fn grown_capacity(payload: usize, chunk: usize) -> usize {
    let chunk = chunk.max(1);
    HEADER_LEN + payload.div_ceil(chunk) * chunk
}

/// Scalars one soft-body record takes.
pub fn soft_record_len(topology: SoftTopology, elements: usize) -> usize {
    SOFT_RECORD_HEADER_LEN + elements * topology.scalars_per_element()
}

/// Write one soft-body record into `out`, which must be exactly
/// [`soft_record_len`] long.
pub fn encode_soft_record(
    out: &mut [f32],
    identity: Identity,
    topology: SoftTopology,
    data: &[f32],
) {
    let elements = data.len() / topology.scalars_per_element();
    out[0] = f32::from_bits(identity.get());
    out[1] = f32::from_bits(topology as u32);
    out[2] = f32::from_bits(elements as u32);
    out[SOFT_RECORD_HEADER_LEN..].copy_from_slice(data);
}

/// One decoded soft-body record.
#[derive(Debug, Clone, Copy)]
pub struct SoftBodyView<'a> {
    pub identity: Option<Identity>,
    pub topology: SoftTopology,
    pub elements: usize,
    pub data: &'a [f32],
}

pub struct SoftBodyRecords<'a> {
    payload: &'a [f32],
    cursor: usize,
    remaining: usize,
    tag: u32,
    capacity: usize,
}

impl<'a> Iterator for SoftBodyRecords<'a> {
    type Item = Result<SoftBodyView<'a>, ReportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let desync = ReportError::Desync {
            tag: self.tag,
            count: self.remaining + 1,
            capacity: self.capacity,
        };
        let Some(head) = self
            .payload
            .get(self.cursor..self.cursor + SOFT_RECORD_HEADER_LEN)
        else {
            self.remaining = 0;
            return Some(Err(desync));
        };
        let identity = Identity::from_bits(head[0].to_bits());
        let Some(topology) = SoftTopology::from_u32(head[1].to_bits()) else {
            self.remaining = 0;
            return Some(Err(desync));
        };
        let elements = head[2].to_bits() as usize;
        let start = self.cursor + SOFT_RECORD_HEADER_LEN;
        let end = start + elements * topology.scalars_per_element();
        let Some(data) = self.payload.get(start..end) else {
            self.remaining = 0;
            return Some(Err(desync));
        };
        self.cursor = end;
        Some(Ok(SoftBodyView {
            identity,
            topology,
            elements,
            data,
        }))
    }
}

/// Move-only report storage.
///
/// There is deliberately no `Clone`: sending a buffer moves its heap storage
/// to the receiver, and the sender cannot touch it again until it is handed
/// back.
#[derive(Debug)]
pub struct ReportBuffer {
    data: Vec<f32>,
}

impl ReportBuffer {
    /// A header-only buffer with no item capacity.
    pub fn new(kind: ReportKind) -> Self {
        let mut buffer = Self {
            data: vec![0.0; HEADER_LEN],
        };
        buffer.stamp(kind);
        buffer
    }

    /// Adopt raw storage received from a transport. Storage shorter than
    /// the header is padded so the header is always readable.
    pub fn from_raw(mut data: Vec<f32>) -> Self {
        if data.len() < HEADER_LEN {
            data.resize(HEADER_LEN, 0.0);
        }
        Self { data }
    }

    pub fn into_raw(self) -> Vec<f32> {
        self.data
    }

    pub fn kind_tag(&self) -> u32 {
        self.data[0].to_bits()
    }

    pub fn kind(&self) -> Option<ReportKind> {
        ReportKind::from_tag(self.kind_tag())
    }

    pub fn item_count(&self) -> usize {
        self.data[1].to_bits() as usize
    }

    pub fn set_item_count(&mut self, count: usize) {
        self.data[1] = f32::from_bits(count as u32);
    }

    /// Allocated scalars, header included.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn payload(&self) -> &[f32] {
        &self.data[HEADER_LEN..]
    }

    pub fn payload_mut(&mut self) -> &mut [f32] {
        &mut self.data[HEADER_LEN..]
    }

    fn stamp(&mut self, kind: ReportKind) {
        self.data[0] = f32::from_bits(kind.tag());
    }

    /// Replace the storage with `capacity` zeroed scalars and re-stamp the
    /// header. Previous contents are not preserved.
    pub fn reallocate(&mut self, kind: ReportKind, capacity: usize) -> Result<(), ReportError> {
        let capacity = capacity.max(HEADER_LEN);
        let mut data: Vec<f32> = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| ReportError::Allocation {
                kind,
                requested: capacity,
            })?;
        data.resize(capacity, 0.0);
        self.data = data;
        self.stamp(kind);
        Ok(())
    }

    /// Re-stamp the kind on storage that came back for reuse.
    pub fn reset(&mut self, kind: ReportKind) {
        self.stamp(kind);
        self.set_item_count(0);
    }

    fn expect_kind(&self, expected: ReportKind) -> Result<(), ReportError> {
        let found = self.kind_tag();
        if found == expected.tag() {
            Ok(())
        } else {
            Err(ReportError::KindMismatch { expected, found })
        }
    }

    fn occupied_scalars(&self, stride: usize) -> Result<usize, ReportError> {
        let count = self.item_count();
        let needed = count
            .checked_mul(stride)
            .and_then(|n| n.checked_add(HEADER_LEN));
        match needed {
            Some(needed) if needed <= self.data.len() => Ok(needed - HEADER_LEN),
            _ => Err(ReportError::Desync {
                tag: self.kind_tag(),
                count,
                capacity: self.data.len(),
            }),
        }
    }

    /// View the occupied items in place.
    pub fn records<R: Record>(&self) -> Result<&[R], ReportError> {
        self.expect_kind(R::KIND)?;
        let stride = std::mem::size_of::<R>() / SCALAR;
        let len = self.occupied_scalars(stride)?;
        bytemuck::try_cast_slice(&self.payload()[..len]).map_err(|_| ReportError::Desync {
            tag: self.kind_tag(),
            count: self.item_count(),
            capacity: self.data.len(),
        })
    }

    /// Set the occupancy to `count` and view those items for writing.
    pub fn records_mut<R: Record>(&mut self, count: usize) -> Result<&mut [R], ReportError> {
        self.expect_kind(R::KIND)?;
        self.set_item_count(count);
        let stride = std::mem::size_of::<R>() / SCALAR;
        let len = self.occupied_scalars(stride)?;
        let tag = self.kind_tag();
        let capacity = self.data.len();
        bytemuck::try_cast_slice_mut(&mut self.payload_mut()[..len])
            .map_err(|_| ReportError::Desync {
                tag,
                count,
                capacity,
            })
    }

    /// Iterate the soft-body records of a [`ReportKind::SoftBody`] buffer.
    pub fn soft_bodies(&self) -> Result<SoftBodyRecords<'_>, ReportError> {
        self.expect_kind(ReportKind::SoftBody)?;
        Ok(SoftBodyRecords {
            payload: self.payload(),
            cursor: 0,
            remaining: self.item_count(),
            tag: self.kind_tag(),
            capacity: self.data.len(),
        })
    }
}

impl WorldRecord {
    pub fn identity(&self) -> Option<Identity> {
        Identity::from_bits(self.identity)
    }
}

impl CollisionRecord {
    pub fn bodies(&self) -> Option<(Identity, Identity)> {
        Some((
            Identity::from_bits(self.body_a)?,
            Identity::from_bits(self.body_b)?,
        ))
    }
}
