//! Fixed-width identifiers and the XOR metric.
//!
//! Every entity in the simulation (node or file) is addressed by a `KadId`:
//! an unsigned integer of configurable width `n_bits`, drawn uniformly at
//! random. Distance between two identifiers is their bitwise XOR. The bit
//! length of a distance is ultrametric:
//! `msb(a ^ c) <= max(msb(a ^ b), msb(b ^ c))`, which is what makes
//! bucket-index routing correct. The magnitudes themselves are not:
//! `d(0, 3) = 3` exceeds `max(d(0, 1), d(1, 3)) = 2`.
//!
//! Width validation happens once, at construction. Routing and lookup code
//! never sees a malformed identifier.

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier construction and width errors.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum IdError {
    /// The raw value does not fit the declared width, or the width itself
    /// is outside the supported `1..=128` range.
    #[error("invalid identifier: {raw:#x} does not fit in {bits} bits")]
    InvalidId { raw: u128, bits: u32 },

    /// The identifier was built for a different id space.
    #[error("identifier declares {declared} bits but the id space is {space} bits wide")]
    WidthMismatch { declared: u32, space: u32 },

    /// Zero distance has no highest set bit, so no bucket.
    #[error("an identifier has no bucket index relative to itself")]
    SelfDistance,
}

/// A fixed-width identifier, immutable after construction.
///
/// Ordering is by raw value; distance-relative ordering goes through
/// [`IdSpace::cmp_distance`]. Deserialization re-runs the width check, so a
/// hand-edited snapshot cannot smuggle in a value wider than its declared
/// bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "KadIdWire")]
pub struct KadId {
    raw: u128,
    bits: u32,
}

/// Unvalidated wire form of a [`KadId`].
#[derive(Deserialize)]
struct KadIdWire {
    raw: u128,
    bits: u32,
}

impl TryFrom<KadIdWire> for KadId {
    type Error = IdError;

    fn try_from(wire: KadIdWire) -> Result<Self, IdError> {
        KadId::new(wire.raw, wire.bits)
    }
}

impl KadId {
    /// Validate and construct an identifier of the given width.
    pub fn new(raw: u128, bits: u32) -> Result<Self, IdError> {
        if bits == 0 || bits > 128 {
            return Err(IdError::InvalidId { raw, bits });
        }
        if bits < 128 && raw >> bits != 0 {
            return Err(IdError::InvalidId { raw, bits });
        }
        Ok(Self { raw, bits })
    }

    #[inline]
    pub fn raw(&self) -> u128 {
        self.raw
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// XOR distance to another identifier, interpreted as an unsigned
    /// magnitude. Symmetric, zero only for equal identifiers.
    #[inline]
    pub fn distance(&self, other: KadId) -> u128 {
        self.raw ^ other.raw
    }
}

impl std::fmt::Display for KadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let width = (self.bits as usize + 3) / 4;
        write!(f, "{:0width$x}", self.raw)
    }
}

impl std::fmt::Debug for KadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KadId({}/{})", self, self.bits)
    }
}

/// The identifier universe for one simulation run.
///
/// Owns no state beyond the width; it exists so that every distance and
/// bucket computation is checked against a single `n_bits` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSpace {
    bits: u32,
}

impl IdSpace {
    pub fn new(bits: u32) -> Result<Self, IdError> {
        if bits == 0 || bits > 128 {
            return Err(IdError::InvalidId { raw: 0, bits });
        }
        Ok(Self { bits })
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Construct an identifier belonging to this space.
    pub fn id(&self, raw: u128) -> Result<KadId, IdError> {
        KadId::new(raw, self.bits)
    }

    /// Check that an identifier was built for this space.
    pub fn validate(&self, id: KadId) -> Result<(), IdError> {
        if id.bits != self.bits {
            return Err(IdError::WidthMismatch {
                declared: id.bits,
                space: self.bits,
            });
        }
        Ok(())
    }

    /// Draw an identifier uniformly at random from this space.
    pub fn random(&self, rng: &mut impl Rng) -> KadId {
        KadId {
            raw: rng.gen::<u128>() & self.mask(),
            bits: self.bits,
        }
    }

    #[inline]
    fn mask(&self) -> u128 {
        if self.bits == 128 {
            u128::MAX
        } else {
            (1u128 << self.bits) - 1
        }
    }

    /// XOR distance between two identifiers of this space.
    #[inline]
    pub fn distance(&self, a: KadId, b: KadId) -> u128 {
        a.raw ^ b.raw
    }

    /// Bucket index of `b` relative to `a`: the position of the highest set
    /// bit of their distance, in `0..bits`.
    pub fn bucket_index(&self, a: KadId, b: KadId) -> Result<usize, IdError> {
        self.validate(a)?;
        self.validate(b)?;
        let dist = a.raw ^ b.raw;
        if dist == 0 {
            return Err(IdError::SelfDistance);
        }
        Ok(127 - dist.leading_zeros() as usize)
    }

    /// Ascending order by distance to `target`, ties broken by raw value so
    /// that every sort in the simulation is reproducible.
    #[inline]
    pub fn cmp_distance(&self, target: KadId, a: KadId, b: KadId) -> Ordering {
        (a.raw ^ target.raw, a.raw).cmp(&(b.raw ^ target.raw, b.raw))
    }
}
