//! # Index Storage
//!
//! Index widths shared by attribute stores and index groups, plus the
//! [`IndexGroupAllocator`] that hands out runs of indices from one buffer.

mod group;

pub use group::{IndexGroup, IndexGroupAllocator};

use bytemuck::Pod;
use serde::{Deserialize, Serialize};

/// Width of an index value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    /// 8-bit indices.
    U8,
    /// 16-bit indices.
    U16,
    /// 32-bit indices, limited to the positive `i32` range.
    U32,
}

impl IndexType {
    /// Size of one index in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }

    /// Highest addressable index.
    #[inline]
    #[must_use]
    pub const fn max_index(self) -> usize {
        match self {
            Self::U8 => u8::MAX as usize,
            Self::U16 => u16::MAX as usize,
            Self::U32 => i32::MAX as usize,
        }
    }
}

/// A primitive usable as an index value.
pub trait IndexElement: Pod + Copy + Send + Sync + 'static {
    /// The matching [`IndexType`].
    const INDEX_TYPE: IndexType;
}

impl IndexElement for u8 {
    const INDEX_TYPE: IndexType = IndexType::U8;
}

impl IndexElement for u16 {
    const INDEX_TYPE: IndexType = IndexType::U16;
}

impl IndexElement for u32 {
    const INDEX_TYPE: IndexType = IndexType::U32;
}
