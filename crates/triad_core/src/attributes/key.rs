//! Attribute store keys.

use crate::index::IndexType;

/// Identifies a family of interchangeable attribute stores.
///
/// Two stores with equal keys hold records of the same byte layout and
/// are addressed with the same index width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeKey {
    /// Bytes per record.
    pub record_size: usize,
    /// Index width used to address records.
    pub index_type: IndexType,
    /// Caller-defined tag distinguishing layouts of equal size.
    pub layout: u32,
}

impl AttributeKey {
    /// Key for `record_size`-byte records addressed by `index_type`.
    #[must_use]
    pub const fn new(record_size: usize, index_type: IndexType) -> Self {
        Self {
            record_size,
            index_type,
            layout: 0,
        }
    }

    /// Sets the layout tag.
    #[must_use]
    pub const fn with_layout(mut self, layout: u32) -> Self {
        self.layout = layout;
        self
    }

    /// Most records a store with this key can hold, slot 0 included.
    #[inline]
    #[must_use]
    pub const fn max_records(&self) -> usize {
        self.index_type.max_index() + 1
    }
}
