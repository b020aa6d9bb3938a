//! Defines functionality for a `Partition`
use crate::table::PartitionId;
use serde::{Deserialize, Serialize};

/// A uniquely identified, owned buffer of fixed-length homogeneous values.
///
/// On the wire a `Partition` is its `(id, size, values)` triple, which is
/// exactly what `bincode` produces for this struct.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Partition<T> {
    /// The routing and merge key of this `Partition` within its `Table`
    id: PartitionId,
    /// The values, its length is fixed at creation
    data: Box<[T]>,
}

impl<T> Partition<T> {
    /// Creates a new `Partition` that takes ownership of `data`.
    ///
    /// A non-empty buffer is a caller obligation.
    pub fn new(id: PartitionId, data: Vec<T>) -> Self {
        debug_assert!(!data.is_empty(), "partition {} is empty", id);
        Partition {
            id,
            data: data.into_boxed_slice(),
        }
    }

    /// The id of this `Partition`
    pub fn id(&self) -> PartitionId {
        self.id
    }

    /// The number of values in this `Partition`
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Clone> Partition<T> {
    /// Overwrite every value of this `Partition` with `value`
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Creates an independent copy of this `Partition` with the same id
    pub fn deep_copy(&self) -> Self {
        Partition {
            id: self.id,
            data: self.data.clone(),
        }
    }
}
