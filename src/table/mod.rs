//! A module for creating and manipulating partitioned `Table`s, the unit of
//! data that `harp` workers compute on and move around the ring.
//!
//! A [`Partition`] is a uniquely identified, owned buffer of fixed-length
//! homogeneous values, for example one point or one centroid of a k-means
//! run. A [`Table`] owns a collection of `Partition`s keyed by their id.
//!
//! Ownership is always explicit:
//!  - A `Partition` is never implicitly copied, [`Partition::deep_copy`] must
//!    be called to duplicate one.
//!  - Moving a `Partition` from one `Table` into another moves the value, so
//!    the source handle can not be used afterwards.
//!  - [`Table::destroy`] consumes the `Table`. Destroying with
//!    [`Depth::Deep`] drops every buffer, [`Depth::Shallow`] hands the
//!    `Partition`s back so a new owner can adopt them.
//!
//! The `table_id` of a `Table` names the collective channel it travels on
//! when it is rotated, so that two tables rotated back to back (for example
//! centroids and their point counts) can never be confused on the wire.
use serde::{Deserialize, Serialize};

mod partition;
pub use partition::Partition;

#[allow(clippy::module_inception)]
mod table;
pub use table::Table;

/// Identifies a `Partition` within its owning `Table`
pub type PartitionId = u32;

/// Identifies a `Table`, and with it the collective channel it is rotated on
pub type TableId = u32;

/// How much of a `Table` is released by [`Table::destroy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Depth {
    /// Release the mapping and every `Partition` buffer
    Deep,
    /// Release only the mapping, the `Partition`s are returned to the caller
    Shallow,
}
