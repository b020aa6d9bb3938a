//! The possible error types when using `harp`.
use crate::network::Channel;
use crate::table::{PartitionId, TableId};
use crate::worker::WorkerId;
use thiserror::Error;

/// An enumeration of `harp` errors.
#[derive(Debug, Error)]
pub enum HarpError {
    /// The `world_size` or `worker_id` given at init can not form a ring
    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),
    /// A `Partition` with this id is already owned by the `Table`
    #[error("Table {table_id} already has a partition with id {partition_id}")]
    DuplicatePartitionId {
        table_id: TableId,
        partition_id: PartitionId,
    },
    /// The `Table` does not own a `Partition` with this id
    #[error("Table {table_id} has no partition with id {partition_id}")]
    PartitionNotFound {
        table_id: TableId,
        partition_id: PartitionId,
    },
    /// A peer issued a different collective than the one we are serving,
    /// i.e. workers diverged in the number or order of their collective calls
    #[error(
        "Collective mismatch with worker {peer}: \
         expected {expected:?} #{expected_seq}, got {got}"
    )]
    CollectiveMismatch {
        peer: WorkerId,
        expected: Channel,
        expected_seq: u64,
        got: String,
    },
    /// A bounded wait on a peer ran out
    #[error("Timed out waiting for worker {peer} on {channel:?}")]
    CollectiveTimeout { peer: WorkerId, channel: Channel },
    /// A peer failed and aborted the collectives it was part of
    #[error("Worker {worker} failed: {reason}")]
    PeerFailed { worker: WorkerId, reason: String },
    /// The `Communicator` already failed once and refuses further collectives
    #[error("Communicator is poisoned: {0}")]
    CommunicatorPoisoned(String),
    /// An aggregation step would divide by a zero count
    #[error("Group {0} is empty")]
    EmptyGroup(PartitionId),
    /// A record of a data file does not have the expected width or does not
    /// parse
    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("Unexpected message")]
    UnexpectedMessage,
    #[error("Unknown worker id {0}")]
    UnknownId(WorkerId),
    #[error("Stream closed")]
    StreamClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}
