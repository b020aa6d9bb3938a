//! A module with methods to move frames between the workers of a `harp`
//! group, as well as the registration [`Server`] used to bootstrap a group
//! over TCP.
//!
//! Collectives never talk to sockets directly, they go through the
//! [`Transport`] trait: send a [`Frame`] to a peer, and receive the next
//! [`Frame`] a peer sent us. Two implementations are provided:
//!  - [`LocalTransport`]: an in-memory group of workers living in one
//!    process, connected by `tokio` channels. Used for tests and single
//!    process simulations.
//!  - [`TcpTransport`]: one TCP connection per pair of workers, framed with a
//!    length-delimited `bincode` codec.
//!
//! Both guarantee that frames from one worker to another arrive in the order
//! they were sent. The `Communicator` relies on that ordering to detect
//! workers whose collective calls have diverged.
use crate::error::HarpError;
use crate::table::TableId;
use crate::worker::WorkerId;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use tokio_util::codec::LengthDelimitedCodec;

mod local;
pub use local::LocalTransport;

mod message;

mod server;
pub use server::Server;

mod tcp;
pub use tcp::TcpTransport;

/// The capability a collective needs from the layer below it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `frame` to the worker with the given `target_id`. Returns once
    /// the frame has been handed to the link.
    async fn send(
        &self,
        target_id: WorkerId,
        frame: Frame,
    ) -> Result<(), HarpError>;

    /// Wait for the next frame the worker with the given `sender_id` sent to
    /// us.
    async fn recv(&self, sender_id: WorkerId) -> Result<Frame, HarpError>;
}

/// A logical collective channel. Every `Table` is rotated on its own channel
/// so that rotations of different tables can never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Barrier,
    Table(TableId),
}

/// The unit exchanged between the workers of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// One step of a collective call
    Collective {
        /// The channel of the collective
        channel: Channel,
        /// How many calls on `channel` the sender issued before this one
        seq: u64,
        /// The step within the call, always `0` for a rotate
        round: u32,
        /// A serialized `Table` for rotates, empty for barriers
        payload: Bytes,
    },
    /// The sender failed and will not take part in any further collective
    Abort { reason: String },
    /// The sender finished its computation and will not take part in any
    /// further collective
    Done,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Frame::Collective {
                channel,
                seq,
                round,
                ..
            } => write!(f, "{:?} #{} round {}", channel, seq, round),
            Frame::Abort { reason } => write!(f, "Abort ({})", reason),
            Frame::Done => write!(f, "Done"),
        }
    }
}

/// A message for communication between nodes over TCP
#[derive(Serialize, Deserialize, Debug)]
pub(crate) struct Message<T> {
    /// The id of the sender
    pub(crate) sender_id: WorkerId,
    /// The id of the node this message is being sent to
    pub(crate) target_id: WorkerId,
    /// The body of the message
    pub(crate) msg: T,
}

/// Control messages used to bootstrap a group with the registration `Server`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) enum ControlMsg {
    /// An introduction a new worker sends to the `Server` and then to every
    /// peer it connects to
    Introduction {
        /// The address the worker listens on for peer connections
        address: SocketAddr,
        /// The group size the worker was configured with
        world_size: usize,
    },
    /// Sent by the `Server` to a newly registered worker: its assigned id and
    /// the addresses of every worker registered before it
    Directory {
        assigned_id: WorkerId,
        dir: Vec<(WorkerId, SocketAddr)>,
    },
    /// Sent by the `Server` when it can not register the worker
    Reject { reason: String },
}

/// A length-delimited frame holding the `bincode` encoding of a `Message<T>`
#[derive(Debug)]
pub(crate) struct MessageCodec<T> {
    phantom: std::marker::PhantomData<T>,
    pub(crate) codec: LengthDelimitedCodec,
}
