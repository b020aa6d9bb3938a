//! Collective operations over a logical ring of workers.
//!
//! A [`Communicator`] gives a worker two collectives:
//!  - [`barrier`]: returns once every worker of the group has called
//!    `barrier` the same number of times.
//!  - [`rotate`]: every worker sends its whole `Table` to its ring successor
//!    and replaces it with the one its predecessor sent. After `world_size`
//!    rotates without local changes every worker holds its original table
//!    again.
//!
//! ## Ordering contract
//!
//! Every worker must issue the same sequence of collective calls: the same
//! number of rotates per table id, in the same order relative to the other
//! collectives. Each call is stamped with its channel ([`Channel::Barrier`]
//! or [`Channel::Table`]) and the number of calls the worker made on that
//! channel before it. Links between two workers deliver frames in order, so
//! the next frame a worker receives from a peer must carry exactly the
//! channel and sequence number of the call it is serving. If it does not,
//! the workers diverged and the call fails with
//! [`HarpError::CollectiveMismatch`] instead of hanging or installing the
//! wrong table.
//!
//! ## Failure
//!
//! A failed collective poisons the `Communicator`: it tells every peer it is
//! aborting, and refuses any further collective. A peer that receives the
//! abort where it expected a collective frame fails with
//! [`HarpError::PeerFailed`] and poisons itself in turn, so one failure
//! brings the whole group down instead of leaving it blocked.
//!
//! Without a `collective_timeout` a silent peer blocks its neighbours
//! forever, with one they fail with [`HarpError::CollectiveTimeout`].
//!
//! [`barrier`]: struct.Communicator.html#method.barrier
//! [`rotate`]: struct.Communicator.html#method.rotate
use crate::error::HarpError;
use crate::network::{Channel, Frame, Transport};
use crate::table::{Partition, Table};
use crate::worker::{WorkerContext, WorkerId};
use bincode::{deserialize, serialize};
use bytes::Bytes;
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Whether a collective is currently running on a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    /// A send and a receive are in progress
    InFlight,
}

#[derive(Debug, Default)]
struct ChannelState {
    /// The number of completed calls on this channel
    seq: u64,
    phase: Phase,
}

/// Ring collectives for one worker of a group, over a [`Transport`].
#[derive(Debug)]
pub struct Communicator<Tr> {
    /// The id and group size of this worker, fixed for its lifetime
    ctx: WorkerContext,
    /// The links to the other workers of the group
    transport: Arc<Tr>,
    /// The sequence numbers and phase of every channel used so far
    channels: HashMap<Channel, ChannelState>,
    /// How long to wait on a peer before giving up, `None` waits forever
    collective_timeout: Option<Duration>,
    /// Why this `Communicator` stopped accepting collectives
    poisoned: Option<String>,
}

impl<Tr: Transport> Communicator<Tr> {
    /// Creates a new `Communicator` for the worker described by `ctx`
    pub fn new(
        ctx: WorkerContext,
        transport: Arc<Tr>,
        collective_timeout: Option<Duration>,
    ) -> Self {
        Communicator {
            ctx,
            transport,
            channels: HashMap::new(),
            collective_timeout,
            poisoned: None,
        }
    }

    pub fn context(&self) -> WorkerContext {
        self.ctx
    }

    pub fn worker_id(&self) -> WorkerId {
        self.ctx.worker_id()
    }

    pub fn world_size(&self) -> usize {
        self.ctx.world_size()
    }

    /// The number of completed collective calls on `channel`
    pub fn completed_calls(&self, channel: Channel) -> u64 {
        self.channels.get(&channel).map_or(0, |state| state.seq)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Blocks until every worker of the group has called `barrier` as many
    /// times as this worker has, including this call.
    ///
    /// This is a dissemination barrier: in round `k` every worker signals the
    /// worker `2^k` places after it and waits for the worker `2^k` places
    /// before it, for `ceil(log2(world_size))` rounds.
    pub async fn barrier(&mut self) -> Result<(), HarpError> {
        let seq = self.begin(Channel::Barrier).await?;
        let result = self.barrier_rounds(seq).await;
        self.finish(Channel::Barrier, result).await
    }

    /// Sends the whole contents of `table` to the ring successor and replaces
    /// them with the contents the ring predecessor sent. Partition ids and
    /// sizes travel unchanged, only ownership moves.
    ///
    /// Every worker must call `rotate` for a given table id the same number
    /// of times and in the same order relative to its other collectives.
    ///
    /// ## Errors
    /// If the exchange fails the contents of `table` are lost and this
    /// `Communicator` is poisoned.
    pub async fn rotate<T>(
        &mut self,
        table: &mut Table<T>,
    ) -> Result<(), HarpError>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let channel = Channel::Table(table.table_id());
        let seq = self.begin(channel).await?;
        let result = self.exchange(table, channel, seq).await;
        self.finish(channel, result).await
    }

    async fn barrier_rounds(&self, seq: u64) -> Result<(), HarpError> {
        let id = self.ctx.worker_id();
        let n = self.ctx.world_size();
        let mut distance = 1;
        let mut round = 0;
        while distance < n {
            let to = (id + distance) % n;
            let from = (id + n - distance) % n;
            let frame = Frame::Collective {
                channel: Channel::Barrier,
                seq,
                round,
                payload: Bytes::new(),
            };
            tokio::try_join!(
                self.transport.send(to, frame),
                self.recv_expected(from, Channel::Barrier, seq, round)
            )?;
            distance *= 2;
            round += 1;
        }
        debug!("Worker {} passed barrier #{}", id, seq);
        Ok(())
    }

    async fn exchange<T>(
        &self,
        table: &mut Table<T>,
        channel: Channel,
        seq: u64,
    ) -> Result<(), HarpError>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        if self.ctx.world_size() == 1 {
            return Ok(());
        }
        // the outgoing partitions live on only as the payload
        let payload = {
            let outgoing = table.take_partitions();
            Bytes::from(serialize(&outgoing)?)
        };
        let sent = payload.len();
        let frame = Frame::Collective {
            channel,
            seq,
            round: 0,
            payload,
        };
        let (_, incoming) = tokio::try_join!(
            self.transport.send(self.ctx.successor(), frame),
            self.recv_expected(self.ctx.predecessor(), channel, seq, 0)
        )?;
        let partitions: Vec<Partition<T>> = deserialize(&incoming)?;
        debug!(
            "Worker {} rotated {:?} #{}: sent {} bytes, received {} partitions",
            self.ctx.worker_id(),
            channel,
            seq,
            sent,
            partitions.len()
        );
        table.install_partitions(partitions)
    }

    /// Waits for the next frame from `from` and checks that it is the
    /// expected step of the expected collective.
    async fn recv_expected(
        &self,
        from: WorkerId,
        channel: Channel,
        seq: u64,
        round: u32,
    ) -> Result<Bytes, HarpError> {
        let frame = match self.collective_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.transport.recv(from))
                    .await
                    .map_err(|_| HarpError::CollectiveTimeout {
                        peer: from,
                        channel,
                    })??
            }
            None => self.transport.recv(from).await?,
        };
        match frame {
            Frame::Collective {
                channel: c,
                seq: s,
                round: r,
                payload,
            } if c == channel && s == seq && r == round => Ok(payload),
            Frame::Abort { reason } => Err(HarpError::PeerFailed {
                worker: from,
                reason,
            }),
            other => Err(HarpError::CollectiveMismatch {
                peer: from,
                expected: channel,
                expected_seq: seq,
                got: other.to_string(),
            }),
        }
    }

    /// Marks `channel` as in flight and returns the sequence number of the
    /// call that is starting
    async fn begin(&mut self, channel: Channel) -> Result<u64, HarpError> {
        if let Some(reason) = &self.poisoned {
            return Err(HarpError::CommunicatorPoisoned(reason.clone()));
        }
        let state = self.channels.entry(channel).or_default();
        match state.phase {
            Phase::Idle => {
                state.phase = Phase::InFlight;
                Ok(state.seq)
            }
            Phase::InFlight => {
                // the future of the previous call was dropped before it
                // completed, the peers are out of step with us
                let e = HarpError::CommunicatorPoisoned(format!(
                    "call #{} on {:?} never completed",
                    state.seq, channel
                ));
                self.poison(&e).await;
                Err(e)
            }
        }
    }

    async fn finish(
        &mut self,
        channel: Channel,
        result: Result<(), HarpError>,
    ) -> Result<(), HarpError> {
        match result {
            Ok(()) => {
                if let Some(state) = self.channels.get_mut(&channel) {
                    state.seq += 1;
                    state.phase = Phase::Idle;
                }
                Ok(())
            }
            Err(e) => {
                self.poison(&e).await;
                Err(e)
            }
        }
    }

    /// Stops accepting collectives and tells every peer we are aborting.
    /// Peers that already left are skipped.
    async fn poison(&mut self, cause: &HarpError) {
        if self.poisoned.is_some() {
            return;
        }
        let reason = cause.to_string();
        error!(
            "Worker {} aborting its collectives: {}",
            self.ctx.worker_id(),
            reason
        );
        self.poisoned = Some(reason.clone());
        broadcast(&*self.transport, self.ctx, Frame::Abort { reason }).await;
    }
}

/// Sends `frame` to every peer of the worker described by `ctx`, ignoring
/// peers that can no longer be reached.
pub(crate) async fn broadcast<Tr: Transport + ?Sized>(
    transport: &Tr,
    ctx: WorkerContext,
    frame: Frame,
) {
    for peer in ctx.peers() {
        if let Err(e) = transport.send(peer, frame.clone()).await {
            debug!("Could not send {} to worker {}: {}", frame, peer, e);
        }
    }
}
