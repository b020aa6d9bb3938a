//! This module defines a `Worker`, the highest level component of a `harp`
//! system.
//!
//! A `Worker` is one participant of a group of `world_size` workers. Setting
//! it up establishes its id and the group size, connects it to its peers and
//! gives it a [`Communicator`]. A user of `harp` then only needs to hand the
//! `Worker` an async function to run: the function gets the
//! [`WorkerContext`] and the `Communicator`, does its local computation and
//! calls the collectives. The `Worker` runs it exactly once.
//!
//! When the function returns, the `Worker` tells every peer it is done (or,
//! on an error, that it is aborting) so that a peer still waiting on it fails
//! instead of hanging.
//!
//! Detailed examples that use a `Worker` can be found in the `demos`
//! directory of this crate.
use crate::communicator::{broadcast, Communicator};
use crate::error::HarpError;
use crate::network::{Frame, LocalTransport, TcpTransport, Transport};
use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Identifies a worker within its group, in `[0, world_size)`
pub type WorkerId = usize;

/// The id of a worker and the size of its group. Produced once when the
/// worker is set up and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    worker_id: WorkerId,
    world_size: usize,
}

impl WorkerContext {
    /// Creates a new `WorkerContext`.
    ///
    /// ## Errors
    /// `HarpError::ConfigurationError` if `world_size` is `0` or `worker_id`
    /// is not in `[0, world_size)`
    pub fn new(
        worker_id: WorkerId,
        world_size: usize,
    ) -> Result<Self, HarpError> {
        if world_size == 0 {
            return Err(HarpError::ConfigurationError(
                "world size must be at least 1".to_string(),
            ));
        }
        if worker_id >= world_size {
            return Err(HarpError::ConfigurationError(format!(
                "worker id {} is outside a group of {}",
                worker_id, world_size
            )));
        }
        Ok(WorkerContext {
            worker_id,
            world_size,
        })
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// The next worker on the ring
    pub fn successor(&self) -> WorkerId {
        (self.worker_id + 1) % self.world_size
    }

    /// The previous worker on the ring
    pub fn predecessor(&self) -> WorkerId {
        (self.worker_id + self.world_size - 1) % self.world_size
    }

    /// Every other worker of the group
    pub fn peers(&self) -> impl Iterator<Item = WorkerId> {
        let me = self.worker_id;
        (0..self.world_size).filter(move |id| *id != me)
    }
}

/// How to set up a `Worker`
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// The number of workers in the group
    pub world_size: usize,
    /// How long a collective waits on a peer before failing, `None` waits
    /// forever
    pub collective_timeout: Option<Duration>,
    /// The `IP:Port` of the registration `Server`, only used over TCP
    pub server_addr: String,
    /// The `IP:Port` this worker listens on for its peers, only used over
    /// TCP. A port of `0` lets the OS choose one.
    pub my_addr: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            world_size: 1,
            collective_timeout: None,
            server_addr: "127.0.0.1:9000".to_string(),
            my_addr: "127.0.0.1:0".to_string(),
        }
    }
}

impl WorkerConfig {
    /// A config for a group of `world_size` workers, other fields default
    pub fn new(world_size: usize) -> Self {
        WorkerConfig {
            world_size,
            ..WorkerConfig::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.collective_timeout = Some(timeout);
        self
    }

    /// Check that the config describes a group that can form a ring
    pub fn validate(&self) -> Result<(), HarpError> {
        if self.world_size == 0 {
            return Err(HarpError::ConfigurationError(
                "world size must be at least 1".to_string(),
            ));
        }
        if self.collective_timeout == Some(Duration::ZERO) {
            return Err(HarpError::ConfigurationError(
                "collective timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One participant of a `harp` group
#[derive(Debug)]
pub struct Worker<Tr> {
    ctx: WorkerContext,
    transport: Arc<Tr>,
    collective_timeout: Option<Duration>,
}

impl Worker<TcpTransport> {
    /// Sets up this process as a worker of a group connected over TCP:
    /// registers with the `Server` at `config.server_addr` (which assigns the
    /// worker id) and connects to every peer.
    ///
    /// `await`ing this function blocks until the whole group is connected.
    pub async fn init(config: WorkerConfig) -> Result<Self, HarpError> {
        config.validate()?;
        let transport = TcpTransport::connect(
            &config.server_addr,
            &config.my_addr,
            config.world_size,
        )
        .await?;
        let ctx = WorkerContext::new(transport.id(), config.world_size)?;
        Ok(Worker::with_transport(
            ctx,
            transport,
            config.collective_timeout,
        ))
    }
}

impl Worker<LocalTransport> {
    /// Sets up all `config.world_size` workers of an in-memory group, indexed
    /// by worker id.
    pub fn local_group(config: WorkerConfig) -> Result<Vec<Self>, HarpError> {
        config.validate()?;
        LocalTransport::group(config.world_size)
            .into_iter()
            .map(|transport| {
                let ctx =
                    WorkerContext::new(transport.id(), config.world_size)?;
                Ok(Worker::with_transport(
                    ctx,
                    transport,
                    config.collective_timeout,
                ))
            })
            .collect()
    }
}

impl<Tr: Transport> Worker<Tr> {
    /// Creates a `Worker` over an already connected `transport`
    pub fn with_transport(
        ctx: WorkerContext,
        transport: Tr,
        collective_timeout: Option<Duration>,
    ) -> Self {
        Worker {
            ctx,
            transport: Arc::new(transport),
            collective_timeout,
        }
    }

    pub fn context(&self) -> WorkerContext {
        self.ctx
    }

    /// Runs `execute` on this worker. Consumes the `Worker`, so `execute`
    /// runs exactly once.
    ///
    /// Afterwards every peer is sent `Done`, or `Abort` if `execute` failed,
    /// so that peers still expecting a collective from this worker fail fast.
    pub async fn start<F, Fut, R>(self, execute: F) -> Result<R, HarpError>
    where
        F: FnOnce(WorkerContext, Communicator<Tr>) -> Fut,
        Fut: Future<Output = Result<R, HarpError>>,
    {
        let comm = Communicator::new(
            self.ctx,
            self.transport.clone(),
            self.collective_timeout,
        );
        info!(
            "Worker {} of {} starting",
            self.ctx.worker_id(),
            self.ctx.world_size()
        );
        let result = execute(self.ctx, comm).await;
        let farewell = match &result {
            Ok(_) => {
                info!("Worker {} finished", self.ctx.worker_id());
                Frame::Done
            }
            Err(e) => {
                error!("Worker {} failed: {}", self.ctx.worker_id(), e);
                Frame::Abort {
                    reason: e.to_string(),
                }
            }
        };
        broadcast(&*self.transport, self.ctx, farewell).await;
        result
    }
}

/// Runs `execute` on every worker of an in-memory group of
/// `config.world_size` workers, each as its own `tokio` task. Returns the
/// result of every worker, indexed by worker id.
pub async fn run_local<F, Fut, R>(
    config: WorkerConfig,
    execute: F,
) -> Result<Vec<Result<R, HarpError>>, HarpError>
where
    F: FnOnce(WorkerContext, Communicator<LocalTransport>) -> Fut
        + Clone
        + Send
        + 'static,
    Fut: Future<Output = Result<R, HarpError>> + Send + 'static,
    R: Send + 'static,
{
    let workers = Worker::local_group(config)?;
    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| {
            let execute = execute.clone();
            let id = worker.context().worker_id();
            (id, tokio::spawn(worker.start(execute)))
        })
        .collect();
    let mut results = Vec::with_capacity(handles.len());
    for (id, handle) in handles {
        results.push(handle.await.unwrap_or_else(|e| {
            Err(HarpError::PeerFailed {
                worker: id,
                reason: e.to_string(),
            })
        }));
    }
    Ok(results)
}
