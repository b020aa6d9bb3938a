//! A `Transport` over TCP, with one connection per pair of workers.
use crate::error::HarpError;
use crate::network::message::{read_msg, send_msg};
use crate::network::{ControlMsg, Frame, Message, MessageCodec, Transport};
use crate::worker::{WorkerContext, WorkerId};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, error, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{self, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};

type FramedStream<T> = FramedRead<ReadHalf<TcpStream>, MessageCodec<T>>;
type FramedSink<T> = FramedWrite<WriteHalf<TcpStream>, MessageCodec<T>>;

/// Represents one worker of a group connected over TCP.
///
/// Every pair of workers shares exactly one connection: the worker with the
/// higher id opens it, so a new worker connects to everyone in the directory
/// it got from the registration [`Server`] and then waits for the workers
/// registered after it to connect to it.
///
/// Incoming frames are read by one `tokio` task per connection and queued per
/// peer, so a link is drained even while this worker is busy computing.
///
/// [`Server`]: struct.Server.html
#[derive(Debug)]
pub struct TcpTransport {
    /// The `id` of this worker, assigned by the [`Server`] on startup
    /// to be monotonically increasing based on the order of connections
    ///
    /// [`Server`]: struct.Server.html
    id: WorkerId,
    /// The number of workers in the group
    world_size: usize,
    /// The address this worker accepts peer connections on
    address: SocketAddr,
    /// A directory which is a map of worker id to the sink for sending
    /// frames to that worker
    sinks: HashMap<WorkerId, Mutex<FramedSink<Frame>>>,
    /// Frames received from each peer, in the order they were sent
    inboxes: HashMap<WorkerId, Mutex<UnboundedReceiver<Frame>>>,
    /// The tasks reading from each connection
    readers: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// Create a new [`TcpTransport`] that listens on `my_addr` and joins the
    /// group bootstrapped by the registration [`Server`] at `server_addr`.
    ///
    /// Constructing the [`TcpTransport`] does these things:
    /// 1. Binds a listener on `my_addr`. A port of `0` lets the OS choose.
    /// 2. Connects to the [`Server`] and sends it an `Introduction`
    ///    containing our address and `world_size`
    /// 3. The [`Server`] responds with a `Directory` containing our id and
    ///    the addresses of all workers registered before us
    /// 4. Connects to all of those workers
    /// 5. Waits for the remaining workers to connect to us
    ///
    /// `await`ing this function blocks until the whole group is connected.
    ///
    /// [`Server`]: struct.Server.html
    pub async fn connect(
        server_addr: &str,
        my_addr: &str,
        world_size: usize,
    ) -> Result<Self, HarpError> {
        let listener = TcpListener::bind(my_addr).await?;
        let address = listener.local_addr()?;

        // Connect to the server
        let server_stream = TcpStream::connect(server_addr).await?;
        let (reader, writer) = io::split(server_stream);
        let mut stream =
            FramedRead::new(reader, MessageCodec::<ControlMsg>::new());
        let mut sink =
            FramedWrite::new(writer, MessageCodec::<ControlMsg>::new());
        // Tell the server our address and the group size we expect
        let intro = ControlMsg::Introduction {
            address,
            world_size,
        };
        send_msg(&mut sink, Message::new(0, 0, intro)).await?;
        // Server responds with our id and the already registered workers
        let dir_msg = read_msg(&mut stream).await?;
        let (id, dir) = match dir_msg.msg {
            ControlMsg::Directory { assigned_id, dir } => (assigned_id, dir),
            ControlMsg::Reject { reason } => {
                return Err(HarpError::ConfigurationError(reason))
            }
            _ => return Err(HarpError::UnexpectedMessage),
        };
        // make sure the id is one a ring of `world_size` can hold
        WorkerContext::new(id, world_size)?;
        info!("Worker got id {} running at address {}", id, address);

        let mut t = TcpTransport {
            id,
            world_size,
            address,
            sinks: HashMap::new(),
            inboxes: HashMap::new(),
            readers: Vec::new(),
        };

        let mut streams = Vec::with_capacity(world_size.saturating_sub(1));
        // connect to the earlier workers one at a time, in id order
        for (peer_id, peer_addr) in dir {
            streams.push((peer_id, t.connect_peer(peer_id, peer_addr).await?));
        }
        streams.extend(t.accept_new_connections(listener).await?);

        for (peer_id, stream) in streams {
            let (sender, receiver) = mpsc::unbounded_channel();
            t.inboxes.insert(peer_id, Mutex::new(receiver));
            t.readers.push(recv_peer_frames(peer_id, stream, sender));
        }
        info!("Worker {} connected to all {} peers", id, world_size - 1);
        Ok(t)
    }

    /// The worker id assigned by the registration server
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Connects to the worker with `peer_id` running at `peer_addr` and
    /// introduces ourselves, then adds the connection to our directory.
    async fn connect_peer(
        &mut self,
        peer_id: WorkerId,
        peer_addr: SocketAddr,
    ) -> Result<FramedStream<Frame>, HarpError> {
        if self.sinks.contains_key(&peer_id) {
            return Err(HarpError::UnexpectedMessage);
        }
        let socket = TcpStream::connect(&peer_addr).await?;
        socket.set_nodelay(true)?;
        let (reader, writer) = io::split(socket);
        let stream = FramedRead::new(reader, MessageCodec::<Frame>::new());
        let mut sink =
            FramedWrite::new(writer, MessageCodec::<ControlMsg>::new());
        let intro = ControlMsg::Introduction {
            address: self.address,
            world_size: self.world_size,
        };
        send_msg(&mut sink, Message::new(self.id, peer_id, intro)).await?;
        let sink = sink.map_encoder(|c| c.retype::<Frame>());
        self.sinks.insert(peer_id, Mutex::new(sink));
        info!("Connected to id: {} at address: {}", peer_id, peer_addr);
        Ok(stream)
    }

    /// Waits until every worker with a higher id than ours connected to us
    /// and introduced itself.
    async fn accept_new_connections(
        &mut self,
        listener: TcpListener,
    ) -> Result<Vec<(WorkerId, FramedStream<Frame>)>, HarpError> {
        let mut streams = vec![];
        while self.sinks.len() + 1 < self.world_size {
            // wait on connections from new workers
            let (socket, _) = listener.accept().await?;
            socket.set_nodelay(true)?;
            let (reader, writer) = io::split(socket);
            let mut stream =
                FramedRead::new(reader, MessageCodec::<ControlMsg>::new());
            // read the introduction message from the new worker
            let intro = read_msg(&mut stream).await?;
            let (address, world_size) = match intro.msg {
                ControlMsg::Introduction {
                    address,
                    world_size,
                } => (address, world_size),
                _ => return Err(HarpError::UnexpectedMessage),
            };
            if world_size != self.world_size {
                return Err(HarpError::ConfigurationError(format!(
                    "worker {} expects a group of {}, this group has {}",
                    intro.sender_id, world_size, self.world_size
                )));
            }
            let peer_id = intro.sender_id;
            if peer_id <= self.id || peer_id >= self.world_size {
                return Err(HarpError::UnknownId(peer_id));
            }
            if self.sinks.contains_key(&peer_id) {
                return Err(HarpError::UnexpectedMessage);
            }
            let sink = FramedWrite::new(writer, MessageCodec::<Frame>::new());
            self.sinks.insert(peer_id, Mutex::new(sink));
            // frames the peer sent right behind its introduction are already
            // buffered by `stream`, so keep the stream and swap the codec
            let stream = stream.map_decoder(|c| c.retype::<Frame>());
            streams.push((peer_id, stream));
            info!("Connected to id: {} at address: {}", peer_id, address);
        }
        Ok(streams)
    }
}

/// Spawns a `tokio` task that forwards every frame arriving on `stream` to
/// `inbox`, until the connection closes.
fn recv_peer_frames(
    peer_id: WorkerId,
    mut stream: FramedStream<Frame>,
    inbox: UnboundedSender<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(msg) => {
                    if inbox.send(msg.msg).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Dropping link to worker {}: {}", peer_id, e);
                    break;
                }
            }
        }
        debug!("Link to worker {} closed", peer_id);
    })
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(
        &self,
        target_id: WorkerId,
        frame: Frame,
    ) -> Result<(), HarpError> {
        let sink = self
            .sinks
            .get(&target_id)
            .ok_or(HarpError::UnknownId(target_id))?;
        let msg = Message::new(self.id, target_id, frame);
        send_msg(&mut *sink.lock().await, msg).await.map_err(|e| {
            HarpError::PeerFailed {
                worker: target_id,
                reason: e.to_string(),
            }
        })
    }

    async fn recv(&self, sender_id: WorkerId) -> Result<Frame, HarpError> {
        let inbox = self
            .inboxes
            .get(&sender_id)
            .ok_or(HarpError::UnknownId(sender_id))?;
        let frame = inbox.lock().await.recv().await;
        frame.ok_or(HarpError::PeerFailed {
            worker: sender_id,
            reason: "connection closed".to_string(),
        })
    }
}
