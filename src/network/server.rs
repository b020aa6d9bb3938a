//! Represents the registration server of a `harp` group.
use crate::error::HarpError;
use crate::network::message::{read_msg, send_msg};
use crate::network::{ControlMsg, Message, MessageCodec};
use crate::worker::WorkerId;
use log::{info, warn};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use tokio::io::split;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

/// The id the `Server` uses as the sender of its messages
const SERVER_ID: WorkerId = WorkerId::MAX;

/// Represents a registration `Server` in a distributed system.
///
/// Workers register with the `Server` by sending it an `Introduction`. Ids
/// are assigned in the order the workers connect, starting at `0`, and every
/// new worker is answered with a `Directory` holding its id and the
/// addresses of all workers that registered before it. The new worker then
/// connects to those workers itself, and waits for the ones after it to
/// connect to it.
#[derive(Debug)]
pub struct Server {
    /// The `address` of this `Server`
    pub address: SocketAddr,
    /// The number of workers this `Server` registers before it returns
    world_size: usize,
    /// A directory which is a map of worker id to its listening address
    directory: BTreeMap<WorkerId, SocketAddr>,
    /// A `TcpListener` which listens for connections from new workers
    listener: TcpListener,
}

impl Server {
    /// Create a new `Server` running on the given `address` in `IP:Port`
    /// format that will register `world_size` workers.
    pub async fn new(
        address: &str,
        world_size: usize,
    ) -> Result<Self, HarpError> {
        if world_size == 0 {
            return Err(HarpError::ConfigurationError(
                "world size must be at least 1".to_string(),
            ));
        }
        let listener = TcpListener::bind(address).await?;
        let address = listener.local_addr()?;
        info!(
            "Registration server running at {} for {} workers",
            address, world_size
        );
        Ok(Server {
            address,
            world_size,
            directory: BTreeMap::new(),
            listener,
        })
    }

    /// A blocking function that registers workers until `world_size` of
    /// them have registered.
    pub async fn accept_new_connections(&mut self) -> Result<(), HarpError> {
        while self.directory.len() < self.world_size {
            // wait on connections from new workers
            let (socket, remote) = self.listener.accept().await?;
            if let Err(e) = self.register(socket).await {
                warn!("Could not register worker at {}: {}", remote, e);
            }
        }
        info!("All {} workers registered", self.world_size);
        Ok(())
    }

    async fn register(&mut self, socket: TcpStream) -> Result<(), HarpError> {
        let (reader, writer) = split(socket);
        let mut stream =
            FramedRead::new(reader, MessageCodec::<ControlMsg>::new());
        let mut sink =
            FramedWrite::new(writer, MessageCodec::<ControlMsg>::new());
        let intro = read_msg(&mut stream).await?;
        let (address, world_size) = match intro.msg {
            ControlMsg::Introduction {
                address,
                world_size,
            } => (address, world_size),
            _ => return Err(HarpError::UnexpectedMessage),
        };

        if world_size != self.world_size {
            let reason = format!(
                "worker expects a group of {}, this group has {}",
                world_size, self.world_size
            );
            let reject = ControlMsg::Reject {
                reason: reason.clone(),
            };
            send_msg(&mut sink, Message::new(SERVER_ID, SERVER_ID, reject))
                .await?;
            return Err(HarpError::ConfigurationError(reason));
        }

        let assigned_id = self.directory.len();
        let dir: Vec<(WorkerId, SocketAddr)> =
            self.directory.iter().map(|(k, v)| (*k, *v)).collect();
        let reg_msg = ControlMsg::Directory { assigned_id, dir };
        send_msg(&mut sink, Message::new(SERVER_ID, assigned_id, reg_msg))
            .await?;
        self.directory.insert(assigned_id, address);
        info!("Registered worker {} at {}", assigned_id, address);
        Ok(())
    }
}
