//! An in-memory `Transport` for a group of workers that live in one process.
use crate::error::HarpError;
use crate::network::{Frame, Transport};
use crate::worker::WorkerId;
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

/// One member of an in-memory group. Every ordered pair of members is linked
/// by its own unbounded channel, so sending never waits on the receiver and
/// frames between two members stay in order.
#[derive(Debug)]
pub struct LocalTransport {
    /// The id of the member that owns this transport
    id: WorkerId,
    /// `senders[t]` delivers to member `t`
    senders: Vec<UnboundedSender<Frame>>,
    /// `receivers[s]` yields what member `s` sent us
    receivers: Vec<Mutex<UnboundedReceiver<Frame>>>,
}

impl LocalTransport {
    /// Creates the transports of a group of `world_size` members, indexed by
    /// worker id.
    pub fn group(world_size: usize) -> Vec<LocalTransport> {
        let mut senders: Vec<Vec<UnboundedSender<Frame>>> =
            (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
        let mut receivers: Vec<Vec<Mutex<UnboundedReceiver<Frame>>>> =
            (0..world_size).map(|_| Vec::with_capacity(world_size)).collect();
        // the link from `s` to `t` ends up in `senders[s][t]` and
        // `receivers[t][s]`
        for s in 0..world_size {
            for t in 0..world_size {
                let (tx, rx) = mpsc::unbounded_channel();
                senders[s].push(tx);
                receivers[t].push(Mutex::new(rx));
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(id, (senders, receivers))| LocalTransport {
                id,
                senders,
                receivers,
            })
            .collect()
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(
        &self,
        target_id: WorkerId,
        frame: Frame,
    ) -> Result<(), HarpError> {
        let sender = self
            .senders
            .get(target_id)
            .ok_or(HarpError::UnknownId(target_id))?;
        sender.send(frame).map_err(|_| HarpError::PeerFailed {
            worker: target_id,
            reason: "worker has left the group".to_string(),
        })
    }

    async fn recv(&self, sender_id: WorkerId) -> Result<Frame, HarpError> {
        let receiver = self
            .receivers
            .get(sender_id)
            .ok_or(HarpError::UnknownId(sender_id))?;
        let frame = receiver.lock().await.recv().await;
        frame.ok_or(HarpError::PeerFailed {
            worker: sender_id,
            reason: "worker has left the group".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Channel;
    use bytes::Bytes;

    fn collective(seq: u64) -> Frame {
        Frame::Collective {
            channel: Channel::Barrier,
            seq,
            round: 0,
            payload: Bytes::new(),
        }
    }

    #[tokio::test]
    async fn test_links_are_ordered_and_directed() {
        let group = LocalTransport::group(3);
        assert_eq!(group.len(), 3);
        assert_eq!(group[2].id(), 2);
        group[0].send(1, collective(0)).await.unwrap();
        group[0].send(1, collective(1)).await.unwrap();
        group[2].send(1, Frame::Done).await.unwrap();
        assert_eq!(group[1].recv(0).await.unwrap(), collective(0));
        assert_eq!(group[1].recv(2).await.unwrap(), Frame::Done);
        assert_eq!(group[1].recv(0).await.unwrap(), collective(1));
    }

    #[tokio::test]
    async fn test_unknown_and_departed_peers() {
        let mut group = LocalTransport::group(2);
        assert!(matches!(
            group[0].send(5, Frame::Done).await,
            Err(HarpError::UnknownId(5))
        ));
        let departed = group.pop().unwrap();
        drop(departed);
        assert!(matches!(
            group[0].send(1, Frame::Done).await,
            Err(HarpError::PeerFailed { worker: 1, .. })
        ));
        assert!(matches!(
            group[0].recv(1).await,
            Err(HarpError::PeerFailed { worker: 1, .. })
        ));
    }
}
