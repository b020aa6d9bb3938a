//! Defines how messages are framed when sent to other nodes over TCP.
use crate::error::HarpError;
use crate::network::{Message, MessageCodec};
use crate::worker::WorkerId;
use bincode::{deserialize, serialize};
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio_util::codec::{
    Decoder, Encoder, FramedWrite, LengthDelimitedCodec,
};

const MAX_FRAME_SIZE: usize = 1_073_741_824; // 1 GB

impl<T> Message<T> {
    /// Creates a new `Message`.
    pub fn new(sender_id: WorkerId, target_id: WorkerId, msg: T) -> Self {
        Message {
            sender_id,
            target_id,
            msg,
        }
    }
}

impl<T> MessageCodec<T> {
    /// Creates a new `MessageCodec`
    pub(crate) fn new() -> Self {
        let codec = LengthDelimitedCodec::builder()
            .max_frame_length(MAX_FRAME_SIZE)
            .new_codec();
        MessageCodec {
            phantom: std::marker::PhantomData,
            codec,
        }
    }

    /// Reuse the framing state of this codec for messages of another type
    pub(crate) fn retype<U>(self) -> MessageCodec<U> {
        MessageCodec {
            phantom: std::marker::PhantomData,
            codec: self.codec,
        }
    }
}

impl<T: DeserializeOwned> Decoder for MessageCodec<T> {
    type Item = Message<T>;
    type Error = HarpError;
    /// Decodes a message by reading the length of the message (at the start of
    /// a frame) and then reading that many bytes from a buffer to complete the
    /// frame.
    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        match self.codec.decode(src)? {
            Some(data) => Ok(Some(deserialize(&data)?)),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<Message<T>> for MessageCodec<T> {
    type Error = HarpError;
    /// Encodes a message by writing the length of the serialized message at
    /// the start of a frame, and then writing that many bytes into a buffer
    /// to be sent.
    fn encode(
        &mut self,
        item: Message<T>,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let serialized = serialize(&item)?;
        Ok(self.codec.encode(Bytes::from(serialized), dst)?)
    }
}

/// Reads the next message from the given `reader`
pub(crate) async fn read_msg<T, S>(
    reader: &mut S,
) -> Result<Message<T>, HarpError>
where
    S: Stream<Item = Result<Message<T>, HarpError>> + Unpin,
{
    match reader.next().await {
        None => Err(HarpError::StreamClosed),
        Some(x) => x,
    }
}

/// Sends the given `message` over the given `sink`
pub(crate) async fn send_msg<T: Serialize, W: AsyncWrite + Unpin>(
    sink: &mut FramedWrite<W, MessageCodec<T>>,
    message: Message<T>,
) -> Result<(), HarpError> {
    sink.send(message).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Channel, ControlMsg, Frame};

    #[test]
    fn test_codec_frames_messages() {
        let mut codec = MessageCodec::<Frame>::new();
        let mut buf = BytesMut::new();
        let frame = Frame::Collective {
            channel: Channel::Table(1),
            seq: 4,
            round: 0,
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        codec
            .encode(Message::new(0, 1, frame.clone()), &mut buf)
            .unwrap();
        codec.encode(Message::new(0, 1, Frame::Done), &mut buf).unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.sender_id, 0);
        assert_eq!(first.target_id, 1);
        assert_eq!(first.msg, frame);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.msg, Frame::Done);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_waits_for_whole_frame() {
        let mut codec = MessageCodec::<ControlMsg>::new();
        let mut buf = BytesMut::new();
        let msg = ControlMsg::Reject {
            reason: "full".to_string(),
        };
        codec.encode(Message::new(0, 0, msg.clone()), &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert_eq!(codec.decode(&mut partial).unwrap().unwrap().msg, msg);
    }
}
