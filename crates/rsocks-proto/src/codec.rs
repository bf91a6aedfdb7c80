//! Codec for reading and writing frames on the rendezvous connection

use crate::frame::{Frame, FrameError};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

/// Frame codec for use with `FramedRead` / `FramedWrite`
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        Frame::decode(src)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        item.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FrameType;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[tokio::test]
    async fn test_frames_survive_a_pipe() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, FrameCodec);
        let mut reader = FramedRead::new(server, FrameCodec);

        let payload = Bytes::from(vec![7u8; 1000]);
        let sent = payload.clone();
        let send_task = tokio::spawn(async move {
            writer.send(Frame::syn(1)).await.unwrap();
            writer.send(Frame::data(1, sent)).await.unwrap();
            writer.send(Frame::fin(1)).await.unwrap();
        });

        let syn = reader.next().await.unwrap().unwrap();
        assert!(syn.flags.has_syn());

        let data = reader.next().await.unwrap().unwrap();
        assert_eq!(data.frame_type, FrameType::Data);
        assert_eq!(data.payload, payload);

        let fin = reader.next().await.unwrap().unwrap();
        assert!(fin.flags.has_fin());

        send_task.await.unwrap();
        assert!(reader.next().await.is_none());
    }

    #[test]
    fn test_decoder_waits_for_full_frame() {
        let mut codec = FrameCodec;
        let mut encoded = BytesMut::new();
        codec
            .encode(Frame::data(9, Bytes::from_static(b"xyz")), &mut encoded)
            .unwrap();

        let mut partial = encoded.split_to(5);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(encoded);
        let frame = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(frame.stream_id, 9);
    }
}
