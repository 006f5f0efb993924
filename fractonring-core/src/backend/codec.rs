use bytes::BytesMut;
use redis_protocol::resp2::types::BytesFrame;
use redis_protocol::resp2::{decode, encode};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Hard cap on a single buffered reply.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// RESP2 framing for backend connections. Used on both sides of a socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespCodec;

impl RespCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for RespCodec {
    type Item = BytesFrame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesFrame>, io::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match decode::decode_bytes_mut(src) {
            Ok(Some((frame, _, _))) => Ok(Some(frame)),
            Ok(None) if src.len() > MAX_FRAME_BYTES => {
                Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        }
    }
}

impl Encoder<BytesFrame> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, item: BytesFrame, dst: &mut BytesMut) -> Result<(), io::Error> {
        encode::extend_encode(dst, &item, false)
            .map(|_| ())
            .map_err(|e| io::Error::other(format!("encode error: {e:?}")))
    }
}
