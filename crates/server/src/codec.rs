//! The wire framing decided in `SPEC_FULL.md` §3: a `[XXXXXXXX]` fixed-width
//! hex length prefix (spec.md §6 "External Interfaces") around an
//! `rmp_serde` MessagePack payload, one frame per [`ClientMessage`]/
//! [`ServerMessage`].

use bytes::{Buf, BufMut, BytesMut};
use fusex_common::wire::{ClientMessage, ServerMessage};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 10; // '[' + 8 hex digits + ']'
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame header")]
    BadHeader,
    #[error("frame of {0} bytes exceeds the {1}-byte limit")]
    TooLarge(usize, usize),
    #[error("msgpack encode failure: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failure: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One framed connection's codec. Decodes incoming [`ClientMessage`]s,
/// encodes outgoing [`ServerMessage`]s — the two directions never share a
/// message type, so one struct implements both traits.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = ClientMessage;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let header = &src[..HEADER_LEN];
        if header[0] != b'[' || header[HEADER_LEN - 1] != b']' {
            return Err(FrameError::BadHeader);
        }
        let hex = std::str::from_utf8(&header[1..HEADER_LEN - 1]).map_err(|_| FrameError::BadHeader)?;
        let body_len = usize::from_str_radix(hex, 16).map_err(|_| FrameError::BadHeader)?;
        if body_len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(body_len, MAX_FRAME_LEN));
        }

        let frame_len = HEADER_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(body_len);
        let message = rmp_serde::from_read_ref(&body)?;
        Ok(Some(message))
    }
}

impl Encoder<ServerMessage> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = rmp_serde::to_vec(&item)?;
        if body.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(body.len(), MAX_FRAME_LEN));
        }
        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(b'[');
        dst.put_slice(format!("{:08x}", body.len()).as_bytes());
        dst.put_u8(b']');
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusex_common::wire::{Ack, Response};

    #[test]
    fn encodes_header_and_body_matching_the_length_prefix() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        let message = ServerMessage::Response(Response::Ack(Ack::ok(42)));
        codec.encode(message, &mut buf).unwrap();

        assert_eq!(buf[0], b'[');
        assert_eq!(buf[HEADER_LEN - 1], b']');
        let hex = std::str::from_utf8(&buf[1..HEADER_LEN - 1]).unwrap();
        let body_len = usize::from_str_radix(hex, 16).unwrap();
        assert_eq!(body_len, buf.len() - HEADER_LEN);

        let decoded: ServerMessage = rmp_serde::from_read_ref(&buf[HEADER_LEN..]).unwrap();
        match decoded {
            ServerMessage::Response(Response::Ack(ack)) => assert_eq!(ack.transactionid, 42),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"[0000"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"XXXXXXXXXX"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::BadHeader)));
    }
}
