use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// The only version this broker speaks. Anything else on the wire is
/// rejected outright.
pub const VERSION: u8 = 0;

/// `version` + `op` + 16-bit big-endian length.
pub const HEADER_LEN: usize = 4;

/// The length field is a `u16`, so payloads cannot exceed this.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame version mismatch: got {got}, expected {VERSION}")]
    VersionMismatch { got: u8 },
    #[error("payload of {len} bytes exceeds the maximum of {MAX_PAYLOAD_LEN}")]
    PayloadTooLarge { len: usize },
    #[error("connection closed mid-frame: {0} bytes trailing")]
    ShortRead(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One length-prefixed command frame. `op` is a raw byte rather than [`Op`]
/// because server-originated frames don't carry a meaningful opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub op: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(op: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            op,
            payload: payload.into(),
        }
    }

    /// Builds a server-originated frame, whose op byte is insignificant.
    pub fn server_frame(payload: impl Into<Bytes>) -> Self {
        Self::new(0, payload)
    }
}

/// Framing for [`Frame`] over any `AsyncRead + AsyncWrite`, for use with
/// `tokio_util::codec::Framed` (or split `FramedRead`/`FramedWrite` halves).
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let version = src[0];
        if version != VERSION {
            // Consume the whole buffer so the caller can't get stuck retrying
            // the same malformed header forever.
            src.clear();
            return Err(ProtocolError::VersionMismatch { got: version });
        }
        let op = src[1];
        let len = u16::from_be_bytes([src[2], src[3]]) as usize;

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { op, payload }))
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Frame>, ProtocolError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(ProtocolError::ShortRead(src.len())),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = frame.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge { len });
        }
        dst.reserve(HEADER_LEN + len);
        dst.put_u8(VERSION);
        dst.put_u8(frame.op);
        dst.put_u16(len as u16);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(op: u8, payload: &[u8]) -> Frame {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(op, Bytes::copy_from_slice(payload)), &mut buf)
            .unwrap();
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn encodes_header_big_endian() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(2, Bytes::from_static(b"hi")), &mut buf)
            .unwrap();
        assert_eq!(&buf[..], &[0, 2, 0, 2, b'h', b'i']);
    }

    #[test]
    fn roundtrips_arbitrary_payload() {
        let frame = roundtrip(3, b"{\"queueName\":\"q\"}");
        assert_eq!(frame.op, 3);
        assert_eq!(&frame.payload[..], b"{\"queueName\":\"q\"}");
    }

    #[test]
    fn roundtrips_empty_payload() {
        let frame = roundtrip(5, b"");
        assert_eq!(frame.payload.len(), 0);
    }

    #[test]
    fn rejects_version_mismatch() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[1u8, 2, 0, 0][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::VersionMismatch { got: 1 }));
    }

    #[test]
    fn waits_for_more_bytes_on_partial_header() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0u8, 2][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn waits_for_more_bytes_on_partial_payload() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0u8, 2, 0, 4, b'a', b'b'][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_eof_on_truncated_frame_is_short_read() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0u8, 2, 0, 4, b'a', b'b'][..]);
        let err = codec.decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::ShortRead(2)));
    }

    #[test]
    fn decode_eof_on_clean_boundary_is_none() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        let err = codec.encode(Frame::new(2, payload), &mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
    }
}
