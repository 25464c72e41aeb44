//! Frame encoder and streaming decoder.
//!
//! The codec is the lowest layer of the stack: it turns raw transport bytes
//! into [`Frame`]s and back, implementing the `tokio_util`
//! [`codec::Decoder`]/[`codec::Encoder`] seam so it can drive a
//! [`Framed`](tokio_util::codec::Framed) transport.
//!
//! # Incremental decoding
//!
//! TCP segments split and coalesce frame boundaries arbitrarily, so
//! [`Decoder::decode`] is written against a caller-owned buffer:
//!
//! - `Ok(Some(frame))` consumed exactly one frame from the front of the
//!   buffer; call again to drain coalesced frames.
//! - `Ok(None)` means no complete frame yet. Nothing is consumed: every byte
//!   stays in the buffer until a whole frame (header and payload) is
//!   present, so feeding a stream in arbitrary slices yields the same frame
//!   sequence as feeding it whole.
//! - `Err(_)` means malformed input. The offending bytes stay in the buffer;
//!   frames returned by earlier calls are unaffected.
//!
//! The decoder is direction-agnostic: it unmasks whatever arrives masked and
//! passes unmasked frames through. Masking *policy* (client frames must be
//! masked) belongs to the connection, which also owns control-frame size and
//! fragmentation rules.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec;

use crate::{
    WsError,
    frame::{Frame, OpCode},
    mask::apply_mask,
};

/// Largest possible frame header: 2 fixed bytes, 8 length bytes, 4 mask
/// bytes.
const MAX_HEADER_SIZE: usize = 14;

/// Default ceiling for a single frame payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Streaming decoder for WebSocket frames.
pub struct Decoder {
    max_payload: usize,
}

impl Decoder {
    /// Creates a decoder that rejects frames whose declared payload length
    /// exceeds `max_payload` (with [`WsError::FrameTooLarge`], before any
    /// payload is buffered).
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }

        let first = src[0];
        let second = src[1];

        if first & 0b0111_0000 != 0 {
            return Err(WsError::ReservedBitsNotZero);
        }

        let fin = first & 0b1000_0000 != 0;
        let opcode = OpCode::try_from(first & 0b0000_1111)?;
        let masked = second & 0b1000_0000 != 0;
        let length_code = second & 0x7F;

        let extra = match length_code {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + extra + if masked { 4 } else { 0 };
        if src.len() < header_len {
            return Ok(None);
        }

        let payload_len: u64 = match extra {
            0 => u64::from(length_code),
            2 => u64::from(u16::from_be_bytes([src[2], src[3]])),
            _ => u64::from_be_bytes([
                src[2], src[3], src[4], src[5], src[6], src[7], src[8], src[9],
            ]),
        };
        if payload_len > self.max_payload as u64 {
            return Err(WsError::FrameTooLarge);
        }
        let payload_len = payload_len as usize;

        // Nothing is consumed until the whole frame is buffered, so an
        // incomplete frame leaves every input byte in place for the retry.
        if src.len() < header_len + payload_len {
            src.reserve(header_len + payload_len - src.len());
            return Ok(None);
        }

        src.advance(2 + extra);
        let mask = if masked {
            Some(src.get_u32().to_be_bytes())
        } else {
            None
        };

        let mut payload = src.split_to(payload_len);
        if let Some(key) = mask {
            apply_mask(&mut payload, key);
        }

        Ok(Some(Frame::new(fin, opcode, mask, payload.freeze())))
    }
}

/// Encoder serializing [`Frame`]s into wire bytes.
///
/// FIN comes from the frame, RSV bits are always zero, and the MASK bit is
/// set only when the frame carries an explicit key; frames built by the
/// connection never do, so server-to-client traffic goes out unmasked per
/// RFC 6455.
#[derive(Default)]
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        let len = frame.payload.len();
        dst.reserve(MAX_HEADER_SIZE + len);

        let first = (u8::from(frame.fin) << 7) | u8::from(frame.opcode);
        let mask_bit = if frame.mask.is_some() { 0x80 } else { 0 };

        dst.put_u8(first);
        if len <= 125 {
            dst.put_u8(mask_bit | len as u8);
        } else if len <= 65535 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match frame.mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.extend_from_slice(&frame.payload);
                apply_mask(&mut dst[start..], key);
            }
            None => dst.extend_from_slice(&frame.payload),
        }

        Ok(())
    }
}

/// Combined encoder/decoder for driving a `Framed` transport.
pub struct Codec {
    decoder: Decoder,
    encoder: Encoder,
}

impl Codec {
    /// Creates a codec with the given single-frame payload ceiling.
    pub fn new(max_payload: usize) -> Self {
        Self {
            decoder: Decoder::new(max_payload),
            encoder: Encoder,
        }
    }
}

impl codec::Decoder for Codec {
    type Item = Frame;
    type Error = WsError;

    #[inline]
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        self.decoder.decode(src)
    }
}

impl codec::Encoder<Frame> for Codec {
    type Error = WsError;

    #[inline]
    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        self.encoder.encode(frame, dst)
    }
}

/// Encodes a single frame to fresh bytes. Test and handshake-response
/// plumbing convenience.
pub fn encode(frame: Frame) -> Result<Bytes, WsError> {
    use tokio_util::codec::Encoder as _;

    let mut buf = BytesMut::new();
    Encoder.encode(frame, &mut buf)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use tokio_util::codec::{Decoder as _, Encoder as _};

    use super::*;
    use crate::close::CloseCode;

    fn decode_all(buf: &mut BytesMut) -> Vec<Frame> {
        let mut decoder = Decoder::default();
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn roundtrip_every_data_opcode() {
        for opcode in [
            OpCode::Text,
            OpCode::Binary,
            OpCode::Ping,
            OpCode::Pong,
            OpCode::Continuation,
        ] {
            let payload = Bytes::from(vec![0x5a; 300]);
            let mut buf = BytesMut::new();
            Encoder
                .encode(Frame::new(true, opcode, None, payload.clone()), &mut buf)
                .unwrap();

            let frames = decode_all(&mut buf);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].opcode(), opcode);
            assert!(frames[0].is_fin());
            assert!(!frames[0].is_masked());
            assert_eq!(frames[0].payload(), &payload);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn roundtrip_close_with_code_and_reason() {
        let mut buf = BytesMut::new();
        Encoder
            .encode(Frame::close(CloseCode::NORMAL, "Normal closure"), &mut buf)
            .unwrap();

        let frame = Decoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Close);
        assert_eq!(frame.close_code(), Some(CloseCode::NORMAL));
        assert_eq!(frame.close_reason(), b"Normal closure");
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_payload_is_a_two_byte_frame() {
        for opcode in [OpCode::Text, OpCode::Binary, OpCode::Ping, OpCode::Pong] {
            let mut buf = BytesMut::new();
            Encoder
                .encode(Frame::new(true, opcode, None, Bytes::new()), &mut buf)
                .unwrap();
            assert_eq!(buf.len(), 2);

            let frame = Decoder::default().decode(&mut buf).unwrap().unwrap();
            assert!(frame.payload().is_empty());
        }
    }

    #[test]
    fn length_prefix_boundaries() {
        // (payload length, expected header length)
        for (len, header) in [(125usize, 2usize), (126, 4), (65535, 4), (65536, 10)] {
            let mut buf = BytesMut::new();
            Encoder
                .encode(Frame::binary(vec![0u8; len]), &mut buf)
                .unwrap();
            assert_eq!(buf.len(), header + len, "payload len {len}");
            match header {
                2 => assert_eq!(buf[1], len as u8),
                4 => {
                    assert_eq!(buf[1], 126);
                    assert_eq!(u16::from_be_bytes([buf[2], buf[3]]) as usize, len);
                }
                _ => {
                    assert_eq!(buf[1], 127);
                    let mut be = [0u8; 8];
                    be.copy_from_slice(&buf[2..10]);
                    assert_eq!(u64::from_be_bytes(be) as usize, len);
                }
            }

            let frame = Decoder::new(1 << 20).decode(&mut buf).unwrap().unwrap();
            assert_eq!(frame.payload().len(), len);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn masked_frame_unmasks_to_plaintext() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let mut buf = BytesMut::new();
        Encoder
            .encode(Frame::text("Client message").with_mask(key), &mut buf)
            .unwrap();

        // Header: FIN+text, then MASK bit with a 14-byte length.
        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x8E);
        assert_eq!(&buf[2..6], &key);
        assert_ne!(&buf[6..], b"Client message".as_slice());

        let frame = Decoder::default().decode(&mut buf).unwrap().unwrap();
        assert!(frame.is_masked());
        assert_eq!(frame.mask(), Some(key));
        assert_eq!(frame.payload().as_ref(), b"Client message");
    }

    #[test]
    fn concatenated_frames_decode_in_order() {
        let mut buf = BytesMut::new();
        Encoder.encode(Frame::text("Hello"), &mut buf).unwrap();
        Encoder.encode(Frame::text("World"), &mut buf).unwrap();

        let frames = decode_all(&mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload().as_ref(), b"Hello");
        assert_eq!(frames[1].payload().as_ref(), b"World");
        assert!(buf.is_empty());
    }

    #[test]
    fn strict_prefixes_preserve_all_bytes() {
        let mut whole = BytesMut::new();
        Encoder
            .encode(Frame::binary(vec![1, 2, 3, 4, 5]).with_mask([9, 9, 9, 9]), &mut whole)
            .unwrap();

        let mut decoder = Decoder::default();
        for cut in 0..whole.len() {
            let mut buf = BytesMut::from(&whole[..cut]);
            assert!(decoder.decode(&mut buf).unwrap().is_none(), "cut {cut}");
            assert_eq!(&buf[..], &whole[..cut], "cut {cut}: bytes were consumed");
        }
    }

    #[test]
    fn split_frame_across_segments() {
        let mut decoder = Decoder::default();
        let mut buf = BytesMut::from(&[0x82u8, 0x05, b'H', b'e', b'l'][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 5);

        buf.extend_from_slice(b"lo");
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Binary);
        assert_eq!(frame.payload().as_ref(), b"Hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn byte_conservation_across_any_split() {
        let mut whole = BytesMut::new();
        Encoder.encode(Frame::text("one"), &mut whole).unwrap();
        Encoder
            .encode(Frame::binary(vec![0u8; 200]).with_mask([1, 2, 3, 4]), &mut whole)
            .unwrap();
        Encoder.encode(Frame::ping("pi"), &mut whole).unwrap();

        let mut reference = whole.clone();
        let expected = decode_all(&mut reference);
        assert_eq!(expected.len(), 3);

        for cut in 0..=whole.len() {
            let mut decoder = Decoder::default();
            let mut buf = BytesMut::from(&whole[..cut]);
            let mut frames = Vec::new();
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                frames.push(frame);
            }
            buf.extend_from_slice(&whole[cut..]);
            while let Some(frame) = decoder.decode(&mut buf).unwrap() {
                frames.push(frame);
            }

            assert_eq!(frames.len(), expected.len(), "cut {cut}");
            for (got, want) in frames.iter().zip(&expected) {
                assert_eq!(got.opcode(), want.opcode(), "cut {cut}");
                assert_eq!(got.payload(), want.payload(), "cut {cut}");
            }
            assert!(buf.is_empty(), "cut {cut}");
        }
    }

    #[test]
    fn reserved_bits_are_rejected() {
        for rsv in [0x40u8, 0x20, 0x10, 0x70] {
            let mut buf = BytesMut::from(&[0x80 | rsv | 0x1, 0x00][..]);
            assert!(matches!(
                Decoder::default().decode(&mut buf),
                Err(WsError::ReservedBitsNotZero)
            ));
        }
    }

    #[test]
    fn reserved_opcodes_are_rejected() {
        for opcode in [0x3u8, 0x4, 0x5, 0x6, 0x7, 0xB, 0xC, 0xD, 0xE, 0xF] {
            let mut buf = BytesMut::from(&[0x80 | opcode, 0x00][..]);
            assert!(matches!(
                Decoder::default().decode(&mut buf),
                Err(WsError::InvalidOpCode(b)) if b == opcode
            ));
        }
    }

    #[test]
    fn malformed_bytes_after_good_frame_stay_in_buffer() {
        let mut buf = BytesMut::new();
        Encoder.encode(Frame::text("ok"), &mut buf).unwrap();
        // A frame with RSV1 set follows the valid one.
        buf.extend_from_slice(&[0xC1, 0x00]);

        let mut decoder = Decoder::default();
        let first = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload().as_ref(), b"ok");

        // The already-surfaced frame is unaffected; the malformed header is
        // still at the front of the buffer for the erroring call.
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(WsError::ReservedBitsNotZero)
        ));
        assert_eq!(&buf[..], &[0xC1, 0x00]);
    }

    #[test]
    fn oversized_declared_length_is_rejected_before_buffering() {
        let mut decoder = Decoder::new(16);
        // 7-bit length of 17 with only the header present.
        let mut buf = BytesMut::from(&[0x82u8, 17][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(WsError::FrameTooLarge)
        ));

        // 64-bit length far past the ceiling.
        let mut buf = BytesMut::from(&[0x82u8, 127][..]);
        buf.extend_from_slice(&(1u64 << 40).to_be_bytes());
        assert!(matches!(
            Decoder::default().decode(&mut buf),
            Err(WsError::FrameTooLarge)
        ));
    }

    #[test]
    fn ping_payload_over_125_is_not_a_codec_error() {
        // RFC 6455 §5.5 caps control payloads at 125 bytes, but that policy
        // belongs to the connection; the codec passes the frame through.
        let mut buf = BytesMut::new();
        Encoder
            .encode(Frame::ping(vec![0u8; 200]), &mut buf)
            .unwrap();
        let frame = Decoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Ping);
        assert_eq!(frame.payload().len(), 200);
    }

    #[test]
    fn one_byte_close_payload_decodes_without_code() {
        let mut buf = BytesMut::from(&[0x88u8, 0x01, 0x03][..]);
        let frame = Decoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode(), OpCode::Close);
        assert!(frame.close_code().is_none());
    }
}
