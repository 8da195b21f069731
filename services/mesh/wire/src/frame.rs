//! Byte-stuffed framing for the LoRa link layer.
//!
//! A frame is the payload wrapped in `0x7E` sentinels, with every `0x7E` and
//! `0x7D` inside the payload escaped as a two byte sequence:
//!
//! ```text
//! 0x7E ... payload ... 0x7E
//!   0x7E  ->  0x7D 0x5E
//!   0x7D  ->  0x7D 0x5D
//! ```

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame start/end sentinel
pub const FRAME_END: u8 = 0x7E;
/// Escape byte
pub const FRAME_ESC: u8 = 0x7D;
/// Escaped form of `FRAME_END`
pub const ESC_END: u8 = 0x5E;
/// Escaped form of `FRAME_ESC`
pub const ESC_ESC: u8 = 0x5D;

/// Largest frame the radio accepts in one transmission
pub const LORA_MAX_PACKET_LEN: usize = 255;

/// Worst-case encoded size of a payload (every byte escaped plus two sentinels)
pub const fn max_encoded_len(payload_len: usize) -> usize {
    2 * payload_len + 2
}

/// Encode a payload into a frame.
///
/// Fails with [`WireError::Size`] when the worst-case expansion of the payload
/// does not fit in `capacity`, even if the actual encoding would.
pub fn encode(payload: &[u8], capacity: usize) -> Result<Bytes, WireError> {
    let worst = max_encoded_len(payload.len());
    if worst > capacity {
        return Err(WireError::Size(worst));
    }

    let mut buf = BytesMut::with_capacity(worst);
    buf.put_u8(FRAME_END);
    for &byte in payload {
        match byte {
            FRAME_END => buf.put_slice(&[FRAME_ESC, ESC_END]),
            FRAME_ESC => buf.put_slice(&[FRAME_ESC, ESC_ESC]),
            _ => buf.put_u8(byte),
        }
    }
    buf.put_u8(FRAME_END);

    Ok(buf.freeze())
}

/// Decode one complete frame back into its payload.
pub fn decode(frame: &[u8]) -> Result<Bytes, WireError> {
    match frame.first() {
        None => return Err(WireError::Incomplete),
        Some(&FRAME_END) => {}
        Some(_) => return Err(WireError::Delimiter),
    }

    let body = &frame[1..];
    let mut out = BytesMut::with_capacity(body.len());
    let mut bytes = body.iter().enumerate();

    while let Some((i, &byte)) = bytes.next() {
        match byte {
            FRAME_END => {
                // closing sentinel must be the last byte
                if i + 1 != body.len() {
                    return Err(WireError::Malformed);
                }
                return Ok(out.freeze());
            }
            FRAME_ESC => match bytes.next() {
                Some((_, &ESC_END)) => out.put_u8(FRAME_END),
                Some((_, &ESC_ESC)) => out.put_u8(FRAME_ESC),
                Some((_, &other)) => return Err(WireError::InvalidEscape(other)),
                None => return Err(WireError::Incomplete),
            },
            _ => out.put_u8(byte),
        }
    }

    Err(WireError::Incomplete)
}

/// Streaming decoder for bytes arriving from the radio FIFO
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder bounded by the radio packet size
    pub fn new() -> Self {
        Self {
            max_frame_len: LORA_MAX_PACKET_LEN,
        }
    }

    /// Create a decoder with a custom frame size bound
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Decode one frame from a buffer.
    ///
    /// Returns `Ok(None)` until a full frame is buffered. Bytes before the
    /// opening sentinel are discarded, and runs of sentinels are treated as
    /// idle fill. A frame that fails to decode is consumed so the stream can
    /// resynchronise on the next sentinel.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        let Some(start) = buf.iter().position(|&b| b == FRAME_END) else {
            buf.clear();
            return Ok(None);
        };
        buf.advance(start);

        let fill = buf.iter().take_while(|&&b| b == FRAME_END).count();
        if fill > 1 {
            buf.advance(fill - 1);
        }

        let Some(close) = buf[1..].iter().position(|&b| b == FRAME_END) else {
            if buf.len() > self.max_frame_len {
                let len = buf.len();
                buf.clear();
                return Err(WireError::Size(len));
            }
            return Ok(None);
        };

        let frame = buf.split_to(close + 2);
        decode(&frame).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_vectors() {
        let framed = encode(&[0x7E], 4).unwrap();
        assert_eq!(framed.as_ref(), &[0x7E, 0x7D, 0x5E, 0x7E]);

        let framed = encode(&[0x7D], 4).unwrap();
        assert_eq!(framed.as_ref(), &[0x7E, 0x7D, 0x5D, 0x7E]);

        let framed = encode(&[0x01, 0x5E, 0x5D], 8).unwrap();
        assert_eq!(framed.as_ref(), &[0x7E, 0x01, 0x5E, 0x5D, 0x7E]);
    }

    #[test]
    fn test_roundtrip_every_byte_value() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let framed = encode(&payload, max_encoded_len(payload.len())).unwrap();
        let decoded = decode(&framed).unwrap();
        assert_eq!(decoded.as_ref(), payload.as_slice());

        let empty = encode(&[], 2).unwrap();
        assert!(decode(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_encode_rejects_small_capacity() {
        // 3 bytes worst case is 8 even though nothing needs escaping
        assert_eq!(encode(&[1, 2, 3], 7), Err(WireError::Size(8)));
        assert!(encode(&[1, 2, 3], 8).is_ok());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(decode(&[]), Err(WireError::Incomplete));
        assert_eq!(decode(&[0x01, 0x7E]), Err(WireError::Delimiter));
        assert_eq!(decode(&[0x7E, 0x01, 0x02]), Err(WireError::Incomplete));
        assert_eq!(decode(&[0x7E, 0x01, 0x7D]), Err(WireError::Incomplete));
        assert_eq!(
            decode(&[0x7E, 0x7D, 0x11, 0x7E]),
            Err(WireError::InvalidEscape(0x11))
        );
        assert_eq!(decode(&[0x7E, 0x01, 0x7E, 0x02]), Err(WireError::Malformed));
    }

    #[test]
    fn test_streaming_decoder_split_and_noise() {
        let mut decoder = FrameDecoder::new();
        let first = encode(&[0x10, 0x7E, 0x20], 64).unwrap();
        let second = encode(&[0x7D], 64).unwrap();

        let mut buf = BytesMut::new();
        buf.put_slice(&[0xAA, 0xBB]); // line noise
        buf.put_slice(&first[..3]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);

        buf.put_slice(&first[3..]);
        buf.put_slice(&[0x7E, 0x7E]); // idle fill
        buf.put_slice(&second);

        let one = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(one.as_ref(), &[0x10, 0x7E, 0x20]);

        let two = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(two.as_ref(), &[0x7D]);

        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_streaming_decoder_resyncs_after_bad_frame() {
        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        buf.put_slice(&[0x7E, 0x7D, 0x00, 0x7E]);
        buf.put_slice(&encode(&[0x42], 4).unwrap());

        assert_eq!(
            decoder.decode(&mut buf),
            Err(WireError::InvalidEscape(0x00))
        );
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.as_ref(), &[0x42]);
    }

    #[test]
    fn test_streaming_decoder_oversize() {
        let mut decoder = FrameDecoder::with_max_frame_len(8);
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_END);
        buf.put_slice(&[0x01; 16]);
        assert_eq!(decoder.decode(&mut buf), Err(WireError::Size(17)));
        assert!(buf.is_empty());
    }
}
