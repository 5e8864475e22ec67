//! Video fragment codec and frame fragmentation

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{ensure, read_sender_id};
use crate::constants::VIDEO_HEADER_FIXED;
use crate::error::ProtocolError;

/// One datagram-sized slice of an encoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFragment {
    pub sender_id: String,
    pub timestamp_ms: i64,
    pub seq: u32,
    pub total: u32,
    pub payload: Bytes,
}

/// Encode one fragment with its full header
pub fn encode_video_fragment(
    sender_id: &str,
    timestamp_ms: i64,
    seq: u32,
    total: u32,
    chunk: &[u8],
) -> Bytes {
    let id = sender_id.as_bytes();
    let mut buf = BytesMut::with_capacity(VIDEO_HEADER_FIXED + id.len() + chunk.len());
    buf.put_i32(id.len() as i32);
    buf.put_slice(id);
    buf.put_i64(timestamp_ms);
    buf.put_i32(seq as i32);
    buf.put_i32(total as i32);
    buf.put_slice(chunk);
    buf.freeze()
}

/// Decode a fragment. The payload is everything after the header.
pub fn decode_video_fragment(mut packet: Bytes) -> Result<VideoFragment, ProtocolError> {
    let sender_id = read_sender_id(&mut packet)?;
    ensure(&packet, 8 + 4 + 4)?;
    let timestamp_ms = packet.get_i64();
    let seq = packet.get_i32();
    let total = packet.get_i32();
    if total <= 0 || seq < 0 || seq >= total {
        return Err(ProtocolError::InvalidFragmentIndex { seq, total });
    }

    Ok(VideoFragment {
        sender_id,
        timestamp_ms,
        seq: seq as u32,
        total: total as u32,
        payload: packet,
    })
}

/// Split an encoded frame into `ceil(len / max_payload)` fragments.
///
/// An empty frame yields no fragments.
pub fn fragment_frame(
    sender_id: &str,
    timestamp_ms: i64,
    frame: &[u8],
    max_payload: usize,
) -> Vec<Bytes> {
    let max_payload = max_payload.max(1);
    let total = frame.len().div_ceil(max_payload);

    frame
        .chunks(max_payload)
        .enumerate()
        .map(|(seq, chunk)| {
            encode_video_fragment(sender_id, timestamp_ms, seq as u32, total as u32, chunk)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_roundtrip() {
        let packet = encode_video_fragment("student-7", 1_700_000_000_123, 2, 5, b"jpeg-bytes");
        let fragment = decode_video_fragment(packet).unwrap();

        assert_eq!(fragment.sender_id, "student-7");
        assert_eq!(fragment.timestamp_ms, 1_700_000_000_123);
        assert_eq!(fragment.seq, 2);
        assert_eq!(fragment.total, 5);
        assert_eq!(&fragment.payload[..], b"jpeg-bytes");
    }

    #[test]
    fn test_wire_layout() {
        let packet = encode_video_fragment("ab", 1, 0, 1, &[9]);
        assert_eq!(
            &packet[..],
            &[0, 0, 0, 2, b'a', b'b', 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 9]
        );
    }

    #[test]
    fn test_three_fragment_frame() {
        let frame: Vec<u8> = (0..150_000u32).map(|i| (i % 251) as u8).collect();
        let packets = fragment_frame("cam", 42, &frame, 60_000);
        assert_eq!(packets.len(), 3);

        let fragments: Vec<_> = packets
            .into_iter()
            .map(|p| decode_video_fragment(p).unwrap())
            .collect();
        for (i, fragment) in fragments.iter().enumerate() {
            assert_eq!(fragment.seq, i as u32);
            assert_eq!(fragment.total, 3);
        }
        assert_eq!(fragments[0].payload.len(), 60_000);
        assert_eq!(fragments[2].payload.len(), 30_000);
    }

    #[test]
    fn test_empty_frame_has_no_fragments() {
        assert!(fragment_frame("cam", 0, &[], 1000).is_empty());
    }

    #[test]
    fn test_truncated_header_rejected() {
        let packet = encode_video_fragment("cam", 1, 0, 1, b"x");
        for cut in [0, 3, 6, 10, 17] {
            assert!(matches!(
                decode_video_fragment(packet.slice(..cut)),
                Err(ProtocolError::Truncated { .. })
            ));
        }
    }

    #[test]
    fn test_bad_index_rejected() {
        let packet = encode_video_fragment("cam", 1, 3, 3, b"x");
        assert_eq!(
            decode_video_fragment(packet),
            Err(ProtocolError::InvalidFragmentIndex { seq: 3, total: 3 })
        );

        let packet = encode_video_fragment("cam", 1, 0, 0, b"x");
        assert!(decode_video_fragment(packet).is_err());
    }
}
