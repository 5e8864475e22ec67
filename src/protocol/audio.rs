//! Audio unit codec. One captured buffer per datagram, never fragmented.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{ensure, read_sender_id};
use crate::constants::AUDIO_HEADER_FIXED;
use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUnit {
    pub sender_id: String,
    pub timestamp_ms: i64,
    /// 16-bit little-endian PCM
    pub payload: Bytes,
}

pub fn encode_audio_unit(sender_id: &str, timestamp_ms: i64, pcm: &[u8]) -> Bytes {
    let id = sender_id.as_bytes();
    let mut buf = BytesMut::with_capacity(AUDIO_HEADER_FIXED + id.len() + pcm.len());
    buf.put_i32(id.len() as i32);
    buf.put_slice(id);
    buf.put_i64(timestamp_ms);
    buf.put_slice(pcm);
    buf.freeze()
}

pub fn decode_audio_unit(mut packet: Bytes) -> Result<AudioUnit, ProtocolError> {
    let sender_id = read_sender_id(&mut packet)?;
    ensure(&packet, 8)?;
    let timestamp_ms = packet.get_i64();

    Ok(AudioUnit {
        sender_id,
        timestamp_ms,
        payload: packet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_roundtrip() {
        let pcm: Vec<u8> = (0..6400).map(|i| (i % 256) as u8).collect();
        let unit = decode_audio_unit(encode_audio_unit("proctor", 99, &pcm)).unwrap();
        assert_eq!(unit.sender_id, "proctor");
        assert_eq!(unit.timestamp_ms, 99);
        assert_eq!(&unit.payload[..], &pcm[..]);
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let packet = encode_audio_unit("p", 1, &[]);
        assert!(decode_audio_unit(packet.slice(..packet.len() - 1)).is_err());
    }
}
