//! Envelope packing and length framing for both transport channels.
//!
//! Reliable channel: `u32 BE body length || u32 BE msg type || payload`.
//! Datagram channel: `u32 BE msg type || payload`, one envelope per packet.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum accepted envelope size on the reliable channel. Anything outside
/// (0, 64 KiB] closes the session.
pub const MAX_PACKET_SIZE: usize = 64 * 1024;
/// Size of the big-endian length prefix on the reliable channel.
pub const FRAME_HEADER_LEN: usize = 4;
/// Size of the message type tag at the front of every envelope.
pub const ENVELOPE_HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("envelope too short ({0} bytes)")]
    Truncated(usize),
    #[error("payload decode failed: {0}")]
    Payload(#[from] postcard::Error),
}

/// Packs a message into a bare envelope, as sent over the datagram channel.
pub fn encode_envelope<T: Serialize>(msg_type: u32, message: &T) -> Result<Bytes, CodecError> {
    let payload = postcard::to_allocvec(message)?;
    let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
    buf.put_u32(msg_type);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Packs a message into an envelope with the length prefix in front, ready
/// for the reliable stream.
pub fn encode_frame<T: Serialize>(msg_type: u32, message: &T) -> Result<Bytes, CodecError> {
    let payload = postcard::to_allocvec(message)?;
    let body_len = ENVELOPE_HEADER_LEN + payload.len();
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + body_len);
    buf.put_u32(body_len as u32);
    buf.put_u32(msg_type);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Splits an envelope into its type tag and the raw payload bytes.
pub fn split_envelope(body: &[u8]) -> Result<(u32, &[u8]), CodecError> {
    if body.len() < ENVELOPE_HEADER_LEN {
        return Err(CodecError::Truncated(body.len()));
    }
    let mut header = &body[..ENVELOPE_HEADER_LEN];
    let msg_type = header.get_u32();
    Ok((msg_type, &body[ENVELOPE_HEADER_LEN..]))
}

/// Decodes an envelope payload into the concrete message type.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    Ok(postcard::from_bytes(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{LoginRequest, MSG_C2S_LOGIN};

    #[test]
    fn frame_carries_length_and_envelope() {
        let request = LoginRequest {
            player_name: "tester".into(),
        };
        let frame = encode_frame(MSG_C2S_LOGIN, &request).unwrap();
        let body_len = u32::from_be_bytes(frame[..4].try_into().unwrap()) as usize;
        assert_eq!(body_len, frame.len() - FRAME_HEADER_LEN);

        let (msg_type, payload) = split_envelope(&frame[FRAME_HEADER_LEN..]).unwrap();
        assert_eq!(msg_type, MSG_C2S_LOGIN);
        let decoded: LoginRequest = decode_payload(payload).unwrap();
        assert_eq!(decoded.player_name, "tester");
    }

    #[test]
    fn envelope_matches_frame_body() {
        let request = LoginRequest {
            player_name: "x".into(),
        };
        let envelope = encode_envelope(MSG_C2S_LOGIN, &request).unwrap();
        let frame = encode_frame(MSG_C2S_LOGIN, &request).unwrap();
        assert_eq!(&frame[FRAME_HEADER_LEN..], &envelope[..]);
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        assert!(split_envelope(&[0, 0, 1]).is_err());
        assert!(split_envelope(&[]).is_err());
        // Exactly the header is a valid envelope with an empty payload.
        let (msg_type, payload) = split_envelope(&[0, 0, 0, 9]).unwrap();
        assert_eq!(msg_type, 9);
        assert!(payload.is_empty());
    }
}
