//! Frame codec.
//!
//! A frame is the two-byte header `[type, subtype]` followed by the bincode
//! encoding of the message. Decoding checks the header against the payload.

use crate::error::ProtocolError;
use crate::message::{Message, LOOKUP_MESSAGE_TYPE};
use bytes::{BufMut, Bytes, BytesMut};

/// Header length in bytes.
pub const HEADER_LEN: usize = 2;

/// Encode a message into a frame.
pub fn encode(msg: &Message) -> Result<Bytes, ProtocolError> {
    let payload = bincode::serialize(msg)?;
    let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
    frame.put_u8(msg.message_type());
    frame.put_u8(msg.subtype());
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Decode a frame produced by [`encode`].
pub fn decode(frame: &[u8]) -> Result<Message, ProtocolError> {
    if frame.len() < HEADER_LEN {
        return Err(ProtocolError::FrameTooShort(frame.len()));
    }
    if frame[0] != LOOKUP_MESSAGE_TYPE {
        return Err(ProtocolError::UnknownType(frame[0]));
    }
    let msg: Message = bincode::deserialize(&frame[HEADER_LEN..])?;
    if msg.subtype() != frame[1] {
        return Err(ProtocolError::SubtypeMismatch {
            header: frame[1],
            payload: msg.subtype(),
        });
    }
    Ok(msg)
}
