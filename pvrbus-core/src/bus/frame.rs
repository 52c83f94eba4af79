//! Frame layout for the TCP transport
//!
//! Frames are delimited by `LengthDelimitedCodec`; inside a frame:
//! - message: `[u16 BE topic length][topic][payload]`
//! - subscription: `[0x01][prefix]`

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::BusError;
use super::message::BusMessage;

const SUBSCRIBE: u8 = 0x01;

/// Encode a message frame
pub(crate) fn encode_message(message: &BusMessage) -> Result<Bytes, BusError> {
    let topic_len = u16::try_from(message.topic.len()).map_err(|_| {
        BusError::InvalidTopic(format!("{} byte topic exceeds u16", message.topic.len()))
    })?;

    let mut buf = BytesMut::with_capacity(2 + message.topic.len() + message.payload.len());
    buf.put_u16(topic_len);
    buf.put_slice(&message.topic);
    buf.put_slice(&message.payload);
    Ok(buf.freeze())
}

/// Decode a message frame
pub(crate) fn decode_message(mut frame: Bytes) -> Result<BusMessage, BusError> {
    if frame.len() < 2 {
        return Err(BusError::Frame(format!("{} byte message frame", frame.len())));
    }
    let topic_len = frame.get_u16() as usize;
    if frame.len() < topic_len {
        return Err(BusError::Frame(format!(
            "topic length {} exceeds frame body {}",
            topic_len,
            frame.len()
        )));
    }
    let topic = frame.split_to(topic_len);
    Ok(BusMessage {
        topic,
        payload: frame,
    })
}

/// Encode a subscription frame
pub(crate) fn encode_subscription(prefix: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + prefix.len());
    buf.put_u8(SUBSCRIBE);
    buf.put_slice(prefix);
    buf.freeze()
}

/// Decode a subscription frame into its prefix
pub(crate) fn decode_subscription(mut frame: Bytes) -> Result<Bytes, BusError> {
    match frame.first() {
        Some(&SUBSCRIBE) => {
            frame.advance(1);
            Ok(frame)
        }
        Some(other) => Err(BusError::Frame(format!("unknown control byte {:#04x}", other))),
        None => Err(BusError::Frame("empty subscription frame".to_string())),
    }
}
