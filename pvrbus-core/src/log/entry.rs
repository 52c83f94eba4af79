//! Log entry and its on-disk framing
//!
//! ```text
//! [u32 LE body length]
//!   [f64 LE receipt time][u32 LE topic length][topic][payload]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::LogError;

const LEN_PREFIX: usize = 4;
const BODY_HEADER: usize = 8 + 4;

/// One recorded bus message
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Receipt time in seconds since the epoch
    pub time: f64,

    /// Topic the message was published on
    pub topic: Bytes,

    /// Opaque payload
    pub payload: Bytes,
}

impl LogEntry {
    /// Create a new entry
    pub fn new(time: f64, topic: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            time,
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Size of the framed record in bytes
    pub fn framed_len(&self) -> usize {
        LEN_PREFIX + BODY_HEADER + self.topic.len() + self.payload.len()
    }

    /// Serialize with the length prefix
    pub fn encode(&self) -> Result<Bytes, LogError> {
        let body_len = BODY_HEADER + self.topic.len() + self.payload.len();
        let body_len = u32::try_from(body_len).map_err(|_| LogError::Corrupt {
            offset: 0,
            reason: format!("{} byte entry does not fit a u32 frame", body_len),
        })?;

        let mut buf = BytesMut::with_capacity(self.framed_len());
        buf.put_u32_le(body_len);
        buf.put_f64_le(self.time);
        buf.put_u32_le(self.topic.len() as u32);
        buf.put_slice(&self.topic);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Split a shard's contents into entries
    pub fn frames(data: Bytes) -> EntryFrames {
        EntryFrames { data, offset: 0 }
    }
}

/// Lazy iterator over the records of one shard
///
/// Stops quietly at a truncated tail record; yields an error (and then
/// stops) on a record whose header is inconsistent.
#[derive(Debug, Clone)]
pub struct EntryFrames {
    data: Bytes,
    offset: usize,
}

impl EntryFrames {
    /// Bytes left after the last complete record, non-zero for a torn shard
    pub fn trailing_bytes(&self) -> usize {
        self.data.len()
    }

    fn corrupt(&mut self, reason: String) -> Option<Result<LogEntry, LogError>> {
        let offset = self.offset;
        self.data.clear();
        Some(Err(LogError::Corrupt { offset, reason }))
    }
}

impl Iterator for EntryFrames {
    type Item = Result<LogEntry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < LEN_PREFIX {
            return None;
        }

        let body_len = u32::from_le_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]) as usize;
        if body_len < BODY_HEADER {
            return self.corrupt(format!("body length {} below header size", body_len));
        }
        if self.data.len() < LEN_PREFIX + body_len {
            // Torn write; everything before it was complete.
            return None;
        }

        self.data.advance(LEN_PREFIX);
        let mut body = self.data.split_to(body_len);
        let time = body.get_f64_le();
        let topic_len = body.get_u32_le() as usize;
        if topic_len > body.len() {
            return self.corrupt(format!(
                "topic length {} exceeds remaining body {}",
                topic_len,
                body.len()
            ));
        }
        let topic = body.split_to(topic_len);
        self.offset += LEN_PREFIX + body_len;

        Some(Ok(LogEntry {
            time,
            topic,
            payload: body,
        }))
    }
}

/// Current wall-clock time in seconds since the epoch
pub fn wall_clock_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
