//! Sequential reader over a recorded session
//!
//! Entries come out in recording order across shard boundaries. When
//! looping is on, the reader wraps from the last entry back to the first.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::entry::{EntryFrames, LogEntry};
use super::error::LogError;
use super::session::list_shards;

/// Cursor over one session's shards
#[derive(Debug)]
pub struct LogReader {
    dir: PathBuf,
    shards: Vec<PathBuf>,
    next_shard: usize,
    frames: Option<EntryFrames>,
    lookahead: Option<LogEntry>,
    start_time: f64,
    end_time: f64,
    current_time: f64,
    looping: bool,
}

fn read_shard(path: &Path) -> Result<EntryFrames, LogError> {
    let data = Bytes::from(std::fs::read(path)?);
    Ok(LogEntry::frames(data))
}

fn first_entry(shards: &[PathBuf]) -> Result<Option<LogEntry>, LogError> {
    for shard in shards {
        if let Some(entry) = read_shard(shard)?.next() {
            return entry.map(Some);
        }
    }
    Ok(None)
}

fn last_entry(shards: &[PathBuf]) -> Result<Option<LogEntry>, LogError> {
    for shard in shards.iter().rev() {
        let mut frames = read_shard(shard)?;
        let mut last = None;
        for entry in frames.by_ref() {
            last = Some(entry?);
        }
        if frames.trailing_bytes() > 0 {
            warn!(
                shard = %shard.display(),
                bytes = frames.trailing_bytes(),
                "ignoring truncated tail record"
            );
        }
        if last.is_some() {
            return Ok(last);
        }
    }
    Ok(None)
}

impl LogReader {
    /// Open the session in `dir`, reading shards with the given extension
    ///
    /// Fails with [`LogError::EmptySession`] when no shard holds an entry.
    pub fn open(dir: impl Into<PathBuf>, extension: &str) -> Result<Self, LogError> {
        let dir = dir.into();
        let shards = list_shards(&dir, extension)?;

        let Some(first) = first_entry(&shards)? else {
            return Err(LogError::EmptySession(dir));
        };
        let end_time = last_entry(&shards)?.map_or(first.time, |e| e.time);
        debug!(
            dir = %dir.display(),
            shards = shards.len(),
            start_time = first.time,
            end_time,
            "opened session"
        );

        Ok(Self {
            dir,
            shards,
            next_shard: 0,
            frames: None,
            lookahead: None,
            start_time: first.time,
            end_time,
            current_time: first.time,
            looping: false,
        })
    }

    /// Session folder
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Time of the first entry
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Time of the last entry
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    /// Time of the last emitted entry or seek target
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// Whether the reader wraps at the end
    pub fn looping(&self) -> bool {
        self.looping
    }

    /// Enable or disable wrapping at the end
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn rewind(&mut self) {
        self.next_shard = 0;
        self.frames = None;
        self.lookahead = None;
    }

    fn pull(&mut self, wrap: bool) -> Result<Option<LogEntry>, LogError> {
        let mut wrapped = false;
        loop {
            if let Some(frames) = self.frames.as_mut() {
                match frames.next() {
                    Some(entry) => return entry.map(Some),
                    None => self.frames = None,
                }
            }

            if self.next_shard < self.shards.len() {
                self.frames = Some(read_shard(&self.shards[self.next_shard])?);
                self.next_shard += 1;
                continue;
            }

            // A second wrap in one pull means the shards emptied under us.
            if wrap && self.looping && !wrapped {
                debug!(dir = %self.dir.display(), "wrapping to start of session");
                wrapped = true;
                self.rewind();
                continue;
            }
            return Ok(None);
        }
    }

    /// Next entry, or `None` at the end of a non-looping session
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>, LogError> {
        let entry = match self.lookahead.take() {
            Some(entry) => Some(entry),
            None => self.pull(true)?,
        };
        if let Some(entry) = &entry {
            self.current_time = entry.time;
        }
        Ok(entry)
    }

    /// Push back an entry returned by [`next_entry`](Self::next_entry)
    ///
    /// It comes out again on the next read. Only the most recent entry may be
    /// pushed back, and only before any other call.
    pub fn unread(&mut self, entry: LogEntry) {
        self.current_time = entry.time;
        self.lookahead = Some(entry);
    }

    /// Position the cursor so the next entry is the first with time >= `t`
    ///
    /// Never emits anything. Seeking to the current time twice is the same
    /// as seeking once.
    pub fn seek(&mut self, t: f64) -> Result<(), LogError> {
        if t < self.current_time {
            self.rewind();
        }

        let keep = matches!(&self.lookahead, Some(entry) if entry.time >= t);
        if !keep {
            self.lookahead = None;
            while let Some(entry) = self.pull(false)? {
                if entry.time >= t {
                    self.lookahead = Some(entry);
                    break;
                }
            }
        }

        self.current_time = t;
        Ok(())
    }

    /// Move back to the first entry
    pub fn reset(&mut self) -> Result<(), LogError> {
        self.seek(self.start_time)
    }
}

impl Iterator for LogReader {
    type Item = Result<LogEntry, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::shard::{ShardLimits, ShardWriter};

    fn write_session(dir: &Path, times: &[f64], max_entries: u64) {
        let pattern = dir.join("s--t--{shard}.pvrlog").to_string_lossy().into_owned();
        let limits = ShardLimits {
            max_entries,
            ..Default::default()
        };
        let mut writer = ShardWriter::create(pattern, limits).unwrap();
        for (i, t) in times.iter().enumerate() {
            writer
                .write(&LogEntry::new(*t, &b"/t/"[..], vec![i as u8]))
                .unwrap();
        }
        writer.finish().unwrap();
    }

    fn payloads(reader: &mut LogReader, n: usize) -> Vec<u8> {
        (0..n)
            .filter_map(|_| reader.next_entry().unwrap())
            .map(|e| e.payload[0])
            .collect()
    }

    #[test]
    fn test_reads_across_shards_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[1.0, 2.0, 3.0, 4.0, 5.0], 2);

        let reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        assert_eq!(reader.start_time(), 1.0);
        assert_eq!(reader.end_time(), 5.0);

        let times: Vec<f64> = reader.map(|e| e.unwrap().time).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_looping_wraps() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[0.0, 0.5, 1.0], 10);

        let mut reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        reader.set_looping(true);
        assert_eq!(payloads(&mut reader, 5), vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_end_without_looping() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[0.0, 1.0], 1);

        let mut reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        assert_eq!(payloads(&mut reader, 2), vec![0, 1]);
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_seek_forward_and_back() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[1.0, 2.0, 3.0, 4.0], 2);

        let mut reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        reader.seek(2.5).unwrap();
        assert_eq!(reader.current_time(), 2.5);
        assert_eq!(reader.next_entry().unwrap().unwrap().time, 3.0);

        reader.seek(1.0).unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().time, 1.0);
    }

    #[test]
    fn test_seek_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[1.0, 2.0, 3.0], 10);

        let mut reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        reader.seek(2.0).unwrap();
        reader.seek(2.0).unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().time, 2.0);
    }

    #[test]
    fn test_seek_to_unread_entry_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[1.0, 2.0, 3.0], 10);

        let mut reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().time, 1.0);
        let second = reader.next_entry().unwrap().unwrap();
        reader.unread(second);
        assert_eq!(reader.current_time(), 2.0);

        reader.seek(2.0).unwrap();
        assert_eq!(payloads(&mut reader, 2), vec![1, 2]);
    }

    #[test]
    fn test_seek_past_end() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[1.0, 2.0], 10);

        let mut reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        reader.seek(9.0).unwrap();
        assert!(reader.next_entry().unwrap().is_none());
        reader.reset().unwrap();
        assert_eq!(reader.next_entry().unwrap().unwrap().time, 1.0);
    }

    #[test]
    fn test_empty_session_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[], 10);
        assert!(matches!(
            LogReader::open(dir.path(), "pvrlog"),
            Err(LogError::EmptySession(_))
        ));
    }

    #[test]
    fn test_truncated_tail_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_session(dir.path(), &[1.0, 2.0], 10);
        let shard = &list_shards(dir.path(), "pvrlog").unwrap()[0];
        let len = std::fs::metadata(shard).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(shard).unwrap();
        file.set_len(len - 1).unwrap();

        let reader = LogReader::open(dir.path(), "pvrlog").unwrap();
        assert_eq!(reader.end_time(), 1.0);
        assert_eq!(reader.count(), 1);
    }
}
