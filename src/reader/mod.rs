//! The reader stage: turns a stream of journal entries into a stream of
//! [`InputChunk`]s, stamping each with a [`ChunkId`] before handing it off.

pub mod journal;
pub mod partial_join;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use crossbeam_channel::Sender;
use snafu::{ResultExt, Snafu};
use tracing::{error, info, warn};

use crate::chunk::{ChunkId, InputChunk};
use crate::cursor_tracker::CursorTracker;
use crate::entry::{Entry, FieldValue};
use crate::reader::journal::{JournalSource, Record};
use crate::reader::partial_join::PartialJoiner;

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub cursor_file: String,
    pub entries_in_chunk: usize,
    /// Soft byte threshold at which an in-progress chunk is shipped early
    /// even if `entries_in_chunk` hasn't been reached. `0` disables the
    /// threshold (entry count is the only bound).
    pub data_threshold: usize,
    /// Only these fields are read per entry; `None` means read everything.
    pub field_names: Option<Vec<String>>,
    pub join_container_partial: usize,
    pub time_field: String,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            cursor_file: String::new(),
            entries_in_chunk: 1000,
            data_threshold: 0,
            field_names: None,
            join_container_partial: 0,
            time_field: "TIME".to_owned(),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ReaderStartupError {
    #[snafu(display("failed to open journal: {source}"))]
    Open { source: std::io::Error },
    #[snafu(display("cursor file is unreadable: {source}"))]
    ReadCursor { source: std::io::Error },
    #[snafu(display("journal rejected persisted cursor: {source}"))]
    SeekCursor { source: std::io::Error },
    #[snafu(display("failed to seek to head: {source}"))]
    SeekHead { source: std::io::Error },
}

pub struct Reader<J: JournalSource> {
    journal: J,
    options: ReaderOptions,
    cursor_tracker: Arc<CursorTracker>,
    next_order: u64,
}

impl<J: JournalSource> Reader<J> {
    /// Seeks to the persisted cursor if one exists and is accepted by the
    /// journal, otherwise to head. A cursor the journal rejects is a fatal
    /// startup error -- a silent mis-seek could reship the whole journal
    /// from head without anyone noticing.
    pub fn start(
        mut journal: J,
        options: ReaderOptions,
        cursor_tracker: Arc<CursorTracker>,
    ) -> Result<Self, ReaderStartupError> {
        match cursor_tracker
            .read_persisted_cursor()
            .context(ReadCursorSnafu)?
        {
            Some(cursor) => {
                journal.seek_cursor(&cursor).context(SeekCursorSnafu)?;
                info!(cursor = %cursor, "resumed from persisted cursor");
            }
            None => {
                journal.seek_head().context(SeekHeadSnafu)?;
                info!("no persisted cursor; seeking to head");
            }
        }

        Ok(Self {
            journal,
            options,
            cursor_tracker,
            next_order: 1,
        })
    }

    /// Runs the reader loop forever, sending stamped [`InputChunk`]s to
    /// `chunks`. Never parallelised: the journal API isn't safe to share,
    /// and the `order` monotonicity guarantee depends on a single writer.
    pub fn run(&mut self, chunks: &Sender<InputChunk>) -> ! {
        let mut joiner = PartialJoiner::new(self.options.join_container_partial);
        let mut current = InputChunk::new(self.options.entries_in_chunk);
        let mut current_bytes = 0usize;
        // The journal's cursor just past the last entry pushed into `current`.
        // Captured immediately after reading each entry, while the journal is
        // still positioned at it -- querying it again after stepping further
        // would return the *next* entry's position instead, silently
        // mislabelling the chunk's cursor.
        let mut current_cursor: Option<String> = None;

        loop {
            let stepped = match self.journal.step() {
                Ok(stepped) => stepped,
                Err(err) => {
                    error!(%err, "fatal error stepping the journal");
                    std::process::exit(1);
                }
            };

            let full_by_count = current.is_full(self.options.entries_in_chunk);
            let full_by_bytes =
                self.options.data_threshold > 0 && current_bytes >= self.options.data_threshold;
            if full_by_count || full_by_bytes || (!stepped && !current.is_empty()) {
                self.ship(&mut current, current_cursor.take(), chunks);
                current_bytes = 0;
            }

            if !stepped {
                if let Err(err) = self.journal.wait(None) {
                    error!(%err, "fatal error waiting on the journal");
                    std::process::exit(1);
                }
                continue;
            }

            let record = match self.journal.get_entry() {
                Ok(record) => record,
                Err(err) => {
                    warn!(%err, "dropping entry that failed to read");
                    continue;
                }
            };
            let cursor = match self.journal.get_cursor() {
                Ok(cursor) => cursor,
                Err(err) => {
                    error!(%err, "fatal error reading journal cursor");
                    std::process::exit(1);
                }
            };
            let (realtime_timestamp, monotonic_timestamp) = match self.journal.get_timestamps() {
                Ok(timestamps) => timestamps,
                Err(err) => {
                    error!(%err, "fatal error reading journal entry timestamps");
                    std::process::exit(1);
                }
            };

            for record in joiner.process(record) {
                let entry = self.build_entry(record, realtime_timestamp, monotonic_timestamp);
                current_bytes += estimate_size(&entry);
                current.push(entry);
            }
            current_cursor = Some(cursor);
        }
    }

    fn build_entry(&self, record: Record, realtime_timestamp: u64, monotonic_timestamp: u64) -> Entry {
        let mut mapping = std::collections::BTreeMap::new();
        for (key, value) in record {
            if self
                .options
                .field_names
                .as_ref()
                .is_some_and(|names| !names.iter().any(|n| n == &key))
            {
                continue;
            }
            mapping.insert(key, FieldValue::String(value));
        }

        if !self.options.time_field.is_empty() {
            let formatted = format_timestamp(realtime_timestamp);
            mapping.insert(self.options.time_field.clone(), FieldValue::String(formatted));
        }

        Entry::new(FieldValue::Mapping(mapping), realtime_timestamp, monotonic_timestamp)
    }

    fn ship(&mut self, current: &mut InputChunk, cursor: Option<String>, chunks: &Sender<InputChunk>) {
        // `cursor` is `None` only if `current` is empty (nothing was ever
        // pushed since the last ship), which the caller never does.
        let cursor = cursor.unwrap_or_default();

        let order = self.next_order;
        self.next_order += 1;
        current.id = ChunkId::new(order, cursor);

        self.cursor_tracker.report_in_flight(current.id.clone());

        let finished = std::mem::replace(current, InputChunk::new(self.options.entries_in_chunk));
        if chunks.send(finished).is_err() {
            error!("input-chunk queue closed; transformer stage is gone");
            std::process::exit(1);
        }
    }
}

fn estimate_size(entry: &Entry) -> usize {
    serde_json::to_vec(&FieldValueJson(&entry.fields))
        .map(|v| v.len())
        .unwrap_or(0)
}

// `FieldValue` already derives `Serialize`; this wrapper just documents the
// call site's intent (byte-size estimation, not wire encoding).
struct FieldValueJson<'a>(&'a FieldValue);
impl<'a> serde::Serialize for FieldValueJson<'a> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

fn format_timestamp(realtime_micros: u64) -> String {
    Utc.timestamp_micros(realtime_micros as i64)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::journal::fake::FakeJournalSource;
    use std::time::Duration as StdDuration;

    fn entries(pairs: &[(&str, &str, &str)]) -> Vec<(String, Record)> {
        pairs
            .iter()
            .map(|(cursor, key, value)| {
                let mut r = Record::new();
                r.insert((*key).to_owned(), (*value).to_owned());
                ((*cursor).to_owned(), r)
            })
            .collect()
    }

    #[test]
    fn seek_rejection_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cursor_path = dir.path().join("cursor");
        std::fs::write(&cursor_path, "bogus").unwrap();
        let tracker = Arc::new(CursorTracker::new(&cursor_path));

        let mut journal = FakeJournalSource::new(vec![]);
        journal.seek_cursor_rejects = true;

        let result = Reader::start(journal, ReaderOptions::default(), tracker);
        assert!(matches!(result, Err(ReaderStartupError::SeekCursor { .. })));
    }

    #[test]
    fn straight_through_batches_by_entry_count() {
        let tracker = Arc::new(CursorTracker::disabled());
        let journal = FakeJournalSource::new(entries(&[
            ("c1", "MESSAGE", "a"),
            ("c2", "MESSAGE", "b"),
            ("c3", "MESSAGE", "c"),
        ]));

        let mut options = ReaderOptions::default();
        options.entries_in_chunk = 2;
        options.time_field = String::new();

        let mut reader = Reader::start(journal, options, tracker).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(8);

        // run() loops forever; drive it from a thread and read the first two
        // chunks it should produce (2 entries, then 1 after the source goes
        // dry and blocks on wait()).
        let handle = std::thread::spawn(move || {
            reader.run(&tx);
        });

        let first = rx.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.id.order, 1);

        let second = rx.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert_eq!(second.entries.len(), 1);
        assert_eq!(second.id.order, 2);

        drop(handle); // the reader thread blocks forever afterwards; leak it for the test.
    }
}
