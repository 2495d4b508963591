//! Converts a partial, out-of-order stream of chunk-completion reports into a
//! monotonically advancing durable cursor.
//!
//! An ordered pending-marker queue tracks what's in flight: `order` values
//! are explicitly allowed to repeat (a single input chunk can straddle two
//! output chunks), so eligibility is a plain "remove the first element whose
//! order matches" rather than a fixed/assumed-length marker scheme.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use snafu::Snafu;
use tracing::{error, warn};

use crate::chunk::ChunkId;

#[derive(Debug, Snafu)]
pub enum CursorTrackerError {
    #[snafu(display("unable to persist cursor file {}: {source}", path.display()))]
    Persist { path: PathBuf, source: io::Error },
}

/// Fatal internal-invariant violation: a completion was reported for an
/// `order` that isn't in-flight.
#[derive(Debug, Snafu)]
#[snafu(display("completed chunk order {order} reported but not in-flight -- internal error"))]
pub struct OrderNotInFlight {
    pub order: u64,
}

struct Inner {
    in_flight: VecDeque<ChunkId>,
}

/// Thread-safe ordered set of in-flight chunk ids, backed by a single mutex
/// (the critical sections are short -- an ordered insert and a short linear
/// scan -- so a dedicated actor would only add latency).
pub struct CursorTracker {
    cursor_file: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl CursorTracker {
    /// An empty `cursor_file` disables persistence entirely; all operations
    /// become no-ops beyond maintaining the in-flight set.
    pub fn new(cursor_file: impl Into<PathBuf>) -> Self {
        let path = cursor_file.into();
        Self {
            cursor_file: if path.as_os_str().is_empty() {
                None
            } else {
                Some(path)
            },
            inner: Mutex::new(Inner {
                in_flight: VecDeque::new(),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new())
    }

    /// Reads the persisted cursor, if any. Returns `Ok(None)` if persistence
    /// is disabled or the file doesn't exist -- the reader should then seek
    /// to head.
    pub fn read_persisted_cursor(&self) -> io::Result<Option<String>> {
        let Some(path) = &self.cursor_file else {
            return Ok(None);
        };
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Registers a chunk as in-flight, inserted at the position preserving
    /// ascending `order`. Duplicate `order`s are positioned after any
    /// existing occurrence of that `order` (LIFO within a single `order`,
    /// which doesn't matter since occurrences are otherwise interchangeable).
    pub fn report_in_flight(&self, id: ChunkId) {
        if self.cursor_file.is_none() {
            return;
        }
        let mut inner = self.inner.lock().expect("cursor tracker mutex poisoned");
        let insert_at = inner
            .in_flight
            .iter()
            .rposition(|existing| existing.order <= id.order)
            .map_or(0, |i| i + 1);
        inner.in_flight.insert(insert_at, id);
    }

    /// Reports a set of completed chunks. For each, the first in-flight
    /// element with a matching `order` is removed. If that element was at
    /// the head of the set, its cursor is persisted.
    pub fn report_completed(&self, ids: &[ChunkId]) -> Result<(), OrderNotInFlight> {
        let orders: Vec<u64> = ids.iter().map(|id| id.order).collect();
        self.report_completed_by_order(&orders)
    }

    /// Same semantics as [`Self::report_completed`] for callers that only
    /// have the `order`, not the full [`ChunkId`] (the tracker already holds
    /// the matching `cursor`).
    pub fn report_completed_by_order(&self, orders: &[u64]) -> Result<(), OrderNotInFlight> {
        if self.cursor_file.is_none() {
            return Ok(());
        }

        let mut to_persist: Option<String> = None;
        {
            let mut inner = self.inner.lock().expect("cursor tracker mutex poisoned");
            for &order in orders {
                let Some(pos) = inner.in_flight.iter().position(|c| c.order == order) else {
                    error!(order, "completed chunk not in-flight; this is an internal invariant violation");
                    return Err(OrderNotInFlight { order });
                };
                let removed = inner
                    .in_flight
                    .remove(pos)
                    .expect("position was just located");
                if pos == 0 {
                    to_persist = Some(removed.cursor);
                }
            }
        }

        if let Some(cursor) = to_persist {
            self.persist(&cursor);
        }
        Ok(())
    }

    fn persist(&self, cursor: &str) {
        let Some(path) = &self.cursor_file else {
            return;
        };
        if let Err(err) = atomic_write(path, cursor.as_bytes()) {
            warn!(%err, path = %path.display(), "unable to save cursor");
        }
    }

    #[cfg(test)]
    fn in_flight_orders(&self) -> Vec<u64> {
        self.inner
            .lock()
            .unwrap()
            .in_flight
            .iter()
            .map(|c| c.order)
            .collect()
    }
}

/// Atomic write-then-rename, avoiding torn cursor files on crash.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)
}
