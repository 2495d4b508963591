//! Container-partial message joining.
//!
//! Container runtimes split long log lines across multiple journal entries,
//! marking every piece but the last with `CONTAINER_PARTIAL_MESSAGE=true`.
//! This buffers those pieces per `CONTAINER_ID_FULL` and joins their
//! `MESSAGE` fields back together, splitting at a configured limit if the
//! joined message would otherwise grow unbounded.

use std::collections::HashMap;

const CONTAINER_ID_FULL: &str = "CONTAINER_ID_FULL";
const CONTAINER_PARTIAL_MESSAGE: &str = "CONTAINER_PARTIAL_MESSAGE";
const MESSAGE: &str = "MESSAGE";

use crate::reader::journal::Record;

/// Buffers and joins container-partial journal records. Disabled (pass
/// everything through unchanged) when `limit == 0`.
pub struct PartialJoiner {
    limit: usize,
    buffered: HashMap<String, Record>,
}

impl PartialJoiner {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            buffered: HashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.limit > 0
    }

    /// Feeds one incoming record, returning zero, one, or two records ready
    /// to be appended to the current input chunk, in order.
    pub fn process(&mut self, incoming: Record) -> Vec<Record> {
        if !self.enabled() {
            return vec![incoming];
        }

        let Some(container_id) = incoming.get(CONTAINER_ID_FULL).cloned() else {
            return vec![incoming];
        };
        let partial = incoming.get(CONTAINER_PARTIAL_MESSAGE).map(String::as_str) == Some("true");

        let Some(mut buffered) = self.buffered.remove(&container_id) else {
            if partial {
                self.buffered.insert(container_id, incoming);
                return vec![];
            }
            return vec![incoming];
        };

        let buffered_message = buffered.get(MESSAGE).cloned().unwrap_or_default();
        let incoming_message = incoming.get(MESSAGE).cloned().unwrap_or_default();
        let joined = format!("{buffered_message}{incoming_message}");

        if joined.len() > self.limit {
            let split_at = floor_char_boundary(&joined, self.limit);
            let (prefix, suffix) = joined.split_at(split_at);
            buffered.insert(MESSAGE.to_owned(), prefix.to_owned());

            let mut incoming = incoming;
            incoming.insert(MESSAGE.to_owned(), suffix.to_owned());

            if partial {
                self.buffered.insert(container_id, incoming);
                vec![buffered]
            } else {
                vec![buffered, incoming]
            }
        } else if partial {
            buffered.insert(MESSAGE.to_owned(), joined);
            self.buffered.insert(container_id, buffered);
            vec![]
        } else {
            let mut incoming = incoming;
            incoming.insert(MESSAGE.to_owned(), joined);
            vec![incoming]
        }
    }
}

/// Like the nightly-only `str::floor_char_boundary`: finds the largest index
/// `<= limit` that lands on a UTF-8 character boundary, so the split never
/// produces an invalid string.
fn floor_char_boundary(s: &str, limit: usize) -> usize {
    if limit >= s.len() {
        return s.len();
    }
    let mut idx = limit;
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(container_id: &str, partial: bool, message: &str) -> Record {
        let mut r = Record::new();
        r.insert(CONTAINER_ID_FULL.to_owned(), container_id.to_owned());
        r.insert(
            CONTAINER_PARTIAL_MESSAGE.to_owned(),
            partial.to_string(),
        );
        r.insert(MESSAGE.to_owned(), message.to_owned());
        r
    }

    #[test]
    fn passes_through_without_container_id() {
        let mut joiner = PartialJoiner::new(5);
        let mut r = Record::new();
        r.insert(MESSAGE.to_owned(), "hello".to_owned());
        let out = joiner.process(r.clone());
        assert_eq!(out, vec![r]);
    }

    #[test]
    fn disabled_passes_everything_through() {
        let mut joiner = PartialJoiner::new(0);
        let r = record("X", true, "abc");
        assert_eq!(joiner.process(r.clone()), vec![r]);
    }

    #[test]
    fn joins_then_splits_on_non_partial() {
        // join_container_partial=5, (X, partial, "abc"), (X, partial, "de"),
        // (X, final, "fgh") => emitted MESSAGEs "abcde" then "fgh".
        let mut joiner = PartialJoiner::new(5);

        assert_eq!(joiner.process(record("X", true, "abc")), vec![]);
        assert_eq!(joiner.process(record("X", true, "de")), vec![]);

        let out = joiner.process(record("X", false, "fgh"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get(MESSAGE).unwrap(), "fgh");
    }

    #[test]
    fn exposes_joined_message_on_buffer_flush() {
        let mut joiner = PartialJoiner::new(10);
        joiner.process(record("X", true, "abc"));
        joiner.process(record("X", true, "de"));
        // Force a flush by ending the partial sequence.
        let out = joiner.process(record("X", false, ""));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get(MESSAGE).unwrap(), "abcde");
    }

    #[test]
    fn splits_at_limit_when_joined_exceeds_it() {
        let mut joiner = PartialJoiner::new(5);
        joiner.process(record("X", true, "abc"));
        // buffered "abc" + incoming "dezzz" = "abcdezzz" (len 8 > 5), split at 5
        let out = joiner.process(record("X", true, "dezzz"));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get(MESSAGE).unwrap(), "abcde");
        // The remainder ("zzz") stays buffered under X.
        let out2 = joiner.process(record("X", false, ""));
        assert_eq!(out2.len(), 1);
        assert_eq!(out2[0].get(MESSAGE).unwrap(), "zzz");
    }

    #[test]
    fn idempotent_join_preserves_full_message_concatenation() {
        // Testable property 4: concatenated emitted messages equal the
        // concatenation of the input messages, with no message exceeding the
        // configured limit, for an arbitrary run length.
        let limit = 4;
        let mut joiner = PartialJoiner::new(limit);
        let pieces = ["a", "bb", "ccc", "d", "ee", "fff", "g"];
        let mut expected_total = String::new();
        let mut emitted = String::new();

        for (i, piece) in pieces.iter().enumerate() {
            expected_total.push_str(piece);
            let is_last = i == pieces.len() - 1;
            for out in joiner.process(record("X", !is_last, piece)) {
                let msg = out.get(MESSAGE).unwrap();
                assert!(msg.len() <= limit, "message {msg:?} exceeds limit {limit}");
                emitted.push_str(msg);
            }
        }

        assert_eq!(emitted, expected_total);
    }

    #[test]
    fn distinct_container_ids_are_independent() {
        let mut joiner = PartialJoiner::new(10);
        assert_eq!(joiner.process(record("A", true, "a1")), vec![]);
        assert_eq!(joiner.process(record("B", true, "b1")), vec![]);
        let out_a = joiner.process(record("A", false, "a2"));
        assert_eq!(out_a[0].get(MESSAGE).unwrap(), "a1a2");
        let out_b = joiner.process(record("B", false, "b2"));
        assert_eq!(out_b[0].get(MESSAGE).unwrap(), "b1b2");
    }
}
