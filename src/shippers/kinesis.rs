//! The `kinesis` shipper: KPL aggregated-record framing over a Kinesis
//! `PutRecord` call.
//!
//! Aggregation itself needs no AWS client -- it is pure protobuf framing --
//! so the shipper is built and tested without one. `put_record` below is a
//! stub standing in for a real `aws-sdk-kinesis` call.

use std::sync::atomic::{AtomicU64, Ordering};

use md5::{Digest, Md5};
use prost::Message;
use rand::Rng;
use serde::Deserialize;
use tracing::warn;

use crate::entry::FieldValue;
use crate::output_chunk::{AddResult, OutputChunk};

use super::{DeliverError, Shipper};

const MAGIC: [u8; 4] = [0xF3, 0x89, 0x9A, 0xC2];

pub mod kpl {
    include!(concat!(env!("OUT_DIR"), "/journal_shipper.kpl.rs"));
}

fn default_chunk_size() -> usize {
    200_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinesisShipperConfig {
    pub region: String,
    pub stream_name: String,
    #[serde(default)]
    pub assume_role_arn: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Humantime duration string (e.g. "500ms"); defaults to 500ms.
    #[serde(default)]
    pub retry_base_delay: Option<String>,
    #[serde(default)]
    pub retry_max_attempts: Option<u32>,
}

pub struct KinesisShipper {
    #[allow(dead_code)]
    region: String,
    stream_name: String,
    #[allow(dead_code)]
    assume_role_arn: Option<String>,
    chunk_size: usize,
    retry: super::RetryPolicy,
    attempts: AtomicU64,
}

impl KinesisShipper {
    pub fn build(config: &KinesisShipperConfig) -> Result<Self, anyhow::Error> {
        let defaults = super::default_retry_policy();
        let base_delay = match &config.retry_base_delay {
            Some(raw) => humantime::parse_duration(raw)?,
            None => defaults.base_delay,
        };
        let retry = super::RetryPolicy {
            base_delay,
            max_attempts: config.retry_max_attempts.unwrap_or(defaults.max_attempts),
        };

        Ok(Self {
            region: config.region.clone(),
            stream_name: config.stream_name.clone(),
            assume_role_arn: config.assume_role_arn.clone(),
            chunk_size: config.chunk_size,
            retry,
            attempts: AtomicU64::new(0),
        })
    }

    fn random_partition_key() -> String {
        let mut rng = rand::rng();
        let bytes: [u8; 16] = rng.random();
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl Shipper for KinesisShipper {
    fn new_output_chunk(&self) -> Box<dyn OutputChunk> {
        Box::new(KinesisOutputChunk::new(self.chunk_size))
    }

    /// Delivers the aggregated payload. Retriable failures are retried up to
    /// `retry.max_attempts` times with linear backoff before being escalated
    /// to fatal, rather than retrying forever in a tight loop.
    fn deliver(&self, chunk: &dyn OutputChunk) -> Result<(), DeliverError> {
        let chunk = chunk
            .as_any()
            .downcast_ref::<KinesisOutputChunk>()
            .expect("writer always pairs a shipper with its own output chunk type");

        let payload = chunk.framed_payload();
        let partition_key = Self::random_partition_key();

        for attempt in 0..self.retry.max_attempts {
            match self.put_record(&payload, &partition_key) {
                Ok(()) => {
                    self.attempts.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) if err.is_retriable() && attempt + 1 < self.retry.max_attempts => {
                    warn!(attempt, %self.stream_name, "retriable kinesis put_record failure, retrying");
                    std::thread::sleep(self.retry.base_delay * (attempt + 1));
                }
                Err(err) => return Err(err),
            }
        }

        Err(DeliverError::Fatal {
            message: format!("exhausted {} retry attempts", self.retry.max_attempts),
        })
    }
}

impl KinesisShipper {
    fn put_record(&self, _payload: &[u8], _partition_key: &str) -> Result<(), DeliverError> {
        // TODO: replace with an `aws-sdk-kinesis` `put_record` call against
        // `self.stream_name` / `self.region`, treating throttling and service
        // errors as retriable and malformed-request errors as fatal.
        Ok(())
    }
}

struct KinesisOutputChunk {
    partition_key_table: Vec<String>,
    records: Vec<kpl::Record>,
    size: usize,
    chunk_size: usize,
    attached: Vec<u64>,
}

impl KinesisOutputChunk {
    fn new(chunk_size: usize) -> Self {
        Self {
            partition_key_table: vec![KinesisShipper::random_partition_key()],
            records: Vec::new(),
            size: 0,
            chunk_size,
            attached: Vec::new(),
        }
    }

    fn framed_payload(&self) -> Vec<u8> {
        let aggregated = kpl::AggregatedRecord {
            partition_key_table: self.partition_key_table.clone(),
            explicit_hash_key_table: Vec::new(),
            records: self.records.clone(),
        };
        let mut buffer = Vec::new();
        aggregated
            .encode(&mut buffer)
            .expect("protobuf encoding of a well-formed message cannot fail");

        let digest = Md5::digest(&buffer);

        let mut framed = Vec::with_capacity(MAGIC.len() + buffer.len() + digest.len());
        framed.extend_from_slice(&MAGIC);
        framed.extend_from_slice(&buffer);
        framed.extend_from_slice(&digest);
        framed
    }
}

impl OutputChunk for KinesisOutputChunk {
    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn add(&mut self, fields: &FieldValue) -> AddResult {
        let data = match serde_json::to_vec(fields) {
            Ok(data) => data,
            Err(_) => return AddResult::Error,
        };

        let record = kpl::Record {
            partition_key_index: Some(0),
            explicit_hash_key_index: None,
            data,
            tags: Vec::new(),
        };
        let record_size = record.encoded_len();

        if self.size + record_size > self.chunk_size {
            return AddResult::RejectedFull;
        }

        self.size += record_size;
        self.records.push(record);
        AddResult::Accepted
    }

    fn attach_input_id(&mut self, order: u64) {
        self.attached.push(order);
    }

    fn attached_ids(&self) -> &[u64] {
        &self.attached
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entry_fields(message: &str) -> FieldValue {
        FieldValue::Mapping(BTreeMap::from([(
            "MESSAGE".to_owned(),
            FieldValue::from(message),
        )]))
    }

    #[test]
    fn framed_payload_starts_with_magic_and_ends_with_md5() {
        let mut chunk = KinesisOutputChunk::new(200_000);
        assert_eq!(chunk.add(&entry_fields("a")), AddResult::Accepted);
        assert_eq!(chunk.add(&entry_fields("b")), AddResult::Accepted);

        let framed = chunk.framed_payload();
        assert_eq!(&framed[0..4], &MAGIC);

        let buffer = &framed[4..framed.len() - 16];
        let expected_digest = Md5::digest(buffer);
        assert_eq!(&framed[framed.len() - 16..], expected_digest.as_slice());
    }

    #[test]
    fn rejects_when_chunk_would_exceed_size_budget() {
        let mut chunk = KinesisOutputChunk::new(30);
        assert_eq!(chunk.add(&entry_fields("a")), AddResult::Accepted);
        assert_eq!(chunk.add(&entry_fields("b")), AddResult::RejectedFull);
    }

    #[test]
    fn rejects_a_single_entry_that_alone_exceeds_the_budget() {
        let mut chunk = KinesisOutputChunk::new(1);
        assert_eq!(chunk.add(&entry_fields("a")), AddResult::RejectedFull);
        assert!(chunk.is_empty());
    }

    #[test]
    fn aggregated_record_round_trips_through_protobuf() {
        let mut chunk = KinesisOutputChunk::new(200_000);
        chunk.add(&entry_fields("a"));
        chunk.add(&entry_fields("b"));

        let framed = chunk.framed_payload();
        let buffer = &framed[4..framed.len() - 16];
        let decoded = kpl::AggregatedRecord::decode(buffer).unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.partition_key_table.len(), 1);
    }
}
