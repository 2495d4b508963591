//! The two enumerated shipper plug-ins. A `Shipper` owns the
//! sink-specific `OutputChunk` constructor and the `deliver` call the writer
//! stage invokes; its connection handle is constructed once and shared
//! (read-only) across writer threads.

pub mod file;
pub mod kinesis;

use std::sync::Arc;
use std::time::Duration;

use snafu::Snafu;

use crate::output_chunk::OutputChunk;

#[derive(Debug, Snafu)]
pub enum DeliverError {
    #[snafu(display("retriable delivery error: {message}"))]
    Retriable { message: String },
    #[snafu(display("non-retriable delivery error: {message}"))]
    Fatal { message: String },
}

impl DeliverError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, DeliverError::Retriable { .. })
    }
}

/// A constructed, ready-to-use shipper. `deliver` is called from any number
/// of writer threads against the same `Arc<dyn Shipper>`, so implementations
/// must be `Send + Sync`.
pub trait Shipper: Send + Sync {
    fn new_output_chunk(&self) -> Box<dyn OutputChunk>;

    fn deliver(&self, chunk: &dyn OutputChunk) -> Result<(), DeliverError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

pub fn default_retry_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(500),
        max_attempts: 5,
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShipperConfig {
    File(file::FileShipperConfig),
    Kinesis(kinesis::KinesisShipperConfig),
}

impl ShipperConfig {
    pub fn build(&self) -> Result<Arc<dyn Shipper>, anyhow::Error> {
        match self {
            ShipperConfig::File(c) => Ok(Arc::new(file::FileShipper::build(c)?)),
            ShipperConfig::Kinesis(c) => Ok(Arc::new(kinesis::KinesisShipper::build(c)?)),
        }
    }
}
