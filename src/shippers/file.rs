//! The `file` shipper: newline-delimited JSON, either to a path or to stdout
//! when `fileName` is empty.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::sync::Mutex;

use serde::Deserialize;

use crate::entry::FieldValue;
use crate::output_chunk::{AddResult, OutputChunk};

use super::{DeliverError, Shipper};

fn default_chunk_size() -> usize {
    200_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileShipperConfig {
    #[serde(default)]
    pub file_name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub pretty_print: usize,
}

enum Sink {
    Stdout,
    File(Mutex<BufWriter<File>>),
}

pub struct FileShipper {
    sink: Sink,
    chunk_size: usize,
    pretty_print: usize,
}

impl FileShipper {
    pub fn build(config: &FileShipperConfig) -> Result<Self, anyhow::Error> {
        let sink = if config.file_name.is_empty() {
            Sink::Stdout
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.file_name)?;
            Sink::File(Mutex::new(BufWriter::new(file)))
        };
        Ok(Self {
            sink,
            chunk_size: config.chunk_size,
            pretty_print: config.pretty_print,
        })
    }

    fn write_line(&self, line: &[u8]) -> io::Result<()> {
        match &self.sink {
            Sink::Stdout => {
                let stdout = io::stdout();
                let mut lock = stdout.lock();
                lock.write_all(line)?;
                lock.write_all(b"\n")?;
                lock.flush()
            }
            Sink::File(writer) => {
                let mut writer = writer.lock().unwrap();
                writer.write_all(line)?;
                writer.write_all(b"\n")?;
                writer.flush()
            }
        }
    }
}

impl Shipper for FileShipper {
    fn new_output_chunk(&self) -> Box<dyn OutputChunk> {
        Box::new(FileOutputChunk {
            lines: Vec::new(),
            size: 0,
            chunk_size: self.chunk_size,
            pretty_print: self.pretty_print,
            attached: Vec::new(),
        })
    }

    fn deliver(&self, chunk: &dyn OutputChunk) -> Result<(), DeliverError> {
        let chunk = chunk
            .as_any()
            .downcast_ref::<FileOutputChunk>()
            .expect("writer always pairs a shipper with its own output chunk type");
        for line in &chunk.lines {
            self.write_line(line)
                .map_err(|err| DeliverError::Retriable {
                    message: err.to_string(),
                })?;
        }
        Ok(())
    }
}

struct FileOutputChunk {
    lines: Vec<Vec<u8>>,
    size: usize,
    chunk_size: usize,
    pretty_print: usize,
    attached: Vec<u64>,
}

impl OutputChunk for FileOutputChunk {
    fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn add(&mut self, fields: &FieldValue) -> AddResult {
        let serialised = if self.pretty_print > 0 {
            let indent = b" ".repeat(self.pretty_print);
            let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
            let mut buf = Vec::new();
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            match serde::Serialize::serialize(fields, &mut ser) {
                Ok(()) => buf,
                Err(_) => return AddResult::Error,
            }
        } else {
            match serde_json::to_vec(fields) {
                Ok(buf) => buf,
                Err(_) => return AddResult::Error,
            }
        };

        if self.size + serialised.len() + 1 > self.chunk_size {
            return AddResult::RejectedFull;
        }

        self.size += serialised.len() + 1;
        self.lines.push(serialised);
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
