//! The typed configuration value the pipeline is built from, deserialised
//! from YAML (or JSON, since YAML is a superset) via `serde`.

use serde::Deserialize;

use crate::formatters::FormatterConfig;
use crate::reader::ReaderOptions;
use crate::shippers::ShipperConfig;
use crate::transformer::TransformerOptions;

fn default_num_transformers() -> usize {
    2
}

fn default_num_shippers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_num_transformers")]
    pub num_transformers: usize,
    #[serde(default = "default_num_shippers")]
    pub num_shippers: usize,
    /// Bound on the two hand-off queues, defaulted generously so it's never
    /// the limiting factor in practice.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub transformer: TransformerConfig,
    #[serde(default)]
    pub formatters: Vec<FormatterConfig>,
    pub shipper: ShipperConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReaderConfig {
    #[serde(default)]
    pub cursor_file: String,
    pub entries_in_chunk: Option<usize>,
    pub data_threshold: Option<usize>,
    pub field_names: Option<Vec<String>>,
    pub join_container_partial: Option<usize>,
    pub time_field: Option<String>,
}

impl ReaderConfig {
    pub fn into_options(self) -> ReaderOptions {
        let defaults = ReaderOptions::default();
        ReaderOptions {
            cursor_file: self.cursor_file,
            entries_in_chunk: self.entries_in_chunk.unwrap_or(defaults.entries_in_chunk),
            data_threshold: self.data_threshold.unwrap_or(defaults.data_threshold),
            field_names: self.field_names,
            join_container_partial: self
                .join_container_partial
                .unwrap_or(defaults.join_container_partial),
            time_field: self.time_field.unwrap_or(defaults.time_field),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformerConfig {
    pub max_log_delay_seconds: Option<u64>,
}

impl TransformerConfig {
    pub fn into_options(self) -> TransformerOptions {
        let defaults = TransformerOptions::default();
        TransformerOptions {
            max_log_delay: self
                .max_log_delay_seconds
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.max_log_delay),
        }
    }
}

impl Config {
    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_yaml_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_omitted() {
        let yaml = r#"
shipper:
  type: file
  fileName: ""
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.num_transformers, 2);
        assert_eq!(config.num_shippers, 2);
        assert_eq!(config.reader.clone().into_options().entries_in_chunk, 1000);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let yaml = r#"
numTransformers: 4
numShippers: 1
reader:
  cursorFile: /var/lib/journal-shipper/cursor
  entriesInChunk: 50
formatters:
  - type: add
    fields:
      host: "h"
  - type: lowercase
shipper:
  type: kinesis
  region: us-east-1
  streamName: my-stream
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.num_transformers, 4);
        assert_eq!(config.num_shippers, 1);
        assert_eq!(config.formatters.len(), 2);
        assert_eq!(
            config.reader.into_options().cursor_file,
            "/var/lib/journal-shipper/cursor"
        );
    }
}
