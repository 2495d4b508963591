//! `unmarshal` — parses a string field as JSON and replaces the entire
//! entry's fields with the parsed value. On parse failure, or if the
//! configured path doesn't resolve to a string, the entry is left exactly
//! as it was.

use serde::Deserialize;

use crate::entry::{Entry, FieldValue};

use super::{ConfigSnafu, FormatterError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmarshalConfig {
    pub input_path: String,
}

pub struct UnmarshalFormatter {
    path: Vec<String>,
}

impl UnmarshalFormatter {
    pub fn build(config: &UnmarshalConfig) -> Result<Self, FormatterError> {
        if config.input_path.is_empty() {
            return ConfigSnafu {
                kind: "unmarshal",
                message: "must specify field to unmarshal".to_owned(),
            }
            .fail();
        }
        Ok(Self {
            path: config.input_path.split('.').map(str::to_owned).collect(),
        })
    }
}

impl super::Formatter for UnmarshalFormatter {
    fn apply(&self, entry: &mut Entry) -> Result<(), anyhow::Error> {
        let Some((last, prefix)) = self.path.split_last() else {
            return Ok(());
        };

        // Walk to the parent mapping of the target field; any miss along
        // the way (wrong shape, missing key) is a silent no-op.
        let mut current = &entry.fields;
        for segment in prefix {
            let Some(mapping) = current.as_mapping() else {
                return Ok(());
            };
            let Some(next) = mapping.get(segment) else {
                return Ok(());
            };
            current = next;
        }
        let Some(mapping) = current.as_mapping() else {
            return Ok(());
        };
        let Some(raw) = mapping.get(last).and_then(FieldValue::as_str) else {
            return Ok(());
        };

        match serde_json::from_str::<FieldValue>(raw) {
            Ok(parsed) => {
                entry.fields = parsed;
            }
            Err(_) => {
                // Parse failure: leave the entry exactly as it was. The
                // field was never removed above (we only read through
                // shared references), so there's nothing to restore.
            }
        }
        Ok(())
    }
}
