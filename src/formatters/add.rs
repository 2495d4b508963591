//! `add` — merges literal fields from config into the entry.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::entry::{Entry, FieldValue};

use super::{ConfigSnafu, FormatterError};

#[derive(Debug, Clone, Deserialize)]
pub struct AddConfig {
    pub fields: BTreeMap<String, FieldValue>,
}

pub struct AddFormatter {
    fields: BTreeMap<String, FieldValue>,
}

impl AddFormatter {
    pub fn build(config: &AddConfig) -> Result<Self, FormatterError> {
        if config.fields.is_empty() {
            return ConfigSnafu {
                kind: "add",
                message: "must specify fields to add".to_owned(),
            }
            .fail();
        }
        Ok(Self {
            fields: config.fields.clone(),
        })
    }
}

impl super::Formatter for AddFormatter {
    fn apply(&self, entry: &mut Entry) -> Result<(), anyhow::Error> {
        if let Some(mapping) = entry.fields.as_mapping_mut() {
            for (key, value) in &self.fields {
                mapping.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}
