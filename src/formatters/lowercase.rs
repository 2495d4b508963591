//! `lowercase` — lowercases every top-level key.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::entry::Entry;

#[derive(Debug, Clone, Deserialize)]
pub struct LowercaseConfig {}

pub struct LowercaseFormatter;

impl LowercaseFormatter {
    pub fn build(_config: &LowercaseConfig) -> Self {
        Self
    }
}

impl super::Formatter for LowercaseFormatter {
    fn apply(&self, entry: &mut Entry) -> Result<(), anyhow::Error> {
        if let Some(mapping) = entry.fields.as_mapping() {
            let lowered: BTreeMap<String, _> = mapping
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect();
            *entry.fields.as_mapping_mut().expect("checked above") = lowered;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::FieldValue;
    use crate::formatters::Formatter;

    #[test]
    fn lowercases_top_level_keys_only() {
        let formatter = LowercaseFormatter::build(&LowercaseConfig {});
        let mut mapping = BTreeMap::new();
        mapping.insert("HOST".to_owned(), FieldValue::from("h"));
        mapping.insert(
            "Nested".to_owned(),
            FieldValue::Mapping(BTreeMap::from([("Inner".to_owned(), FieldValue::from("x"))])),
        );
        let mut entry = Entry::new(FieldValue::Mapping(mapping), 0, 0);

        formatter.apply(&mut entry).unwrap();

        let mapping = entry.fields.as_mapping().unwrap();
        assert!(mapping.contains_key("host"));
        assert!(mapping.contains_key("nested"));
        let nested = mapping.get("nested").unwrap().as_mapping().unwrap();
        assert!(nested.contains_key("Inner"), "only top-level keys are lowercased");
    }
}
