//! `jsone` — renders a template against `{fields}` in context; if the
//! rendered value is not a mapping, the entry is marked dropped.
//!
//! This implements only the subset of JSON-e actually needed here: literals
//! pass through unchanged, and a `{"$eval": "dotted.path"}` node resolves a
//! dotted path against the template context. This is not a general JSON-e
//! engine.

use serde::Deserialize;
use std::collections::BTreeMap;

use crate::entry::{Entry, FieldValue};

use super::FormatterError;

#[derive(Debug, Clone, Deserialize)]
pub struct JsoneConfig {
    pub template: FieldValue,
}

pub struct JsoneFormatter {
    template: FieldValue,
}

impl JsoneFormatter {
    pub fn build(config: &JsoneConfig) -> Result<Self, FormatterError> {
        Ok(Self {
            template: config.template.clone(),
        })
    }
}

impl super::Formatter for JsoneFormatter {
    fn apply(&self, entry: &mut Entry) -> Result<(), anyhow::Error> {
        let mut context = BTreeMap::new();
        context.insert("fields".to_owned(), entry.fields.clone());

        let rendered = render(&self.template, &context);
        entry.fields = if rendered.as_mapping().is_some() {
            rendered
        } else {
            FieldValue::Null
        };
        Ok(())
    }
}

fn render(template: &FieldValue, context: &BTreeMap<String, FieldValue>) -> FieldValue {
    match template {
        FieldValue::Mapping(mapping) => {
            if let Some(FieldValue::String(path)) = mapping.get("$eval") {
                return resolve_path(path, context).unwrap_or(FieldValue::Null);
            }
            FieldValue::Mapping(
                mapping
                    .iter()
                    .map(|(k, v)| (k.clone(), render(v, context)))
                    .collect(),
            )
        }
        FieldValue::Sequence(items) => {
            FieldValue::Sequence(items.iter().map(|v| render(v, context)).collect())
        }
        other => other.clone(),
    }
}

fn resolve_path(path: &str, context: &BTreeMap<String, FieldValue>) -> Option<FieldValue> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    let mut current = context.get(root)?;
    for segment in segments {
        current = current.as_mapping()?.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatters::Formatter;

    fn mapping_entry(pairs: &[(&str, &str)]) -> Entry {
        let mapping = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FieldValue::from(*v)))
            .collect();
        Entry::new(FieldValue::Mapping(mapping), 0, 0)
    }

    #[test]
    fn template_mapping_passes_through_literals_and_resolves_eval() {
        let template = FieldValue::Mapping(BTreeMap::from([
            ("literal".to_owned(), FieldValue::from("x")),
            (
                "message".to_owned(),
                FieldValue::Mapping(BTreeMap::from([(
                    "$eval".to_owned(),
                    FieldValue::from("fields.MESSAGE"),
                )])),
            ),
        ]));
        let formatter = JsoneFormatter::build(&JsoneConfig { template }).unwrap();

        let mut entry = mapping_entry(&[("MESSAGE", "hello")]);
        formatter.apply(&mut entry).unwrap();

        let mapping = entry.fields.as_mapping().unwrap();
        assert_eq!(mapping.get("literal"), Some(&FieldValue::from("x")));
        assert_eq!(mapping.get("message"), Some(&FieldValue::from("hello")));
    }

    #[test]
    fn non_mapping_render_drops_the_entry() {
        let template = FieldValue::Mapping(BTreeMap::from([(
            "$eval".to_owned(),
            FieldValue::from("fields.MESSAGE"),
        )]));
        let formatter = JsoneFormatter::build(&JsoneConfig { template }).unwrap();

        let mut entry = mapping_entry(&[("MESSAGE", "hello")]);
        formatter.apply(&mut entry).unwrap();

        assert!(entry.is_dropped());
    }
}
