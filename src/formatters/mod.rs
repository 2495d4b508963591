//! The four enumerated transform plug-ins. Each is an opaque entry-mutating
//! function, translated to a trait object per formatter configuration so
//! the transformer can hold an ordered, heterogeneous chain.

mod add;
mod jsone;
mod lowercase;
mod unmarshal;

use snafu::Snafu;

use crate::entry::Entry;

#[derive(Debug, Snafu)]
pub enum FormatterError {
    #[snafu(display("formatter {kind} config error: {message}"))]
    Config { kind: &'static str, message: String },
}

/// A configured formatter. `apply` mutates the entry in place; a formatting
/// failure is logged by the transformer and the entry continues unchanged --
/// it is not a pipeline-fatal condition.
pub trait Formatter: Send + Sync {
    fn apply(&self, entry: &mut Entry) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FormatterConfig {
    Add(add::AddConfig),
    Lowercase(lowercase::LowercaseConfig),
    Unmarshal(unmarshal::UnmarshalConfig),
    Jsone(jsone::JsoneConfig),
}

impl FormatterConfig {
    pub fn build(&self) -> Result<Box<dyn Formatter>, FormatterError> {
        match self {
            FormatterConfig::Add(c) => add::AddFormatter::build(c).map(|f| Box::new(f) as _),
            FormatterConfig::Lowercase(c) => {
                Ok(Box::new(lowercase::LowercaseFormatter::build(c)) as _)
            }
            FormatterConfig::Unmarshal(c) => {
                unmarshal::UnmarshalFormatter::build(c).map(|f| Box::new(f) as _)
            }
            FormatterConfig::Jsone(c) => jsone::JsoneFormatter::build(c).map(|f| Box::new(f) as _),
        }
    }
}

pub fn build_chain(configs: &[FormatterConfig]) -> Result<Vec<Box<dyn Formatter>>, FormatterError> {
    configs.iter().map(FormatterConfig::build).collect()
}
