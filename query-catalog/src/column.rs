use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// What a result column contributes to the exported metrics.
///
/// Parsed case-insensitively. Anything that isn't one of the known usages is kept as
/// [`ColumnUsage::Unrecognized`] so that validation can report it, rather than failing to load
/// the whole file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnUsage {
    /// Ignore this column
    Discard,
    /// Use this column's value as a label on every sample from the same row
    Label,
    /// Emit this column as a gauge
    Gauge,
    /// Emit this column as a monotonically increasing counter
    Counter,
    Unrecognized(String),
}

impl ColumnUsage {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, ColumnUsage::Unrecognized(_))
    }

    /// Returns true if this column produces a sample of its own
    pub fn is_metric(&self) -> bool {
        matches!(self, ColumnUsage::Gauge | ColumnUsage::Counter)
    }

    /// The Prometheus type name for metric columns
    pub fn metric_type(&self) -> Option<&'static str> {
        match self {
            ColumnUsage::Gauge => Some("gauge"),
            ColumnUsage::Counter => Some("counter"),
            _ => None,
        }
    }
}

impl From<&str> for ColumnUsage {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "discard" => ColumnUsage::Discard,
            "label" => ColumnUsage::Label,
            "gauge" => ColumnUsage::Gauge,
            "counter" => ColumnUsage::Counter,
            _ => ColumnUsage::Unrecognized(s.to_owned()),
        }
    }
}

impl From<String> for ColumnUsage {
    fn from(s: String) -> Self {
        ColumnUsage::from(s.as_str())
    }
}

impl From<ColumnUsage> for String {
    fn from(usage: ColumnUsage) -> Self {
        usage.to_string()
    }
}

impl Display for ColumnUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnUsage::Discard => f.write_str("DISCARD"),
            ColumnUsage::Label => f.write_str("LABEL"),
            ColumnUsage::Gauge => f.write_str("GAUGE"),
            ColumnUsage::Counter => f.write_str("COUNTER"),
            ColumnUsage::Unrecognized(s) => f.write_str(s),
        }
    }
}

/// A named result column of a query instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    pub usage: ColumnUsage,
}

impl Column {
    pub fn new(name: impl Into<String>, usage: ColumnUsage) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            usage,
        }
    }

    pub fn label(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ColumnUsage::Label).with_description(description)
    }

    pub fn gauge(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ColumnUsage::Gauge).with_description(description)
    }

    pub fn counter(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ColumnUsage::Counter).with_description(description)
    }

    pub fn discard(name: impl Into<String>) -> Self {
        Self::new(name, ColumnUsage::Discard)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}
