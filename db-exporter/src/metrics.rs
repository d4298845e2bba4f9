//! Metric samples, the descriptors derived from them, and rendering them in the Prometheus text
//! exposition format

use std::fmt::{self, Display};

use async_trait::async_trait;
use indexmap::IndexMap;
use metrics_exporter_prometheus::formatting::{
    sanitize_label_key, sanitize_label_value, sanitize_metric_name, write_help_line,
    write_metric_line, write_type_line,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value of one time series, at the time it was collected
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl Sample {
    /// Creates a new sample. `name` is sanitized into a valid metric name.
    pub fn new(name: &str, help: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: sanitize_metric_name(name),
            help: help.into(),
            kind,
            labels: vec![],
            value,
        }
    }

    pub fn gauge(name: &str, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, MetricKind::Gauge, value)
    }

    pub fn counter(name: &str, help: impl Into<String>, value: f64) -> Self {
        Self::new(name, help, MetricKind::Counter, value)
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn with_labels<'a, I>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = &'a (String, String)>,
    {
        self.labels.extend(labels.into_iter().cloned());
        self
    }

    /// Returns the value of the label named `key`, if any
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Describes a metric family, independently of any value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub label_names: Vec<String>,
}

/// Derives one descriptor per metric name from a collection, in order of first appearance
pub fn describe(samples: &[Sample]) -> Vec<Descriptor> {
    let mut descriptors: IndexMap<&str, Descriptor> = IndexMap::new();
    for sample in samples {
        descriptors
            .entry(sample.name.as_str())
            .or_insert_with(|| Descriptor {
                name: sample.name.clone(),
                help: sample.help.clone(),
                kind: sample.kind,
                label_names: sample.labels.iter().map(|(k, _)| k.clone()).collect(),
            });
    }
    descriptors.into_values().collect()
}

/// Renders `samples` in the Prometheus text format, grouping samples by metric name in order of
/// first appearance. The help text and type of a family are taken from its first sample.
pub fn render(samples: &[Sample]) -> String {
    let mut families: IndexMap<&str, Vec<&Sample>> = IndexMap::new();
    for sample in samples {
        families.entry(sample.name.as_str()).or_default().push(sample);
    }

    let mut output = String::new();
    for (name, samples) in families {
        let Some(first) = samples.first() else {
            continue;
        };
        if !first.help.is_empty() {
            write_help_line(&mut output, name, &first.help);
        }
        write_type_line(&mut output, name, first.kind.as_str());
        for sample in samples {
            let labels = sample
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", sanitize_label_key(k), sanitize_label_value(v)))
                .collect::<Vec<_>>();
            write_metric_line::<&str, f64>(&mut output, name, None, &labels, None, sample.value);
        }
        output.push('\n');
    }
    output
}

/// Something that produces metric samples on demand
#[async_trait]
pub trait Collector: Send + Sync {
    /// Describes every metric family [`Collector::collect`] produces
    async fn describe(&self) -> Vec<Descriptor>;

    async fn collect(&self) -> Vec<Sample>;
}
