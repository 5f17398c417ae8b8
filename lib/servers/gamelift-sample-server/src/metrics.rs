//! Metric samples and the sink they are published to.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Count,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

/// One data point. Built per publish and dropped afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub dimension: Dimension,
    pub unit: MetricUnit,
    pub value: f64,
}

impl MetricSample {
    pub fn count(
        name: impl Into<String>,
        dimension_name: impl Into<String>,
        dimension_value: impl Into<String>,
        value: u32,
    ) -> Self {
        Self {
            name: name.into(),
            dimension: Dimension {
                name: dimension_name.into(),
                value: dimension_value.into(),
            },
            unit: MetricUnit::Count,
            value: f64::from(value),
        }
    }
}

/// Metrics ingestion backend.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn put_metric(&self, namespace: &str, sample: &MetricSample) -> Result<()>;
}
