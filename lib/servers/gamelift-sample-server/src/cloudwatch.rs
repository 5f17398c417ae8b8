//! CloudWatch adapters for the metric sink and the log backend.
//!
//! A fresh client is built from the shared config for every call and dropped
//! when the call returns.

use anyhow::Result;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, SdkError};
use aws_sdk_cloudwatchlogs::operation::create_log_group::CreateLogGroupError;
use aws_sdk_cloudwatchlogs::operation::create_log_stream::CreateLogStreamError;
use aws_sdk_cloudwatchlogs::operation::put_log_events::PutLogEventsError;
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use tracing::instrument;

use crate::error::ShipError;
use crate::log_shipper::{LogBackend, LogEvent};
use crate::metrics::{MetricSample, MetricUnit, MetricsSink};

/// Publishes samples with `PutMetricData`.
#[derive(Debug, Clone)]
pub struct CloudWatchMetrics {
    config: aws_sdk_cloudwatch::Config,
}

impl CloudWatchMetrics {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self::from_conf(aws_sdk_cloudwatch::Config::from(sdk_config))
    }

    pub fn from_conf(config: aws_sdk_cloudwatch::Config) -> Self {
        Self { config }
    }
}

impl From<MetricUnit> for StandardUnit {
    fn from(unit: MetricUnit) -> Self {
        match unit {
            MetricUnit::Count => StandardUnit::Count,
        }
    }
}

#[async_trait]
impl MetricsSink for CloudWatchMetrics {
    #[instrument(skip_all, fields(namespace = %namespace, metric = %sample.name))]
    async fn put_metric(&self, namespace: &str, sample: &MetricSample) -> Result<()> {
        let datum = MetricDatum::builder()
            .metric_name(&sample.name)
            .dimensions(
                Dimension::builder()
                    .name(&sample.dimension.name)
                    .value(&sample.dimension.value)
                    .build(),
            )
            .unit(StandardUnit::from(sample.unit))
            .value(sample.value)
            .build();

        let client = aws_sdk_cloudwatch::Client::from_conf(self.config.clone());
        client
            .put_metric_data()
            .namespace(namespace)
            .metric_data(datum)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to publish metric: {}",
                    aws_sdk_cloudwatch::error::DisplayErrorContext(&e)
                )
            })?;

        tracing::debug!(value = sample.value, "Published metric");
        Ok(())
    }
}

/// Ships log events with `PutLogEvents` and creates missing groups/streams.
#[derive(Debug, Clone)]
pub struct CloudWatchLogs {
    config: aws_sdk_cloudwatchlogs::Config,
}

impl CloudWatchLogs {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self::from_conf(aws_sdk_cloudwatchlogs::Config::from(sdk_config))
    }

    pub fn from_conf(config: aws_sdk_cloudwatchlogs::Config) -> Self {
        Self { config }
    }

    fn client(&self) -> aws_sdk_cloudwatchlogs::Client {
        aws_sdk_cloudwatchlogs::Client::from_conf(self.config.clone())
    }
}

fn map_put_error(err: SdkError<PutLogEventsError>) -> ShipError {
    let detail = DisplayErrorContext(&err).to_string();
    match err.into_service_error() {
        PutLogEventsError::ResourceNotFoundException(_) => ShipError::ResourceNotFound,
        PutLogEventsError::InvalidSequenceTokenException(e) => ShipError::InvalidSequenceToken {
            expected: e.expected_sequence_token().map(String::from),
        },
        _ => ShipError::Other(detail),
    }
}

#[async_trait]
impl LogBackend for CloudWatchLogs {
    async fn create_log_group(&self, log_group: &str) -> Result<(), ShipError> {
        match self
            .client()
            .create_log_group()
            .log_group_name(log_group)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!(log_group, "Created log group");
                Ok(())
            }
            Err(err) => {
                let detail = DisplayErrorContext(&err).to_string();
                match err.into_service_error() {
                    CreateLogGroupError::ResourceAlreadyExistsException(_) => Ok(()),
                    _ => Err(ShipError::Other(detail)),
                }
            }
        }
    }

    async fn create_log_stream(&self, log_group: &str, log_stream: &str) -> Result<(), ShipError> {
        match self
            .client()
            .create_log_stream()
            .log_group_name(log_group)
            .log_stream_name(log_stream)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!(log_group, log_stream, "Created log stream");
                Ok(())
            }
            Err(err) => {
                let detail = DisplayErrorContext(&err).to_string();
                match err.into_service_error() {
                    CreateLogStreamError::ResourceAlreadyExistsException(_) => Ok(()),
                    CreateLogStreamError::ResourceNotFoundException(_) => {
                        Err(ShipError::ResourceNotFound)
                    }
                    _ => Err(ShipError::Other(detail)),
                }
            }
        }
    }

    async fn put_log_events(
        &self,
        log_group: &str,
        log_stream: &str,
        events: Vec<LogEvent>,
        sequence_token: Option<&str>,
    ) -> Result<Option<String>, ShipError> {
        let events = events
            .into_iter()
            .map(|event| {
                InputLogEvent::builder()
                    .timestamp(event.timestamp_ms)
                    .message(event.message)
                    .build()
                    .map_err(|e| ShipError::Other(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client()
            .put_log_events()
            .log_group_name(log_group)
            .log_stream_name(log_stream)
            .set_log_events(Some(events))
            .set_sequence_token(sequence_token.map(String::from))
            .send()
            .await
            .map_err(map_put_error)?;

        Ok(output.next_sequence_token().map(String::from))
    }
}
