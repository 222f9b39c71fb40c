//! AWS sink backends: CloudWatch metrics, S3 snapshots, Firehose records

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_cloudwatch::types::{Dimension, MetricDatum, StandardUnit};
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use aws_sdk_s3::primitives::ByteStream;

use super::{MetricRecord, MetricUnit, MetricsSink, ObjectStore, RecordStream};
use crate::aws_support::{describe, error_code};
use crate::error::PublishError;

fn api_error(sink: &'static str, message: impl Into<String>) -> PublishError {
    PublishError::Api {
        sink,
        message: message.into(),
    }
}

fn standard_unit(unit: MetricUnit) -> StandardUnit {
    match unit {
        MetricUnit::Count => StandardUnit::Count,
        MetricUnit::Percent => StandardUnit::Percent,
        MetricUnit::None => StandardUnit::None,
    }
}

pub struct CloudWatchSink {
    client: aws_sdk_cloudwatch::Client,
}

impl CloudWatchSink {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_cloudwatch::Client::new(config),
        }
    }

    fn datum(record: &MetricRecord) -> Result<MetricDatum, PublishError> {
        let mut builder = MetricDatum::builder()
            .metric_name(&record.name)
            .value(record.value)
            .unit(standard_unit(record.unit))
            .timestamp(aws_smithy_types::DateTime::from_secs(record.timestamp.timestamp()));

        for (name, value) in &record.dimensions {
            let dimension = Dimension::builder()
                .name(name)
                .value(value)
                .build()
                .map_err(|e| api_error("metrics", e.to_string()))?;
            builder = builder.dimensions(dimension);
        }

        builder.build().map_err(|e| api_error("metrics", e.to_string()))
    }
}

#[async_trait]
impl MetricsSink for CloudWatchSink {
    async fn put_metrics(&self, namespace: &str, records: &[MetricRecord]) -> Result<(), PublishError> {
        let data = records
            .iter()
            .map(Self::datum)
            .collect::<Result<Vec<_>, _>>()?;

        self.client
            .put_metric_data()
            .namespace(namespace)
            .set_metric_data(Some(data))
            .send()
            .await
            .map_err(|e| api_error("metrics", describe(&e)))?;
        Ok(())
    }
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(config: &SdkConfig, bucket: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(config),
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_new(&self, key: &str, body: Vec<u8>) -> Result<(), PublishError> {
        let outcome = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .if_none_match("*")
            .body(ByteStream::from(body))
            .send()
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(e) if matches!(error_code(&e).as_deref(), Some("PreconditionFailed" | "ConditionalRequestConflict")) => {
                Err(PublishError::AlreadyExists(format!("s3://{}/{}", self.bucket, key)))
            }
            Err(e) => Err(api_error("archive", describe(&e))),
        }
    }
}

pub struct FirehoseStream {
    client: aws_sdk_firehose::Client,
    stream_name: String,
}

impl FirehoseStream {
    pub fn new(config: &SdkConfig, stream_name: impl Into<String>) -> Self {
        Self {
            client: aws_sdk_firehose::Client::new(config),
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl RecordStream for FirehoseStream {
    async fn put_record(&self, data: Vec<u8>) -> Result<(), PublishError> {
        let record = Record::builder()
            .data(Blob::new(data))
            .build()
            .map_err(|e| api_error("stream", e.to_string()))?;

        self.client
            .put_record()
            .delivery_stream_name(&self.stream_name)
            .record(record)
            .send()
            .await
            .map_err(|e| api_error("stream", describe(&e)))?;
        Ok(())
    }
}
