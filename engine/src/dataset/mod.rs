//! Dataset service client
//!
//! The dataset service slices a named dataset into training, fusion and test
//! splits on demand. Split bodies can be large, so they are streamed to a
//! temporary file that lives as long as the returned handle. Label columns
//! are small and parsed in memory.

use futures::StreamExt;
use reqwest::{Client, Response};
use std::io::{self, Write};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use ccube_sdk::errors::WorkerError;
use ccube_sdk::task::{DatasetSelection, LearnTask};
use ccube_sdk::types::{ClassValue, ParameterValue};

use crate::labels::{parse_labels, LabelError};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Dataset service answered {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Response from {url} was truncated: expected {expected} bytes, received {received}")]
    Truncated {
        url: String,
        expected: u64,
        received: u64,
    },

    #[error("Failed to store dataset: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid labels from {url}: {source}")]
    Labels {
        url: String,
        #[source]
        source: LabelError,
    },
}

impl From<DatasetError> for WorkerError {
    fn from(e: DatasetError) -> Self {
        match e {
            DatasetError::Labels { .. } => WorkerError::Codec(e.to_string()),
            other => WorkerError::Fetch(other.to_string()),
        }
    }
}

type Query = Vec<(&'static str, String)>;

/// HTTP client for the dataset slicing service
#[derive(Debug, Clone)]
pub struct DatasetClient {
    base_url: String,
    client: Client,
}

impl DatasetClient {
    /// Create a client for the service at `base_url`, e.g. `http://factorizer:5000`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Training sample for one learn task
    pub async fn training_sample(&self, task: &LearnTask) -> Result<NamedTempFile, DatasetError> {
        let selection = &task.selection;
        let mut query: Query = vec![
            ("training_rate", real(selection.training_rate)),
            ("sample_rate", real(selection.sample_rate.unwrap_or(1.0))),
            ("sample_number", task.task_number.to_string()),
            ("class_attribute", selection.class_attribute.clone()),
        ];
        push_attributes(&mut query, selection);
        push_common(&mut query, selection);

        self.download(&self.url(selection, "training/sample"), &query)
            .await
    }

    /// Fusion split rows
    pub async fn fusion_split(
        &self,
        selection: &DatasetSelection,
    ) -> Result<NamedTempFile, DatasetError> {
        self.download(&self.url(selection, "fusion"), &split_query(selection))
            .await
    }

    /// Class column of the fusion split
    pub async fn fusion_labels(
        &self,
        selection: &DatasetSelection,
    ) -> Result<Vec<ClassValue>, DatasetError> {
        self.labels(selection, "fusion/class").await
    }

    /// Test split rows
    pub async fn test_split(
        &self,
        selection: &DatasetSelection,
    ) -> Result<NamedTempFile, DatasetError> {
        self.download(&self.url(selection, "test"), &split_query(selection))
            .await
    }

    /// Class column of the test split
    pub async fn test_labels(
        &self,
        selection: &DatasetSelection,
    ) -> Result<Vec<ClassValue>, DatasetError> {
        self.labels(selection, "test/class").await
    }

    fn url(&self, selection: &DatasetSelection, split: &str) -> String {
        format!(
            "{}/dataset/{}/split/{}",
            self.base_url, selection.dataset_name, split
        )
    }

    async fn get(&self, url: &str, query: &Query) -> Result<Response, DatasetError> {
        debug!("GET {} {:?}", url, query);
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| DatasetError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(DatasetError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response)
    }

    async fn download(&self, url: &str, query: &Query) -> Result<NamedTempFile, DatasetError> {
        let response = self.get(url, query).await?;
        let expected = response.content_length();

        let mut file = tempfile::Builder::new()
            .prefix("ccube-dataset-")
            .tempfile()?;
        let mut received: u64 = 0;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|source| DatasetError::Request {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk)?;
            received += chunk.len() as u64;
        }
        file.flush()?;

        if let Some(expected) = expected {
            if received != expected {
                return Err(DatasetError::Truncated {
                    url: url.to_string(),
                    expected,
                    received,
                });
            }
        }

        info!("Downloaded {} bytes from {}", received, url);
        Ok(file)
    }

    async fn labels(
        &self,
        selection: &DatasetSelection,
        split: &str,
    ) -> Result<Vec<ClassValue>, DatasetError> {
        let url = self.url(selection, split);
        let mut query: Query = vec![
            ("training_rate", real(selection.training_rate)),
            ("fusion_rate", real(selection.fusion_rate)),
            ("class_attribute", selection.class_attribute.clone()),
        ];
        push_common(&mut query, selection);

        let text = self
            .get(&url, &query)
            .await?
            .text()
            .await
            .map_err(|source| DatasetError::Request {
                url: url.clone(),
                source,
            })?;

        let labels = parse_labels(
            &text,
            selection.class_attribute_type,
            selection.include_header,
        )
        .map_err(|source| DatasetError::Labels {
            url: url.clone(),
            source,
        })?;
        debug!("Read {} labels from {}", labels.len(), url);
        Ok(labels)
    }
}

fn split_query(selection: &DatasetSelection) -> Query {
    let mut query: Query = vec![
        ("training_rate", real(selection.training_rate)),
        ("fusion_rate", real(selection.fusion_rate)),
        ("class_attribute", selection.class_attribute.clone()),
    ];
    push_attributes(&mut query, selection);
    push_common(&mut query, selection);
    query
}

fn push_attributes(query: &mut Query, selection: &DatasetSelection) {
    for attribute in &selection.include_attributes {
        query.push(("include_attributes", attribute.clone()));
    }
    for attribute in &selection.exclude_attributes {
        query.push(("exclude_attributes", attribute.clone()));
    }
    query.push(("attributes_rate", real(selection.attributes_rate)));
}

fn push_common(query: &mut Query, selection: &DatasetSelection) {
    query.push(("random_seed", selection.random_seed.to_string()));
    query.push(("include_header", flag(selection.include_header)));
}

fn real(value: f64) -> String {
    ParameterValue::Real(value).to_string()
}

/// The service parses the capitalised literals only
fn flag(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}
