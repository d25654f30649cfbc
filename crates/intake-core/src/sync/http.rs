//! HTTP remote store
//!
//! JSON over HTTP against a document service:
//!
//! - `GET    {base}/{collection}/{id}` → document, or 404
//! - `PUT    {base}/{collection}/{id}` → `{"updatedAt": "..."}`
//! - `DELETE {base}/{collection}/{id}`
//! - `POST   {base}/batch` with `{"writes": [...]}`

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::remote::{RemoteError, RemoteResult, RemoteStore, WriteOp};
use crate::models::ItemRecord;

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct WriteAck {
    #[serde(rename = "updatedAt")]
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    writes: &'a [WriteOp],
}

/// Remote store reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemote {
    base: Url,
    client: Client,
}

impl HttpRemote {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("Invalid remote URL '{}': {}", base_url, e))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Remote URL '{}' cannot be used as a base", base_url);
        }
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { base, client })
    }

    /// Base URL in use
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// URL of a document, with each segment percent-encoded
    pub fn document_url(&self, collection: &str, id: &str) -> Url {
        self.url_with(&[collection, id])
    }

    fn url_with(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // `new` rejects cannot-be-a-base URLs, so segments are always available
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

fn transport_error(e: reqwest::Error, collection: &str, id: &str, write: bool) -> RemoteError {
    if e.is_connect() || e.is_timeout() {
        return RemoteError::NetworkUnavailable(e.to_string());
    }
    if write {
        RemoteError::WriteFailed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: e.to_string(),
        }
    } else {
        RemoteError::ReadFailed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: e.to_string(),
        }
    }
}

async fn rejected(response: reqwest::Response) -> RemoteError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    RemoteError::Rejected { status, message }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<ItemRecord>> {
        let url = self.document_url(collection, id);
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, collection, id, false))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        response
            .json::<ItemRecord>()
            .await
            .map(Some)
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn set(&self, collection: &str, record: &ItemRecord) -> RemoteResult<DateTime<Utc>> {
        let url = self.document_url(collection, &record.id);
        debug!("PUT {}", url);
        let response = self
            .client
            .put(url)
            .json(record)
            .send()
            .await
            .map_err(|e| transport_error(e, collection, &record.id, true))?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        let ack = response
            .json::<WriteAck>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        Ok(ack.updated_at)
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        let url = self.document_url(collection, id);
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| transport_error(e, collection, id, true))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(rejected(response).await)
        }
    }

    async fn batch_write(&self, ops: &[WriteOp]) -> RemoteResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let url = self.url_with(&["batch"]);
        debug!("POST {} ({} writes)", url, ops.len());
        let response = self
            .client
            .post(url)
            .json(&BatchRequest { writes: ops })
            .send()
            .await
            .map_err(|e| transport_error(e, "batch", "-", true))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(rejected(response).await)
        }
    }
}
