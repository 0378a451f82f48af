use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportResult;
use crate::server::ServerApi;

/// Upper bound on the serialized size of one upload batch.
const MAX_BATCH_BYTES: usize = 1_000_000;
/// Upper bound on the object count of one upload batch.
const MAX_BATCH_OBJECTS: usize = 500;
/// zstd level for batch compression; favors speed over ratio.
const COMPRESSION_LEVEL: i32 = 3;

/// Connection settings for [`HttpServerApi`].
#[derive(Clone, Debug)]
pub struct ServerOptions {
    /// Server base URL, e.g. `https://objects.example.com`.
    pub url: String,
    /// Stream (object namespace) the transport is scoped to.
    pub stream_id: String,
    /// Bearer token; `None` for anonymous access.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl ServerOptions {
    pub fn new(url: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_id: stream_id.into(),
            token: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

#[derive(Serialize, Deserialize)]
struct WireObject {
    id: String,
    data: String,
}

/// HTTP implementation of [`ServerApi`].
///
/// Uploads are size- and count-capped batches, each serialized as a JSON
/// array, zstd-compressed, and sent as one multipart part. Downloads of
/// many objects go through a single batch endpoint.
pub struct HttpServerApi {
    client: reqwest::Client,
    options: ServerOptions,
}

impl HttpServerApi {
    pub fn new(options: ServerOptions) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        Ok(Self { client, options })
    }

    fn objects_url(&self) -> String {
        format!("{}/streams/{}/objects", self.options.url, self.options.stream_id)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.options.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Split objects into batches no larger than [`MAX_BATCH_BYTES`] and
    /// [`MAX_BATCH_OBJECTS`]. An oversized single object still ships, as
    /// its own batch.
    fn plan_batches(objects: &[(String, String)]) -> Vec<&[(String, String)]> {
        let mut batches = Vec::new();
        let mut start = 0;
        let mut bytes = 0usize;
        for (i, (id, payload)) in objects.iter().enumerate() {
            let size = id.len() + payload.len();
            let at_capacity =
                i > start && (bytes + size > MAX_BATCH_BYTES || i - start >= MAX_BATCH_OBJECTS);
            if at_capacity {
                batches.push(&objects[start..i]);
                start = i;
                bytes = 0;
            }
            bytes += size;
        }
        if start < objects.len() {
            batches.push(&objects[start..]);
        }
        batches
    }

    async fn upload_batch(&self, index: usize, batch: &[(String, String)]) -> TransportResult<()> {
        let wire: Vec<WireObject> = batch
            .iter()
            .map(|(id, data)| WireObject {
                id: id.clone(),
                data: data.clone(),
            })
            .collect();
        let raw = serde_json::to_vec(&wire)?;
        let compressed = zstd::encode_all(raw.as_slice(), COMPRESSION_LEVEL)?;
        debug!(
            batch = index,
            objects = batch.len(),
            raw_bytes = raw.len(),
            sent_bytes = compressed.len(),
            "uploading object batch"
        );

        let part = reqwest::multipart::Part::bytes(compressed)
            .file_name(format!("batch-{index}"))
            .mime_str("application/octet-stream")?;
        let form = reqwest::multipart::Form::new().part(format!("batch-{index}"), part);

        self.request(self.client.post(self.objects_url()))
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ServerApi for HttpServerApi {
    async fn download_object(&self, id: &str) -> TransportResult<Option<String>> {
        let url = format!("{}/{id}/single", self.objects_url());
        let response = self.request(self.client.get(url)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.text().await?))
    }

    async fn download_objects(&self, ids: &[String]) -> TransportResult<Vec<(String, String)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/batch", self.objects_url());
        let wire: Vec<WireObject> = self
            .request(self.client.post(url))
            .json(&serde_json::json!({ "objects": ids }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(wire.into_iter().map(|obj| (obj.id, obj.data)).collect())
    }

    async fn has_objects(&self, ids: &[String]) -> TransportResult<HashMap<String, bool>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let url = format!("{}/streams/{}/diff", self.options.url, self.options.stream_id);
        let present: HashMap<String, bool> = self
            .request(self.client.post(url))
            .json(&serde_json::json!({ "objects": ids }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        // Every requested id must appear, even if the server elided it.
        Ok(ids
            .iter()
            .map(|id| (id.clone(), present.get(id).copied().unwrap_or(false)))
            .collect())
    }

    async fn upload_objects(&self, objects: &[(String, String)]) -> TransportResult<()> {
        for (index, batch) in Self::plan_batches(objects).into_iter().enumerate() {
            self.upload_batch(index, batch).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(id: &str, size: usize) -> (String, String) {
        (id.to_owned(), "x".repeat(size))
    }

    #[test]
    fn batches_respect_object_count_cap() {
        let objects: Vec<_> = (0..MAX_BATCH_OBJECTS + 1)
            .map(|i| obj(&format!("id-{i}"), 10))
            .collect();
        let batches = HttpServerApi::plan_batches(&objects);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), MAX_BATCH_OBJECTS);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn batches_respect_byte_cap() {
        let objects = vec![
            obj("a", MAX_BATCH_BYTES - 100),
            obj("b", MAX_BATCH_BYTES - 100),
        ];
        let batches = HttpServerApi::plan_batches(&objects);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn oversized_single_object_still_ships() {
        let objects = vec![obj("huge", MAX_BATCH_BYTES * 2)];
        let batches = HttpServerApi::plan_batches(&objects);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn empty_input_plans_no_batches() {
        let batches = HttpServerApi::plan_batches(&[]);
        assert!(batches.is_empty());
    }
}
