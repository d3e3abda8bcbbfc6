//! Cloud Storage for Firebase: media upload and token download URLs.
//!
//! Objects live at `b/<bucket>/o/<url-encoded path>`. A download URL is the
//! object URL with `alt=media` and one of the object's download tokens, the
//! same form the mobile SDKs hand out.

use std::sync::Arc;

use reqwest::Url;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, info};

use super::auth::fresh_id_token;
use super::{FirebaseApp, read_success, request_error};
use crate::backend::{BackendError, BlobStore, LocalImage, UploadedObject};

pub struct FirebaseStorage {
    app: Arc<FirebaseApp>,
}

impl FirebaseStorage {
    #[must_use]
    pub fn new(app: Arc<FirebaseApp>) -> Self {
        Self { app }
    }

    fn url(&self, object: Option<&str>) -> Result<Url, BackendError> {
        let config = self.app.config();
        object_url(&config.endpoints.storage, &config.storage_bucket, object)
    }
}

#[async_trait::async_trait]
impl BlobStore for FirebaseStorage {
    async fn put_file(&self, path: &str, file: &LocalImage) -> Result<UploadedObject, BackendError> {
        let bytes = tokio::fs::read(&file.path)
            .await
            .map_err(|e| BackendError::Io(format!("{}: {e}", file.path.display())))?;
        let token = fresh_id_token(&self.app).await?;
        let response = self
            .app
            .http()
            .post(self.url(None)?)
            .query(&[("uploadType", "media"), ("name", path)])
            .header(AUTHORIZATION, format!("Firebase {token}"))
            .header(CONTENT_TYPE, file.content_type.as_str())
            .body(bytes)
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let metadata = parse_metadata(&read_success(response).await?)?;
        let object = UploadedObject { size: metadata.size(), path: metadata.name };
        info!(path = %object.path, size = object.size, "storage: uploaded");
        Ok(object)
    }

    async fn download_url(&self, path: &str) -> Result<String, BackendError> {
        let url = self.url(Some(path))?;
        let token = fresh_id_token(&self.app).await?;
        let response = self
            .app
            .http()
            .get(url.clone())
            .header(AUTHORIZATION, format!("Firebase {token}"))
            .send()
            .await
            .map_err(|e| request_error(&e))?;
        let metadata = parse_metadata(&read_success(response).await?)?;
        let download = download_url_for(url, &metadata)?;
        debug!(%path, "storage: resolved download url");
        Ok(download)
    }
}

// =============================================================================
// WIRE
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    name: String,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    download_tokens: Option<String>,
}

impl ObjectMetadata {
    fn size(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0)
    }
}

fn parse_metadata(json: &str) -> Result<ObjectMetadata, BackendError> {
    serde_json::from_str(json).map_err(|e| BackendError::Parse(e.to_string()))
}

/// `<base>/b/<bucket>/o` or, with an object, `<base>/b/<bucket>/o/<object>`
/// with the object path encoded as a single segment.
fn object_url(base: &str, bucket: &str, object: Option<&str>) -> Result<Url, BackendError> {
    let mut url = Url::parse(base).map_err(|e| BackendError::Config(format!("storage url: {e}")))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|()| BackendError::Config(format!("storage url cannot hold a path: {base}")))?;
        segments.pop_if_empty().extend(["b", bucket, "o"]);
        if let Some(object) = object {
            segments.push(object);
        }
    }
    Ok(url)
}

fn download_url_for(mut object: Url, metadata: &ObjectMetadata) -> Result<String, BackendError> {
    let token = metadata
        .download_tokens
        .as_deref()
        .and_then(|tokens| tokens.split(',').map(str::trim).find(|t| !t.is_empty()))
        .ok_or_else(|| BackendError::Parse(format!("no download token for {}", metadata.name)))?;
    object
        .query_pairs_mut()
        .append_pair("alt", "media")
        .append_pair("token", token);
    Ok(object.into())
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
