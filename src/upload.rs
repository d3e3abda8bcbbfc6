//! Photo upload pipeline: store the picked image, then resolve its URL.

use tracing::debug;

use crate::backend::{BackendError, BlobStore, LocalImage};

/// Folder under which chat photos are stored.
pub const PHOTOS_PATH: &str = "chat_photos";

/// Storage path for a picked image: `chat_photos/<file name>`.
///
/// # Errors
///
/// Returns `InvalidPath` if the local path has no usable file name.
pub fn photo_path(image: &LocalImage) -> Result<String, BackendError> {
    let name = image
        .file_name()
        .ok_or_else(|| BackendError::InvalidPath(image.path.display().to_string()))?;
    Ok(format!("{PHOTOS_PATH}/{name}"))
}

/// Upload `image` and return its download URL.
///
/// The URL is only requested once the upload succeeded; a same-named photo
/// already in the folder is overwritten.
///
/// # Errors
///
/// Returns the first failing step's error.
pub async fn upload_photo(photos: &dyn BlobStore, image: &LocalImage) -> Result<String, BackendError> {
    let path = photo_path(image)?;
    let object = photos.put_file(&path, image).await?;
    debug!(path = %object.path, size = object.size, "upload: stored");
    photos.download_url(&object.path).await
}

#[cfg(test)]
#[path = "upload_test.rs"]
mod tests;
