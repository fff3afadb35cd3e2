use std::io;
use std::path::{Component, Path, PathBuf};

use crate::http::storage::{PutObjectOutput, Storage, StorageError, StorageResult, Visibility};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use url::Url;

/// Filesystem backed store, used for development and the integration tests.
pub struct Client {
  path: PathBuf,
  base_url: Url,
}

impl Client {
  pub fn new(path: PathBuf, base_url: &str) -> Result<Self> {
    let base_url = Url::parse(&crate::util::with_trailing_slash(base_url))
      .context("failed to parse local storage base url")?;

    Ok(Self { path, base_url })
  }

  fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
    let relative = Path::new(key.trim_start_matches('/'));
    if relative
      .components()
      .any(|c| !matches!(c, Component::Normal(_)))
    {
      return Err(StorageError::access(key, "key escapes the storage root"));
    }

    Ok(self.path.join(relative))
  }
}

fn map_io(err: io::Error, key: &str) -> StorageError {
  match err.kind() {
    io::ErrorKind::NotFound => StorageError::NotFound(key.to_owned()),
    io::ErrorKind::PermissionDenied => StorageError::access(key, err.to_string()),
    _ => StorageError::transport(key, err.to_string()),
  }
}

#[async_trait]
impl Storage for Client {
  async fn download_object(&self, key: &str) -> StorageResult<Vec<u8>> {
    let file_path = self.object_path(key)?;

    let mut file = tokio::fs::File::open(&file_path)
      .await
      .map_err(|e| map_io(e, key))?;

    let mut data = Vec::new();
    file
      .read_to_end(&mut data)
      .await
      .map_err(|e| map_io(e, key))?;

    Ok(data)
  }

  async fn upload_object(
    &self,
    data: Vec<u8>,
    key: &str,
    _mime: &str,
    _visibility: Visibility,
  ) -> StorageResult<PutObjectOutput> {
    let size = data.len() as u64;

    let file_path = self.object_path(key)?;

    if let Some(parent) = file_path.parent() {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| map_io(e, key))?;
    }

    tokio::fs::write(&file_path, &data)
      .await
      .map_err(|e| map_io(e, key))?;

    Ok(PutObjectOutput {
      etag: "".to_owned(),
      url: self.public_url(key),
      size,
    })
  }

  fn public_url(&self, key: &str) -> String {
    let key = key.trim_start_matches('/');
    self
      .base_url
      .join(key)
      .map(|u| u.to_string())
      .unwrap_or_else(|_| format!("{}{}", self.base_url, key))
  }
}
