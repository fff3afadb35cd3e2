use async_trait::async_trait;
use thiserror::Error;

/// Access level applied to an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
  Private,
  PublicRead,
}

#[derive(Debug, Clone)]
pub struct PutObjectOutput {
  pub etag: String,
  pub url: String,
  pub size: u64,
}

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("object not found: {0}")]
  NotFound(String),
  #[error("access denied for {key}: {message}")]
  Access { key: String, message: String },
  #[error("transport failure for {key}: {message}")]
  Transport { key: String, message: String },
}

impl StorageError {
  pub fn access(key: &str, message: impl Into<String>) -> Self {
    StorageError::Access {
      key: key.to_owned(),
      message: message.into(),
    }
  }

  pub fn transport(key: &str, message: impl Into<String>) -> Self {
    StorageError::Transport {
      key: key.to_owned(),
      message: message.into(),
    }
  }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[async_trait]
pub trait Storage: Send + Sync {
  async fn download_object(&self, key: &str) -> StorageResult<Vec<u8>>;

  /// Creates or overwrites the object at `key`.
  async fn upload_object(
    &self,
    data: Vec<u8>,
    key: &str,
    mime: &str,
    visibility: Visibility,
  ) -> StorageResult<PutObjectOutput>;

  fn public_url(&self, key: &str) -> String;
}
