use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::background_removal::RemovalError;
use crate::http::storage::StorageError;

mod pipeline;

pub use pipeline::{encode_webp, Pipeline};

pub const OUTPUT_SUFFIX: &str = "_logoified";
pub const OUTPUT_EXTENSION: &str = "webp";
pub const OUTPUT_MIME: &str = "image/webp";

/// Longest file name most filesystems accept (`NAME_MAX`).
pub const MAX_SEGMENT_LEN: usize = 255;

// Random characters tempfile inserts between the prefix and the suffix.
const TEMP_RANDOM_LEN: usize = 6;

#[derive(Error, Debug)]
pub enum LogoifyError {
  #[error("bad request: {0}")]
  BadRequest(String),
  #[error("object not found: {0}")]
  NotFound(String),
  #[error("storage access denied: {0}")]
  Access(String),
  #[error("storage transport failure: {0}")]
  Transport(String),
  #[error("invalid image data: {0}")]
  Decode(String),
  #[error("processing failed: {0}")]
  Processing(String),
}

impl From<StorageError> for LogoifyError {
  fn from(err: StorageError) -> Self {
    match err {
      StorageError::NotFound(key) => LogoifyError::NotFound(key),
      e @ StorageError::Access { .. } => LogoifyError::Access(e.to_string()),
      e @ StorageError::Transport { .. } => LogoifyError::Transport(e.to_string()),
    }
  }
}

impl From<RemovalError> for LogoifyError {
  fn from(err: RemovalError) -> Self {
    LogoifyError::Processing(err.to_string())
  }
}

/// An input key split into its `identifier/name/type` segments.
///
/// Segments past the third are carried along in the key but otherwise ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
  key: String,
  identifier: String,
  name: String,
  kind: String,
}

impl ObjectKey {
  pub fn parse(key: &str) -> Result<Self, LogoifyError> {
    let mut segments = key.split('/');

    match (segments.next(), segments.next(), segments.next()) {
      (Some(identifier), Some(name), Some(kind))
        if !identifier.is_empty() && !name.is_empty() && !kind.is_empty() =>
      {
        if let Some(bad) = [identifier, name, kind]
          .into_iter()
          .find(|s| !is_valid_segment(s))
        {
          return Err(LogoifyError::BadRequest(format!(
            "key segment {:?} is not usable as a file name",
            bad
          )));
        }

        let temp_len = name.len() + TEMP_RANDOM_LEN + 1 + kind.len();
        let output_len = name.len() + OUTPUT_SUFFIX.len() + 1 + OUTPUT_EXTENSION.len();
        if temp_len.max(output_len) > MAX_SEGMENT_LEN {
          return Err(LogoifyError::BadRequest(
            "key name and type are too long for a file name".to_owned(),
          ));
        }

        Ok(Self {
          key: key.to_owned(),
          identifier: identifier.to_owned(),
          name: name.to_owned(),
          kind: kind.to_owned(),
        })
      }
      _ => Err(LogoifyError::BadRequest(format!(
        "key must have the form <id>/<name>/<type>, got {:?}",
        key
      ))),
    }
  }

  pub fn as_str(&self) -> &str {
    &self.key
  }

  pub fn identifier(&self) -> &str {
    &self.identifier
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn kind(&self) -> &str {
    &self.kind
  }

  pub fn output_key(&self) -> String {
    format!(
      "{}/{}{}.{}",
      self.identifier, self.name, OUTPUT_SUFFIX, OUTPUT_EXTENSION
    )
  }
}

fn is_valid_segment(segment: &str) -> bool {
  segment.len() <= MAX_SEGMENT_LEN
    && segment != "."
    && segment != ".."
    && !segment.chars().any(|c| c.is_control() || c == '\\')
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
pub struct LogoifyResponse {
  #[serde(rename = "statusCode")]
  pub status_code: u16,
  pub url: String,
}

impl LogoifyResponse {
  pub fn created(url: String) -> Self {
    Self {
      status_code: 201,
      url,
    }
  }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct ErrorResponse {
  #[serde(rename = "statusCode")]
  pub status_code: u16,
  pub error: String,
}
