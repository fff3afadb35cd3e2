use async_trait::async_trait;
use image::DynamicImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BackgroundRemovalConfig, RemovalProvider};

mod remote;

pub use remote::RemoteRemover;

#[derive(Error, Debug)]
pub enum RemovalError {
  #[error("background removal service unreachable: {0}")]
  Unreachable(String),
  #[error("background removal service returned {status}: {body}")]
  Rejected { status: u16, body: String },
  #[error("background removal produced an unreadable image: {0}")]
  InvalidOutput(String),
  #[error("failed to prepare image for background removal: {0}")]
  Encode(String),
}

/// Cuts the subject out of an image, leaving a transparent background.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
  async fn remove_background(&self, image: DynamicImage) -> Result<DynamicImage, RemovalError>;
}

/// Returns the image as given. Only selected when the configuration asks for it.
pub struct Passthrough;

#[async_trait]
impl BackgroundRemover for Passthrough {
  async fn remove_background(&self, image: DynamicImage) -> Result<DynamicImage, RemovalError> {
    Ok(image)
  }
}

pub fn from_config(cfg: &BackgroundRemovalConfig) -> anyhow::Result<Box<dyn BackgroundRemover>> {
  Ok(match cfg.provider {
    RemovalProvider::Remote => {
      info!("background removal: remote service at {}", cfg.endpoint);
      Box::new(RemoteRemover::new(&cfg.endpoint, cfg.timeout_secs)?)
    }
    RemovalProvider::Passthrough => {
      warn!("background removal disabled, images are only trimmed and re-encoded");
      Box::new(Passthrough)
    }
  })
}
