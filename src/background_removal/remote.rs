use std::io::Cursor;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tracing::debug;
use url::Url;

use super::{BackgroundRemover, RemovalError};

const REMOVE_PATH: &str = "api/remove";

/// Client for a rembg compatible HTTP server.
///
/// The image is posted as the multipart field `file` and the response body holds the
/// cut-out image.
pub struct RemoteRemover {
  client: reqwest::Client,
  url: Url,
}

impl RemoteRemover {
  pub fn new(endpoint: &str, timeout_secs: Option<u64>) -> anyhow::Result<Self> {
    let base = Url::parse(&crate::util::with_trailing_slash(endpoint))
      .with_context(|| format!("invalid background removal endpoint: {}", endpoint))?;
    let url = base.join(REMOVE_PATH)?;

    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }

    Ok(Self {
      client: builder.build().context("failed to build http client")?,
      url,
    })
  }
}

#[async_trait]
impl BackgroundRemover for RemoteRemover {
  async fn remove_background(&self, image: DynamicImage) -> Result<DynamicImage, RemovalError> {
    let mut png = Vec::new();
    image
      .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
      .map_err(|e| RemovalError::Encode(e.to_string()))?;

    debug!("sending {} bytes to {}", png.len(), self.url);

    let part = reqwest::multipart::Part::bytes(png)
      .file_name("image.png")
      .mime_str("image/png")
      .map_err(|e| RemovalError::Encode(e.to_string()))?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let response = self
      .client
      .post(self.url.clone())
      .multipart(form)
      .send()
      .await
      .map_err(|e| RemovalError::Unreachable(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RemovalError::Rejected {
        status: status.as_u16(),
        body,
      });
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| RemovalError::Unreachable(e.to_string()))?;

    image::load_from_memory(&bytes).map_err(|e| RemovalError::InvalidOutput(e.to_string()))
  }
}
