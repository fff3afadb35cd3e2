use std::io::{BufReader, Cursor, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::{debug, info};

use super::{LogoifyError, LogoifyResponse, ObjectKey, OUTPUT_MIME};
use crate::background_removal::BackgroundRemover;
use crate::http::storage::{Storage, Visibility};
use crate::image_modifier::{trim::TrimModifier, ImageModifier};

/// Download, cut out, trim, re-encode and upload one image.
///
/// Any failing step aborts the run before anything is uploaded.
pub struct Pipeline {
  storage: Arc<dyn Storage>,
  remover: Arc<dyn BackgroundRemover>,
  modifiers: Arc<Vec<Box<dyn ImageModifier>>>,
  tmp_dir: PathBuf,
}

impl Pipeline {
  pub fn new(
    storage: Arc<dyn Storage>,
    remover: Arc<dyn BackgroundRemover>,
    tmp_dir: PathBuf,
  ) -> Self {
    let modifiers: Vec<Box<dyn ImageModifier>> = vec![Box::new(TrimModifier)];

    Self {
      storage,
      remover,
      modifiers: Arc::new(modifiers),
      tmp_dir,
    }
  }

  /// Replaces the modifiers applied after background removal.
  pub fn with_modifiers(mut self, modifiers: Vec<Box<dyn ImageModifier>>) -> Self {
    self.modifiers = Arc::new(modifiers);
    self
  }

  pub async fn run(&self, key: &ObjectKey) -> Result<LogoifyResponse, LogoifyError> {
    let data = self.storage.download_object(key.as_str()).await?;
    debug!("downloaded {} bytes for {}", data.len(), key.as_str());

    let tmp_dir = self.tmp_dir.clone();
    let download = key.clone();
    let image = on_worker(move || decode_from_tmp(&tmp_dir, &download, &data)).await?;
    info!(
      "decoded {} ({}x{})",
      key.as_str(),
      image.width(),
      image.height()
    );

    let image = self.remover.remove_background(image).await?;

    let modifiers = self.modifiers.clone();
    let encoded = on_worker(move || {
      let mut output_image = image;
      for modifier in modifiers.iter() {
        if let Some(m) = modifier
          .apply(&output_image)
          .map_err(|e| LogoifyError::Processing(format!("failed to apply modifier: {}", e)))?
        {
          output_image = m;
        }
      }

      encode_webp(&output_image)
        .map_err(|e| LogoifyError::Processing(format!("failed to encode webp: {}", e)))
    })
    .await?;

    let output_key = key.output_key();
    let upload = self
      .storage
      .upload_object(encoded, &output_key, OUTPUT_MIME, Visibility::PublicRead)
      .await?;
    info!("uploaded {} ({} bytes)", output_key, upload.size);

    Ok(LogoifyResponse::created(upload.url))
  }
}

/// Runs CPU bound work on the rayon pool and waits for it without blocking the runtime.
async fn on_worker<T, F>(work: F) -> Result<T, LogoifyError>
where
  T: Send + 'static,
  F: FnOnce() -> Result<T, LogoifyError> + Send + 'static,
{
  let (send, recv) = tokio::sync::oneshot::channel();
  rayon::spawn(move || {
    let _ = send.send(work());
  });

  recv
    .await
    .map_err(|e| LogoifyError::Processing(format!("image worker stopped: {}", e)))?
}

/// Writes the download to a temporary file named after the key and decodes it from there.
///
/// The file is removed when it goes out of scope, whichever way this returns.
fn decode_from_tmp(
  tmp_dir: &Path,
  key: &ObjectKey,
  data: &[u8],
) -> Result<DynamicImage, LogoifyError> {
  let tmp_err = |e: std::io::Error| LogoifyError::Processing(format!("temporary file: {}", e));

  let mut file = tempfile::Builder::new()
    .prefix(key.name())
    .suffix(&format!(".{}", key.kind()))
    .tempfile_in(tmp_dir)
    .map_err(tmp_err)?;

  file.write_all(data).map_err(tmp_err)?;
  file.flush().map_err(tmp_err)?;
  file.as_file_mut().rewind().map_err(tmp_err)?;

  let reader = ImageReader::new(BufReader::new(file.as_file()))
    .with_guessed_format()
    .map_err(tmp_err)?;

  reader
    .decode()
    .map_err(|e| LogoifyError::Decode(e.to_string()))
}

/// Encodes as lossless WebP. Modes other than RGB/RGBA are widened to RGBA first.
pub fn encode_webp(image: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
  let widened;
  let image = match image {
    DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
    other => {
      widened = DynamicImage::ImageRgba8(other.to_rgba8());
      &widened
    }
  };

  let mut buf = Vec::new();
  image.write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)?;

  Ok(buf)
}
