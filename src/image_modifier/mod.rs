use image::DynamicImage;

pub mod trim;

pub type ModifierError = Box<dyn std::error::Error + Send + Sync>;

/// A synchronous image transformation run on the rayon pool.
///
/// `Ok(None)` means the modifier left the image untouched.
pub trait ImageModifier: Send + Sync {
  fn apply(&self, img: &DynamicImage) -> Result<Option<DynamicImage>, ModifierError>;
}
