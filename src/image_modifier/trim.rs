use image::{DynamicImage, GenericImageView, ImageBuffer, Pixel};

use super::{ImageModifier, ModifierError};

// `2 * d - 100`: channel differences of 50 or less are treated as background.
const DIFF_SCALE: f32 = 2.0;
const DIFF_OFFSET: f32 = 100.0;

/// Pixel rectangle, `right` and `bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
  pub left: u32,
  pub top: u32,
  pub right: u32,
  pub bottom: u32,
}

impl BoundingBox {
  pub fn width(&self) -> u32 {
    self.right - self.left
  }

  pub fn height(&self) -> u32 {
    self.bottom - self.top
  }

  fn include(self, x: u32, y: u32) -> Self {
    Self {
      left: self.left.min(x),
      top: self.top.min(y),
      right: self.right.max(x + 1),
      bottom: self.bottom.max(y + 1),
    }
  }
}

/// Crops away the border that has the same color as the top-left pixel.
///
/// The corner pixel is taken as the background. An image whose subject touches
/// that corner will therefore not be trimmed the way one might expect.
pub struct TrimModifier;

impl ImageModifier for TrimModifier {
  fn apply(&self, img: &DynamicImage) -> Result<Option<DynamicImage>, ModifierError> {
    let (width, height) = img.dimensions();

    match find_trim(img) {
      Some(b) if b.left == 0 && b.top == 0 && b.right == width && b.bottom == height => Ok(None),
      Some(b) => Ok(Some(img.crop_imm(b.left, b.top, b.width(), b.height()))),
      None => Ok(None),
    }
  }
}

/// Returns `img` cropped to its content, or a copy of `img` when it is uniform.
pub fn trim(img: &DynamicImage) -> DynamicImage {
  match find_trim(img) {
    Some(b) => img.crop_imm(b.left, b.top, b.width(), b.height()),
    None => img.clone(),
  }
}

/// Bounding box of every pixel that differs noticeably from the corner color.
pub fn find_trim(img: &DynamicImage) -> Option<BoundingBox> {
  match img {
    DynamicImage::ImageLuma8(buf) => content_bbox(buf),
    DynamicImage::ImageLumaA8(buf) => content_bbox(buf),
    DynamicImage::ImageRgb8(buf) => content_bbox(buf),
    DynamicImage::ImageRgba8(buf) => content_bbox(buf),
    // Deeper modes are compared at 8 bits per channel.
    other => content_bbox(&other.to_rgba8()),
  }
}

fn content_bbox<P>(buf: &ImageBuffer<P, Vec<u8>>) -> Option<BoundingBox>
where
  P: Pixel<Subpixel = u8>,
{
  let (width, height) = buf.dimensions();
  if width == 0 || height == 0 {
    return None;
  }

  let background = *buf.get_pixel(0, 0);
  let reference = ImageBuffer::from_pixel(width, height, background);

  let mut diff = buf.clone();
  for (d, r) in diff.pixels_mut().zip(reference.pixels()) {
    d.apply2(r, |a, b| amplify(a.abs_diff(b)));
  }

  non_zero_bbox(&diff)
}

/// Doubles the difference and drops an offset so that small deviations vanish.
fn amplify(diff: u8) -> u8 {
  (f32::from(diff) * DIFF_SCALE - DIFF_OFFSET).clamp(0.0, 255.0) as u8
}

fn non_zero_bbox<P>(buf: &ImageBuffer<P, Vec<u8>>) -> Option<BoundingBox>
where
  P: Pixel<Subpixel = u8>,
{
  buf
    .enumerate_pixels()
    .filter(|(_, _, px)| px.channels().iter().any(|&c| c != 0))
    .fold(None, |bbox: Option<BoundingBox>, (x, y, _)| {
      Some(match bbox {
        Some(b) => b.include(x, y),
        None => BoundingBox {
          left: x,
          top: y,
          right: x + 1,
          bottom: y + 1,
        },
      })
    })
}
