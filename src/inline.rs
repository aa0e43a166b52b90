//! Image inlining: turn an already decoded image into a `data:` URL.
//!
//! Rasterization goes through the `Rasterizer` trait so the capture pipeline
//! can be driven by fakes in tests. The default `PngRasterizer` draws the
//! decoded bitmap into an offscreen RGBA buffer at its natural size, reads the
//! buffer back and encodes it as PNG. Nothing is fetched here; a resource that
//! the page did not finish loading is simply not available.

use base64::Engine as _;
use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

use crate::page::LoadedImage;
use crate::snapshot::VisualResource;
use crate::{Error, Result};

/// Media type of every data URL produced by `PngRasterizer`
pub const PNG_MEDIA_TYPE: &str = "image/png";

/// Converts the pixels of one visual resource into an embeddable data URL.
pub trait Rasterizer: Send + Sync {
    /// `bitmap` is what the live page holds for the resource's address, if
    /// anything. Errors are reported, never panicked on; callers treat any
    /// error as "not available".
    fn rasterize<'a>(
        &'a self,
        resource: &'a VisualResource,
        bitmap: Option<&'a LoadedImage>,
    ) -> BoxFuture<'a, Result<String>>;
}

/// Canvas-style rasterizer producing `data:image/png;base64,...` URLs.
pub struct PngRasterizer;

impl PngRasterizer {
    pub fn new() -> Self {
        PngRasterizer
    }
}

impl Default for PngRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for PngRasterizer {
    fn rasterize<'a>(
        &'a self,
        resource: &'a VisualResource,
        bitmap: Option<&'a LoadedImage>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let loaded = bitmap
                .filter(|b| b.is_complete())
                .ok_or_else(|| Error::ResourceUnavailable(format!("{} has not loaded", resource.original_src)))?;

            let (width, height) = loaded.natural_size();
            let pixels = match loaded.bitmap() {
                Some(p) if width > 0 && height > 0 => p,
                _ => {
                    return Err(Error::ResourceUnavailable(format!(
                        "{} has no intrinsic size",
                        resource.original_src
                    )))
                }
            };

            let mut canvas = RgbaImage::new(width, height);
            image::imageops::overlay(&mut canvas, &pixels.to_rgba8(), 0, 0);

            if loaded.is_tainted() {
                return Err(Error::SecurityError(format!(
                    "pixels of cross-origin {} cannot be read",
                    resource.original_src
                )));
            }

            encode_png_data_url(&DynamicImage::ImageRgba8(canvas))
        })
    }
}

/// Rasterizer that reports every resource as not available.
pub struct NoopRasterizer;

impl NoopRasterizer {
    pub fn new() -> Self {
        NoopRasterizer
    }
}

impl Default for NoopRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Rasterizer for NoopRasterizer {
    fn rasterize<'a>(
        &'a self,
        resource: &'a VisualResource,
        _bitmap: Option<&'a LoadedImage>,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            Err(Error::ResourceUnavailable(format!(
                "image inlining disabled for {}",
                resource.original_src
            )))
        })
    }
}

/// Encode an image as a base64 PNG data URL.
pub fn encode_png_data_url(img: &DynamicImage) -> Result<String> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(format!(
        "data:{};base64,{}",
        PNG_MEDIA_TYPE,
        base64::engine::general_purpose::STANDARD.encode(&buf)
    ))
}

/// Best-effort inlining of one resource: every failure is logged and turned
/// into `None` so a single image never aborts a capture.
pub async fn inline_resource(
    rasterizer: &dyn Rasterizer,
    resource: &VisualResource,
    bitmap: Option<&LoadedImage>,
) -> Option<String> {
    match rasterizer.rasterize(resource, bitmap).await {
        Ok(data_url) => {
            log::debug!("Inlined {} ({})", resource.id, resource.original_src);
            Some(data_url)
        }
        Err(Error::ResourceUnavailable(msg)) => {
            log::debug!("Skipping {}: {}", resource.id, msg);
            None
        }
        Err(e) => {
            log::warn!("Error converting {} to a data URL: {}", resource.original_src, e);
            None
        }
    }
}
