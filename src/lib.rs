//! RFox Archive
//!
//! Captures a loaded web page as one self-contained HTML file: every image is
//! inlined as a `data:` URL, every readable stylesheet becomes a `<style>`
//! block, and the result is zipped together with an `images.json` manifest
//! describing the images that were found.
//!
//! # Example
//!
//! ```no_run
//! use rfarchive::{ArchiveConfig, PageLoader};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ArchiveConfig::default();
//! let page = PageLoader::new(config.clone())?.load("https://example.com")?;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build()?;
//! let bundle = rt.block_on(rfarchive::archive_page(&page, &config))?;
//! println!("{} ({} bytes)", bundle.file_name, bundle.bytes.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod archive;
pub mod identify;
pub mod inline;
pub mod loader;
pub mod manifest;
pub mod page;
pub mod snapshot;
pub mod styles;

pub use archive::{sanitize_filename, ArchiveBundle, ArchiveSink, DirectorySink};
pub use inline::{NoopRasterizer, PngRasterizer, Rasterizer};
pub use loader::PageLoader;
pub use manifest::{CorrelationId, ManifestEntry};
pub use page::{LivePage, LoadedImage, LoadedStyleSheet, ResourceKey};
pub use snapshot::{compose, Capture, CaptureReport, DocumentCloner, HtmlCloner, VisualResource};
pub use styles::{NoopStyleResolver, StyleResolver};

/// Configuration for loading and archiving a page
///
/// The defaults load everything and inline everything:
/// - `user_agent` is a Firefox-compatible string that identifies RFOX
/// - archives are written to the current directory
///
/// # Examples
///
/// ```
/// let cfg = rfarchive::ArchiveConfig::default();
/// assert!(cfg.user_agent.contains("RFOX"));
/// assert!(cfg.enable_images && cfg.inline_styles);
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// User agent string to send with requests
    pub user_agent: String,
    /// Timeout for each request in milliseconds
    pub timeout_ms: u64,
    /// Custom HTTP headers
    pub headers: HashMap<String, String>,
    /// Whether to load images and inline them as data URLs
    pub enable_images: bool,
    /// Whether to replace stylesheet links with inline `<style>` blocks
    pub inline_styles: bool,
    /// Directory archives are written to
    pub output_dir: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/115.0 RFOX-Archive/0.1".to_string(),
            timeout_ms: 30000,
            headers: HashMap::new(),
            enable_images: true,
            inline_styles: true,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Capture `page` with the default pipeline, honoring the inlining switches
/// in `config`.
pub async fn capture(page: &LivePage, config: &ArchiveConfig) -> Result<Capture> {
    let png = PngRasterizer::new();
    let no_images = NoopRasterizer::new();
    let rasterizer: &dyn Rasterizer = if config.enable_images { &png } else { &no_images };

    let no_styles = NoopStyleResolver::new();
    let styles: &dyn StyleResolver = if config.inline_styles { page } else { &no_styles };

    compose(page, rasterizer, styles, &HtmlCloner::new()).await
}

/// Capture `page` and package it, named after the page title.
pub async fn archive_page(page: &LivePage, config: &ArchiveConfig) -> Result<ArchiveBundle> {
    let capture = capture(page, config).await?;
    let manifest = capture.manifest_json()?;
    archive::package(&capture.html, &manifest, &sanitize_filename(&capture.title))
}
