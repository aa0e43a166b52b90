//! The live page model: a parsed document plus the subresources that were
//! loaded for it.
//!
//! A `LivePage` plays the role of the rendered document in a browser tab. It
//! is built once by the loader (or directly in tests) and is only ever read by
//! the capture pipeline. Image bitmaps are stored already decoded, keyed by
//! their absolute address, and stylesheets are stored as parsed rule lists, so
//! a capture never has to fetch anything.

use ego_tree::NodeId;
use image::{DynamicImage, GenericImageView};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::OnceLock;
use url::Url;

use crate::styles::split_rules;
use crate::Result;

/// Parse a constant selector once and cache it.
pub(crate) fn cached_selector(cell: &'static OnceLock<Selector>, css: &str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static selector is valid"))
}

static IMG: OnceLock<Selector> = OnceLock::new();
static TITLE: OnceLock<Selector> = OnceLock::new();
static BASE: OnceLock<Selector> = OnceLock::new();
static STYLESHEET_LINK: OnceLock<Selector> = OnceLock::new();

/// Identity of one element in a live page, valid for the page's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKey(NodeId);

/// Decoded state of one image address, as a browser would hold it after load.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    complete: bool,
    tainted: bool,
    bitmap: Option<DynamicImage>,
}

impl LoadedImage {
    /// A fully decoded, same-origin bitmap.
    pub fn decoded(bitmap: DynamicImage) -> Self {
        Self { complete: true, tainted: false, bitmap: Some(bitmap) }
    }

    /// Decode raw image bytes (format is sniffed).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decoded(image::load_from_memory(bytes)?))
    }

    /// A load that finished without usable pixels (404, undecodable data).
    pub fn broken() -> Self {
        Self { complete: true, tainted: false, bitmap: None }
    }

    /// A load that has not finished yet.
    pub fn pending() -> Self {
        Self { complete: false, tainted: false, bitmap: None }
    }

    /// Mark the bitmap as drawable but not readable.
    pub fn with_tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    pub fn bitmap(&self) -> Option<&DynamicImage> {
        self.bitmap.as_ref()
    }

    /// Intrinsic (unscaled) size; `(0, 0)` when nothing was decoded.
    pub fn natural_size(&self) -> (u32, u32) {
        self.bitmap.as_ref().map(|b| b.dimensions()).unwrap_or((0, 0))
    }
}

/// A stylesheet object attached to the live page.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedStyleSheet {
    href: String,
    rules: Option<Vec<String>>,
}

impl LoadedStyleSheet {
    /// A readable stylesheet; `css` is split into its top-level rules.
    pub fn parse(href: impl Into<String>, css: &str) -> Self {
        Self { href: href.into(), rules: Some(split_rules(css)) }
    }

    /// A stylesheet whose rule list cannot be read.
    pub fn opaque(href: impl Into<String>) -> Self {
        Self { href: href.into(), rules: None }
    }

    pub fn href(&self) -> &str {
        &self.href
    }

    pub fn rules(&self) -> Option<&[String]> {
        self.rules.as_deref()
    }
}

/// A parsed document with its loaded images and stylesheets.
#[derive(Debug)]
pub struct LivePage {
    url: Url,
    base: Url,
    document: Html,
    images: HashMap<String, LoadedImage>,
    stylesheets: Vec<LoadedStyleSheet>,
}

impl LivePage {
    /// Parse `html` as the document found at `url`. No subresources are
    /// attached yet.
    pub fn parse(url: Url, html: &str) -> Self {
        let document = Html::parse_document(html);
        let base = document
            .select(cached_selector(&BASE, "base[href]"))
            .next()
            .and_then(|b| b.value().attr("href"))
            .and_then(|href| url.join(href.trim()).ok())
            .unwrap_or_else(|| url.clone());

        Self {
            url,
            base,
            document,
            images: HashMap::new(),
            stylesheets: Vec::new(),
        }
    }

    pub fn with_image(mut self, src: impl Into<String>, image: LoadedImage) -> Self {
        self.insert_image(src, image);
        self
    }

    pub fn with_stylesheet(mut self, sheet: LoadedStyleSheet) -> Self {
        self.add_stylesheet(sheet);
        self
    }

    /// Attach the decoded state for an absolute image address.
    pub fn insert_image(&mut self, src: impl Into<String>, image: LoadedImage) {
        self.images.insert(src.into(), image);
    }

    pub fn add_stylesheet(&mut self, sheet: LoadedStyleSheet) {
        self.stylesheets.push(sheet);
    }

    /// Address the document was loaded from
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Base address for relative references (`<base href>` aware)
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn document(&self) -> &Html {
        &self.document
    }

    /// Document title with whitespace stripped and collapsed; empty when the
    /// page has no `<title>`.
    pub fn title(&self) -> String {
        self.document
            .select(cached_selector(&TITLE, "title"))
            .next()
            .map(|t| {
                t.text()
                    .collect::<String>()
                    .split_ascii_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default()
    }

    /// Every rendered `img` element, in document order.
    pub fn images(&self) -> Vec<(ResourceKey, ElementRef<'_>)> {
        self.document
            .select(cached_selector(&IMG, "img"))
            .filter(|img| !in_template(img))
            .map(|img| (ResourceKey(img.id()), img))
            .collect()
    }

    /// Look up a live element by key.
    pub fn element(&self, key: ResourceKey) -> Option<ElementRef<'_>> {
        self.document.tree.get(key.0).and_then(ElementRef::wrap)
    }

    /// Resolve a raw attribute value against the base address. Values that
    /// cannot be resolved are returned unchanged.
    pub fn resolve_url(&self, raw: &str) -> String {
        self.base
            .join(raw.trim())
            .map(|u| u.to_string())
            .unwrap_or_else(|_| raw.to_string())
    }

    /// Absolute address an `img` element was loaded from, or the empty string
    /// when it has no (or an empty) `src`.
    pub fn image_src(&self, img: &ElementRef<'_>) -> String {
        match img.value().attr("src") {
            Some(src) if !src.trim().is_empty() => self.resolve_url(src),
            _ => String::new(),
        }
    }

    /// Decoded state for an absolute image address.
    pub fn loaded_image(&self, src: &str) -> Option<&LoadedImage> {
        self.images.get(src)
    }

    pub fn stylesheets(&self) -> &[LoadedStyleSheet] {
        &self.stylesheets
    }

    /// Absolute addresses of every rendered `<link rel="stylesheet">`, in
    /// document order.
    pub fn stylesheet_links(&self) -> Vec<String> {
        self.document
            .select(cached_selector(&STYLESHEET_LINK, "link[rel=\"stylesheet\"]"))
            .filter(|link| !in_template(link))
            .filter_map(|link| link.value().attr("href"))
            .map(|href| self.resolve_url(href))
            .collect()
    }

    /// Outer HTML of the document element as it stands now.
    pub fn serialize(&self) -> String {
        self.document.root_element().html()
    }
}

fn in_template(el: &ElementRef<'_>) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| a.value().name() == "template")
}
