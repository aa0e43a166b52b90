//! Snapshot composition: discover images on the live page, inline them, clone
//! the document and serialize one standalone HTML file.
//!
//! The live page is never touched. Each discovered image is keyed by its
//! `ResourceKey`, and the clone records which live element every copied `img`
//! came from, so inlined data is matched up through an in-memory map instead
//! of marker attributes.

use kuchiki::traits::TendrilSink;
use kuchiki::{ElementData, NodeDataRef, NodeRef};
use std::collections::HashMap;

use crate::identify::display_name;
use crate::inline::{inline_resource, Rasterizer};
use crate::manifest::{self, CorrelationId, ManifestEntry};
use crate::page::{LivePage, ResourceKey};
use crate::styles::{inline_styles, StyleReport, StyleResolver};
use crate::{Error, Result};

/// Prefix written before the serialized document element
pub const DOCTYPE: &str = "<!DOCTYPE html>\n";

/// One image discovered on the live page during a capture run.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualResource {
    pub id: CorrelationId,
    /// Absolute address the image was loaded from (empty without `src`)
    pub original_src: String,
    pub name: String,
    /// Data URL, set when inlining succeeded
    pub inlined: Option<String>,
}

impl VisualResource {
    pub fn new(id: CorrelationId, original_src: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            original_src: original_src.into(),
            name: name.into(),
            inlined: None,
        }
    }

    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            id: self.id.to_string(),
            original_src: self.original_src.clone(),
            name: self.name.clone(),
        }
    }
}

/// A mutable copy of the live document, with each copied image bound to the
/// live element it was copied from.
pub struct DocumentSnapshot {
    document: NodeRef,
    bindings: Vec<(ResourceKey, NodeDataRef<ElementData>)>,
}

impl DocumentSnapshot {
    pub fn new(document: NodeRef) -> Self {
        Self { document, bindings: Vec::new() }
    }

    /// Record that `element` in this copy corresponds to the live element `key`.
    pub fn bind(&mut self, key: ResourceKey, element: NodeDataRef<ElementData>) {
        self.bindings.push((key, element));
    }

    /// Forget the correspondence for `key`, returning the copied element.
    pub fn unbind(&mut self, key: ResourceKey) -> Option<NodeDataRef<ElementData>> {
        let pos = self.bindings.iter().position(|(k, _)| *k == key)?;
        Some(self.bindings.remove(pos).1)
    }

    pub fn bound(&self) -> impl Iterator<Item = (ResourceKey, &NodeDataRef<ElementData>)> {
        self.bindings.iter().map(|(k, e)| (*k, e))
    }

    pub fn document(&self) -> &NodeRef {
        &self.document
    }

    /// Doctype followed by the outer HTML of the document element.
    pub fn serialize(&self) -> Result<String> {
        let root = self
            .document
            .select_first("html")
            .map_err(|()| Error::SnapshotError("snapshot has no document element".into()))?;

        let mut out = Vec::new();
        root.as_node()
            .serialize(&mut out)
            .map_err(|e| Error::SnapshotError(format!("failed to serialize snapshot: {}", e)))?;
        let body = String::from_utf8(out)
            .map_err(|e| Error::SnapshotError(format!("snapshot is not UTF-8: {}", e)))?;

        Ok(format!("{}{}", DOCTYPE, body))
    }
}

/// Produces an independent structural copy of the live page.
pub trait DocumentCloner {
    fn clone_document(&self, page: &LivePage) -> Result<DocumentSnapshot>;
}

/// Clones by serializing the live tree and parsing it again into a mutable
/// tree. Copied images are bound to live images pairwise in document order;
/// a pair whose `src` attributes disagree is left unbound.
pub struct HtmlCloner;

impl HtmlCloner {
    pub fn new() -> Self {
        HtmlCloner
    }
}

impl Default for HtmlCloner {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentCloner for HtmlCloner {
    fn clone_document(&self, page: &LivePage) -> Result<DocumentSnapshot> {
        let document = kuchiki::parse_html().one(page.serialize());
        restore_template_contents(&document);

        let live = page.images();
        let copies: Vec<_> = document
            .select("img")
            .map_err(|()| Error::SnapshotError("invalid image selector".into()))?
            .filter(|img| !in_template(img.as_node()))
            .collect();
        if live.len() != copies.len() {
            log::warn!(
                "Clone has {} images but the live page has {}",
                copies.len(),
                live.len()
            );
        }

        let mut snapshot = DocumentSnapshot::new(document);
        for ((key, live_img), copy) in live.into_iter().zip(copies) {
            let same_src = live_img.value().attr("src") == copy.attributes.borrow().get("src");
            if same_src {
                snapshot.bind(key, copy);
            } else {
                log::warn!("Image order diverged in clone; leaving copy unbound");
            }
        }

        Ok(snapshot)
    }
}

/// The parser parks template children in a separate fragment that is never
/// serialized; move them back under their template, nested ones included.
fn restore_template_contents(node: &NodeRef) {
    for child in node.children() {
        if let Some(contents) = child.as_element().and_then(|el| el.template_contents.as_ref()) {
            for inner in contents.children().collect::<Vec<_>>() {
                child.append(inner);
            }
        }
        restore_template_contents(&child);
    }
}

/// Whether `node` sits inside a `<template>` and is therefore not rendered.
pub(crate) fn in_template(node: &NodeRef) -> bool {
    node.ancestors()
        .any(|a| a.as_element().map_or(false, |el| &*el.name.local == "template"))
}

/// Summary of one capture run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    pub images: usize,
    pub images_inlined: usize,
    pub styles: StyleReport,
}

/// Result of composing a snapshot: the finished document plus the records of
/// every discovered image.
#[derive(Debug, Clone)]
pub struct Capture {
    pub title: String,
    pub html: String,
    pub resources: Vec<VisualResource>,
    pub report: CaptureReport,
}

impl Capture {
    /// Manifest entries in discovery order
    pub fn manifest(&self) -> Vec<ManifestEntry> {
        self.resources.iter().map(VisualResource::manifest_entry).collect()
    }

    pub fn manifest_json(&self) -> Result<String> {
        manifest::to_json(&self.manifest())
    }
}

/// Capture the live page into one standalone document.
///
/// Images are discovered in document order and inlined one at a time. Every
/// discovered image gets a manifest entry whether or not inlining succeeded.
/// Only cloning and serialization failures abort the run.
pub async fn compose(
    page: &LivePage,
    rasterizer: &dyn Rasterizer,
    styles: &dyn StyleResolver,
    cloner: &dyn DocumentCloner,
) -> Result<Capture> {
    let mut resources = Vec::new();
    let mut by_key: HashMap<ResourceKey, usize> = HashMap::new();

    for (index, (key, img)) in page.images().into_iter().enumerate() {
        let mut resource = VisualResource::new(
            CorrelationId::new(index),
            page.image_src(&img),
            display_name(&img),
        );
        let bitmap = page.loaded_image(&resource.original_src);
        resource.inlined = inline_resource(rasterizer, &resource, bitmap).await;

        by_key.insert(key, resources.len());
        resources.push(resource);
    }

    let snapshot = cloner.clone_document(page)?;

    let mut images_inlined = 0;
    for (key, copy) in snapshot.bound() {
        let inlined = by_key
            .get(&key)
            .and_then(|&i| resources[i].inlined.as_deref());
        if let Some(data_url) = inlined {
            copy.attributes.borrow_mut().insert("src", data_url.to_string());
            images_inlined += 1;
        }
    }

    let style_report = inline_styles(snapshot.document(), page.base_url(), styles)?;
    let html = snapshot.serialize()?;

    let report = CaptureReport {
        images: resources.len(),
        images_inlined,
        styles: style_report,
    };
    log::info!(
        "Captured {}: {}/{} images inlined, {} stylesheets inlined, {} left external",
        page.url(),
        report.images_inlined,
        report.images,
        report.styles.inlined,
        report.styles.skipped
    );

    Ok(Capture {
        title: page.title(),
        html,
        resources,
        report,
    })
}
