//! Human-readable names for images, guessed from the markup around them.

use scraper::{ElementRef, Selector};
use std::sync::OnceLock;

use crate::page::cached_selector;

static LIST_ITEM: OnceLock<Selector> = OnceLock::new();
static PRIMARY_LINK_BOLD: OnceLock<Selector> = OnceLock::new();
static TITLED_LINK: OnceLock<Selector> = OnceLock::new();

/// Best-effort display name for an image element, or `""` when no heuristic
/// matches. The element must belong to the document being inspected.
///
/// Heuristics are tried in order and the first non-empty result wins:
/// `alt` text, the bold text of a primary link in the enclosing list item,
/// the title of an enclosing link, the parent's title, and finally the text
/// of the next element sibling.
pub fn display_name(img: &ElementRef<'_>) -> String {
    alt_text(img)
        .or_else(|| list_item_heading(img))
        .or_else(|| link_title(img))
        .or_else(|| parent_title(img))
        .or_else(|| sibling_text(img))
        .unwrap_or_default()
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn closest<'a>(el: &ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| selector.matches(a))
}

fn alt_text(img: &ElementRef<'_>) -> Option<String> {
    img.value().attr("alt").and_then(non_empty)
}

fn list_item_heading(img: &ElementRef<'_>) -> Option<String> {
    let item = closest(img, cached_selector(&LIST_ITEM, "li.list-item"))?;
    let bold = item
        .select(cached_selector(&PRIMARY_LINK_BOLD, "a.text-primary b"))
        .next()?;
    non_empty(&bold.text().collect::<String>())
}

fn link_title(img: &ElementRef<'_>) -> Option<String> {
    closest(img, cached_selector(&TITLED_LINK, "a[title]"))
        .and_then(|a| a.value().attr("title"))
        .and_then(non_empty)
}

fn parent_title(img: &ElementRef<'_>) -> Option<String> {
    img.parent()
        .and_then(ElementRef::wrap)
        .and_then(|p| p.value().attr("title"))
        .and_then(non_empty)
}

fn sibling_text(img: &ElementRef<'_>) -> Option<String> {
    img.next_siblings()
        .find_map(ElementRef::wrap)
        .and_then(|s| non_empty(&s.text().collect::<String>()))
}
