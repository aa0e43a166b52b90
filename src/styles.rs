//! Stylesheet inlining: swap `<link rel="stylesheet">` references in a
//! snapshot for `<style>` blocks holding the rules the live page already has.

use html5ever::{LocalName, Namespace, QualName};
use kuchiki::{Attribute, ExpandedName, NodeRef};
use url::Url;

use crate::page::LivePage;
use crate::snapshot::in_template;
use crate::{Error, Result};

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Read access to the live page's stylesheet objects.
pub trait StyleResolver {
    /// Rule texts of the live stylesheet whose address is exactly `href`, in
    /// source order. `None` when no stylesheet matches or its rules cannot be
    /// read.
    fn resolve(&self, href: &str) -> Option<Vec<String>>;
}

impl StyleResolver for LivePage {
    fn resolve(&self, href: &str) -> Option<Vec<String>> {
        // First sheet with the address decides, readable or not.
        self.stylesheets()
            .iter()
            .find(|sheet| sheet.href() == href)
            .and_then(|sheet| sheet.rules())
            .map(|rules| rules.to_vec())
    }
}

/// Resolver that never matches; leaves every reference external.
pub struct NoopStyleResolver;

impl NoopStyleResolver {
    pub fn new() -> Self {
        NoopStyleResolver
    }
}

impl Default for NoopStyleResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl StyleResolver for NoopStyleResolver {
    fn resolve(&self, _href: &str) -> Option<Vec<String>> {
        None
    }
}

/// Outcome of one inlining pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StyleReport {
    pub inlined: usize,
    pub skipped: usize,
}

/// Replace every resolvable stylesheet link under `document` with an inline
/// `<style>` block. Unresolvable links are left untouched.
pub fn inline_styles(
    document: &NodeRef,
    base: &Url,
    resolver: &dyn StyleResolver,
) -> Result<StyleReport> {
    let mut report = StyleReport::default();

    // Collect first: links are detached while we go.
    let links: Vec<_> = document
        .select("link[rel=\"stylesheet\"]")
        .map_err(|()| Error::SnapshotError("invalid stylesheet selector".into()))?
        .filter(|link| !in_template(link.as_node()))
        .collect();

    for link in links {
        let href = {
            let attrs = link.attributes.borrow();
            attrs.get("href").map(|h| {
                base.join(h.trim())
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| h.to_string())
            })
        };

        let css_text = href
            .as_deref()
            .and_then(|href| resolver.resolve(href))
            .map(|rules| rules.iter().map(|r| format!("{}\n", r)).collect::<String>())
            .unwrap_or_default();

        if css_text.is_empty() {
            log::debug!(
                "Leaving stylesheet external, no readable rules for {}",
                href.as_deref().unwrap_or("<no href>")
            );
            report.skipped += 1;
            continue;
        }

        let style = NodeRef::new_element(
            QualName::new(None, Namespace::from(HTML_NS), LocalName::from("style")),
            Vec::<(ExpandedName, Attribute)>::new(),
        );
        style.append(NodeRef::new_text(css_text));

        let node = link.as_node();
        node.insert_before(style);
        node.detach();

        log::debug!("Inlined stylesheet {}", href.as_deref().unwrap_or_default());
        report.inlined += 1;
    }

    Ok(report)
}

/// Split stylesheet source into its top-level rules, preserving each rule's
/// text and their order. Comments and `<!--`/`-->` markers are dropped; an
/// unterminated final block is closed.
pub fn split_rules(css: &str) -> Vec<String> {
    let mut rules = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut chars = css.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '/' if css[i..].starts_with("/*") => {
                let end = css[i + 2..].find("*/").map(|e| i + 2 + e + 2).unwrap_or(css.len());
                while chars.peek().map_or(false, |&(j, _)| j < end) {
                    chars.next();
                }
            }
            '<' if depth == 0 && current.trim().is_empty() && css[i..].starts_with("<!--") => {
                chars.nth(2);
            }
            '-' if depth == 0 && current.trim().is_empty() && css[i..].starts_with("-->") => {
                chars.nth(1);
            }
            '"' | '\'' => {
                current.push(c);
                while let Some((_, s)) = chars.next() {
                    current.push(s);
                    if s == '\\' {
                        if let Some((_, escaped)) = chars.next() {
                            current.push(escaped);
                        }
                    } else if s == c || s == '\n' {
                        break;
                    }
                }
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                if depth == 0 {
                    continue;
                }
                depth -= 1;
                current.push(c);
                if depth == 0 {
                    flush(&mut rules, &mut current);
                }
            }
            ';' if depth == 0 => {
                current.push(c);
                flush(&mut rules, &mut current);
            }
            _ => current.push(c),
        }
    }

    if depth > 0 {
        current.extend(std::iter::repeat('}').take(depth));
        flush(&mut rules, &mut current);
    } else if current.trim_start().starts_with('@') {
        flush(&mut rules, &mut current);
    }

    rules
}

fn flush(rules: &mut Vec<String>, current: &mut String) {
    let rule = current.trim();
    if !rule.is_empty() && rule != ";" {
        rules.push(rule.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use kuchiki::traits::TendrilSink;

    struct MapResolver(Vec<(&'static str, Option<Vec<String>>)>);

    impl StyleResolver for MapResolver {
        fn resolve(&self, href: &str) -> Option<Vec<String>> {
            self.0.iter().find(|(h, _)| *h == href).and_then(|(_, r)| r.clone())
        }
    }

    fn base() -> Url {
        Url::parse("https://example.com/page/").unwrap()
    }

    #[test]
    fn split_single_rule() {
        assert_eq!(split_rules("a{color:red}"), vec!["a{color:red}"]);
    }

    #[test]
    fn split_keeps_order_and_nested_blocks() {
        let css = "a{color:red}\n/* note { } */ @media (min-width: 10px) { b { c: d } }\n@import url(\"x;y.css\");\np::before { content: \"}\" }";
        assert_eq!(
            split_rules(css),
            vec![
                "a{color:red}",
                "@media (min-width: 10px) { b { c: d } }",
                "@import url(\"x;y.css\");",
                "p::before { content: \"}\" }",
            ]
        );
    }

    #[test]
    fn split_closes_unterminated_block_and_drops_noise() {
        assert_eq!(split_rules("<!-- a{x:y} --> b{z:w"), vec!["a{x:y}", "b{z:w}"]);
        assert_eq!(split_rules("} stray"), Vec::<String>::new());
        assert_eq!(split_rules("@charset \"utf-8\""), vec!["@charset \"utf-8\""]);
    }

    #[test]
    fn matched_link_becomes_style_block() {
        let doc = kuchiki::parse_html().one(
            r#"<html><head><link rel="stylesheet" href="/main.css"><link rel="stylesheet" href="late.css"></head><body></body></html>"#,
        );
        let resolver = MapResolver(vec![
            ("https://example.com/main.css", Some(vec!["a{color:red}".to_string()])),
            ("https://example.com/page/late.css", Some(vec!["b{x:y}".into(), "i{z:w}".into()])),
        ]);

        let report = inline_styles(&doc, &base(), &resolver).unwrap();
        assert_eq!(report, StyleReport { inlined: 2, skipped: 0 });

        let html = doc.to_string();
        assert!(!html.contains("<link"));
        assert!(html.contains("<style>a{color:red}\n</style><style>b{x:y}\ni{z:w}\n</style>"));
    }

    #[test]
    fn unmatched_and_unreadable_links_stay() {
        let doc = kuchiki::parse_html().one(
            r#"<html><head><link rel="stylesheet" href="https://other.org/x.css"><link rel="stylesheet" href="/locked.css"></head></html>"#,
        );
        let resolver = MapResolver(vec![("https://example.com/locked.css", None)]);

        let report = inline_styles(&doc, &base(), &resolver).unwrap();
        assert_eq!(report, StyleReport { inlined: 0, skipped: 2 });

        let html = doc.to_string();
        assert!(html.contains(r#"href="https://other.org/x.css""#));
        assert!(html.contains(r#"href="/locked.css""#));
        assert!(!html.contains("<style"));
    }

    #[test]
    fn links_inside_templates_are_left_alone() {
        let doc = kuchiki::parse_html().one(
            r#"<html><head><link rel="stylesheet" href="/main.css"></head><body><template><link rel="stylesheet" href="/main.css"></template></body></html>"#,
        );
        let template = doc.select_first("template").unwrap();
        let contents = template.template_contents.clone().unwrap();
        for inner in contents.children().collect::<Vec<_>>() {
            template.as_node().append(inner);
        }
        let resolver = MapResolver(vec![("https://example.com/main.css", Some(vec!["a{b:c}".to_string()]))]);

        let report = inline_styles(&doc, &base(), &resolver).unwrap();
        assert_eq!(report, StyleReport { inlined: 1, skipped: 0 });
        assert!(doc.to_string().contains(r#"<template><link href="/main.css" rel="stylesheet"></template>"#));
    }

    #[test]
    fn live_page_resolver_uses_first_exact_match() {
        use crate::page::LoadedStyleSheet;
        let page = LivePage::parse(base(), "<html></html>")
            .with_stylesheet(LoadedStyleSheet::opaque("https://example.com/a.css"))
            .with_stylesheet(LoadedStyleSheet::parse("https://example.com/a.css", "x{y:z}"))
            .with_stylesheet(LoadedStyleSheet::parse("https://example.com/b.css", "b{c:d} e{f:g}"));

        assert_eq!(page.resolve("https://example.com/a.css"), None);
        assert_eq!(
            page.resolve("https://example.com/b.css"),
            Some(vec!["b{c:d}".to_string(), "e{f:g}".to_string()])
        );
        assert_eq!(page.resolve("https://example.com/B.css"), None);
    }
}
