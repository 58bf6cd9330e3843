//! HTML → structured data: metadata, main content, markdown, link and image
//! sets, and content hashes. Every operation here is pure with respect to
//! the network; rendering happens upstream.

mod markdown;
mod metadata;

pub use markdown::html_to_markdown;
pub use metadata::extract_metadata;

use std::collections::HashSet;

use lol_html::{element, rewrite_str, RewriteStrSettings};
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::crawl::normalize;

/// SHA-256 over the UTF-8 bytes, hex-encoded (64 chars).
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract the main content region of a page.
///
/// Readability first; when it fails or produces nothing, fall back to the
/// first of `<main>`, `<article>`, a div whose class or id looks like a
/// content container, or `<body>`, with `<script>`/`<style>` subtrees
/// removed.
pub fn extract_main_content(html: &str, url: &str) -> String {
    if let Ok(base) = Url::parse(url) {
        match readability::extractor::extract(&mut html.as_bytes(), &base) {
            Ok(product) if !product.content.trim().is_empty() => return product.content,
            Ok(_) => {}
            Err(e) => debug!("readability extraction failed for {url}: {e}"),
        }
    }
    fallback_main_content(html)
}

fn fallback_main_content(html: &str) -> String {
    let document = Html::parse_document(html);

    let candidates = ["main", "article"];
    for sel_str in candidates {
        if let Ok(sel) = Selector::parse(sel_str) {
            if let Some(el) = document.select(&sel).next() {
                return strip_script_style(&el.html());
            }
        }
    }

    // A div whose class or id names a content container.
    if let Ok(sel) = Selector::parse("div") {
        let marker = Regex::new(r"(?i)content|main|body").unwrap();
        for el in document.select(&sel) {
            let class = el.value().attr("class").unwrap_or("");
            let id = el.value().attr("id").unwrap_or("");
            if marker.is_match(class) || marker.is_match(id) {
                return strip_script_style(&el.html());
            }
        }
    }

    if let Ok(sel) = Selector::parse("body") {
        if let Some(el) = document.select(&sel).next() {
            return strip_script_style(&el.html());
        }
    }

    strip_script_style(html)
}

/// Remove `<script>` and `<style>` subtrees from an HTML fragment.
pub fn strip_script_style(html: &str) -> String {
    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("script, style", |el| {
                el.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .unwrap_or_else(|_| html.to_string())
}

/// Filter HTML by tag name. Excluded tags are dropped with their subtrees;
/// when `include` is set, a synthetic container holds only the matching
/// nodes.
pub fn filter_by_tags(
    html: &str,
    include: Option<&[String]>,
    exclude: Option<&[String]>,
) -> String {
    let mut out = html.to_string();

    if let Some(exclude) = exclude.filter(|tags| !tags.is_empty()) {
        let selector = exclude
            .iter()
            .filter(|t| is_plain_tag_name(t))
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if !selector.is_empty() {
            out = rewrite_str(
                &out,
                RewriteStrSettings {
                    element_content_handlers: vec![element!(selector.as_str(), |el| {
                        el.remove();
                        Ok(())
                    })],
                    ..RewriteStrSettings::default()
                },
            )
            .unwrap_or(out);
        }
    }

    if let Some(include) = include.filter(|tags| !tags.is_empty()) {
        let document = Html::parse_document(&out);
        let mut container = String::from("<div>");
        for tag in include {
            if let Ok(sel) = Selector::parse(tag) {
                for el in document.select(&sel) {
                    container.push_str(&el.html());
                }
            }
        }
        container.push_str("</div>");
        return container;
    }

    out
}

fn is_plain_tag_name(tag: &str) -> bool {
    !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// href attributes of `<a>` and `<link>`, absolutized against `base_url`,
/// http(s) only, first-appearance order, duplicates removed.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();
    let mut seen = HashSet::new();

    for sel_str in ["a[href]", "link[href]"] {
        let Ok(sel) = Selector::parse(sel_str) else {
            continue;
        };
        for el in document.select(&sel) {
            let Some(href) = el.value().attr("href") else {
                continue;
            };
            let Some(resolved) = normalize::resolve(base_url, href) else {
                continue;
            };
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }
    }

    links
}

/// Image sources from `src`/`data-src`/`data-lazy-src` and every `srcset`
/// candidate, absolutized; http/https/data schemes kept; first-occurrence
/// order with duplicates removed.
pub fn extract_images(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let mut images = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |candidate: &str, images: &mut Vec<String>, seen: &mut HashSet<String>| {
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return;
        }
        let absolute = if candidate.starts_with("data:") {
            candidate.to_string()
        } else {
            match base.as_ref().and_then(|b| b.join(candidate).ok()) {
                Some(u) => u.to_string(),
                None => return,
            }
        };
        if !(absolute.starts_with("http://")
            || absolute.starts_with("https://")
            || absolute.starts_with("data:"))
        {
            return;
        }
        if seen.insert(absolute.clone()) {
            images.push(absolute);
        }
    };

    let Ok(img_sel) = Selector::parse("img") else {
        return images;
    };
    for el in document.select(&img_sel) {
        for attr in ["src", "data-src", "data-lazy-src"] {
            if let Some(src) = el.value().attr(attr) {
                push(src, &mut images, &mut seen);
            }
        }
        if let Some(srcset) = el.value().attr("srcset") {
            for part in srcset.split(',') {
                if let Some(candidate) = part.trim().split_whitespace().next() {
                    push(candidate, &mut images, &mut seen);
                }
            }
        }
    }

    // <source srcset> inside <picture> carries responsive candidates too.
    if let Ok(source_sel) = Selector::parse("picture source[srcset]") {
        for el in document.select(&source_sel) {
            if let Some(srcset) = el.value().attr("srcset") {
                for part in srcset.split(',') {
                    if let Some(candidate) = part.trim().split_whitespace().next() {
                        push(candidate, &mut images, &mut seen);
                    }
                }
            }
        }
    }

    images
}
