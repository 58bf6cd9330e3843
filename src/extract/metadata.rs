use scraper::{Html, Selector};
use url::Url;

use crate::core::types::PageMetadata;

/// Pull page metadata out of rendered HTML.
///
/// Title falls back from `<title>` to `og:title`; description from the
/// `description` meta to `og:description`; author from `author` to
/// `article:author`; language from `language`/`og:locale` metas to the
/// `lang` attribute on `<html>`, truncated to two characters. Article
/// timestamps are kept as the ISO strings the page declared. The favicon is
/// resolved against the source URL.
pub fn extract_metadata(html: &str, url: &str) -> PageMetadata {
    let document = Html::parse_document(html);
    let base = Url::parse(url).ok();

    let mut meta = PageMetadata {
        source_url: url.to_string(),
        ..Default::default()
    };

    if let Some(title) = select_text(&document, "title") {
        meta.title = Some(title);
    }

    let mut og_title = None;
    if let Ok(sel) = Selector::parse("meta") {
        for el in document.select(&sel) {
            let name = el.value().attr("name").unwrap_or("").to_ascii_lowercase();
            let property = el
                .value()
                .attr("property")
                .unwrap_or("")
                .to_ascii_lowercase();
            let Some(content) = el.value().attr("content").map(str::trim) else {
                continue;
            };
            if content.is_empty() {
                continue;
            }

            if name == "description" || property == "og:description" {
                meta.description.get_or_insert_with(|| content.to_string());
            } else if name == "keywords" {
                meta.keywords.get_or_insert_with(|| content.to_string());
            } else if name == "author" || property == "article:author" {
                meta.author.get_or_insert_with(|| content.to_string());
            } else if name == "language" || property == "og:locale" {
                meta.language
                    .get_or_insert_with(|| two_char_lang(content));
            } else if property == "article:published_time" {
                meta.published_date
                    .get_or_insert_with(|| content.to_string());
            } else if property == "article:modified_time" {
                meta.modified_date
                    .get_or_insert_with(|| content.to_string());
            } else if property == "og:title" {
                og_title.get_or_insert_with(|| content.to_string());
            }
        }
    }

    if meta.title.is_none() {
        meta.title = og_title;
    }

    if meta.language.is_none() {
        if let Ok(sel) = Selector::parse("html") {
            if let Some(el) = document.select(&sel).next() {
                if let Some(lang) = el.value().attr("lang").map(str::trim) {
                    if !lang.is_empty() {
                        meta.language = Some(two_char_lang(lang));
                    }
                }
            }
        }
    }

    if let Ok(sel) = Selector::parse("link[rel~=\"icon\"]") {
        if let Some(el) = document.select(&sel).next() {
            if let Some(href) = el.value().attr("href") {
                meta.favicon = match base.as_ref() {
                    Some(b) => b.join(href).ok().map(|u| u.to_string()),
                    None => Some(href.to_string()),
                };
            }
        }
    }

    meta
}

fn select_text(document: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    let el = document.select(&sel).next()?;
    let text = el.text().collect::<String>().trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn two_char_lang(value: &str) -> String {
    value.chars().take(2).collect::<String>().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"<html lang="en-US"><head>
<title>Page Title</title>
<meta name="description" content="A description.">
<meta name="keywords" content="a,b,c">
<meta name="author" content="Jordan">
<meta property="article:published_time" content="2024-03-01T12:00:00Z">
<meta property="article:modified_time" content="2024-03-02T12:00:00Z">
<link rel="icon" href="/favicon.ico">
</head><body></body></html>"#;

    #[test]
    fn full_metadata() {
        let meta = extract_metadata(FULL, "https://example.com/post");
        assert_eq!(meta.source_url, "https://example.com/post");
        assert_eq!(meta.title.as_deref(), Some("Page Title"));
        assert_eq!(meta.description.as_deref(), Some("A description."));
        assert_eq!(meta.keywords.as_deref(), Some("a,b,c"));
        assert_eq!(meta.author.as_deref(), Some("Jordan"));
        assert_eq!(meta.language.as_deref(), Some("en"));
        assert_eq!(
            meta.published_date.as_deref(),
            Some("2024-03-01T12:00:00Z")
        );
        assert_eq!(meta.modified_date.as_deref(), Some("2024-03-02T12:00:00Z"));
        assert_eq!(
            meta.favicon.as_deref(),
            Some("https://example.com/favicon.ico")
        );
    }

    #[test]
    fn og_title_fallback() {
        let html = r#"<head><meta property="og:title" content="OG Title">
<meta property="og:description" content="OG Desc"></head>"#;
        let meta = extract_metadata(html, "https://example.com/");
        assert_eq!(meta.title.as_deref(), Some("OG Title"));
        assert_eq!(meta.description.as_deref(), Some("OG Desc"));
    }

    #[test]
    fn title_tag_wins_over_og() {
        let html = r#"<head><title>Real</title>
<meta property="og:title" content="OG"></head>"#;
        let meta = extract_metadata(html, "https://example.com/");
        assert_eq!(meta.title.as_deref(), Some("Real"));
    }

    #[test]
    fn og_locale_language() {
        let html = r#"<head><meta property="og:locale" content="fr_FR"></head>"#;
        let meta = extract_metadata(html, "https://example.com/");
        assert_eq!(meta.language.as_deref(), Some("fr"));
    }

    #[test]
    fn missing_everything_is_fine() {
        let meta = extract_metadata("<html><body>hi</body></html>", "https://example.com/");
        assert!(meta.title.is_none());
        assert!(meta.description.is_none());
        assert!(meta.favicon.is_none());
    }
}
