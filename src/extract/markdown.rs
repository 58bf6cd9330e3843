use regex::Regex;
use url::Url;

use super::strip_script_style;

/// Soft wrap target for paragraph text.
const WRAP_COLUMN: usize = 80;

/// Convert HTML to markdown: ATX headings, `-` bullets, script/style/meta/
/// link stripped, runs of three-plus newlines collapsed to two, whitespace
/// runs collapsed outside code fences, relative links resolved against
/// `base_url`, and paragraph lines soft-wrapped near 80 columns.
pub fn html_to_markdown(html: &str, base_url: &str) -> String {
    let pre_stripped = strip_meta_noise(html);
    let raw = html2md::parse_html(&pre_stripped);
    let cleaned = clean_markdown(&raw);
    let resolved = resolve_relative_links(&cleaned, base_url);
    wrap_paragraphs(&resolved).trim().to_string()
}

/// Remove `<meta>` and `<link>` on top of the script/style strip so their
/// attribute noise never reaches the converter.
fn strip_meta_noise(html: &str) -> String {
    use lol_html::{element, rewrite_str, RewriteStrSettings};
    let stripped = strip_script_style(html);
    rewrite_str(
        &stripped,
        RewriteStrSettings {
            element_content_handlers: vec![element!("meta, link", |el| {
                el.remove();
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .unwrap_or(stripped)
}

fn clean_markdown(markdown: &str) -> String {
    // html2md can emit setext-style `==========` under a heading; prefer ATX.
    let setext = Regex::new(r"(?m)^(.+)\n=+\s*$").unwrap();
    let markdown = setext.replace_all(markdown, "# $1");
    let setext2 = Regex::new(r"(?m)^(.+)\n-{3,}\s*$").unwrap();
    let markdown = setext2.replace_all(&markdown, "## $1");

    // `*` bullets become `-` bullets.
    let bullets = Regex::new(r"(?m)^(\s*)\*\s+").unwrap();
    let markdown = bullets.replace_all(&markdown, "${1}- ");

    // Collapse whitespace runs to single spaces, leaving code alone
    // (fenced and indented).
    let spaces = Regex::new(r"[ \t]{2,}").unwrap();
    let mut out_lines = Vec::new();
    let mut in_code = false;
    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            out_lines.push(line.to_string());
            continue;
        }
        if in_code || line.starts_with("    ") || line.starts_with('\t') {
            out_lines.push(line.to_string());
        } else {
            out_lines.push(spaces.replace_all(line, " ").trim_end().to_string());
        }
    }
    let joined = out_lines.join("\n");

    // Runs of three or more newlines collapse to a blank line.
    let newlines = Regex::new(r"\n{3,}").unwrap();
    newlines.replace_all(&joined, "\n\n").into_owned()
}

/// Resolve relative targets in `[text](url)` links and `![alt](url)`
/// images against the base URL.
fn resolve_relative_links(markdown: &str, base_url: &str) -> String {
    let Ok(base) = Url::parse(base_url) else {
        return markdown.to_string();
    };
    let link_re = Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").unwrap();
    link_re
        .replace_all(markdown, |caps: &regex::Captures<'_>| {
            let bang = &caps[1];
            let text = &caps[2];
            let target = &caps[3];
            if target.starts_with("http://")
                || target.starts_with("https://")
                || target.starts_with("data:")
                || target.starts_with('#')
                || target.starts_with("mailto:")
            {
                return format!("{bang}[{text}]({target})");
            }
            match base.join(target) {
                Ok(abs) => format!("{bang}[{text}]({abs})"),
                Err(_) => format!("{bang}[{text}]({target})"),
            }
        })
        .into_owned()
}

/// Soft-wrap plain paragraph lines at the wrap column. Headings, list
/// items, blockquotes, tables, and code are left alone so the structure
/// html2md produced survives.
fn wrap_paragraphs(markdown: &str) -> String {
    let mut out = Vec::new();
    let mut in_code = false;
    for line in markdown.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            out.push(line.to_string());
            continue;
        }
        let structural = in_code
            || trimmed.starts_with('#')
            || trimmed.starts_with('-')
            || trimmed.starts_with('>')
            || trimmed.starts_with('|')
            || trimmed.starts_with("    ")
            || line.len() <= WRAP_COLUMN;
        if structural {
            out.push(line.to_string());
            continue;
        }
        out.extend(wrap_line(line));
    }
    out.join("\n")
}

fn wrap_line(line: &str) -> Vec<String> {
    let mut wrapped = Vec::new();
    let mut current = String::new();
    for word in line.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() > WRAP_COLUMN {
            wrapped.push(std::mem::take(&mut current));
            current = word.to_string();
        } else {
            current.push(' ');
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        wrapped.push(current);
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_are_atx() {
        let md = html_to_markdown("<h1>Title</h1><h2>Sub</h2>", "https://example.com/");
        assert!(md.contains("# Title"), "got: {md}");
        assert!(md.contains("## Sub"), "got: {md}");
    }

    #[test]
    fn bullets_use_dashes() {
        let md = html_to_markdown(
            "<ul><li>first</li><li>second</li></ul>",
            "https://example.com/",
        );
        for line in md.lines().filter(|l| !l.trim().is_empty()) {
            assert!(line.trim_start().starts_with('-'), "bullet line: {line}");
        }
    }

    #[test]
    fn scripts_styles_meta_are_stripped() {
        let html = r#"<head><meta name="a" content="b"><style>.x{}</style></head>
<body><script>alert(1)</script><p>Text</p></body>"#;
        let md = html_to_markdown(html, "https://example.com/");
        assert!(md.contains("Text"));
        assert!(!md.contains("alert"));
        assert!(!md.contains(".x{}"));
    }

    #[test]
    fn relative_links_resolved() {
        let md = html_to_markdown(
            r#"<p><a href="/docs/intro">Intro</a></p>"#,
            "https://example.com/base/",
        );
        assert!(
            md.contains("[Intro](https://example.com/docs/intro)"),
            "got: {md}"
        );
    }

    #[test]
    fn absolute_links_untouched() {
        let md = html_to_markdown(
            r#"<p><a href="https://other.org/page">Other</a></p>"#,
            "https://example.com/",
        );
        assert!(md.contains("[Other](https://other.org/page)"));
    }

    #[test]
    fn newline_runs_collapse() {
        let md = html_to_markdown(
            "<p>a</p><br><br><br><p>b</p>",
            "https://example.com/",
        );
        assert!(!md.contains("\n\n\n"), "got: {md:?}");
    }

    #[test]
    fn conversion_is_deterministic() {
        let html = "<h1>T</h1><p>Some body text with <a href='/x'>link</a>.</p>";
        let a = html_to_markdown(html, "https://example.com/");
        let b = html_to_markdown(html, "https://example.com/");
        assert_eq!(a, b);
    }

    #[test]
    fn long_paragraphs_wrap_near_eighty() {
        let word = "word ";
        let html = format!("<p>{}</p>", word.repeat(40));
        let md = html_to_markdown(&html, "https://example.com/");
        for line in md.lines() {
            assert!(line.len() <= 85, "line too long: {line}");
        }
    }
}
