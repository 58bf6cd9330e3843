use std::collections::HashSet;
use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, info};
use url::Url;

/// Well-known sitemap locations probed relative to the site root.
const COMMON_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap1.xml",
    "/sitemaps/sitemap.xml",
    "/sitemap/sitemap.xml",
];

const SITEMAP_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum recursion depth through sitemap-index files; guards against
/// self-referencing indexes.
const DEFAULT_MAX_INDEX_DEPTH: usize = 3;

/// `<loc>` values pulled out of one sitemap document, split by whether the
/// parent element was a page entry or a nested sitemap reference.
#[derive(Debug, Default, PartialEq)]
pub struct SitemapDocument {
    pub pages: Vec<String>,
    pub nested: Vec<String>,
}

/// Parse sitemap XML. Namespace prefixes are ignored by comparing local
/// element names, which is equivalent to stripping `xmlns` declarations.
pub fn parse_sitemap(content: &str) -> SitemapDocument {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut doc = SitemapDocument::default();
    // Element context: which of <url> / <sitemap> / <loc> we are inside.
    let mut in_url = false;
    let mut in_sitemap = false;
    let mut in_loc = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.local_name().as_ref()) {
                b"url" => in_url = true,
                b"sitemap" => in_sitemap = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::End(e)) => match local_name(e.local_name().as_ref()) {
                b"url" => in_url = false,
                b"sitemap" => in_sitemap = false,
                b"loc" => in_loc = false,
                _ => {}
            },
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    let loc = text.trim().to_string();
                    if loc.is_empty() {
                        continue;
                    }
                    if in_sitemap {
                        doc.nested.push(loc);
                    } else if in_url {
                        doc.pages.push(loc);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                debug!("sitemap parse error: {e}");
                break;
            }
            _ => {}
        }
    }

    doc
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|&b| b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// Discovers and expands sitemaps for a site: probes the well-known
/// locations, folds in robots-advertised URLs, and recursively expands
/// sitemap indexes up to a bounded depth.
pub struct SitemapResolver {
    client: reqwest::Client,
    max_index_depth: usize,
}

impl SitemapResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_index_depth: DEFAULT_MAX_INDEX_DEPTH,
        }
    }

    pub fn with_max_index_depth(mut self, depth: usize) -> Self {
        self.max_index_depth = depth;
        self
    }

    /// Yield every page URL discoverable through sitemaps for `seed_url`.
    /// `extra_sitemaps` are robots.txt `Sitemap:` directives. Returns the
    /// URLs and whether any sitemap was found at all.
    pub async fn resolve(&self, seed_url: &str, extra_sitemaps: &[String]) -> (Vec<String>, bool) {
        let Ok(parsed) = Url::parse(seed_url) else {
            return (Vec::new(), false);
        };
        let mut base = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or_default()
        );
        if let Some(port) = parsed.port() {
            base.push_str(&format!(":{port}"));
        }

        let mut candidates: Vec<String> = COMMON_SITEMAP_PATHS
            .iter()
            .map(|p| format!("{base}{p}"))
            .collect();
        for extra in extra_sitemaps {
            if !candidates.contains(extra) {
                candidates.push(extra.clone());
            }
        }

        let mut pages = Vec::new();
        let mut seen_pages: HashSet<String> = HashSet::new();
        let mut visited_maps: HashSet<String> = HashSet::new();
        let mut found = false;

        // Work queue of (sitemap url, index depth); nested indexes are
        // expanded breadth-first up to the depth bound.
        let mut work: std::collections::VecDeque<(String, usize)> =
            candidates.into_iter().map(|c| (c, 0)).collect();

        while let Some((sitemap_url, depth)) = work.pop_front() {
            if depth > self.max_index_depth {
                debug!("sitemap index depth limit reached at {sitemap_url}");
                continue;
            }
            if !visited_maps.insert(sitemap_url.clone()) {
                continue;
            }
            let Some(content) = self.fetch(&sitemap_url).await else {
                continue;
            };
            found = true;
            let doc = parse_sitemap(&content);
            for page in doc.pages {
                if seen_pages.insert(page.clone()) {
                    pages.push(page);
                }
            }
            for nested in doc.nested {
                work.push_back((nested, depth + 1));
            }
        }

        if found {
            info!("sitemap discovery for {seed_url}: {} URLs", pages.len());
        }
        (pages, found)
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let response = self
            .client
            .get(url)
            .timeout(SITEMAP_FETCH_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(_) | Err(_) => None,
        }
    }
}
