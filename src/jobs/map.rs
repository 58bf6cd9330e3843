use tracing::debug;

use crate::core::types::{MapMetadata, MapRequest, MapResponse};
use crate::crawl::{normalize, RobotsCache, SitemapResolver};
use crate::extract;
use crate::jobs::crawl::CRAWLER_USER_AGENT;

/// Synchronous URL discovery: sitemap expansion plus same-domain on-page
/// links from the seed, substring-filtered and capped.
pub async fn map_site(client: &reqwest::Client, request: &MapRequest) -> MapResponse {
    let mut links: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut sitemap_found = false;

    let mut push = |url: String, links: &mut Vec<String>, seen: &mut std::collections::HashSet<String>| {
        let normalized = normalize::normalize(&url, false);
        if !normalize::is_valid(&normalized) {
            return;
        }
        if !normalize::same_domain(&normalized, &request.url, true) {
            return;
        }
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    };

    // The seed belongs to the map except in sitemap-only mode, where the
    // result is exactly the same-domain sitemap contents.
    if !request.sitemap_only {
        push(request.url.clone(), &mut links, &mut seen);
    }

    if !request.ignore_sitemap {
        let robots = RobotsCache::new(client.clone(), CRAWLER_USER_AGENT);
        let advertised = robots.sitemaps_for(&request.url).await;
        let resolver = SitemapResolver::new(client.clone());
        let (urls, found) = resolver.resolve(&request.url, &advertised).await;
        sitemap_found = found;
        for url in urls {
            push(url, &mut links, &mut seen);
        }
    }

    if !request.sitemap_only {
        match fetch_page_links(client, &request.url).await {
            Some(page_links) => {
                for url in page_links {
                    push(url, &mut links, &mut seen);
                }
            }
            None => debug!("map: seed fetch failed for {}", request.url),
        }
    }

    if let Some(search) = request
        .search
        .as_ref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
    {
        links.retain(|l| l.to_ascii_lowercase().contains(&search));
    }

    let total_before_cap = links.len();
    let truncated = total_before_cap > request.limit;
    links.truncate(request.limit);

    MapResponse {
        success: true,
        metadata: MapMetadata {
            total: links.len(),
            truncated,
            sitemap_found,
        },
        links,
    }
}

async fn fetch_page_links(client: &reqwest::Client, url: &str) -> Option<Vec<String>> {
    let response = client
        .get(url)
        .header("User-Agent", CRAWLER_USER_AGENT)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let html = response.text().await.ok()?;
    Some(extract::extract_links(&html, url))
}
