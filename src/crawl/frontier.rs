use std::collections::{HashMap, HashSet, VecDeque};

use regex::Regex;
use tracing::debug;
use url::Url;

use super::normalize;
use super::robots::RobotsCache;
use crate::core::types::SitemapMode;

/// Crawl-scope policy evaluated by `should_crawl`.
pub struct FrontierPolicy {
    pub seed_url: String,
    pub max_depth: usize,
    pub max_pages: usize,
    pub include_patterns: Vec<Regex>,
    pub exclude_patterns: Vec<Regex>,
    pub allow_external_links: bool,
    pub allow_subdomains: bool,
    pub ignore_query_params: bool,
    pub respect_robots_txt: bool,
    pub sitemap_mode: SitemapMode,
}

impl FrontierPolicy {
    /// Compile the path patterns of a crawl request. Invalid patterns are
    /// rejected up front so the job fails at submission, not mid-crawl.
    pub fn compile(
        seed_url: &str,
        max_depth: usize,
        max_pages: usize,
        include: &[String],
        exclude: &[String],
        allow_external_links: bool,
        allow_subdomains: bool,
        ignore_query_params: bool,
        respect_robots_txt: bool,
        sitemap_mode: SitemapMode,
    ) -> Result<Self, regex::Error> {
        let compile_all = |patterns: &[String]| -> Result<Vec<Regex>, regex::Error> {
            patterns.iter().map(|p| Regex::new(p)).collect()
        };
        Ok(Self {
            seed_url: normalize::normalize(seed_url, ignore_query_params),
            max_depth,
            max_pages,
            include_patterns: compile_all(include)?,
            exclude_patterns: compile_all(exclude)?,
            allow_external_links,
            allow_subdomains,
            ignore_query_params,
            respect_robots_txt,
            sitemap_mode,
        })
    }
}

/// BFS frontier with depth bookkeeping, owned by a single crawl
/// orchestrator.
///
/// Invariants: every queued URL has a depth entry; a URL lives in at most
/// one of `visited` / `to_visit`; the seed sits at depth 0.
pub struct CrawlFrontier {
    policy: FrontierPolicy,
    robots: RobotsCache,
    visited: HashSet<String>,
    to_visit: VecDeque<String>,
    depth_map: HashMap<String, usize>,
    discovered_count: usize,
}

impl CrawlFrontier {
    pub fn new(policy: FrontierPolicy, robots: RobotsCache) -> Self {
        let mut frontier = Self {
            policy,
            robots,
            visited: HashSet::new(),
            to_visit: VecDeque::new(),
            depth_map: HashMap::new(),
            discovered_count: 0,
        };
        frontier.seed();
        frontier
    }

    fn seed(&mut self) {
        let seed = self.policy.seed_url.clone();
        self.depth_map.insert(seed.clone(), 0);
        self.to_visit.push_back(seed);
    }

    pub fn robots(&self) -> &RobotsCache {
        &self.robots
    }

    pub fn policy(&self) -> &FrontierPolicy {
        &self.policy
    }

    pub fn discovered_count(&self) -> usize {
        self.discovered_count
    }

    pub fn depth_of(&self, normalized_url: &str) -> usize {
        self.depth_map.get(normalized_url).copied().unwrap_or(0)
    }

    /// Enqueue sitemap-discovered URLs at depth 0. Called when the sitemap
    /// mode is `include` or `only`.
    pub fn ingest_sitemap_urls(&mut self, urls: Vec<String>) {
        for url in urls {
            let normalized = normalize::normalize(&url, self.policy.ignore_query_params);
            if self.visited.contains(&normalized) || self.depth_map.contains_key(&normalized) {
                continue;
            }
            self.depth_map.insert(normalized.clone(), 0);
            self.to_visit.push_back(normalized);
        }
    }

    /// Pop the next eligible URL, skipping visited and out-of-policy
    /// entries. Returns `None` when the queue is exhausted or the page
    /// budget is spent.
    pub async fn next(&mut self) -> Option<String> {
        loop {
            if self.discovered_count >= self.policy.max_pages {
                return None;
            }
            let url = self.to_visit.pop_front()?;
            if self.visited.contains(&url) {
                continue;
            }
            if !self.should_crawl(&url).await {
                // Ineligible URLs count as visited so re-discovery through
                // other pages does not re-evaluate them.
                self.visited.insert(url);
                continue;
            }
            self.visited.insert(url.clone());
            self.discovered_count += 1;
            return Some(url);
        }
    }

    /// Scope checks, cheapest first: validity, domain policy, include and
    /// exclude path patterns, robots.
    pub async fn should_crawl(&self, url: &str) -> bool {
        if !normalize::is_valid(url) {
            return false;
        }

        if !self.policy.allow_external_links
            && !normalize::same_domain(url, &self.policy.seed_url, self.policy.allow_subdomains)
        {
            return false;
        }

        let path = Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/".to_string());

        if !self.policy.include_patterns.is_empty()
            && !self
                .policy
                .include_patterns
                .iter()
                .any(|re| re.is_match(&path))
        {
            return false;
        }
        if self
            .policy
            .exclude_patterns
            .iter()
            .any(|re| re.is_match(&path))
        {
            return false;
        }

        if !self
            .robots
            .can_fetch(url, self.policy.respect_robots_txt)
            .await
        {
            debug!("robots.txt disallows {url}");
            return false;
        }

        true
    }

    /// Queue newly discovered links at `source_depth + 1`. URLs already
    /// seen in either set are skipped, so a repeated call with the same
    /// list is a no-op; links that would exceed `max_depth` are rejected.
    pub fn add_discovered(&mut self, urls: &[String], source_depth: usize) {
        if self.policy.sitemap_mode == SitemapMode::Only {
            // Sitemap-only crawls never follow on-page links.
            return;
        }
        let next_depth = source_depth + 1;
        if next_depth > self.policy.max_depth {
            return;
        }
        for url in urls {
            let normalized = normalize::normalize(url, self.policy.ignore_query_params);
            if self.visited.contains(&normalized) || self.depth_map.contains_key(&normalized) {
                continue;
            }
            self.depth_map.insert(normalized.clone(), next_depth);
            self.to_visit.push_back(normalized);
        }
    }

    /// Debug-time invariant check, used by tests.
    #[cfg(test)]
    fn check_invariants(&self) {
        for url in &self.to_visit {
            assert!(
                self.depth_map.contains_key(url),
                "queued URL without a depth entry: {url}"
            );
            assert!(
                !self.visited.contains(url),
                "URL present in both visited and to_visit: {url}"
            );
        }
    }
}

/// Build a `FrontierPolicy` from a crawl request, clamping the page budget.
pub fn policy_from_request(
    request: &crate::core::types::CrawlRequest,
    max_pages_hard_cap: usize,
) -> Result<FrontierPolicy, regex::Error> {
    let empty = Vec::new();
    FrontierPolicy::compile(
        &request.url,
        request.max_discovery_depth,
        request.limit.min(max_pages_hard_cap),
        request.include_paths.as_ref().unwrap_or(&empty),
        request.exclude_paths.as_ref().unwrap_or(&empty),
        request.allow_external_links,
        request.allow_subdomains,
        request.ignore_query_parameters,
        request.respect_robots_txt,
        request.sitemap,
    )
}
