use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

/// Parsed robots.txt rules for one host.
#[derive(Debug, Default, Clone)]
pub struct RobotsRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    /// `Crawl-delay` in seconds, when declared for the matched agent.
    pub crawl_delay: Option<f64>,
    /// `Sitemap:` directives are global, not group-scoped.
    pub sitemaps: Vec<String>,
}

impl RobotsRules {
    /// Parse robots.txt content for a specific user agent.
    ///
    /// A directive applies when its most recent `User-agent` line matched
    /// either `*` or the configured agent (case-insensitive).
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let mut rules = RobotsRules::default();
        let agent_lower = user_agent.to_ascii_lowercase();
        let mut applicable = false;

        for raw_line in content.lines() {
            // Inline comments are stripped before parsing.
            let line = match raw_line.split('#').next() {
                Some(l) => l.trim(),
                None => continue,
            };
            if line.is_empty() {
                continue;
            }
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_ascii_lowercase();
            let value = value.trim();

            match directive.as_str() {
                "user-agent" => {
                    let agent = value.to_ascii_lowercase();
                    applicable = agent == "*" || agent == agent_lower;
                }
                "disallow" if applicable => {
                    if !value.is_empty() {
                        rules.disallow.push(value.to_string());
                    }
                }
                "allow" if applicable => {
                    if !value.is_empty() {
                        rules.allow.push(value.to_string());
                    }
                }
                "crawl-delay" if applicable => {
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay >= 0.0 {
                            rules.crawl_delay = Some(delay);
                        }
                    }
                }
                "sitemap" => {
                    if !value.is_empty() {
                        rules.sitemaps.push(value.to_string());
                    }
                }
                _ => {}
            }
        }

        rules
    }

    /// Evaluate a path against these rules. `Allow` takes precedence over
    /// `Disallow` on conflict; no match at all means allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let path = if path.is_empty() { "/" } else { path };
        for pattern in &self.allow {
            if pattern_matches(path, pattern) {
                return true;
            }
        }
        for pattern in &self.disallow {
            if pattern_matches(path, pattern) {
                return false;
            }
        }
        true
    }
}

/// Robots glob: `*` becomes `.*`, anchored at the path start.
fn pattern_matches(path: &str, pattern: &str) -> bool {
    let mut regex_str = String::with_capacity(pattern.len() + 8);
    regex_str.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex_str.push_str(".*"),
            '$' => regex_str.push('$'),
            c => regex_str.push_str(&regex::escape(&c.to_string())),
        }
    }
    match Regex::new(&regex_str) {
        Ok(re) => re.is_match(path),
        Err(_) => path.starts_with(pattern),
    }
}

/// Per-host robots.txt fetcher + cache. One instance lives for the duration
/// of a single crawl; hosts are fetched at most once.
pub struct RobotsCache {
    client: reqwest::Client,
    user_agent: String,
    cache: Mutex<HashMap<String, Arc<RobotsRules>>>,
}

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `url` may be fetched. `respect = false` short-circuits to
    /// allowed; a missing or unreachable robots.txt also means allowed.
    pub async fn can_fetch(&self, url: &str, respect: bool) -> bool {
        if !respect {
            return true;
        }
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let path = {
            let p = parsed.path();
            if p.is_empty() {
                "/".to_string()
            } else {
                p.to_string()
            }
        };
        match self.rules_for(&parsed).await {
            Some(rules) => rules.is_allowed(&path),
            None => true,
        }
    }

    /// Sitemap URLs advertised by the host's robots.txt.
    pub async fn sitemaps_for(&self, url: &str) -> Vec<String> {
        let Ok(parsed) = Url::parse(url) else {
            return Vec::new();
        };
        self.rules_for(&parsed)
            .await
            .map(|r| r.sitemaps.clone())
            .unwrap_or_default()
    }

    /// `Crawl-delay` declared for this host, in seconds.
    pub async fn crawl_delay_for(&self, url: &str) -> Option<f64> {
        let parsed = Url::parse(url).ok()?;
        self.rules_for(&parsed).await.and_then(|r| r.crawl_delay)
    }

    async fn rules_for(&self, url: &Url) -> Option<Arc<RobotsRules>> {
        // Keyed by scheme://host[:port] so non-default ports resolve their
        // own robots.txt.
        let mut host_key = format!(
            "{}://{}",
            url.scheme(),
            url.host_str().unwrap_or_default()
        );
        if let Some(port) = url.port() {
            host_key.push_str(&format!(":{port}"));
        }

        {
            let cache = self.cache.lock().await;
            if let Some(rules) = cache.get(&host_key) {
                return Some(Arc::clone(rules));
            }
        }

        let robots_url = format!("{host_key}/robots.txt");
        let fetched = self.fetch(&robots_url).await;
        let rules = Arc::new(match fetched {
            Some(body) => RobotsRules::parse(&body, &self.user_agent),
            // Unreachable robots.txt: cache an empty (allow-everything)
            // ruleset so the host is not re-probed on every URL.
            None => RobotsRules::default(),
        });

        let mut cache = self.cache.lock().await;
        cache.insert(host_key, Arc::clone(&rules));
        Some(rules)
    }

    async fn fetch(&self, robots_url: &str) -> Option<String> {
        let response = self
            .client
            .get(robots_url)
            .header("User-Agent", &self.user_agent)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                debug!("robots.txt at {} returned {}", robots_url, resp.status());
                None
            }
            Err(e) => {
                debug!("robots.txt fetch failed for {}: {}", robots_url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# comments are ignored
User-agent: *
Disallow: /private/
Disallow: /tmp
Allow: /private/public-subdir/
Crawl-delay: 2

User-agent: harvester
Disallow: /harvester-only/

Sitemap: https://example.com/sitemap.xml
Sitemap: https://example.com/sitemap-news.xml
";

    #[test]
    fn wildcard_group_applies() {
        let rules = RobotsRules::parse(SAMPLE, "somebot");
        assert!(!rules.is_allowed("/private/page"));
        assert!(!rules.is_allowed("/tmp"));
        assert!(rules.is_allowed("/public"));
        assert_eq!(rules.crawl_delay, Some(2.0));
    }

    #[test]
    fn allow_takes_precedence() {
        let rules = RobotsRules::parse(SAMPLE, "somebot");
        assert!(rules.is_allowed("/private/public-subdir/page"));
    }

    #[test]
    fn named_agent_group() {
        let rules = RobotsRules::parse(SAMPLE, "Harvester");
        assert!(!rules.is_allowed("/harvester-only/x"));
        // The wildcard group's rules were collected too.
        assert!(!rules.is_allowed("/private/page"));
    }

    #[test]
    fn sitemaps_are_global() {
        let rules = RobotsRules::parse(SAMPLE, "anything");
        assert_eq!(rules.sitemaps.len(), 2);
        assert_eq!(rules.sitemaps[0], "https://example.com/sitemap.xml");
    }

    #[test]
    fn glob_patterns() {
        let content = "User-agent: *\nDisallow: /search*results\nDisallow: /*.pdf\n";
        let rules = RobotsRules::parse(content, "x");
        assert!(!rules.is_allowed("/search/all/results"));
        assert!(!rules.is_allowed("/files/report.pdf"));
        assert!(rules.is_allowed("/searchless"));
    }

    #[test]
    fn disallow_root_blocks_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow: /\n", "x");
        assert!(!rules.is_allowed("/"));
        assert!(!rules.is_allowed("/any/path"));
    }

    #[test]
    fn empty_rules_allow_all() {
        let rules = RobotsRules::default();
        assert!(rules.is_allowed("/anything"));
    }

    #[tokio::test]
    async fn respect_false_short_circuits() {
        // No network is touched when respect is off (the URL's host does not
        // resolve, yet can_fetch returns immediately).
        let cache = RobotsCache::new(reqwest::Client::new(), "webharvest");
        assert!(cache.can_fetch("https://host.invalid/x", false).await);
    }
}
