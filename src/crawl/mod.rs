//! URL discovery: normalization, robots.txt compliance, sitemap ingestion,
//! and the depth-bounded BFS frontier that drives a crawl.

pub mod frontier;
pub mod normalize;
pub mod robots;
pub mod sitemap;

pub use frontier::{policy_from_request, CrawlFrontier, FrontierPolicy};
pub use robots::{RobotsCache, RobotsRules};
pub use sitemap::{parse_sitemap, SitemapResolver};
