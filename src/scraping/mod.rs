//! Rendering and scrape execution: the chromiumoxide browser pool, the
//! renderer seam with its static-HTTP fallback, and the single-URL scrape
//! pipeline.

pub mod browser;
pub mod executor;
pub mod renderer;

pub use browser::BrowserPool;
pub use executor::{build_scrape_data, ScrapeExecutor};
pub use renderer::{HttpRenderer, PageRenderer, RenderRequest, RenderedPage};
