use serde_json::{json, Value};

/// A named, JSON-schema-described operation on the tool-call surface. Each
/// one is a thin wrapper over the corresponding job-submission method.
#[derive(Clone, Debug)]
pub struct ToolCatalogEntry {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_catalog() -> Vec<ToolCatalogEntry> {
    vec![
        ToolCatalogEntry {
            name: "scrape_url",
            title: "Scrape URL",
            description: "Scrape a single URL and return content in the requested formats (markdown, html, rawHtml, links, images, screenshot).",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "URL to scrape"},
                    "formats": {
                        "type": "array",
                        "items": {"type": "string", "enum": ["markdown", "html", "rawHtml", "links", "images", "screenshot"]},
                        "default": ["markdown"]
                    },
                    "onlyMainContent": {"type": "boolean", "default": true},
                    "includeTags": {"type": "array", "items": {"type": "string"}},
                    "excludeTags": {"type": "array", "items": {"type": "string"}},
                    "headers": {"type": "object"},
                    "waitFor": {"type": "integer", "minimum": 0},
                    "mobile": {"type": "boolean", "default": false},
                    "timeout": {"type": "integer", "minimum": 1000, "default": 30000},
                    "maxAge": {"type": "integer", "minimum": 0, "default": 172800000},
                    "actions": {"type": "array", "items": {"type": "object"}}
                },
                "required": ["url"]
            }),
        },
        ToolCatalogEntry {
            name: "crawl_site",
            title: "Crawl Site",
            description: "Start a depth-bounded crawl from a seed URL; returns a job id to poll with get_crawl_status.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "maxDiscoveryDepth": {"type": "integer", "minimum": 0, "default": 10},
                    "limit": {"type": "integer", "minimum": 0, "default": 5000},
                    "includePaths": {"type": "array", "items": {"type": "string"}},
                    "excludePaths": {"type": "array", "items": {"type": "string"}},
                    "sitemap": {"type": "string", "enum": ["include", "ignore", "only"], "default": "include"},
                    "ignoreQueryParameters": {"type": "boolean", "default": false},
                    "allowExternalLinks": {"type": "boolean", "default": false},
                    "allowSubdomains": {"type": "boolean", "default": false},
                    "delay": {"type": "integer", "minimum": 0, "default": 250},
                    "maxConcurrency": {"type": "integer", "minimum": 1, "default": 5},
                    "webhook": {"type": "string"},
                    "scrapeOptions": {"type": "object"}
                },
                "required": ["url"]
            }),
        },
        ToolCatalogEntry {
            name: "get_crawl_status",
            title: "Get Crawl Status",
            description: "Status and page results of a crawl job.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "crawl_id": {"type": "string", "description": "Crawl job id"}
                },
                "required": ["crawl_id"]
            }),
        },
        ToolCatalogEntry {
            name: "cancel_crawl",
            title: "Cancel Crawl",
            description: "Request cancellation of a running crawl job.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "crawl_id": {"type": "string"}
                },
                "required": ["crawl_id"]
            }),
        },
        ToolCatalogEntry {
            name: "map_site",
            title: "Map Site",
            description: "Fast URL discovery via sitemaps and same-domain links, without content extraction.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string"},
                    "search": {"type": "string", "description": "Substring filter over discovered URLs"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 100000, "default": 5000},
                    "ignoreSitemap": {"type": "boolean", "default": false},
                    "sitemapOnly": {"type": "boolean", "default": false}
                },
                "required": ["url"]
            }),
        },
        ToolCatalogEntry {
            name: "batch_scrape",
            title: "Batch Scrape",
            description: "Scrape a list of URLs with bounded concurrency; returns a job id to poll with get_batch_status.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "urls": {"type": "array", "items": {"type": "string"}},
                    "ignoreInvalidURLs": {"type": "boolean", "default": false},
                    "maxConcurrency": {"type": "integer", "minimum": 1, "default": 10},
                    "scrapeOptions": {"type": "object"},
                    "webhook": {"type": "string"}
                },
                "required": ["urls"]
            }),
        },
        ToolCatalogEntry {
            name: "get_batch_status",
            title: "Get Batch Status",
            description: "Status and per-URL results of a batch scrape job.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "batch_id": {"type": "string"}
                },
                "required": ["batch_id"]
            }),
        },
        ToolCatalogEntry {
            name: "sync_crawl_to_collection",
            title: "Sync Crawl To Collection",
            description: "Upload a finished crawl's markdown pages into an OpenWebUI knowledge collection.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "crawl_id": {"type": "string"},
                    "collection_id": {"type": "string"},
                    "collection_name": {"type": "string", "description": "Create a new collection with this name when collection_id is omitted"}
                },
                "required": ["crawl_id"]
            }),
        },
        ToolCatalogEntry {
            name: "create_project",
            title: "Create Project",
            description: "Create a project for grouping crawl and batch jobs.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["name"]
            }),
        },
        ToolCatalogEntry {
            name: "list_projects",
            title: "List Projects",
            description: "List all projects.",
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
        },
    ]
}

pub fn tools_as_json() -> Value {
    json!({
        "tools": tool_catalog()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "title": tool.title,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect::<Vec<_>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_the_tool_surface() {
        let names: Vec<&str> = tool_catalog().iter().map(|t| t.name).collect();
        for expected in [
            "scrape_url",
            "crawl_site",
            "get_crawl_status",
            "cancel_crawl",
            "map_site",
            "batch_scrape",
            "get_batch_status",
            "sync_crawl_to_collection",
            "create_project",
            "list_projects",
        ] {
            assert!(names.contains(&expected), "missing tool: {expected}");
        }
    }

    #[test]
    fn every_tool_has_an_object_schema() {
        for tool in tool_catalog() {
            assert_eq!(tool.input_schema["type"], "object", "tool {}", tool.name);
        }
    }
}
