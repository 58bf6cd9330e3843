//! Sync crawl results to an OpenWebUI knowledge collection: upload each
//! page's markdown as a file, then attach it to the collection.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::HarvestConfig;
use crate::core::error::ApiError;
use crate::store::JobStore;

#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub crawl_id: String,
    pub collection_id: String,
    pub pages_total: usize,
    pub pages_synced: usize,
    pub pages_failed: usize,
}

pub struct OpenWebUiConnector {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenWebUiConnector {
    /// Built from configuration; absent settings disable the connector.
    pub fn from_config(client: reqwest::Client, config: &HarvestConfig) -> Option<Self> {
        let base_url = config.openwebui_base_url.clone()?;
        let api_key = config.openwebui_api_key.clone().unwrap_or_default();
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Create a knowledge collection, returning its id.
    pub async fn create_collection(&self, name: &str, description: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/v1/knowledge/", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "name": name,
                "description": description,
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("collection create response had no id"))
    }

    async fn upload_markdown(&self, filename: &str, markdown: &str) -> Result<String> {
        let part = reqwest::multipart::Part::text(markdown.to_string())
            .file_name(filename.to_string())
            .mime_str("text/markdown")?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let response = self
            .client
            .post(format!("{}/api/v1/files/", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("file upload response had no id"))
    }

    async fn add_file_to_collection(&self, collection_id: &str, file_id: &str) -> Result<()> {
        self.client
            .post(format!(
                "{}/api/v1/knowledge/{collection_id}/file/add",
                self.base_url
            ))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Push every stored page of a finished crawl into the collection.
    pub async fn sync_crawl(
        &self,
        store: &Arc<dyn JobStore>,
        crawl_id: Uuid,
        collection_id: &str,
    ) -> Result<SyncReport, ApiError> {
        let job = store
            .get_crawl_job(crawl_id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?
            .ok_or_else(|| ApiError::NotFound("crawl job".to_string()))?;
        let pages = store
            .list_crawl_pages(crawl_id)
            .await
            .map_err(|e| ApiError::Store(e.to_string()))?;

        let mut synced = 0usize;
        let mut failed = 0usize;
        for (index, page) in pages.iter().enumerate() {
            let Some(markdown) = page.markdown.as_deref().filter(|m| !m.trim().is_empty())
            else {
                continue;
            };
            let filename = format!("crawl-{}-page-{index:04}.md", job.id);
            let uploaded = self.upload_markdown(&filename, markdown).await;
            match uploaded {
                Ok(file_id) => match self.add_file_to_collection(collection_id, &file_id).await {
                    Ok(()) => synced += 1,
                    Err(e) => {
                        warn!("attach failed for {}: {e}", page.url);
                        failed += 1;
                    }
                },
                Err(e) => {
                    warn!("upload failed for {}: {e}", page.url);
                    failed += 1;
                }
            }
        }

        info!(
            "synced crawl {crawl_id} to collection {collection_id}: {synced} ok, {failed} failed"
        );
        Ok(SyncReport {
            crawl_id: crawl_id.to_string(),
            collection_id: collection_id.to_string(),
            pages_total: pages.len(),
            pages_synced: synced,
            pages_failed: failed,
        })
    }
}
