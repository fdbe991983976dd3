//! Tool Server client — spec.md §6. Out-of-scope collaborator; we only
//! describe and consume its two read-only contracts.

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, String>;
    async fn read_file(&self, path: &str) -> Result<String, String>;
}

pub struct HttpToolClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpToolClient {
    pub fn new(base_url: impl Into<String>, bearer_token: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), bearer_token }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(format!("{}{}", self.base_url, path)).timeout(Duration::from_secs(15));
        if let Some(token) = &self.bearer_token {
            req = req.bearer_auth(token);
        }
        req
    }
}

#[async_trait]
impl ToolClient for HttpToolClient {
    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, String> {
        let resp = self
            .request("/tools/list_dir")
            .json(&serde_json::json!({ "path": path }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let value: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        let items = value.get("items").cloned().unwrap_or_default();
        serde_json::from_value(items).map_err(|e| e.to_string())
    }

    async fn read_file(&self, path: &str) -> Result<String, String> {
        let resp = self
            .request("/tools/read_file")
            .json(&serde_json::json!({ "path": path }))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let value: serde_json::Value = resp.json().await.map_err(|e| e.to_string())?;
        value
            .get("content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| "missing content field".to_string())
    }
}
