use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{MemoryGateway, MemoryScope, MemorySearchResult};
use crate::error::{Error, Result};

/// Default HeySol API root
pub const DEFAULT_BASE_URL: &str = "https://core.heysol.ai/api/v1";

/// HeySol-compatible REST client
#[derive(Clone)]
pub struct HttpMemoryGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpMemoryGateway {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(Error::Configuration("memory API key is required".into()));
        }
        let base_url = base_url.into();
        if base_url.trim().is_empty() {
            return Err(Error::Configuration("memory base URL is required".into()));
        }
        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::Memory(format!("{} failed: {}", operation, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.trim().chars().take(200).collect();
            return Err(Error::Memory(format!(
                "{} returned status {}: {}",
                operation,
                status.as_u16(),
                snippet
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Memory(format!("{} returned an unreadable body: {}", operation, e)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    space_ids: Option<&'a [String]>,
    limit: usize,
    include_invalidated: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestRequest<'a> {
    episode_body: &'a str,
    reference_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    space_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<&'a str>,
}

#[derive(Deserialize)]
struct IngestResponse {
    #[serde(alias = "episode_id", alias = "episodeId", default)]
    id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeList {
    Bare(Vec<MemoryScope>),
    Wrapped { spaces: Vec<MemoryScope> },
}

#[async_trait]
impl MemoryGateway for HttpMemoryGateway {
    async fn search(
        &self,
        query: &str,
        scope_ids: Option<&[String]>,
        limit: usize,
        include_invalidated: bool,
    ) -> Result<MemorySearchResult> {
        let body = SearchRequest {
            query,
            space_ids: scope_ids.filter(|ids| !ids.is_empty()),
            limit,
            include_invalidated,
        };
        let mut result: MemorySearchResult = self
            .send(self.client.post(self.url("search")).json(&body), "memory search")
            .await?;
        if result.total == 0 {
            result.total = result.episodes.len();
        }
        Ok(result)
    }

    async fn ingest(
        &self,
        note: &str,
        scope_id: Option<&str>,
        session_id: Option<&str>,
        source: Option<&str>,
    ) -> Result<String> {
        let body = IngestRequest {
            episode_body: note,
            reference_time: chrono::Utc::now().to_rfc3339(),
            space_id: scope_id,
            session_id,
            source,
        };
        let response: IngestResponse = self
            .send(self.client.post(self.url("add")).json(&body), "memory ingest")
            .await?;
        Ok(response.id.unwrap_or_default())
    }

    async fn list_scopes(&self) -> Result<Vec<MemoryScope>> {
        let list: ScopeList = self
            .send(self.client.get(self.url("spaces")), "scope listing")
            .await?;
        Ok(match list {
            ScopeList::Bare(scopes) | ScopeList::Wrapped { spaces: scopes } => scopes,
        })
    }
}
