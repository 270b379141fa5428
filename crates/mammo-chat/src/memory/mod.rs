//! Memory gateway: episode search, ingestion and scope listing

mod http;
mod tools;

pub use http::{DEFAULT_BASE_URL, HttpMemoryGateway};
pub use tools::{MemoryIngestTool, MemorySearchTool, INGEST_SOURCE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One stored memory unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEpisode")]
pub struct Episode {
    pub id: String,
    pub body: String,
    pub scope_id: Option<String>,
    pub created_at: Option<String>,
}

/// Wire shape of an episode; the service spells its keys several ways and
/// sometimes sends more than one spelling at once.
#[derive(Deserialize)]
struct RawEpisode {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "episodeId")]
    episode_id: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    scope_id: Option<String>,
    #[serde(default, alias = "spaceId")]
    space_id: Option<String>,
    #[serde(default, alias = "createdAt")]
    created_at: Option<String>,
}

/// First value that is present and non-empty
fn first_filled(candidates: impl IntoIterator<Item = Option<String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty())
}

impl From<RawEpisode> for Episode {
    fn from(raw: RawEpisode) -> Self {
        Self {
            id: first_filled([raw.episode_id, raw.id]).unwrap_or_default(),
            body: first_filled([raw.body, raw.content]).unwrap_or_default(),
            scope_id: first_filled([raw.scope_id, raw.space_id]),
            created_at: raw.created_at,
        }
    }
}

/// Matches returned by a search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySearchResult {
    #[serde(default)]
    pub episodes: Vec<Episode>,
    #[serde(default)]
    pub total: usize,
}

/// A named partition of the memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawScope")]
pub struct MemoryScope {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Deserialize)]
struct RawScope {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, alias = "spaceId")]
    space_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl From<RawScope> for MemoryScope {
    fn from(raw: RawScope) -> Self {
        Self {
            id: first_filled([raw.id, raw.space_id]).unwrap_or_default(),
            name: raw.name.unwrap_or_default(),
            description: raw.description,
        }
    }
}

/// Remote memory service.
///
/// Implementations translate every upstream failure into
/// [`Error::Memory`](crate::Error::Memory).
#[async_trait]
pub trait MemoryGateway: Send + Sync {
    /// Search episodes; `None` scopes means unscoped
    async fn search(
        &self,
        query: &str,
        scope_ids: Option<&[String]>,
        limit: usize,
        include_invalidated: bool,
    ) -> Result<MemorySearchResult>;

    /// Store a note and return the new episode id
    async fn ingest(
        &self,
        note: &str,
        scope_id: Option<&str>,
        session_id: Option<&str>,
        source: Option<&str>,
    ) -> Result<String>;

    async fn list_scopes(&self) -> Result<Vec<MemoryScope>>;
}
