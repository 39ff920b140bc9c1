//! Mod catalogue integration
//!
//! The catalogue is a remote service queried by mod id. It knows mod metadata,
//! revisions and dependency trees; it never touches local state.

mod http;

pub use http::HttpCatalogue;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published revision of a mod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionInfo {
    pub id: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub download_url: String,
    pub filename: String,
}

/// Mod metadata as reported by the catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steam_id: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub has_dependencies: bool,
    pub latest_revision: RevisionInfo,
    #[serde(default)]
    pub url: Option<String>,
}

/// Read-only view of the remote catalogue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalogue: Send + Sync {
    /// Basic metadata for a mod, including its latest revision
    async fn base_mod(&self, mod_id: &str) -> Result<ModInfo>;

    /// The latest revision and every older one
    async fn mod_revisions(&self, mod_id: &str) -> Result<(RevisionInfo, Vec<RevisionInfo>)>;

    /// Transitive closure of a mod's dependencies, without the mod itself
    async fn dependency_tree(&self, mod_id: &str) -> Result<Vec<ModInfo>>;
}
