//! Database record types

use crate::catalogue::RevisionInfo;
use crate::status::PlaylistInfo;
use chrono::{DateTime, Utc};
use rusqlite::Row;

/// Reserved playlist holding starred mods
pub const STARRED_PLAYLIST_ID: i64 = 0;

/// Mod database record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModRecord {
    pub id: String,
    pub name: Option<String>,
}

impl ModRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }
}

/// Revision database record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub id: String,
    pub mod_id: String,
    pub name: String,
    /// RFC3339 release date
    pub date: String,
    pub download_url: String,
    pub filename: String,
}

impl RevisionRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            mod_id: row.get(1)?,
            name: row.get(2)?,
            date: row.get(3)?,
            download_url: row.get(4)?,
            filename: row.get(5)?,
        })
    }

    pub fn from_info(info: &RevisionInfo, mod_id: &str) -> Self {
        Self {
            id: info.id.clone(),
            mod_id: mod_id.to_string(),
            name: info.name.clone(),
            date: info.date.to_rfc3339(),
            download_url: info.download_url.clone(),
            filename: info.filename.clone(),
        }
    }

    pub fn to_info(&self) -> RevisionInfo {
        RevisionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            date: DateTime::parse_from_rfc3339(&self.date)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_default(),
            download_url: self.download_url.clone(),
            filename: self.filename.clone(),
        }
    }
}

/// Install state of an installed revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Installing,
    Installed,
}

impl InstallStatus {
    pub fn from_str(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "installed" => InstallStatus::Installed,
            _ => InstallStatus::Installing,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Installing => "installing",
            InstallStatus::Installed => "installed",
        }
    }
}

/// The single installed revision of a mod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledRevisionRecord {
    pub mod_id: String,
    pub revision_id: String,
    pub status: InstallStatus,
    pub path: Option<String>,
}

impl InstalledRevisionRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mod_id: row.get(0)?,
            revision_id: row.get(1)?,
            status: InstallStatus::from_str(&row.get::<_, String>(2)?),
            path: row.get(3)?,
        })
    }
}

/// A previously fetched archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedRevisionRecord {
    pub mod_id: String,
    pub revision_id: String,
    pub path: String,
}

impl DownloadedRevisionRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            mod_id: row.get(0)?,
            revision_id: row.get(1)?,
            path: row.get(2)?,
        })
    }
}

/// Playlist database record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRecord {
    pub id: i64,
    pub name: String,
}

impl PlaylistRecord {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }

    pub fn is_starred(&self) -> bool {
        self.id == STARRED_PLAYLIST_ID
    }
}

impl From<PlaylistRecord> for PlaylistInfo {
    fn from(p: PlaylistRecord) -> Self {
        Self {
            id: p.id,
            name: p.name,
        }
    }
}
