//! Install and uninstall failures

use crate::catalogue::RevisionInfo;
use crate::download::{ArchiveError, TimeoutError};
use crate::status::ErrorCode;
use serde_json::{Map, Value};

/// Why an install or uninstall run stopped
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("Install folders are not configured. Please check your configuration")]
    NoPathConfiguration,

    #[error("Revision not found: {revision_id}")]
    RevisionNotFound { revision_id: String },

    #[error("Another revision already installed: {}", installed.name)]
    ModAlreadyInstalled { installed: RevisionInfo },

    #[error("Http error during {stage}: {status}")]
    Http { stage: &'static str, status: u16 },

    #[error("File download timeout")]
    Timeout(#[from] TimeoutError),

    #[error("{0}")]
    Archive(#[from] ArchiveError),

    #[error("Dependency cycle through mod {mod_id}")]
    DependencyCycle { mod_id: String },

    #[error("Dependency {mod_id} failed: {source}")]
    Dependency {
        mod_id: String,
        #[source]
        source: Box<InstallError>,
    },

    #[error("Mod not found: {0}")]
    ModNotFound(String),

    #[error("No installed revision for Mod: {0}")]
    ModNotInstalled(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InstallError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InstallError::NoPathConfiguration => ErrorCode::NoPathConfiguration,
            InstallError::RevisionNotFound { .. } => ErrorCode::RevisionNotFound,
            InstallError::ModAlreadyInstalled { .. } => ErrorCode::ModAlreadyInstalled,
            InstallError::Http { .. } => ErrorCode::HttpError,
            InstallError::Timeout(_) => ErrorCode::Timeout,
            InstallError::Archive(_) => ErrorCode::ZipError,
            InstallError::DependencyCycle { .. } => ErrorCode::DependencyCycle,
            InstallError::Dependency { .. } | InstallError::Other(_) => ErrorCode::Exception,
            InstallError::ModNotFound(_) => ErrorCode::ModNotFound,
            InstallError::ModNotInstalled(_) => ErrorCode::ModNotInstalled,
        }
    }

    /// Extra fields for the error payload beside `code` and `message`
    pub fn extra(&self) -> Map<String, Value> {
        let mut extra = Map::new();
        match self {
            InstallError::ModAlreadyInstalled { installed } => {
                if let Ok(value) = serde_json::to_value(installed) {
                    extra.insert("installed_revision".into(), value);
                }
            }
            InstallError::Http { status, .. } => {
                extra.insert("http_code".into(), (*status).into());
            }
            InstallError::Dependency { mod_id, .. } | InstallError::DependencyCycle { mod_id } => {
                extra.insert("dependency".into(), mod_id.clone().into());
            }
            _ => {}
        }
        extra
    }

    /// Failures the run anticipates, as opposed to unexpected exceptions
    pub fn is_classified(&self) -> bool {
        !matches!(self, InstallError::Other(_) | InstallError::Dependency { .. })
    }
}
