//! Mod status snapshots published to hub subscribers
//!
//! A [`StatusSnapshot`] is built fresh from committed database state and an
//! in-flight [`Operation`]. It is never persisted.

use crate::catalogue::{ModInfo, RevisionInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which pipeline produced an operation update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Install,
    Uninstall,
}

/// Step of an install or uninstall run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpState {
    GetModInfo,
    GetDependencies,
    InstallingDependency,
    GetDownloadUrl,
    Downloading,
    WaitForFile,
    Unzip,
    Copying,
    RemoveFolder,
    RemoveDatabaseEntry,
    Done,
    Error,
}

impl OpState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpState::Done | OpState::Error)
    }
}

/// Error codes carried by `state: "error"` operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NoPathConfiguration,
    RevisionNotFound,
    ModAlreadyInstalled,
    HttpError,
    Timeout,
    ZipError,
    Exception,
    ModNotFound,
    ModNotInstalled,
    DependencyCycle,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoPathConfiguration => "no_path_configuration",
            ErrorCode::RevisionNotFound => "revision_not_found",
            ErrorCode::ModAlreadyInstalled => "mod_already_installed",
            ErrorCode::HttpError => "http_error",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ZipError => "zip_error",
            ErrorCode::Exception => "exception",
            ErrorCode::ModNotFound => "mod_not_found",
            ErrorCode::ModNotInstalled => "mod_not_installed",
            ErrorCode::DependencyCycle => "dependency_cycle",
        }
    }
}

/// In-flight operation descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub op: OpKind,
    pub state: OpState,
    #[serde(rename = "mod", default, skip_serializing_if = "Option::is_none")]
    pub mod_info: Option<ModInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionInfo>,
    /// Step-specific fields (progress counters, error code and message, ...)
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl Operation {
    pub fn new(op: OpKind, state: OpState) -> Self {
        Self {
            op,
            state,
            mod_info: None,
            revision: None,
            data: Map::new(),
        }
    }

    pub fn error(op: OpKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(op, OpState::Error)
            .with_data("code", code.as_str())
            .with_data("message", message.into())
    }

    pub fn with_mod(mut self, info: Option<&ModInfo>) -> Self {
        self.mod_info = info.cloned();
        self
    }

    pub fn with_revision(mut self, revision: Option<&RevisionInfo>) -> Self {
        self.revision = revision.cloned();
        self
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Error code, when this is an error operation
    pub fn code(&self) -> Option<&str> {
        self.data.get("code").and_then(Value::as_str)
    }
}

/// Playlist membership shown in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: i64,
    pub name: String,
}

/// Everything a client needs to render a mod's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed: Option<RevisionInfo>,
    pub installing: bool,
    #[serde(default)]
    pub downloaded: Vec<RevisionInfo>,
    pub starred: bool,
    #[serde(default)]
    pub playlists: Vec<PlaylistInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

impl StatusSnapshot {
    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn set_operation(&mut self, operation: Operation) {
        self.operation = Some(operation);
    }
}
