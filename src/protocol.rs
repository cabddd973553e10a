//! WebSocket protocol messages
//!
//! Envelope messages are tagged by `type` in snake_case. The file manager
//! action documents carried inside them use camelCase field names.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::filemanager::access::Permission;

/// Messages sent from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        auth_token: Option<String>,
        client_version: String,
    },
    /// Heartbeat ping
    Ping,
    /// read, details, search, create, rename, delete, copy or move
    FileAction {
        request_id: String,
        tenant: String,
        request: FileManagerRequest,
    },
    Download {
        request_id: String,
        tenant: String,
        request: DownloadRequest,
    },
    /// Relocate files already received by the upload collaborator
    Upload {
        request_id: String,
        tenant: String,
        request: UploadRequest,
    },
    GetImage {
        request_id: String,
        tenant: String,
        path: String,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        server_version: String,
        authenticated: bool,
    },
    Pong,
    Error {
        code: String,
        message: String,
    },
    FileResponse {
        request_id: String,
        response: FileManagerResponse,
    },
    DownloadStart {
        request_id: String,
        file_name: String,
        content_type: String,
        content_length: u64,
    },
    DownloadChunk {
        request_id: String,
        chunk_index: u64,
        data: String,
        checksum: String,
        is_last: bool,
    },
    Image {
        request_id: String,
        content_type: String,
        data: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Read,
    Details,
    Search,
    Create,
    Rename,
    Delete,
    Copy,
    Move,
}

/// One selected entry as the client describes it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedItem {
    pub name: String,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default)]
    pub filter_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileManagerRequest {
    pub action: FileAction,
    #[serde(default)]
    pub path: String,
    /// New folder name for `create`
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub new_name: Option<String>,
    #[serde(default)]
    pub data: Vec<SelectedItem>,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub target_data: Option<SelectedItem>,
    /// Names the client has confirmed may be auto-renamed on copy/move
    #[serde(default)]
    pub rename_files: Vec<String>,
    #[serde(default)]
    pub search_string: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[cfg(test)]
impl FileManagerRequest {
    pub fn new(action: FileAction, path: impl Into<String>) -> Self {
        Self {
            action,
            path: path.into(),
            name: None,
            names: Vec::new(),
            new_name: None,
            data: Vec::new(),
            target_path: None,
            target_data: None,
            rename_files: Vec::new(),
            search_string: None,
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub data: Vec<SelectedItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub path: String,
    pub files: Vec<UploadedFile>,
    #[serde(default)]
    pub mode: UploadMode,
}

/// A file the upload collaborator has already written to a temp location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub original_name: String,
    pub temp_path: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadMode {
    /// Overwrite an existing file of the same name
    #[default]
    Replace,
    /// Keep the existing file and store the upload under a `name(n).ext` name
    KeepBoth,
    /// Refuse when a file of the same name exists
    Save,
}

/// One listing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub filter_path: String,
    pub is_file: bool,
    pub size: u64,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
    #[serde(rename = "type")]
    pub extension: String,
    /// True only when an immediate child is itself a directory
    #[serde(rename = "hasChild")]
    pub has_children: bool,
    pub permission: Permission,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub multiple_files: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileManagerResponse {
    Listing {
        cwd: Entry,
        files: Vec<Entry>,
    },
    Files {
        files: Vec<Entry>,
    },
    Details {
        details: Entry,
    },
    Failure {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<Entry>,
        error: ErrorDetails,
    },
}

impl FileManagerResponse {
    pub fn failure(error: &FileManagerError) -> Self {
        FileManagerResponse::Failure {
            cwd: None,
            error: error.details(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    pub message: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_exists: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("{message}")]
    PermissionDenied { message: String },
    #[error("A file or folder with the name {name} already exists.")]
    AlreadyExists { name: String },
    #[error("File Already Exists.")]
    Conflict { names: Vec<String> },
    #[error("{path} could not be found.")]
    NotFound { path: String },
    #[error("{message}")]
    InvalidRequest { message: String },
    #[error("{message}")]
    IoError { message: String },
}

impl FileManagerError {
    pub fn code(&self) -> &'static str {
        match self {
            FileManagerError::PermissionDenied { .. } => "401",
            FileManagerError::AlreadyExists { .. }
            | FileManagerError::Conflict { .. }
            | FileManagerError::InvalidRequest { .. } => "400",
            FileManagerError::NotFound { .. } => "404",
            FileManagerError::IoError { .. } => "500",
        }
    }

    pub fn details(&self) -> ErrorDetails {
        let file_exists = match self {
            FileManagerError::Conflict { names } => Some(names.clone()),
            _ => None,
        };
        ErrorDetails {
            message: self.to_string(),
            code: self.code().to_string(),
            file_exists,
        }
    }

    /// Map an I/O failure on `path`, keeping missing paths distinguishable.
    pub fn io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => FileManagerError::NotFound {
                path: path.to_string(),
            },
            _ => FileManagerError::IoError {
                message: format!("{}: {}", path, err),
            },
        }
    }
}
