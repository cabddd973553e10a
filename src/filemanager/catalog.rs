use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::fs;
use walkdir::WalkDir;

use crate::protocol::{Entry, FileManagerError};

use super::access::Capability;
use super::path_utils::{extension_of, VirtualPath};
use super::{blocking, RequestContext};

const VARIOUS_LOCATION: &str = "Various Location";

/// Builds listing records for entries inside one tenant sandbox.
pub struct DirectoryCatalog<'a> {
    ctx: &'a RequestContext,
}

impl<'a> DirectoryCatalog<'a> {
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    /// Stat one path and fill every `Entry` field.
    pub async fn list_entry(&self, path: &VirtualPath) -> Result<Entry, FileManagerError> {
        let native = self.ctx.sandbox().resolve_existing(path)?;
        self.build_entry(path, &native).await
    }

    /// Entries directly inside `dir`, directories first.
    pub async fn list_children(&self, dir: &VirtualPath) -> Result<Vec<Entry>, FileManagerError> {
        let native = self.ctx.sandbox().resolve_existing(dir)?;
        let is_dir = fs::symlink_metadata(&native)
            .await
            .map(|metadata| metadata.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(FileManagerError::InvalidRequest {
                message: format!("{} is not a folder.", dir.display()),
            });
        }

        let mut read_dir = fs::read_dir(&native)
            .await
            .map_err(|e| FileManagerError::io(&dir.display(), e))?;
        let mut entries = Vec::new();
        while let Some(child) = read_dir
            .next_entry()
            .await
            .map_err(|e| FileManagerError::io(&dir.display(), e))?
        {
            let Some(name) = child.file_name().to_str().map(str::to_string) else {
                tracing::debug!("Skipping non UTF-8 name in {}", dir.display());
                continue;
            };
            match self.list_entry(&dir.join(&name)).await {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::debug!("Skipping {} in {}: {}", name, dir.display(), e),
            }
        }

        sort_entries(&mut entries);
        Ok(entries)
    }

    /// Details for one selection, or a synthetic record for several.
    pub async fn details_for(&self, items: &[VirtualPath]) -> Result<Entry, FileManagerError> {
        let Some(first) = items.first() else {
            return Err(FileManagerError::InvalidRequest {
                message: "No items selected.".to_string(),
            });
        };

        let mut entries = Vec::with_capacity(items.len());
        let mut total = 0u64;
        for item in items {
            let mut entry = self.list_entry(item).await?;
            entry
                .permission
                .require(Capability::Read, &self.ctx.display_name(item))?;
            if !entry.is_file {
                let native = self.ctx.sandbox().resolve_existing(item)?;
                entry.size = blocking(move || aggregate_size(&native)).await?;
            }
            total += entry.size;
            entries.push(entry);
        }

        let tenant = self.ctx.sandbox().tenant();
        let mut details = entries.swap_remove(0);
        if items.len() == 1 {
            details.location = Some(if first.is_root() {
                tenant.to_string()
            } else {
                format!("{}{}", tenant, first.display())
            });
            details.size_label = Some(format_size(details.size));
            return Ok(details);
        }

        let parent = first.parent().unwrap_or_default();
        let shared_parent = items
            .iter()
            .all(|item| item.parent().unwrap_or_default() == parent);
        details.location = Some(if !shared_parent {
            VARIOUS_LOCATION.to_string()
        } else if parent.is_root() {
            tenant.to_string()
        } else {
            format!("{}{}", tenant, parent.display())
        });
        details.name = items
            .iter()
            .map(|item| self.ctx.display_name(item))
            .collect::<Vec<_>>()
            .join(", ");
        details.size = total;
        details.size_label = Some(format_size(total));
        details.multiple_files = true;
        Ok(details)
    }

    /// Symlinks are not followed, so an entry has the same kind here as in
    /// permission checks.
    async fn build_entry(&self, path: &VirtualPath, native: &Path) -> Result<Entry, FileManagerError> {
        let metadata = fs::symlink_metadata(native)
            .await
            .map_err(|e| FileManagerError::io(&path.display(), e))?;
        let is_file = !metadata.is_dir();
        let name = self.ctx.display_name(path);

        let date_modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        let date_created = metadata
            .created()
            .map(DateTime::from)
            .unwrap_or(date_modified);

        let has_children = !is_file && has_child_directory(native).await;

        Ok(Entry {
            extension: if path.is_root() {
                String::new()
            } else {
                extension_of(&name)
            },
            filter_path: path.parent().map(|p| p.filter_path()).unwrap_or_default(),
            is_file,
            size: if is_file { metadata.len() } else { 0 },
            date_created,
            date_modified,
            has_children,
            permission: self.ctx.permission(path, is_file),
            multiple_files: false,
            location: None,
            size_label: None,
            name,
        })
    }
}

/// True when at least one immediate child is itself a directory.
async fn has_child_directory(dir: &Path) -> bool {
    let Ok(mut read_dir) = fs::read_dir(dir).await else {
        return false;
    };
    while let Ok(Some(child)) = read_dir.next_entry().await {
        if let Ok(file_type) = child.file_type().await {
            if file_type.is_dir() {
                return true;
            }
        }
    }
    false
}

/// Sum of file sizes below `dir`. Directories contribute nothing.
pub fn aggregate_size(dir: &Path) -> Result<u64, FileManagerError> {
    let mut total = 0u64;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| FileManagerError::IoError {
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| FileManagerError::IoError {
                message: e.to_string(),
            })?;
            total += metadata.len();
        }
    }
    Ok(total)
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let size = bytes as f64;
    if size < KB {
        format!("{} B", bytes)
    } else if size < KB * KB {
        format!("{:.2} KB", size / KB)
    } else if size < KB * KB * KB {
        format!("{:.2} MB", size / KB / KB)
    } else {
        format!("{:.2} GB", size / KB / KB / KB)
    }
}

fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        a.is_file
            .cmp(&b.is_file)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}
