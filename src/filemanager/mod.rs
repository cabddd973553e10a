//! Sandboxed per-tenant file manager

pub mod access;
pub mod archive;
pub mod catalog;
pub mod config;
pub mod conflict;
pub mod mime;
pub mod operations;
pub mod path_utils;
pub mod search;
pub mod security;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use crate::protocol::{
    DownloadRequest, FileAction, FileManagerError, FileManagerRequest, FileManagerResponse,
    SelectedItem, UploadRequest,
};

use access::{AccessRuleSet, Capability, Permission};
use archive::{ArchiveBuilder, DownloadStream};
use catalog::DirectoryCatalog;
use config::FileManagerConfig;
use operations::MutationEngine;
use path_utils::{validate_entry_name, VirtualPath};
use search::SearchEngine;
use security::PathSandbox;

/// State for one request: the tenant sandbox and a freshly loaded rule set.
///
/// Nothing here outlives the request, so concurrent requests never share
/// scratch state.
pub struct RequestContext {
    config: Arc<FileManagerConfig>,
    sandbox: PathSandbox,
    rules: Option<AccessRuleSet>,
}

impl RequestContext {
    pub fn open(config: Arc<FileManagerConfig>, tenant: &str) -> Result<Self, FileManagerError> {
        let sandbox = PathSandbox::open(&config.storage_root, tenant, config.create_tenant_roots)?;
        let rules = AccessRuleSet::load(&config.access_rules_file)?;
        tracing::debug!(
            "Request for {} in {} ({})",
            tenant,
            sandbox.root().display(),
            if rules.is_some() { "restricted" } else { "unrestricted" }
        );
        Ok(Self {
            config,
            sandbox,
            rules,
        })
    }

    pub fn config(&self) -> &FileManagerConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    pub fn rules(&self) -> Option<&AccessRuleSet> {
        self.rules.as_ref()
    }

    pub fn permission(&self, path: &VirtualPath, is_file: bool) -> Permission {
        access::evaluate(self.rules(), path, is_file)
    }

    /// Name shown to the client; the root is shown as the tenant.
    pub fn display_name(&self, path: &VirtualPath) -> String {
        path.name()
            .map(str::to_string)
            .unwrap_or_else(|| self.sandbox.tenant().to_string())
    }

    /// Permission of an existing entry, with its kind read from disk.
    pub fn permission_of(&self, path: &VirtualPath) -> Result<(Permission, bool), FileManagerError> {
        let native = self.sandbox.resolve_existing(path)?;
        let metadata =
            std::fs::symlink_metadata(&native).map_err(|e| FileManagerError::io(&path.display(), e))?;
        let is_file = !metadata.is_dir();
        Ok((self.permission(path, is_file), is_file))
    }
}

/// Run a blocking filesystem job off the async workers.
pub(crate) async fn blocking<T, F>(job: F) -> Result<T, FileManagerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FileManagerError> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| FileManagerError::IoError {
            message: format!("Background task failed: {}", e),
        })?
}

/// Sandbox path of one client-selected item.
fn selected_path(item: &SelectedItem) -> Result<VirtualPath, FileManagerError> {
    let name = validate_entry_name(&item.name)?;
    Ok(VirtualPath::parse(&item.filter_path).join(name))
}

/// The selection a request addresses: `data` when given, otherwise
/// `names` relative to `path`.
fn selection(
    path: &str,
    names: &[String],
    data: &[SelectedItem],
) -> Result<Vec<VirtualPath>, FileManagerError> {
    if !data.is_empty() {
        return data.iter().map(selected_path).collect();
    }
    let dir = VirtualPath::parse(path);
    names
        .iter()
        .map(|name| Ok(dir.join(validate_entry_name(name)?)))
        .collect()
}

fn required<'r>(value: Option<&'r str>, field: &str) -> Result<&'r str, FileManagerError> {
    value.ok_or_else(|| FileManagerError::InvalidRequest {
        message: format!("Missing {}.", field),
    })
}

pub struct FileManagerService {
    config: Arc<FileManagerConfig>,
}

impl FileManagerService {
    pub fn new(config: FileManagerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &FileManagerConfig {
        self.config.as_ref()
    }

    pub fn context(&self, tenant: &str) -> Result<RequestContext, FileManagerError> {
        RequestContext::open(self.config.clone(), tenant)
    }

    /// Run one file manager action; failures become the `{error}` shape.
    pub async fn dispatch(&self, tenant: &str, request: &FileManagerRequest) -> FileManagerResponse {
        let result = match self.context(tenant) {
            Ok(ctx) => self.handle(&ctx, request).await,
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            tracing::warn!("{:?} for tenant {} failed: {}", request.action, tenant, e);
            FileManagerResponse::failure(&e)
        })
    }

    async fn handle(
        &self,
        ctx: &RequestContext,
        request: &FileManagerRequest,
    ) -> Result<FileManagerResponse, FileManagerError> {
        let dir = VirtualPath::parse(&request.path);
        tracing::debug!(
            "{:?} in {} for tenant {}",
            request.action,
            dir.display(),
            ctx.sandbox().tenant()
        );

        match request.action {
            FileAction::Read => {
                let catalog = DirectoryCatalog::new(ctx);
                let cwd = catalog.list_entry(&dir).await?;
                if let Err(e) = cwd.permission.require(Capability::Read, &cwd.name) {
                    return Ok(FileManagerResponse::Failure {
                        cwd: Some(cwd),
                        error: e.details(),
                    });
                }
                let files = catalog.list_children(&dir).await?;
                Ok(FileManagerResponse::Listing { cwd, files })
            }
            FileAction::Details => {
                let mut items = selection(&request.path, &request.names, &request.data)?;
                if items.is_empty() {
                    items.push(dir);
                }
                let details = DirectoryCatalog::new(ctx).details_for(&items).await?;
                Ok(FileManagerResponse::Details { details })
            }
            FileAction::Search => {
                let search_string = request.search_string.as_deref().unwrap_or("*");
                let (cwd, files) = SearchEngine::new(ctx)
                    .search(&dir, search_string, request.case_sensitive)
                    .await?;
                Ok(FileManagerResponse::Listing { cwd, files })
            }
            FileAction::Create => {
                let name = required(request.name.as_deref(), "folder name")?;
                let entry = MutationEngine::new(ctx).create(&dir, name).await?;
                Ok(FileManagerResponse::Files { files: vec![entry] })
            }
            FileAction::Rename => {
                let new_name = required(request.new_name.as_deref(), "new name")?;
                let item = match request.data.first() {
                    Some(item) => selected_path(item)?,
                    None => dir.join(validate_entry_name(required(
                        request.name.as_deref(),
                        "item name",
                    )?)?),
                };
                let entry = MutationEngine::new(ctx).rename(&item, new_name).await?;
                Ok(FileManagerResponse::Files { files: vec![entry] })
            }
            FileAction::Delete => {
                let items = selection(&request.path, &request.names, &request.data)?;
                let files = MutationEngine::new(ctx).delete(&items).await?;
                Ok(FileManagerResponse::Files { files })
            }
            FileAction::Copy | FileAction::Move => {
                let items = selection(&request.path, &request.names, &request.data)?;
                let target = match (&request.target_path, &request.target_data) {
                    (Some(target_path), _) => VirtualPath::parse(target_path),
                    (None, Some(target_data)) => selected_path(target_data)?,
                    (None, None) => {
                        return Err(FileManagerError::InvalidRequest {
                            message: "Missing target path.".to_string(),
                        })
                    }
                };
                let engine = MutationEngine::new(ctx);
                let files = if request.action == FileAction::Copy {
                    engine.copy(&items, &target, &request.rename_files).await?
                } else {
                    engine.move_items(&items, &target, &request.rename_files).await?
                };
                Ok(FileManagerResponse::Files { files })
            }
        }
    }

    /// Prepare a download: the raw file for a single file, otherwise a
    /// finished zip archive.
    pub async fn download(
        &self,
        tenant: &str,
        request: &DownloadRequest,
    ) -> Result<DownloadStream, FileManagerError> {
        let ctx = self.context(tenant)?;
        let items = selection(&request.path, &request.names, &request.data)?;
        ArchiveBuilder::new(&ctx).prepare(&items).await
    }

    /// Move files the upload collaborator already received into the sandbox.
    pub async fn upload(&self, tenant: &str, request: &UploadRequest) -> FileManagerResponse {
        let result = match self.context(tenant) {
            Ok(ctx) => {
                let dir = VirtualPath::parse(&request.path);
                MutationEngine::new(&ctx)
                    .upload(&dir, &request.files, request.mode)
                    .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(files) => FileManagerResponse::Files { files },
            Err(e) => {
                tracing::warn!("Upload for tenant {} failed: {}", tenant, e);
                FileManagerResponse::failure(&e)
            }
        }
    }

    /// Raw bytes of a readable file plus the configured image content type.
    pub async fn image(&self, tenant: &str, path: &str) -> Result<(String, Vec<u8>), FileManagerError> {
        let ctx = self.context(tenant)?;
        let path = VirtualPath::parse(path);
        let (permission, is_file) = ctx.permission_of(&path)?;
        if !is_file {
            return Err(FileManagerError::InvalidRequest {
                message: format!("{} is not a file.", path.display()),
            });
        }
        permission.require(Capability::Read, &ctx.display_name(&path))?;
        let native = ctx.sandbox().resolve_existing(&path)?;
        let bytes = tokio::fs::read(&native)
            .await
            .map_err(|e| FileManagerError::io(&path.display(), e))?;
        Ok((ctx.config().image_content_type.clone(), bytes))
    }
}
