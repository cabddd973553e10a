use std::path::{Path, PathBuf};

use tokio::fs;
use walkdir::WalkDir;

use crate::protocol::{Entry, FileManagerError, UploadMode, UploadedFile};

use super::access::Capability;
use super::catalog::DirectoryCatalog;
use super::conflict::{name_exists, plan_batch, ConflictResolver, MutationPlan, TransferKind};
use super::path_utils::{validate_entry_name, VirtualPath};
use super::security::UploadStaging;
use super::{blocking, RequestContext};

/// An existing item after its permission check passed.
struct CheckedItem {
    path: VirtualPath,
    native: PathBuf,
    is_file: bool,
}

/// Applies create/rename/delete/copy/move/upload to one tenant sandbox.
///
/// Every permission and conflict check for a batch runs before the first
/// write. Once writes start, a failed item does not roll back the ones
/// already done.
pub struct MutationEngine<'a> {
    ctx: &'a RequestContext,
}

impl<'a> MutationEngine<'a> {
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    fn check(&self, path: &VirtualPath, capability: Capability) -> Result<CheckedItem, FileManagerError> {
        let native = self.ctx.sandbox().resolve_existing(path)?;
        let (permission, is_file) = self.ctx.permission_of(path)?;
        permission.require(capability, &self.ctx.display_name(path))?;
        Ok(CheckedItem {
            path: path.clone(),
            native,
            is_file,
        })
    }

    /// Resolve a destination directory that must allow `writeContents`.
    fn writable_dir(&self, dir: &VirtualPath) -> Result<PathBuf, FileManagerError> {
        let checked = self.check(dir, Capability::WriteContents)?;
        if checked.is_file {
            return Err(FileManagerError::InvalidRequest {
                message: format!("{} is not a folder.", dir.display()),
            });
        }
        Ok(checked.native)
    }

    pub async fn create(&self, dir: &VirtualPath, name: &str) -> Result<Entry, FileManagerError> {
        let name = validate_entry_name(name)?;
        let dir_native = self.writable_dir(dir)?;
        if name_exists(&dir_native, name, false) {
            return Err(FileManagerError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let path = dir.join(name);
        fs::create_dir(dir_native.join(name))
            .await
            .map_err(|e| FileManagerError::io(&path.display(), e))?;
        tracing::info!("Created folder {} for {}", path.display(), self.ctx.sandbox().tenant());

        DirectoryCatalog::new(self.ctx).list_entry(&path).await
    }

    pub async fn rename(&self, item: &VirtualPath, new_name: &str) -> Result<Entry, FileManagerError> {
        let new_name = validate_entry_name(new_name)?;
        if item.is_root() {
            return Err(FileManagerError::InvalidRequest {
                message: "The root folder cannot be renamed.".to_string(),
            });
        }
        let checked = self.check(item, Capability::Write)?;
        let parent = item.parent().unwrap_or_default();
        let renamed = parent.join(new_name);
        if renamed == *item {
            return DirectoryCatalog::new(self.ctx).list_entry(item).await;
        }

        let parent_native = checked.native.parent().map(Path::to_path_buf).unwrap_or_default();
        if name_exists(&parent_native, new_name, checked.is_file) {
            return Err(FileManagerError::AlreadyExists {
                name: new_name.to_string(),
            });
        }

        fs::rename(&checked.native, parent_native.join(new_name))
            .await
            .map_err(|e| FileManagerError::io(&item.display(), e))?;
        tracing::info!(
            "Renamed {} to {} for {}",
            item.display(),
            renamed.display(),
            self.ctx.sandbox().tenant()
        );

        DirectoryCatalog::new(self.ctx).list_entry(&renamed).await
    }

    /// Delete every item, or nothing when any item is not writable.
    pub async fn delete(&self, items: &[VirtualPath]) -> Result<Vec<Entry>, FileManagerError> {
        let checked = self.check_all(items, Capability::Write)?;

        let catalog = DirectoryCatalog::new(self.ctx);
        let mut snapshots = Vec::with_capacity(checked.len());
        for item in &checked {
            snapshots.push(catalog.list_entry(&item.path).await?);
        }
        let folders: Vec<VirtualPath> = checked
            .iter()
            .filter(|item| !item.is_file)
            .map(|item| item.path.clone())
            .collect();

        let mut removed = Vec::with_capacity(checked.len());
        let mut failed = Vec::new();
        for (item, entry) in checked.into_iter().zip(snapshots) {
            // Goes away with a selected folder above it.
            if folders.iter().any(|folder| *folder != item.path && item.path.starts_with(folder)) {
                removed.push(entry);
                continue;
            }
            let result = if item.is_file {
                fs::remove_file(&item.native)
                    .await
                    .map_err(|e| FileManagerError::io(&item.path.display(), e))
            } else {
                let native = item.native.clone();
                blocking(move || remove_tree(&native)).await
            };
            match result {
                Ok(()) => {
                    tracing::info!("Deleted {} for {}", item.path.display(), self.ctx.sandbox().tenant());
                    removed.push(entry);
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", item.path.display(), e);
                    failed.push(entry.name);
                }
            }
        }
        batch_result(removed, failed, "delete")
    }

    pub async fn copy(
        &self,
        items: &[VirtualPath],
        target: &VirtualPath,
        rename_files: &[String],
    ) -> Result<Vec<Entry>, FileManagerError> {
        let plans = self.plan_transfer(TransferKind::Copy, items, target, rename_files)?;
        let target_native = self.ctx.sandbox().resolve_existing(target)?;

        let catalog = DirectoryCatalog::new(self.ctx);
        let mut copied = Vec::with_capacity(plans.len());
        let mut failed = Vec::new();
        for plan in plans {
            let destination = target_native.join(&plan.final_name);
            let result = match self.ctx.sandbox().resolve_existing(&plan.source) {
                Ok(source) => copy_item(source, destination, plan.is_file).await,
                Err(e) => Err(e),
            };
            self.record(&catalog, &plan, result, "Copied", &mut copied, &mut failed)
                .await;
        }
        batch_result(copied, failed, "copy")
    }

    pub async fn move_items(
        &self,
        items: &[VirtualPath],
        target: &VirtualPath,
        rename_files: &[String],
    ) -> Result<Vec<Entry>, FileManagerError> {
        let plans = self.plan_transfer(TransferKind::Move, items, target, rename_files)?;
        let target_native = self.ctx.sandbox().resolve_existing(target)?;

        let catalog = DirectoryCatalog::new(self.ctx);
        let mut moved = Vec::with_capacity(plans.len());
        let mut failed = Vec::new();
        for plan in plans {
            if plan.is_noop() {
                if let Ok(entry) = catalog.list_entry(&plan.source).await {
                    moved.push(entry);
                }
                continue;
            }
            let destination = target_native.join(&plan.final_name);
            let result = match self.ctx.sandbox().resolve_existing(&plan.source) {
                Ok(source) => move_item(source, destination, plan.is_file).await,
                Err(e) => Err(e),
            };
            self.record(&catalog, &plan, result, "Moved", &mut moved, &mut failed)
                .await;
        }
        batch_result(moved, failed, "move")
    }

    /// Relocate already-received upload files into `dir`.
    pub async fn upload(
        &self,
        dir: &VirtualPath,
        files: &[UploadedFile],
        mode: UploadMode,
    ) -> Result<Vec<Entry>, FileManagerError> {
        self.check(dir, Capability::Upload)?;
        let dir_native = self.writable_dir(dir)?;

        let staging = UploadStaging::open(&self.ctx.config().upload_staging_dir)?;

        let mut resolver = ConflictResolver::new(TransferKind::Copy, dir, &dir_native, &[]);
        let mut destinations = Vec::with_capacity(files.len());
        for file in files {
            let name = validate_entry_name(&file.original_name)?;
            let staged = staging.staged_file(&file.temp_path)?;
            let final_name = match mode {
                UploadMode::Replace => name.to_string(),
                UploadMode::KeepBoth => resolver.claim(name, true, true)?.0,
                UploadMode::Save => {
                    let (final_name, taken) = resolver.claim(name, true, false)?;
                    if taken {
                        return Err(FileManagerError::AlreadyExists { name: final_name });
                    }
                    final_name
                }
            };
            destinations.push((staged, final_name));
        }

        let catalog = DirectoryCatalog::new(self.ctx);
        let mut stored = Vec::with_capacity(destinations.len());
        let mut failed = Vec::new();
        for (staged, final_name) in destinations {
            let path = dir.join(&final_name);
            match fs::copy(&staged, dir_native.join(&final_name)).await {
                Ok(_) => {
                    if let Err(e) = fs::remove_file(&staged).await {
                        tracing::warn!("Failed to remove upload temp {}: {}", staged.display(), e);
                    }
                    tracing::info!("Stored upload {} for {}", path.display(), self.ctx.sandbox().tenant());
                    match catalog.list_entry(&path).await {
                        Ok(entry) => stored.push(entry),
                        Err(e) => tracing::warn!("Stored {} but could not list it: {}", path.display(), e),
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to store upload {}: {}", path.display(), e);
                    failed.push(final_name);
                }
            }
        }
        batch_result(stored, failed, "upload")
    }

    fn check_all(
        &self,
        items: &[VirtualPath],
        capability: Capability,
    ) -> Result<Vec<CheckedItem>, FileManagerError> {
        if items.is_empty() {
            return Err(FileManagerError::InvalidRequest {
                message: "No items selected.".to_string(),
            });
        }
        items
            .iter()
            .map(|item| {
                if item.is_root() {
                    return Err(FileManagerError::InvalidRequest {
                        message: "The root folder cannot be modified.".to_string(),
                    });
                }
                self.check(item, capability)
            })
            .collect()
    }

    /// Every check for a copy or move batch. Nothing has been written when
    /// this returns an error.
    fn plan_transfer(
        &self,
        kind: TransferKind,
        items: &[VirtualPath],
        target: &VirtualPath,
        rename_files: &[String],
    ) -> Result<Vec<MutationPlan>, FileManagerError> {
        let target_native = self.writable_dir(target)?;
        let capability = match kind {
            TransferKind::Copy => Capability::Copy,
            TransferKind::Move => Capability::Write,
        };
        let checked = self.check_all(items, capability)?;

        for item in &checked {
            if !item.is_file && target.starts_with(&item.path) {
                return Err(FileManagerError::InvalidRequest {
                    message: format!(
                        "The destination folder is inside {}.",
                        self.ctx.display_name(&item.path)
                    ),
                });
            }
        }

        let sources: Vec<(VirtualPath, bool)> = checked
            .into_iter()
            .map(|item| (item.path, item.is_file))
            .collect();
        let mut resolver = ConflictResolver::new(kind, target, &target_native, rename_files);
        plan_batch(&mut resolver, &sources).map_err(|e| {
            if let FileManagerError::Conflict { names } = &e {
                tracing::debug!("{:?} into {} needs confirmation for {:?}", kind, target.display(), names);
            }
            e
        })
    }

    async fn record(
        &self,
        catalog: &DirectoryCatalog<'_>,
        plan: &MutationPlan,
        result: Result<(), FileManagerError>,
        verb: &str,
        done: &mut Vec<Entry>,
        failed: &mut Vec<String>,
    ) {
        let destination = plan.destination();
        match result {
            Ok(()) => {
                tracing::info!(
                    "{} {} to {} for {}",
                    verb,
                    plan.source.display(),
                    destination.display(),
                    self.ctx.sandbox().tenant()
                );
                match catalog.list_entry(&destination).await {
                    Ok(entry) => done.push(entry),
                    Err(e) => tracing::warn!("Could not list {}: {}", destination.display(), e),
                }
            }
            Err(e) => {
                tracing::warn!("{} {} failed: {}", verb, plan.source.display(), e);
                failed.push(self.ctx.display_name(&plan.source));
            }
        }
    }
}

fn batch_result(done: Vec<Entry>, failed: Vec<String>, action: &str) -> Result<Vec<Entry>, FileManagerError> {
    if failed.is_empty() {
        return Ok(done);
    }
    Err(FileManagerError::IoError {
        message: format!("Failed to {} {}.", action, failed.join(", ")),
    })
}

async fn copy_item(source: PathBuf, destination: PathBuf, is_file: bool) -> Result<(), FileManagerError> {
    if is_file {
        fs::copy(&source, &destination)
            .await
            .map(|_| ())
            .map_err(|e| FileManagerError::io(&source.display().to_string(), e))
    } else {
        blocking(move || copy_tree(&source, &destination)).await
    }
}

async fn move_item(source: PathBuf, destination: PathBuf, is_file: bool) -> Result<(), FileManagerError> {
    if is_file {
        move_file(&source, &destination)
            .await
            .map_err(|e| FileManagerError::io(&source.display().to_string(), e))
    } else {
        move_dir(source, destination).await
    }
}

/// Copy the file bytes, then drop the source.
async fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    fs::copy(source, destination).await?;
    fs::remove_file(source).await
}

async fn move_dir(source: PathBuf, destination: PathBuf) -> Result<(), FileManagerError> {
    if fs::rename(&source, &destination).await.is_ok() {
        return Ok(());
    }
    blocking(move || {
        copy_tree(&source, &destination)?;
        remove_tree(&source)
    })
    .await
}

fn walk_error(e: walkdir::Error) -> FileManagerError {
    FileManagerError::IoError {
        message: e.to_string(),
    }
}

/// Recreate the tree under `source` at `destination`. Symlinks are skipped.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<(), FileManagerError> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(walk_error)?;
        let relative = entry.path().strip_prefix(source).map_err(|e| FileManagerError::IoError {
            message: e.to_string(),
        })?;
        let target = destination.join(relative);
        let file_type = entry.file_type();
        let result = if file_type.is_dir() {
            std::fs::create_dir_all(&target)
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target).map(|_| ())
        } else {
            tracing::debug!("Skipping link {}", entry.path().display());
            Ok(())
        };
        result.map_err(|e| FileManagerError::IoError {
            message: format!("{}: {}", target.display(), e),
        })?;
    }
    Ok(())
}

/// Remove a directory tree, children before their parent.
pub fn remove_tree(root: &Path) -> Result<(), FileManagerError> {
    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = entry.map_err(walk_error)?;
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(entry.path())
        } else {
            std::fs::remove_file(entry.path())
        };
        result.map_err(|e| FileManagerError::IoError {
            message: format!("{}: {}", entry.path().display(), e),
        })?;
    }
    Ok(())
}
