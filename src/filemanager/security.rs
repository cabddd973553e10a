use std::path::{Component, Path, PathBuf};

use path_jail::Jail;

use crate::protocol::FileManagerError;

use super::path_utils::VirtualPath;

/// Resolves sandbox-relative paths against one tenant's root directory.
///
/// `VirtualPath` already drops `..` lexically; the jail check catches
/// symlinks inside the tree that point back out of it.
pub struct PathSandbox {
    tenant: String,
    root: PathBuf,
    jail: Jail,
}

impl PathSandbox {
    pub fn open(storage_root: &Path, tenant: &str, create: bool) -> Result<Self, FileManagerError> {
        validate_tenant(tenant)?;
        let root = storage_root.join(tenant);

        if !root.exists() {
            if !create {
                return Err(FileManagerError::NotFound {
                    path: tenant.to_string(),
                });
            }
            std::fs::create_dir_all(&root).map_err(|e| FileManagerError::io(tenant, e))?;
            tracing::info!("Created sandbox root for tenant {}", tenant);
        }

        let root = root
            .canonicalize()
            .map_err(|e| FileManagerError::io(tenant, e))?;
        if !root.is_dir() {
            return Err(FileManagerError::InvalidRequest {
                message: format!("Sandbox root for {} is not a directory.", tenant),
            });
        }
        let jail = Jail::new(&root).map_err(|e| FileManagerError::IoError {
            message: format!("Failed to open sandbox for {}: {}", tenant, e),
        })?;

        Ok(Self {
            tenant: tenant.to_string(),
            root,
            jail,
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Native location of `path`, which may not exist yet.
    pub fn resolve(&self, path: &VirtualPath) -> Result<PathBuf, FileManagerError> {
        let native = path.to_native(&self.root);
        let existing_ancestor =
            find_existing_ancestor(&native).ok_or_else(|| FileManagerError::NotFound {
                path: path.display(),
            })?;
        let canonical_ancestor = existing_ancestor
            .canonicalize()
            .map_err(|e| FileManagerError::io(&path.display(), e))?;
        self.ensure_contained(&canonical_ancestor, path)?;
        Ok(native)
    }

    /// Native location of `path`, which must exist.
    pub fn resolve_existing(&self, path: &VirtualPath) -> Result<PathBuf, FileManagerError> {
        let native = self.resolve(path)?;
        if std::fs::symlink_metadata(&native).is_err() {
            return Err(FileManagerError::NotFound {
                path: path.display(),
            });
        }
        Ok(native)
    }

    /// Sandbox-relative form of a native path found by walking the tree.
    pub fn relative(&self, native: &Path) -> Option<VirtualPath> {
        native
            .strip_prefix(&self.root)
            .ok()
            .and_then(VirtualPath::from_relative)
    }

    fn ensure_contained(&self, canonical: &Path, path: &VirtualPath) -> Result<(), FileManagerError> {
        if self.jail.contains(canonical).is_err() {
            tracing::warn!(
                "Rejected {} for tenant {}: resolves outside the sandbox",
                path.display(),
                self.tenant
            );
            return Err(FileManagerError::PermissionDenied {
                message: format!("{} is outside the sandbox.", path.display()),
            });
        }
        Ok(())
    }
}

/// The directory the upload collaborator stages received files in.
///
/// A client names the staged file it wants stored, so every such path is
/// canonicalised and must be a regular file inside this directory.
pub struct UploadStaging {
    jail: Jail,
}

impl UploadStaging {
    pub fn open(dir: &Path) -> Result<Self, FileManagerError> {
        let dir = dir.canonicalize().map_err(|e| FileManagerError::IoError {
            message: format!("Upload staging directory {}: {}", dir.display(), e),
        })?;
        let jail = Jail::new(&dir).map_err(|e| FileManagerError::IoError {
            message: format!("Failed to open upload staging directory {}: {}", dir.display(), e),
        })?;
        Ok(Self { jail })
    }

    /// Canonical location of a staged file, or `PermissionDenied` when the
    /// path is anything other than a regular file inside the staging area.
    pub fn staged_file(&self, temp_path: &Path) -> Result<PathBuf, FileManagerError> {
        let denied = || {
            tracing::warn!("Rejected upload source {}", temp_path.display());
            FileManagerError::PermissionDenied {
                message: "The uploaded file is not in the upload area.".to_string(),
            }
        };
        let canonical = temp_path.canonicalize().map_err(|_| denied())?;
        if self.jail.contains(&canonical).is_err() {
            return Err(denied());
        }
        match std::fs::symlink_metadata(&canonical) {
            Ok(metadata) if metadata.is_file() => Ok(canonical),
            _ => Err(denied()),
        }
    }
}

fn validate_tenant(tenant: &str) -> Result<(), FileManagerError> {
    let mut components = Path::new(tenant).components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !tenant.contains(['/', '\\']);
    if !valid {
        return Err(FileManagerError::InvalidRequest {
            message: format!("'{}' is not a valid tenant name.", tenant),
        });
    }
    Ok(())
}

fn find_existing_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|p| std::fs::symlink_metadata(p).is_ok())
        .map(|p| p.to_path_buf())
}
