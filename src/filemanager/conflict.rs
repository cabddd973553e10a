//! Name collision detection and copy/move planning.

use std::collections::HashSet;
use std::path::Path;

use crate::protocol::FileManagerError;

use super::path_utils::{split_file_name, VirtualPath};

/// True iff `dir` holds an entry called `name` of the same kind.
///
/// A file and a directory with the same name do not collide.
pub fn name_exists(dir: &Path, name: &str, is_file: bool) -> bool {
    match std::fs::symlink_metadata(dir.join(name)) {
        Ok(metadata) => metadata.is_dir() != is_file,
        Err(_) => false,
    }
}

fn candidate_name(base: &str, is_file: bool, count: usize) -> String {
    if is_file {
        let (stem, extension) = split_file_name(base);
        format!("{}({}){}", stem, count, extension)
    } else {
        format!("{}({})", base, count)
    }
}

/// First `stem(n)ext` (files) or `name(n)` (directories) that is neither
/// in `dir` nor in `reserved`.
pub fn next_available_name(
    dir: &Path,
    base: &str,
    is_file: bool,
    reserved: &HashSet<(String, bool)>,
) -> Result<String, FileManagerError> {
    // Each probe that fails is blocked by a distinct existing or reserved
    // name, so one more probe than there are such names always succeeds.
    let existing = std::fs::read_dir(dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    let limit = existing + reserved.len() + 1;
    for count in 1..=limit {
        let candidate = candidate_name(base, is_file, count);
        if !name_exists(dir, &candidate, is_file) && !reserved.contains(&(candidate.clone(), is_file)) {
            return Ok(candidate);
        }
    }
    Err(FileManagerError::IoError {
        message: format!("No free name for {} in {}", base, dir.display()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Copy,
    Move,
}

/// Where one selected item will land, decided before anything is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationPlan {
    pub source: VirtualPath,
    pub destination_dir: VirtualPath,
    pub final_name: String,
    pub is_file: bool,
    pub requires_confirmation: bool,
}

impl MutationPlan {
    pub fn destination(&self) -> VirtualPath {
        self.destination_dir.join(&self.final_name)
    }

    /// Moving an item onto itself.
    pub fn is_noop(&self) -> bool {
        self.destination() == self.source
    }
}

/// Plans a copy or move batch into one target directory.
///
/// Names chosen for earlier items are reserved so two items in the same
/// batch never pick the same destination.
pub struct ConflictResolver<'a> {
    kind: TransferKind,
    target: &'a VirtualPath,
    target_native: &'a Path,
    rename_files: &'a [String],
    reserved: HashSet<(String, bool)>,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(
        kind: TransferKind,
        target: &'a VirtualPath,
        target_native: &'a Path,
        rename_files: &'a [String],
    ) -> Self {
        Self {
            kind,
            target,
            target_native,
            rename_files,
            reserved: HashSet::new(),
        }
    }

    fn taken(&self, name: &str, is_file: bool) -> bool {
        name_exists(self.target_native, name, is_file)
            || self.reserved.contains(&(name.to_string(), is_file))
    }

    /// Pick the destination name for `name`, renaming on collision when
    /// `auto_rename` is set. The bool is true when the caller must confirm.
    pub fn claim(
        &mut self,
        name: &str,
        is_file: bool,
        auto_rename: bool,
    ) -> Result<(String, bool), FileManagerError> {
        let (final_name, requires_confirmation) = if !self.taken(name, is_file) {
            (name.to_string(), false)
        } else if auto_rename {
            let renamed = next_available_name(self.target_native, name, is_file, &self.reserved)?;
            (renamed, false)
        } else {
            (name.to_string(), true)
        };
        if !requires_confirmation {
            self.reserved.insert((final_name.clone(), is_file));
        }
        Ok((final_name, requires_confirmation))
    }

    pub fn plan(&mut self, source: &VirtualPath, is_file: bool) -> Result<MutationPlan, FileManagerError> {
        let name = source.name().unwrap_or_default().to_string();
        let same_dir = source.parent().as_ref() == Some(self.target);

        let (final_name, requires_confirmation) = if same_dir && self.kind == TransferKind::Move {
            (name, false)
        } else {
            let approved = self.rename_files.iter().any(|approved| *approved == name);
            self.claim(&name, is_file, same_dir || approved)?
        };

        Ok(MutationPlan {
            source: source.clone(),
            destination_dir: self.target.clone(),
            final_name,
            is_file,
            requires_confirmation,
        })
    }
}

/// Plan every item; any unconfirmed collision rejects the whole batch.
pub fn plan_batch(
    resolver: &mut ConflictResolver<'_>,
    items: &[(VirtualPath, bool)],
) -> Result<Vec<MutationPlan>, FileManagerError> {
    let mut plans = Vec::with_capacity(items.len());
    for (source, is_file) in items {
        plans.push(resolver.plan(source, *is_file)?);
    }
    let blocking: Vec<String> = plans
        .iter()
        .filter(|plan| plan.requires_confirmation)
        .map(|plan| plan.final_name.clone())
        .collect();
    if !blocking.is_empty() {
        return Err(FileManagerError::Conflict { names: blocking });
    }
    Ok(plans)
}
