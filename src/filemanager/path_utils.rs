use std::path::{Component, Path, PathBuf};

use crate::protocol::FileManagerError;

/// Escape tokens stripped from client-supplied paths.
const ESCAPE_SEQUENCES: [&str; 2] = ["../", "..\\"];

/// Remove directory-escape sequences until none remain.
///
/// A single pass is not enough: `....//` collapses to `../` once the inner
/// token is removed, so removal repeats until the string stops changing.
pub fn strip_escape_sequences(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let mut next = current.clone();
        for token in ESCAPE_SEQUENCES {
            next = next.replace(token, "");
        }
        if next == current {
            return current;
        }
        current = next;
    }
}

/// A location inside a tenant sandbox, held as normal path components.
///
/// Construction never keeps `.` or `..` components, so joining a
/// `VirtualPath` onto the sandbox root cannot climb above it lexically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    components: Vec<String>,
}

impl VirtualPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a client path such as `/docs/reports/` or `docs\reports`.
    pub fn parse(raw: &str) -> Self {
        let cleaned = strip_escape_sequences(raw);
        let components = cleaned
            .split(['/', '\\'])
            .filter(|part| !part.is_empty() && *part != "." && *part != "..")
            .map(str::to_string)
            .collect();
        Self { components }
    }

    /// Parse a sandbox-relative native path produced by a directory walk.
    pub fn from_relative(relative: &Path) -> Option<Self> {
        let mut components = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => components.push(part.to_str()?.to_string()),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(Self { components })
    }

    /// Append a single entry name. The name must already be validated.
    pub fn join(&self, name: &str) -> Self {
        let mut components = self.components.clone();
        if !name.is_empty() {
            components.push(name.to_string());
        }
        Self { components }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.components.is_empty() {
            return None;
        }
        Some(Self {
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn starts_with(&self, other: &VirtualPath) -> bool {
        self.components.starts_with(&other.components)
    }

    /// Directory form used on the wire: `/` for the root, `/a/b/` otherwise.
    pub fn filter_path(&self) -> String {
        if self.components.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", self.components.join("/"))
        }
    }

    /// `/a/b` form, `/` for the root.
    pub fn display(&self) -> String {
        format!("/{}", self.components.join("/"))
    }

    /// Proper ancestors from the root down to the immediate parent.
    pub fn ancestors(&self) -> impl Iterator<Item = VirtualPath> + '_ {
        (0..self.components.len()).map(move |depth| VirtualPath {
            components: self.components[..depth].to_vec(),
        })
    }

    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut native = root.to_path_buf();
        for component in &self.components {
            native.push(component);
        }
        native
    }
}

/// Reject names that would address anything other than a direct child.
pub fn validate_entry_name(name: &str) -> Result<&str, FileManagerError> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', '\0'])
    {
        return Err(FileManagerError::InvalidRequest {
            message: format!("'{}' is not a valid file or folder name.", name),
        });
    }
    Ok(name)
}

/// Extension in `.ext` form, empty when the name has none.
pub fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_default()
}

/// Split a file name into stem and `.ext` at the last dot.
///
/// A leading dot (`.env`) is part of the stem, not an extension separator.
pub fn split_file_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(index) if index > 0 => (&name[..index], &name[index..]),
        _ => (name, ""),
    }
}
