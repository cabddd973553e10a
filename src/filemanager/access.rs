//! Declarative path-pattern access rules.
//!
//! A rule document names a role and an ordered list of rules. Every rule
//! whose pattern matches an entry recomputes the whole capability set, so
//! the last matching rule in file order decides. No document at all means
//! the tenant is unrestricted.

use std::fmt;
use std::path::Path;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::protocol::FileManagerError;

use super::path_utils::{split_file_name, VirtualPath};

/// A single flag value in a rule. Absent flags allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

impl<'de> Deserialize<'de> for Access {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Word(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(Access::Allow),
            Raw::Flag(false) => Ok(Access::Deny),
            Raw::Word(word) if word.eq_ignore_ascii_case("allow") => Ok(Access::Allow),
            Raw::Word(word) if word.eq_ignore_ascii_case("deny") => Ok(Access::Deny),
            Raw::Word(word) => Err(D::Error::custom(format!(
                "unknown access value `{}`, expected allow or deny",
                word
            ))),
        }
    }
}

fn permits(flag: Option<Access>) -> bool {
    !matches!(flag, Some(Access::Deny))
}

/// One rule as written in the rules document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub read: Option<Access>,
    #[serde(default)]
    pub write: Option<Access>,
    #[serde(default)]
    pub write_contents: Option<Access>,
    #[serde(default)]
    pub copy: Option<Access>,
    #[serde(default)]
    pub download: Option<Access>,
    #[serde(default)]
    pub upload: Option<Access>,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessRulesDocument {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub rules: Vec<AccessRule>,
}

/// Structural form of a rule path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RulePattern {
    /// `dir/*.*`: any file at or below `dir`
    AnyFile { dir: Vec<String> },
    /// `dir/*.ext`: files at or below `dir` with extension `ext` (lowercase, no dot)
    Extension { dir: Vec<String>, extension: String },
    /// `dir/name.*`: files at or below `dir` whose stem is `stem`
    BaseName { dir: Vec<String>, stem: String },
    /// Literal file path
    File { path: Vec<String> },
    /// Directory path containing `*`: string prefix of `/a/b` style paths
    DirectoryPrefix { prefix: String },
    /// Literal directory path; strict descendants get a write-only downgrade
    Directory { path: Vec<String> },
}

/// How a rule applies to a candidate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleMatch {
    Full,
    DescendantWrite,
    None,
}

fn components(raw: &str) -> Vec<String> {
    VirtualPath::parse(raw).components().to_vec()
}

fn lowercase_extension(name: &str) -> String {
    split_file_name(name)
        .1
        .trim_start_matches('.')
        .to_lowercase()
}

impl RulePattern {
    /// Returns `None` for rules that can never match (file rules need a path).
    pub fn parse(raw: Option<&str>, is_file: bool) -> Option<Self> {
        let raw = raw?;
        if is_file {
            if raw.is_empty() {
                return None;
            }
            if let Some(index) = raw.find("*.*") {
                return Some(RulePattern::AnyFile {
                    dir: components(&raw[..index]),
                });
            }
            if let Some(index) = raw.find("*.") {
                // Entries are compared on their last extension only.
                let suffix = &raw[index + 2..];
                let extension = suffix.rsplit('.').next().unwrap_or(suffix).to_lowercase();
                return Some(RulePattern::Extension {
                    dir: components(&raw[..index]),
                    extension,
                });
            }
            if let Some(stripped) = raw.strip_suffix(".*") {
                let (dir, stem) = match stripped.rfind(['/', '\\']) {
                    Some(index) => (&stripped[..index], &stripped[index + 1..]),
                    None => ("", stripped),
                };
                return Some(RulePattern::BaseName {
                    dir: components(dir),
                    stem: stem.to_string(),
                });
            }
            return Some(RulePattern::File {
                path: components(raw),
            });
        }

        if let Some(index) = raw.find('*') {
            let prefix = raw[..index].replace('\\', "/");
            let prefix = if prefix.is_empty() || prefix.starts_with('/') {
                prefix
            } else {
                format!("/{}", prefix)
            };
            return Some(RulePattern::DirectoryPrefix { prefix });
        }
        Some(RulePattern::Directory {
            path: components(raw),
        })
    }

    fn matches(&self, candidate: &Candidate<'_>) -> RuleMatch {
        let hit = |matched: bool| if matched { RuleMatch::Full } else { RuleMatch::None };
        match self {
            RulePattern::AnyFile { dir } => hit(candidate.dir.starts_with(dir)),
            RulePattern::Extension { dir, extension } => hit(
                candidate.dir.starts_with(dir) && lowercase_extension(candidate.name) == *extension,
            ),
            RulePattern::BaseName { dir, stem } => hit(
                candidate.dir.starts_with(dir) && split_file_name(candidate.name).0 == stem.as_str(),
            ),
            RulePattern::File { path } => hit(candidate.full_path() == *path),
            RulePattern::DirectoryPrefix { prefix } => {
                hit(prefix.is_empty() || candidate.display().starts_with(prefix.as_str()))
            }
            RulePattern::Directory { path } => {
                let full = candidate.full_path();
                if full == *path {
                    RuleMatch::Full
                } else if full.len() > path.len() && full.starts_with(path) {
                    RuleMatch::DescendantWrite
                } else {
                    RuleMatch::None
                }
            }
        }
    }
}

/// The entry a permission is being computed for.
struct Candidate<'a> {
    dir: &'a [String],
    name: &'a str,
}

impl Candidate<'_> {
    fn full_path(&self) -> Vec<String> {
        let mut full = self.dir.to_vec();
        if !self.name.is_empty() {
            full.push(self.name.to_string());
        }
        full
    }

    fn display(&self) -> String {
        format!("/{}", self.full_path().join("/"))
    }
}

/// Resolved capability set for one entry.
///
/// Every capability other than `read` is computed as `read && flag`, so
/// none of them can be true while `read` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermission {
    pub read: bool,
    pub write: bool,
    pub write_contents: bool,
    pub copy: bool,
    pub download: bool,
    pub upload: bool,
    pub message: String,
}

impl EffectivePermission {
    pub fn allow_all() -> Self {
        Self {
            read: true,
            write: true,
            write_contents: true,
            copy: true,
            download: true,
            upload: true,
            message: String::new(),
        }
    }

    fn from_rule(rule: &AccessRule) -> Self {
        let read = permits(rule.read);
        Self {
            read,
            write: read && permits(rule.write),
            write_contents: read && permits(rule.write_contents),
            copy: read && permits(rule.copy),
            download: read && permits(rule.download),
            upload: read && permits(rule.upload),
            message: rule.message.clone().unwrap_or_default(),
        }
    }

    fn downgrade_writes(&mut self, rule: &AccessRule) {
        let allowed = self.read && permits(rule.write_contents);
        self.write = allowed;
        self.write_contents = allowed;
        self.message = rule.message.clone().unwrap_or_default();
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.read
            && match capability {
                Capability::Read => true,
                Capability::Write => self.write,
                Capability::WriteContents => self.write_contents,
                Capability::Copy => self.copy,
                Capability::Download => self.download,
                Capability::Upload => self.upload,
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Read,
    Write,
    WriteContents,
    Copy,
    Download,
    Upload,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::WriteContents => "writeContents",
            Capability::Copy => "copy",
            Capability::Download => "download",
            Capability::Upload => "upload",
        };
        f.write_str(name)
    }
}

/// Effective permission of an entry, or the unrestricted sentinel.
///
/// Serialized as `null` when unrestricted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "Option<EffectivePermission>",
    into = "Option<EffectivePermission>"
)]
pub enum Permission {
    Unrestricted,
    Restricted(EffectivePermission),
}

impl From<Option<EffectivePermission>> for Permission {
    fn from(value: Option<EffectivePermission>) -> Self {
        value.map_or(Permission::Unrestricted, Permission::Restricted)
    }
}

impl From<Permission> for Option<EffectivePermission> {
    fn from(value: Permission) -> Self {
        match value {
            Permission::Unrestricted => None,
            Permission::Restricted(permission) => Some(permission),
        }
    }
}

impl Permission {
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Permission::Unrestricted)
    }

    pub fn allows(&self, capability: Capability) -> bool {
        match self {
            Permission::Unrestricted => true,
            Permission::Restricted(permission) => permission.has(capability),
        }
    }

    pub fn can_read(&self) -> bool {
        self.allows(Capability::Read)
    }

    /// Fail with the rule's message, or the default one naming `name`.
    pub fn require(&self, capability: Capability, name: &str) -> Result<(), FileManagerError> {
        if self.allows(capability) {
            return Ok(());
        }
        let message = match self {
            Permission::Restricted(permission) if !permission.message.is_empty() => {
                permission.message.clone()
            }
            _ => format!(
                "{} is not accessible. You need permission to perform the {} action.",
                name, capability
            ),
        };
        Err(FileManagerError::PermissionDenied { message })
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: AccessRule,
    pattern: Option<RulePattern>,
}

/// Loaded rule list plus the role it is evaluated for.
#[derive(Debug, Clone)]
pub struct AccessRuleSet {
    role: Option<String>,
    rules: Vec<CompiledRule>,
}

impl AccessRuleSet {
    /// Load the rules document. `Ok(None)` means unrestricted.
    pub fn load(path: &Path) -> Result<Option<Self>, FileManagerError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(FileManagerError::IoError {
                    message: format!("Failed to read access rules {}: {}", path.display(), e),
                })
            }
        };
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Option<Self>, FileManagerError> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let document: AccessRulesDocument =
            serde_json::from_str(raw).map_err(|e| FileManagerError::IoError {
                message: format!("Access rules are malformed: {}", e),
            })?;
        Ok(Self::from_document(document))
    }

    pub fn from_document(document: AccessRulesDocument) -> Option<Self> {
        if document.rules.len() == 1 && document.rules[0].path.is_none() {
            return None;
        }
        let rules = document
            .rules
            .into_iter()
            .map(|rule| CompiledRule {
                pattern: RulePattern::parse(rule.path.as_deref(), rule.is_file),
                rule,
            })
            .collect();
        Some(Self {
            role: document.role,
            rules,
        })
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    fn applies_to_role(&self, rule: &AccessRule) -> bool {
        match &rule.role {
            None => true,
            Some(role) => self.role.as_deref() == Some(role.as_str()),
        }
    }

    /// Evaluate the entry `name` inside directory `dir`.
    ///
    /// The sandbox root itself is addressed with the root `dir` and an
    /// empty `name`.
    pub fn evaluate(&self, dir: &VirtualPath, name: &str, is_file: bool) -> EffectivePermission {
        let candidate = Candidate {
            dir: dir.components(),
            name,
        };
        let mut permission = EffectivePermission::allow_all();
        for compiled in &self.rules {
            let rule = &compiled.rule;
            if rule.is_file != is_file || !self.applies_to_role(rule) {
                continue;
            }
            let Some(pattern) = &compiled.pattern else {
                continue;
            };
            match pattern.matches(&candidate) {
                RuleMatch::Full => permission = EffectivePermission::from_rule(rule),
                RuleMatch::DescendantWrite => permission.downgrade_writes(rule),
                RuleMatch::None => {}
            }
        }
        permission
    }
}

/// Effective permission for the entry at `path`.
pub fn evaluate(rules: Option<&AccessRuleSet>, path: &VirtualPath, is_file: bool) -> Permission {
    let Some(rules) = rules else {
        return Permission::Unrestricted;
    };
    let dir = path.parent().unwrap_or_default();
    let name = path.name().unwrap_or("");
    Permission::Restricted(rules.evaluate(&dir, name, is_file))
}
