use std::collections::HashMap;

use walkdir::WalkDir;

use crate::protocol::{Entry, FileManagerError};

use super::access::Capability;
use super::catalog::DirectoryCatalog;
use super::path_utils::VirtualPath;
use super::{blocking, RequestContext};

/// Name filter derived from where `*` appears in the search string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchPattern {
    Contains(String),
    Prefix(String),
    Suffix(String),
}

impl SearchPattern {
    pub fn parse(raw: &str) -> Self {
        let literal = raw.replace('*', "");
        if raw.starts_with('*') && raw.ends_with('*') {
            SearchPattern::Contains(literal)
        } else if raw.ends_with('*') {
            SearchPattern::Prefix(literal)
        } else {
            SearchPattern::Suffix(literal)
        }
    }

    fn literal(&self) -> &str {
        match self {
            SearchPattern::Contains(s) | SearchPattern::Prefix(s) | SearchPattern::Suffix(s) => s,
        }
    }

    fn test(&self, name: &str, literal: &str) -> bool {
        match self {
            SearchPattern::Contains(_) => name.contains(literal),
            SearchPattern::Prefix(_) => name.starts_with(literal),
            SearchPattern::Suffix(_) => name.ends_with(literal),
        }
    }

    /// Case-insensitive mode only tries the all-lowercase and all-uppercase
    /// forms of the literal; the name itself is not folded.
    pub fn matches(&self, name: &str, case_sensitive: bool) -> bool {
        let literal = self.literal();
        if case_sensitive {
            return self.test(name, literal);
        }
        self.test(name, &literal.to_lowercase()) || self.test(name, &literal.to_uppercase())
    }
}

pub struct SearchEngine<'a> {
    ctx: &'a RequestContext,
}

impl<'a> SearchEngine<'a> {
    pub fn new(ctx: &'a RequestContext) -> Self {
        Self { ctx }
    }

    /// Recursive name search below `dir`. Returns the cwd entry and matches.
    ///
    /// A match is dropped when any directory between the root and the match
    /// denies read.
    pub async fn search(
        &self,
        dir: &VirtualPath,
        search_string: &str,
        case_sensitive: bool,
    ) -> Result<(Entry, Vec<Entry>), FileManagerError> {
        let catalog = DirectoryCatalog::new(self.ctx);
        let cwd = catalog.list_entry(dir).await?;
        cwd.permission.require(Capability::Read, &cwd.name)?;

        let pattern = SearchPattern::parse(search_string);
        let start = self.ctx.sandbox().resolve_existing(dir)?;
        let hits = blocking(move || walk_matches(&start, &pattern, case_sensitive)).await?;

        let limit = self.ctx.config().max_search_results;
        let mut readable: HashMap<VirtualPath, bool> = HashMap::new();
        let mut files = Vec::new();
        for native in hits {
            let Some(path) = self.ctx.sandbox().relative(&native) else {
                continue;
            };
            if !self.ancestors_readable(&path, &mut readable) {
                continue;
            }
            if files.len() >= limit {
                tracing::info!(
                    "Search in {} for {} stopped at {} results",
                    dir.display(),
                    self.ctx.sandbox().tenant(),
                    limit
                );
                break;
            }
            match catalog.list_entry(&path).await {
                Ok(entry) => files.push(entry),
                Err(e) => tracing::debug!("Skipping search hit {}: {}", path.display(), e),
            }
        }

        tracing::debug!(
            "Search {:?} in {} found {} entries",
            search_string,
            dir.display(),
            files.len()
        );
        Ok((cwd, files))
    }

    fn ancestors_readable(&self, path: &VirtualPath, cache: &mut HashMap<VirtualPath, bool>) -> bool {
        for ancestor in path.ancestors() {
            let allowed = *cache
                .entry(ancestor.clone())
                .or_insert_with(|| self.ctx.permission(&ancestor, false).can_read());
            if !allowed {
                return false;
            }
        }
        true
    }
}

fn walk_matches(
    start: &std::path::Path,
    pattern: &SearchPattern,
    case_sensitive: bool,
) -> Result<Vec<std::path::PathBuf>, FileManagerError> {
    let mut hits = Vec::new();
    let walker = WalkDir::new(start)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!("Search walk error: {}", e);
                continue;
            }
        };
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if pattern.matches(name, case_sensitive) {
            hits.push(entry.into_path());
        }
    }
    Ok(hits)
}
