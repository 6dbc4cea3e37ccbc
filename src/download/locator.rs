//! Resolves which upstream file holds a month's snapshot.
//!
//! Upstream file names changed over time (regulation letters, best-of-3
//! tagging, long-form "regulation" spelling). Each convention is one
//! [`NamingTemplate`]; resolution walks the expanded candidates in priority
//! order and returns the first one that exists.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::error::{FetchError, PipelineError};
use crate::month::SnapshotMonth;

use super::client::{SnapshotFetcher, Transport};

/// One file-naming convention for format tags
#[derive(Debug, Clone, Copy)]
pub struct NamingTemplate {
    pub name: &'static str,
    /// `{gen}`, `{year}` and `{reg}` are substituted
    pub pattern: &'static str,
}

impl NamingTemplate {
    pub const fn new(name: &'static str, pattern: &'static str) -> Self {
        Self { name, pattern }
    }

    pub fn render(&self, generation: &str, year: i32, regulation: char) -> String {
        self.pattern
            .replace("{gen}", generation)
            .replace("{year}", &year.to_string())
            .replace("{reg}", &regulation.to_string())
    }
}

/// Newest convention first. New conventions are appended here.
pub const NAMING_TEMPLATES: &[NamingTemplate] = &[
    NamingTemplate::new("regulation-bo3", "{gen}vgc{year}reg{reg}bo3"),
    NamingTemplate::new("regulation-bo1", "{gen}vgc{year}reg{reg}"),
    NamingTemplate::new("regulation-long", "{gen}vgc{year}regulation{reg}"),
];

/// A resolved snapshot location
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub month: SnapshotMonth,
    /// Format tag, e.g. `gen9vgc2025regibo3`
    pub format: String,
    pub rating: u32,
    pub detail_url: String,
    pub ranking_url: String,
}

impl SourceRef {
    pub fn new(base_url: &str, month: SnapshotMonth, format: &str, rating: u32) -> Self {
        Self {
            month,
            format: format.to_string(),
            rating,
            detail_url: format!("{}/{}/chaos/{}", base_url, month, detail_file(format, rating)),
            ranking_url: format!("{}/{}/{}-{}.txt", base_url, month, format, rating),
        }
    }

    pub fn detail_file(&self) -> String {
        detail_file(&self.format, self.rating)
    }

    pub fn ranking_file(&self) -> String {
        format!("{}-{}.txt", self.format, self.rating)
    }
}

fn detail_file(format: &str, rating: u32) -> String {
    format!("{}-{}.json", format, rating)
}

/// Lowercase alphanumerics only, so `gen9vgc2025regi-bo3` == `gen9vgc2025regibo3`
pub fn normalize_tag(tag: &str) -> String {
    tag.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Candidate format tags for a month, in priority order.
///
/// Years: the month's own year, then the previous one (a format named for
/// year N stays current into early N+1). Regulation letters run z to a.
pub fn candidate_tags(generation: &str, month: SnapshotMonth, hint: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for year in [month.year(), month.year() - 1] {
        for template in NAMING_TEMPLATES {
            for regulation in ('a'..='z').rev() {
                out.push(template.render(generation, year, regulation));
            }
        }
    }

    if let Some(hint) = hint.map(normalize_tag).filter(|h| !h.is_empty()) {
        out.retain(|tag| normalize_tag(tag).contains(&hint));
        // An exact match outranks longer tags that merely contain the hint
        out.sort_by_key(|tag| normalize_tag(tag) != hint);
        // A full tag outside the known conventions is still worth one probe
        if out.is_empty() {
            out.push(hint);
        }
    }

    out
}

#[derive(Debug, Clone)]
enum DirIndex {
    Listed(HashSet<String>),
    /// The month directory itself does not exist
    Missing,
    /// No usable index page; fall back to per-file probes
    Unavailable,
}

/// Resolves (month, hint) to a [`SourceRef`], memoizing directory indexes
/// for the lifetime of the locator (one run).
pub struct SourceLocator<'a, T> {
    fetcher: &'a SnapshotFetcher<T>,
    indexes: RefCell<HashMap<String, DirIndex>>,
}

impl<'a, T: Transport> SourceLocator<'a, T> {
    pub fn new(fetcher: &'a SnapshotFetcher<T>) -> Self {
        Self {
            fetcher,
            indexes: RefCell::new(HashMap::new()),
        }
    }

    pub fn resolve(
        &self,
        month: SnapshotMonth,
        hint: Option<&str>,
    ) -> Result<SourceRef, PipelineError> {
        let config = self.fetcher.config();
        let candidates = candidate_tags(&config.generation, month, hint);
        let not_found = PipelineError::SourceNotFound {
            month,
            tried: candidates.len(),
        };

        let dir_url = format!("{}/{}/chaos/", config.base_url, month);
        let index = self.directory(&dir_url)?;
        if matches!(index, DirIndex::Missing) {
            debug!(url = %dir_url, "month directory not published");
            return Err(not_found);
        }

        let mut probe_error: Option<FetchError> = None;

        for tag in &candidates {
            let source = SourceRef::new(&config.base_url, month, tag, config.rating);

            let found = match &index {
                DirIndex::Missing => false,
                DirIndex::Listed(files) => files.contains(&source.detail_file()),
                DirIndex::Unavailable => match self.fetcher.exists(&source.detail_url) {
                    Ok(found) => found,
                    // Retries exhausted, stop probing
                    Err(e @ FetchError::Transport { .. }) => return Err(e.into()),
                    Err(e) => {
                        debug!(url = %source.detail_url, error = %e, "probe failed");
                        probe_error.get_or_insert(e);
                        false
                    }
                },
            };

            if found {
                info!(%month, format = %source.format, "resolved snapshot");
                return Ok(source);
            }
        }

        match probe_error {
            Some(e) => Err(PipelineError::Fetch(e)),
            None => Err(not_found),
        }
    }

    /// Transport failures are returned, not memoized
    fn directory(&self, url: &str) -> Result<DirIndex, FetchError> {
        if let Some(index) = self.indexes.borrow().get(url) {
            return Ok(index.clone());
        }

        let index = match self.fetcher.list_directory(url) {
            Ok(Some(files)) => DirIndex::Listed(files.into_iter().collect()),
            Ok(None) => DirIndex::Unavailable,
            Err(FetchError::NotFound(_)) => DirIndex::Missing,
            Err(e) => return Err(e),
        };

        self.indexes
            .borrow_mut()
            .insert(url.to_string(), index.clone());
        Ok(index)
    }
}
