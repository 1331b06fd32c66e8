//! Admin mutation path
//!
//! Every write goes to disk first and then straight into the index, so the
//! next read sees it without waiting for the watcher. The watcher will
//! usually report the same write a moment later; re-indexing an unchanged
//! file is harmless.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::content::{
    parse_file, slug, validate, ContentKind, ContentRecord, FrontMatter, MarkdownRenderer,
    Metadata, ParseError,
};
use crate::index::ContentIndex;

/// Errors returned to admin callers
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("no content with slug {0:?}")]
    NotFound(String),

    #[error("{0:?} already exists")]
    AlreadyExists(PathBuf),

    #[error("refusing to write outside the content root: {0:?}")]
    OutsideRoot(PathBuf),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0:?} was written but could not be indexed")]
    NotIndexed(PathBuf),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Containment check applied to every path the admin path writes
pub trait PathPolicy: Send + Sync {
    /// Return the path to write, or refuse it
    fn ensure_within(&self, root: &Path, candidate: &Path) -> Result<PathBuf, AdminError>;
}

/// Accept only paths whose directory resolves inside the root
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainedIn;

impl PathPolicy for ContainedIn {
    fn ensure_within(&self, root: &Path, candidate: &Path) -> Result<PathBuf, AdminError> {
        let outside = || AdminError::OutsideRoot(candidate.to_path_buf());

        let name = candidate.file_name().ok_or_else(outside)?;
        let parent = candidate
            .parent()
            .and_then(|p| fs::canonicalize(p).ok())
            .ok_or_else(outside)?;
        let root = fs::canonicalize(root).map_err(|_| outside())?;

        if parent.starts_with(&root) {
            Ok(parent.join(name))
        } else {
            Err(outside())
        }
    }
}

/// Fields for a new content file
#[derive(Debug, Clone, Deserialize)]
pub struct NewContent {
    pub title: String,
    pub kind: ContentKind,
    pub body: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default = "default_published")]
    pub published: bool,
    /// Defaults to today
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

fn default_published() -> bool {
    true
}

/// One entry of a reorder batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderItem {
    pub slug: String,
    pub order: i64,
}

/// Result for one reorder item
#[derive(Debug, Clone, Serialize)]
pub struct ReorderOutcome {
    pub slug: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-item results of a reorder batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReorderReport {
    pub results: Vec<ReorderOutcome>,
}

impl ReorderReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|r| r.ok)
    }
}

/// Create, edit, delete and reorder content
pub struct Admin {
    index: Arc<ContentIndex>,
    renderer: Arc<MarkdownRenderer>,
    policy: Box<dyn PathPolicy>,
}

impl Admin {
    pub fn new(index: Arc<ContentIndex>, renderer: Arc<MarkdownRenderer>) -> Self {
        Self {
            index,
            renderer,
            policy: Box::new(ContainedIn),
        }
    }

    /// Replace the containment policy
    pub fn with_policy(mut self, policy: impl PathPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Write a new file and index it
    ///
    /// Blog files are named `YYYY-MM-DD-<slug>.md`, pages `<slug>.md`.
    pub fn create(&self, content: NewContent) -> Result<Arc<ContentRecord>, AdminError> {
        let date = content.date.unwrap_or_else(|| Local::now().date_naive());
        let date = date.format("%Y-%m-%d").to_string();

        let mut metadata = Metadata::new();
        metadata.insert("title".into(), content.title.clone().into());
        metadata.insert("date".into(), date.clone().into());
        metadata.insert("type".into(), content.kind.as_str().into());
        metadata.insert("order".into(), content.order.into());
        metadata.insert("published".into(), content.published.into());
        let text = compose(&FrontMatter { metadata }, &content.body);

        self.ensure_valid(&text)?;

        let slug = slug::slugify(&content.title);
        if slug.is_empty() {
            return Err(AdminError::Validation(vec![
                "Title must contain at least one letter or digit".to_string(),
            ]));
        }

        let filename = match content.kind {
            ContentKind::Blog => format!("{}-{}.md", date, slug),
            ContentKind::Page => format!("{}.md", slug),
        };
        let dir = self.index.dirs().dir_for(content.kind).to_path_buf();
        let path = dir.join(filename);

        if let Some(existing) = self.index.get_by_slug(&slug) {
            return Err(AdminError::AlreadyExists(existing.source_path.clone()));
        }
        if path.exists() {
            return Err(AdminError::AlreadyExists(path));
        }

        fs::create_dir_all(&dir).map_err(|source| AdminError::Io {
            path: dir.clone(),
            source,
        })?;
        let path = self.write(&path, &text)?;

        tracing::info!("Created {:?}", path);
        self.index
            .upsert_with_hint(&path, content.kind)
            .ok_or(AdminError::NotIndexed(path))
    }

    /// Replace the full text of an existing file
    pub fn edit(&self, slug: &str, text: &str) -> Result<Arc<ContentRecord>, AdminError> {
        self.ensure_valid(text)?;

        let record = self
            .index
            .get_by_slug(slug)
            .ok_or_else(|| AdminError::NotFound(slug.to_string()))?;
        let path = self.write(&record.source_path, text)?;

        tracing::info!("Edited {:?}", path);
        self.index
            .upsert_with_hint(&path, record.kind)
            .ok_or(AdminError::NotIndexed(path))
    }

    /// Delete a file and drop it from the index
    ///
    /// A file that is already gone from disk still has its entry removed.
    pub fn delete(&self, slug: &str) -> Result<(), AdminError> {
        let record = self
            .index
            .get_by_slug(slug)
            .ok_or_else(|| AdminError::NotFound(slug.to_string()))?;
        let path = self
            .policy
            .ensure_within(&self.index.dirs().root, &record.source_path)?;

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("{:?} was already deleted", path);
            }
            Err(source) => return Err(AdminError::Io { path, source }),
        }

        self.index.remove(&record.source_path);
        tracing::info!("Deleted {:?}", path);
        Ok(())
    }

    /// Rewrite `order` for each item
    ///
    /// Items are independent: a failure is recorded in the report and the
    /// rest of the batch still runs.
    pub fn reorder(&self, items: &[ReorderItem]) -> ReorderReport {
        let results = items
            .iter()
            .map(|item| match self.reorder_one(item) {
                Ok(()) => ReorderOutcome {
                    slug: item.slug.clone(),
                    ok: true,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("Reorder of {:?} failed: {}", item.slug, e);
                    ReorderOutcome {
                        slug: item.slug.clone(),
                        ok: false,
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect();

        ReorderReport { results }
    }

    fn reorder_one(&self, item: &ReorderItem) -> Result<(), AdminError> {
        let record = self
            .index
            .get_by_slug(&item.slug)
            .ok_or_else(|| AdminError::NotFound(item.slug.clone()))?;

        // The file may have changed since it was indexed
        let parsed = parse_file(&record.source_path)?;
        let mut front_matter = parsed.front_matter;
        front_matter.set_order(item.order);
        let text = compose(&front_matter, &parsed.body);

        let path = self.write(&record.source_path, &text)?;
        self.index
            .upsert_with_hint(&path, record.kind)
            .map(|_| ())
            .ok_or(AdminError::NotIndexed(path))
    }

    fn ensure_valid(&self, text: &str) -> Result<(), AdminError> {
        let report = validate(text, &self.renderer);
        if report.valid {
            Ok(())
        } else {
            Err(AdminError::Validation(report.errors))
        }
    }

    /// Write through a temporary sibling and rename into place
    fn write(&self, path: &Path, text: &str) -> Result<PathBuf, AdminError> {
        let path = self.policy.ensure_within(&self.index.dirs().root, path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{}.tmp", name));

        let io_err = |source| AdminError::Io {
            path: path.clone(),
            source,
        };
        fs::write(&tmp, text).map_err(io_err)?;
        if let Err(source) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(io_err(source));
        }
        Ok(path)
    }
}

/// Front-matter block, a blank line, then the body
fn compose(front_matter: &FrontMatter, body: &str) -> String {
    let body = body.trim_start_matches(['\n', '\r']);
    let mut text = front_matter.to_block();
    text.push('\n');
    text.push_str(body);
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}
