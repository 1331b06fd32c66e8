//! In-memory content index
//!
//! Mirrors the blog and pages directories as a slug → record map. Every
//! mutation parses first and then swaps a whole `Arc<ContentRecord>` in
//! under the write lock, so readers only ever see complete records.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use walkdir::WalkDir;

use crate::content::loader::{is_ignored_file, is_markdown_file};
use crate::content::{load_record, slug, ContentKind, ContentRecord};

/// Capacity of the change notification channel
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// The two watched content directories under a common root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDirs {
    pub root: PathBuf,
    pub blog: PathBuf,
    pub pages: PathBuf,
}

impl ContentDirs {
    /// Resolve the directories under `root`
    ///
    /// The root is canonicalized when it exists so that paths reported by the
    /// watcher compare equal to paths found by the scanner.
    pub fn new<P: AsRef<Path>>(root: P, blog_dir: &str, pages_dir: &str) -> Self {
        let root = root.as_ref();
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        Self {
            blog: root.join(blog_dir),
            pages: root.join(pages_dir),
            root,
        }
    }

    pub fn dir_for(&self, kind: ContentKind) -> &Path {
        match kind {
            ContentKind::Blog => &self.blog,
            ContentKind::Page => &self.pages,
        }
    }

    /// Kind of the directory that directly contains `path`
    pub fn kind_of(&self, path: &Path) -> Option<ContentKind> {
        let parent = path.parent()?;
        ContentKind::ALL
            .into_iter()
            .find(|kind| self.dir_for(*kind) == parent)
    }
}

/// Notification sent after the index changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexChange {
    Reindexed,
    Upserted(String),
    Removed(String),
}

/// Result of a full directory scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Records in the index after the scan
    pub indexed: usize,
    /// Files that failed to parse
    pub skipped: Vec<PathBuf>,
    /// Files whose slug replaced an earlier file's entry
    pub collisions: usize,
    /// Configured directories that do not exist
    pub missing_dirs: Vec<PathBuf>,
}

/// Slug → record map kept in step with the content directories
pub struct ContentIndex {
    dirs: ContentDirs,
    entries: RwLock<HashMap<String, Arc<ContentRecord>>>,
    changes: broadcast::Sender<IndexChange>,
}

impl ContentIndex {
    /// Create an empty index; call [`ContentIndex::initialize`] to fill it
    pub fn new(dirs: ContentDirs) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            dirs,
            entries: RwLock::new(HashMap::new()),
            changes,
        }
    }

    pub fn dirs(&self) -> &ContentDirs {
        &self.dirs
    }

    /// Rebuild the index from disk
    ///
    /// Blog files are scanned before pages; on a slug collision the later
    /// file wins. A file that fails to parse is logged and skipped. The new
    /// map replaces the old one in a single step.
    pub fn initialize(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let mut fresh: HashMap<String, Arc<ContentRecord>> = HashMap::new();

        for kind in ContentKind::ALL {
            let dir = self.dirs.dir_for(kind);
            if !dir.is_dir() {
                tracing::warn!("Content directory {:?} not found, skipping", dir);
                report.missing_dirs.push(dir.to_path_buf());
                continue;
            }

            for path in markdown_files(dir) {
                match load_record(&path, kind) {
                    Ok(record) => {
                        let record = Arc::new(record);
                        if let Some(previous) = fresh.insert(record.slug.clone(), record.clone()) {
                            tracing::warn!(
                                "Slug {:?} from {:?} overwrites {:?}",
                                record.slug,
                                record.source_path,
                                previous.source_path
                            );
                            report.collisions += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {:?}: {}", path, e);
                        report.skipped.push(path);
                    }
                }
            }
        }

        report.indexed = fresh.len();
        *self.write() = fresh;

        tracing::info!(
            "Indexed {} entries ({} skipped)",
            report.indexed,
            report.skipped.len()
        );
        let _ = self.changes.send(IndexChange::Reindexed);

        report
    }

    /// Published records of `kind`, by order ascending then newest first
    pub fn entries(&self, kind: ContentKind) -> Vec<Arc<ContentRecord>> {
        let mut entries: Vec<_> = self
            .read()
            .values()
            .filter(|r| r.kind == kind && r.published)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.listing_cmp(b));
        entries
    }

    /// Exact lookup, including unpublished records
    pub fn get_by_slug(&self, slug: &str) -> Option<Arc<ContentRecord>> {
        self.read().get(slug).cloned()
    }

    /// Every record, grouped by kind in listing order
    pub fn all(&self) -> Vec<Arc<ContentRecord>> {
        let mut entries: Vec<_> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.kind
                .as_str()
                .cmp(b.kind.as_str())
                .then_with(|| a.listing_cmp(b))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// (Re)index the file at `path`
    ///
    /// The kind hint comes from the directory holding the file. Paths
    /// outside both content directories are ignored.
    pub fn upsert(&self, path: &Path) -> Option<Arc<ContentRecord>> {
        let Some(hint) = self.dirs.kind_of(path) else {
            tracing::warn!("Ignoring {:?}: not inside a content directory", path);
            return None;
        };
        self.upsert_with_hint(path, hint)
    }

    /// (Re)index the file at `path`, using `hint` when it declares no type
    ///
    /// If the file no longer parses, any entry previously loaded from it is
    /// dropped so the index only holds parseable files.
    pub fn upsert_with_hint(&self, path: &Path, hint: ContentKind) -> Option<Arc<ContentRecord>> {
        let record = match load_record(path, hint) {
            Ok(record) => Arc::new(record),
            Err(e) => {
                tracing::warn!("Skipping {:?}: {}", path, e);
                self.remove(path);
                return None;
            }
        };

        let previous = self
            .write()
            .insert(record.slug.clone(), Arc::clone(&record));

        if let Some(previous) = previous {
            if previous.source_path != record.source_path {
                tracing::warn!(
                    "Slug {:?} from {:?} overwrites {:?}",
                    record.slug,
                    record.source_path,
                    previous.source_path
                );
            }
        }

        tracing::debug!("Indexed {:?} as {:?}", path, record.slug);
        let _ = self.changes.send(IndexChange::Upserted(record.slug.clone()));
        Some(record)
    }

    /// Drop the entry backed by `path`
    ///
    /// Returns whether an entry was removed. Removing an absent path is not
    /// an error, since an admin delete and the watcher's unlink event can
    /// both arrive for the same file. An entry under the same slug that
    /// belongs to a different file is left alone.
    pub fn remove(&self, path: &Path) -> bool {
        let slug = slug::from_path(path);

        let removed = {
            let mut entries = self.write();
            let owned = entries
                .get(&slug)
                .map_or(false, |existing| existing.source_path == path);
            if owned {
                entries.remove(&slug);
            }
            owned
        };

        if removed {
            tracing::debug!("Removed {:?} ({:?})", slug, path);
            let _ = self.changes.send(IndexChange::Removed(slug.clone()));
            self.restore_shadowed(&slug, path);
        }
        removed
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<IndexChange> {
        self.changes.subscribe()
    }

    /// Re-index another file that maps to `slug` after the winner went away
    fn restore_shadowed(&self, slug: &str, removed: &Path) {
        for kind in ContentKind::ALL {
            let dir = self.dirs.dir_for(kind);
            if !dir.is_dir() {
                continue;
            }
            let candidate = markdown_files(dir)
                .into_iter()
                .find(|p| p.as_path() != removed && slug::from_path(p) == slug);
            if let Some(candidate) = candidate {
                tracing::info!("Restoring {:?} for slug {:?}", candidate, slug);
                if self.upsert_with_hint(&candidate, kind).is_some() {
                    return;
                }
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ContentRecord>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ContentRecord>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Markdown files directly inside `dir`, sorted by name
fn markdown_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && is_markdown_file(p) && !is_ignored_file(p))
        .collect()
}
