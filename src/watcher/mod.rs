//! Filesystem watcher feeding the content index
//!
//! Native notifications for the blog and pages directories are translated
//! into [`RawEvent`]s and pushed through a bounded channel into a single
//! pipeline task. The task debounces per path and applies settled events to
//! the index. Tests push synthetic events through [`WatchHandle::injector`].

mod settle;

pub use settle::{FsEventKind, RawEvent, SettleQueue, SettleState};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::WatchConfig;
use crate::content::loader::is_ignored_file;
use crate::index::{ContentDirs, ContentIndex};

/// Errors that can occur with the watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Watch directory does not exist: {0:?}")]
    DirectoryNotFound(PathBuf),

    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Invalid watch pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

/// The `<dir>/*.md` patterns for both content directories
#[derive(Debug, Clone)]
pub struct WatchPatterns {
    patterns: Vec<glob::Pattern>,
}

impl WatchPatterns {
    pub fn new(dirs: &ContentDirs) -> Result<Self, WatcherError> {
        let patterns = [&dirs.blog, &dirs.pages]
            .into_iter()
            .map(|dir| {
                let escaped = glob::Pattern::escape(&dir.to_string_lossy());
                glob::Pattern::new(&format!("{}/*.md", escaped))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether a path is a markdown file directly inside a content directory
    pub fn matches(&self, path: &Path) -> bool {
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        !is_ignored_file(path)
            && self
                .patterns
                .iter()
                .any(|p| p.matches_path_with(path, options))
    }
}

/// Map a notify event onto raw per-path events
pub fn translate(event: &Event) -> Vec<RawEvent> {
    let kind = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // paths = [from, to]
            let mut events = Vec::new();
            if let Some(from) = event.paths.first() {
                events.push(RawEvent::new(from, FsEventKind::Removed));
            }
            if let Some(to) = event.paths.get(1) {
                events.push(RawEvent::new(to, FsEventKind::Added));
            }
            return events;
        }
        EventKind::Create(_) => FsEventKind::Added,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::Removed,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Added,
        EventKind::Modify(_) | EventKind::Any => FsEventKind::Changed,
        EventKind::Remove(_) => FsEventKind::Removed,
        EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };

    event
        .paths
        .iter()
        .map(|path| RawEvent::new(path, kind))
        .collect()
}

/// Keeps a [`ContentIndex`] in step with edits made outside the admin path
pub struct ChangeWatcher {
    index: Arc<ContentIndex>,
    quiet: Duration,
    capacity: usize,
}

impl ChangeWatcher {
    pub fn new(index: Arc<ContentIndex>, config: &WatchConfig) -> Self {
        Self {
            index,
            quiet: config.debounce(),
            capacity: config.queue_capacity.max(1),
        }
    }

    /// Start native watching of both content directories
    ///
    /// Files that already exist are not reported; the initial scan covers
    /// them. A missing directory is logged and skipped so the other one is
    /// still watched.
    pub fn start(&self) -> Result<WatchHandle, WatcherError> {
        let patterns = WatchPatterns::new(self.index.dirs())?;
        let (tx, rx) = mpsc::channel::<RawEvent>(self.capacity);
        let notify_tx = tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for raw in translate(&event) {
                        if !patterns.matches(&raw.path) {
                            continue;
                        }
                        // Runs on the notify thread, outside the runtime
                        if notify_tx.blocking_send(raw).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {}", e),
            }
        })?;

        let dirs = self.index.dirs();
        for dir in [&dirs.blog, &dirs.pages] {
            if !dir.is_dir() {
                tracing::warn!("{}", WatcherError::DirectoryNotFound(dir.clone()));
                continue;
            }
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => tracing::info!("Watching: {:?}", dir),
                Err(e) => tracing::error!("Failed to watch {:?}: {}", dir, e),
            }
        }

        Ok(self.spawn(Some(watcher), tx, rx))
    }

    /// Start the debounce pipeline without native notifications
    ///
    /// Events only arrive through [`WatchHandle::injector`].
    pub fn start_detached(&self) -> WatchHandle {
        let (tx, rx) = mpsc::channel::<RawEvent>(self.capacity);
        self.spawn(None, tx, rx)
    }

    fn spawn(
        &self,
        watcher: Option<RecommendedWatcher>,
        tx: mpsc::Sender<RawEvent>,
        rx: mpsc::Receiver<RawEvent>,
    ) -> WatchHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_pipeline(
            Arc::clone(&self.index),
            self.quiet,
            rx,
            stop_rx,
        ));

        WatchHandle {
            watcher,
            injector: tx,
            stop_tx,
            task,
        }
    }
}

/// Handle to control a running watcher
pub struct WatchHandle {
    watcher: Option<RecommendedWatcher>,
    injector: mpsc::Sender<RawEvent>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Sender feeding the same pipeline as the native watcher
    pub fn injector(&self) -> mpsc::Sender<RawEvent> {
        self.injector.clone()
    }

    /// Whether native notifications are attached
    pub fn is_native(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stop the watcher
    ///
    /// Closes native notifications first, then applies every queued or
    /// still-debouncing event before returning.
    pub async fn stop(self) {
        let WatchHandle {
            watcher,
            injector,
            stop_tx,
            task,
        } = self;

        drop(watcher);
        drop(injector);
        let _ = stop_tx.send(());

        if let Err(e) = task.await {
            tracing::error!("Watcher task failed: {}", e);
        }
        tracing::info!("Watcher stopped");
    }
}

async fn run_pipeline(
    index: Arc<ContentIndex>,
    quiet: Duration,
    mut rx: mpsc::Receiver<RawEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut queue = SettleQueue::new(quiet);

    loop {
        let deadline = queue.next_deadline();
        let wake = deadline
            .map(tokio::time::Instant::from_std)
            .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            // Fires on stop() and when the handle is dropped
            _ = &mut stop_rx => break,
            event = rx.recv() => match event {
                Some(event) => {
                    tracing::debug!("{:?} {:?}", event.kind, event.path);
                    queue.record(event, Instant::now());
                }
                None => break,
            },
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                apply_all(&index, queue.take_settled(Instant::now())).await;
            }
        }
    }

    while let Ok(event) = rx.try_recv() {
        queue.record(event, Instant::now());
    }
    let remaining = queue.drain();
    if !remaining.is_empty() {
        tracing::debug!("Flushing {} pending events", remaining.len());
    }
    apply_all(&index, remaining).await;
}

/// Apply settled events in order on the blocking pool
///
/// Indexing reads files and may rescan a directory, which must not stall
/// the runtime's worker threads.
async fn apply_all(index: &Arc<ContentIndex>, events: Vec<RawEvent>) {
    if events.is_empty() {
        return;
    }
    let index = Arc::clone(index);
    let applied = tokio::task::spawn_blocking(move || {
        for event in events {
            apply(&index, event);
        }
    })
    .await;
    if let Err(e) = applied {
        tracing::error!("Failed to apply watch events: {}", e);
    }
}

/// Apply a settled event, trusting the filesystem over the event kind
fn apply(index: &ContentIndex, event: RawEvent) {
    if event.path.is_file() {
        if event.kind == FsEventKind::Removed {
            tracing::debug!("{:?} was recreated before settling", event.path);
        }
        if let Some(record) = index.upsert(&event.path) {
            tracing::info!("Updated {:?} from {:?}", record.slug, event.path);
        }
    } else if index.remove(&event.path) {
        tracing::info!("Removed {:?}", event.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentKind;
    use crate::index::IndexChange;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ContentIndex>) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("blog")).unwrap();
        fs::create_dir_all(temp.path().join("pages")).unwrap();
        let index = Arc::new(ContentIndex::new(ContentDirs::new(
            temp.path(),
            "blog",
            "pages",
        )));
        index.initialize();
        (temp, index)
    }

    fn config(debounce_ms: u64) -> WatchConfig {
        WatchConfig {
            enable: true,
            debounce_ms,
            queue_capacity: 16,
        }
    }

    const HELLO: &str = "---\ntitle: \"Hello\"\ntype: blog\norder: 1\npublished: true\n---\nHi\n";

    async fn wait_for<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        condition()
    }

    #[test]
    fn test_translate_kinds() {
        let path = PathBuf::from("/c/blog/a.md");
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path(path.clone());
        assert_eq!(
            translate(&created),
            vec![RawEvent::new(&path, FsEventKind::Added)]
        );

        let modified = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(path.clone());
        assert_eq!(translate(&modified)[0].kind, FsEventKind::Changed);

        let removed = Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.clone());
        assert_eq!(translate(&removed)[0].kind, FsEventKind::Removed);

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(path.clone());
        assert!(translate(&access).is_empty());
    }

    #[test]
    fn test_translate_rename_both() {
        let from = PathBuf::from("/c/blog/.a.md.tmp");
        let to = PathBuf::from("/c/blog/a.md");
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());
        assert_eq!(
            translate(&event),
            vec![
                RawEvent::new(&from, FsEventKind::Removed),
                RawEvent::new(&to, FsEventKind::Added),
            ]
        );
    }

    #[test]
    fn test_patterns() {
        let dirs = ContentDirs::new("/srv/site [x]", "blog", "pages");
        let patterns = WatchPatterns::new(&dirs).unwrap();
        assert!(patterns.matches(&dirs.blog.join("a.md")));
        assert!(patterns.matches(&dirs.pages.join("about.md")));
        assert!(!patterns.matches(&dirs.blog.join("a.txt")));
        assert!(!patterns.matches(&dirs.blog.join("nested").join("a.md")));
        assert!(!patterns.matches(&dirs.blog.join(".a.md")));
        assert!(!patterns.matches(&dirs.blog.join("a.md~")));
        assert!(!patterns.matches(&dirs.root.join("a.md")));
    }

    #[tokio::test]
    async fn test_injected_events_reach_index() {
        let (_temp, index) = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&index), &config(50));
        let handle = watcher.start_detached();
        let injector = handle.injector();

        let path = index.dirs().blog.join("2025-01-01-hello.md");
        fs::write(&path, HELLO).unwrap();
        injector
            .send(RawEvent::new(&path, FsEventKind::Added))
            .await
            .unwrap();
        assert!(wait_for(|| index.get_by_slug("hello").is_some(), Duration::from_secs(2)).await);
        assert_eq!(index.get_by_slug("hello").unwrap().title, "Hello");

        fs::remove_file(&path).unwrap();
        injector
            .send(RawEvent::new(&path, FsEventKind::Removed))
            .await
            .unwrap();
        assert!(wait_for(|| index.get_by_slug("hello").is_none(), Duration::from_secs(2)).await);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_burst_is_applied_once_with_final_content() {
        let (_temp, index) = setup();
        let mut changes = index.subscribe();
        let watcher = ChangeWatcher::new(Arc::clone(&index), &config(200));
        let handle = watcher.start_detached();
        let injector = handle.injector();

        let path = index.dirs().blog.join("draft.md");
        for i in 0..5 {
            let text = format!("---\ntitle: \"v{}\"\ntype: blog\n---\nBody\n", i);
            fs::write(&path, text).unwrap();
            injector
                .send(RawEvent::new(&path, FsEventKind::Changed))
                .await
                .unwrap();
        }

        assert!(wait_for(|| index.get_by_slug("draft").is_some(), Duration::from_secs(2)).await);
        assert_eq!(index.get_by_slug("draft").unwrap().title, "v4");
        handle.stop().await;

        let mut upserts = 0;
        while let Ok(change) = changes.try_recv() {
            if matches!(change, crate::index::IndexChange::Upserted(_)) {
                upserts += 1;
            }
        }
        assert_eq!(upserts, 1);
    }

    #[tokio::test]
    async fn test_stop_flushes_pending_events() {
        let (_temp, index) = setup();
        // Long enough that only the flush can apply the event
        let watcher = ChangeWatcher::new(Arc::clone(&index), &config(60_000));
        let handle = watcher.start_detached();

        let path = index.dirs().pages.join("about.md");
        fs::write(&path, "---\ntitle: About\n---\nHi\n").unwrap();
        handle
            .injector()
            .send(RawEvent::new(&path, FsEventKind::Added))
            .await
            .unwrap();

        handle.stop().await;
        let record = index.get_by_slug("about").unwrap();
        assert_eq!(record.kind, ContentKind::Page);
    }

    #[tokio::test]
    async fn test_removed_event_for_existing_file_upserts() {
        let (_temp, index) = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&index), &config(20));
        let handle = watcher.start_detached();

        // Save-by-rename: the old inode goes away, the path comes back
        let path = index.dirs().blog.join("a.md");
        fs::write(&path, HELLO).unwrap();
        handle
            .injector()
            .send(RawEvent::new(&path, FsEventKind::Removed))
            .await
            .unwrap();

        handle.stop().await;
        assert!(index.get_by_slug("a").is_some());
    }

    #[tokio::test]
    async fn test_watcher_end_to_end() {
        let (_temp, index) = setup();
        let watcher = ChangeWatcher::new(Arc::clone(&index), &config(500));
        let handle = watcher.start().unwrap();
        assert!(handle.is_native());

        let path = index.dirs().blog.join("2025-01-01-hello.md");
        fs::write(&path, HELLO).unwrap();
        assert!(
            wait_for(|| index.get_by_slug("hello").is_some(), Duration::from_secs(5)).await,
            "external write never reached the index"
        );
        assert_eq!(index.get_by_slug("hello").unwrap().title, "Hello");

        fs::remove_file(&path).unwrap();
        assert!(
            wait_for(|| index.get_by_slug("hello").is_none(), Duration::from_secs(5)).await,
            "external delete never reached the index"
        );

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_existing_files_are_not_redelivered() {
        let (_temp, index) = setup();
        fs::write(index.dirs().blog.join("2025-01-01-hello.md"), HELLO).unwrap();
        fs::write(
            index.dirs().pages.join("about.md"),
            "---\ntitle: About\n---\nHi\n",
        )
        .unwrap();
        index.initialize();
        assert_eq!(index.len(), 2);

        let mut changes = index.subscribe();
        let handle = ChangeWatcher::new(Arc::clone(&index), &config(100))
            .start()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;
        handle.stop().await;

        let mut delivered = Vec::new();
        while let Ok(change) = changes.try_recv() {
            delivered.push(change);
        }
        assert!(
            !delivered
                .iter()
                .any(|change| matches!(change, IndexChange::Upserted(_))),
            "pre-existing files were re-indexed: {:?}",
            delivered
        );
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn test_start_with_missing_directory_still_watches_the_other() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("pages")).unwrap();
        let index = Arc::new(ContentIndex::new(ContentDirs::new(
            temp.path(),
            "blog",
            "pages",
        )));
        index.initialize();

        let handle = ChangeWatcher::new(Arc::clone(&index), &config(100))
            .start()
            .unwrap();

        let path = index.dirs().pages.join("contact.md");
        fs::write(&path, "---\ntitle: Contact\n---\nHi\n").unwrap();
        assert!(wait_for(|| index.get_by_slug("contact").is_some(), Duration::from_secs(5)).await);

        handle.stop().await;
    }
}
