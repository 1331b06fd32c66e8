//! folio-rs: a file-backed markdown content server
//!
//! Markdown files under the content directory are the source of truth. They
//! are indexed in memory, kept in step by a filesystem watcher, served as
//! HTML, and mutated through the admin path.

pub mod admin;
pub mod config;
pub mod content;
pub mod helpers;
pub mod index;
pub mod server;
pub mod watcher;

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::admin::Admin;
use crate::content::MarkdownRenderer;
use crate::index::{ContentDirs, ContentIndex};

/// A site rooted at a base directory
#[derive(Debug, Clone)]
pub struct Site {
    /// Site configuration
    pub config: config::SiteConfig,
    /// Base directory
    pub base_dir: PathBuf,
    /// Blog and pages directories
    pub content_dirs: ContentDirs,
    /// Files served under /static
    pub static_dir: PathBuf,
}

impl Site {
    /// Open a site, reading `_config.yml` when present
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let config_path = base_dir.join("_config.yml");

        let config = if config_path.exists() {
            config::SiteConfig::load(&config_path)?
        } else {
            config::SiteConfig::default()
        };

        let content_dirs = ContentDirs::new(
            base_dir.join(&config.content_dir),
            &config.blog_dir,
            &config.pages_dir,
        );
        let static_dir = base_dir.join(&config.static_dir);

        Ok(Self {
            config,
            base_dir,
            content_dirs,
            static_dir,
        })
    }

    /// Markdown renderer using the configured highlight settings
    pub fn renderer(&self) -> MarkdownRenderer {
        MarkdownRenderer::with_options(
            &self.config.highlight.theme,
            self.config.highlight.line_number,
        )
    }

    /// Build the index and run the initial scan
    pub fn open_index(&self) -> Arc<ContentIndex> {
        let index = Arc::new(ContentIndex::new(self.content_dirs.clone()));
        index.initialize();
        index
    }

    /// Admin path over `index`
    pub fn admin(&self, index: Arc<ContentIndex>) -> Admin {
        Admin::new(index, Arc::new(self.renderer()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_site_defaults_without_config() {
        let temp = TempDir::new().unwrap();
        let site = Site::new(temp.path()).unwrap();
        assert_eq!(site.config.title, "Folio");
        assert!(site.content_dirs.blog.ends_with("content/blog"));
        assert!(site.content_dirs.pages.ends_with("content/pages"));
        assert!(site.static_dir.ends_with("static"));
    }

    #[test]
    fn test_site_reads_config() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("_config.yml"),
            "title: Notes\ncontent_dir: site\nblog_dir: posts\n",
        )
        .unwrap();
        let content = temp.path().join("site").join("posts");
        fs::create_dir_all(&content).unwrap();
        fs::write(content.join("a.md"), "---\ntitle: A\n---\nBody\n").unwrap();

        let site = Site::new(temp.path()).unwrap();
        assert_eq!(site.config.title, "Notes");
        assert!(site.content_dirs.blog.ends_with("site/posts"));

        let index = site.open_index();
        assert_eq!(index.len(), 1);
        assert!(index.get_by_slug("a").is_some());
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("_config.yml"), "title: [broken\n").unwrap();
        assert!(Site::new(temp.path()).is_err());
    }
}
