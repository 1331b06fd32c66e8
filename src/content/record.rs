//! Indexed content records

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::Metadata;

/// Which directory family a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Blog,
    Page,
}

impl ContentKind {
    pub const ALL: [ContentKind; 2] = [ContentKind::Blog, ContentKind::Page];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Blog => "blog",
            ContentKind::Page => "page",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blog" => Ok(ContentKind::Blog),
            "page" => Ok(ContentKind::Page),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

/// One indexed markdown file
///
/// Records are immutable once built; a change on disk produces a new record
/// that replaces the old one wholesale.
#[derive(Debug, Clone, Serialize)]
pub struct ContentRecord {
    /// Index key, derived from the file name
    pub slug: String,

    pub kind: ContentKind,

    /// Title from front matter, or the file stem
    pub title: String,

    /// Publication date
    pub date: DateTime<Local>,

    /// Position within its kind, ascending
    pub order: i64,

    pub published: bool,

    /// Absolute path of the backing file
    pub source_path: PathBuf,

    /// Full front matter, in file order
    pub metadata: Metadata,

    /// Raw markdown body
    #[serde(skip)]
    pub body: String,
}

impl ContentRecord {
    /// Sort key used by the render path: order ascending, newest first
    pub fn listing_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| other.date.cmp(&self.date))
            .then_with(|| self.slug.cmp(&other.slug))
    }
}
