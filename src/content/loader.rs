//! Content loader - turns one markdown file into a record

use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::ParseError;
use super::{slug, ContentKind, ContentRecord, FrontMatter};

/// A file split into front matter and body
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub path: PathBuf,
    pub front_matter: FrontMatter,
    pub body: String,
}

/// Read and split a content file
pub fn parse_file(path: &Path) -> Result<ParsedFile, ParseError> {
    let content = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let (front_matter, body) = FrontMatter::parse(&content)?;

    Ok(ParsedFile {
        path: path.to_path_buf(),
        front_matter,
        body: body.to_string(),
    })
}

/// Load a single record from a file
///
/// `hint` is the kind of the directory the file was found in; it is used
/// when the front matter has no usable `type`.
pub fn load_record(path: &Path, hint: ContentKind) -> Result<ContentRecord, ParseError> {
    let slug = slug::from_path(path);
    if slug.is_empty() {
        return Err(ParseError::EmptySlug {
            path: path.to_path_buf(),
        });
    }

    let parsed = parse_file(path)?;
    let fm = parsed.front_matter;

    let kind = fm.kind().unwrap_or_else(|| {
        if let Some(raw) = fm.raw_type() {
            tracing::debug!("Unknown type {:?} in {:?}, using {}", raw, path, hint);
        }
        hint
    });

    // Fall back to the time the file was last written
    let date = fm.parse_date().unwrap_or_else(|| {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map(chrono::DateTime::<Local>::from)
            .unwrap_or_else(|_| Local::now())
    });

    let title = fm.title().map(str::to_string).unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Untitled")
            .to_string()
    });

    Ok(ContentRecord {
        slug,
        kind,
        title,
        date,
        order: fm.order().unwrap_or(0),
        published: fm.published(),
        source_path: path.to_path_buf(),
        body: parsed.body,
        metadata: fm.metadata,
    })
}

/// Check if a file is a markdown file
pub fn is_markdown_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e == "md")
        .unwrap_or(false)
}

/// Editor swap files, backups and dotfiles
pub fn is_ignored_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    name.starts_with('.') || name.ends_with('~') || name.starts_with('#')
}
