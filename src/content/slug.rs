//! Filename to URL-slug mapping
//!
//! The scanner, the watcher and the admin path all key the index through
//! [`from_path`], so every producer agrees on a file's slug.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref DATE_PREFIX: Regex = Regex::new(r"^(\d{4}-\d{2}-\d{2}-)+").unwrap();
    static ref NON_ALNUM: Regex = Regex::new(r"[^a-z0-9]+").unwrap();
}

/// Normalize arbitrary text into a slug
///
/// The date prefix is stripped after normalization so that the result never
/// starts with one, which keeps the function idempotent.
///
/// # Examples
/// ```ignore
/// slugify("2025-11-13-My Post!") // -> "my-post"
/// ```
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    let hyphenated = NON_ALNUM.replace_all(&lowered, "-");
    DATE_PREFIX
        .replace(hyphenated.trim_matches('-'), "")
        .into_owned()
}

/// Slug for a filename, with the `.md` extension stripped first
pub fn from_filename(name: &str) -> String {
    let stem = name
        .strip_suffix(".md")
        .or_else(|| name.strip_suffix(".markdown"))
        .unwrap_or(name);
    slugify(stem)
}

/// Slug for a path, derived from its file name only
pub fn from_path(path: &Path) -> String {
    path.file_name()
        .map(|name| from_filename(&name.to_string_lossy()))
        .unwrap_or_default()
}
