//! Content module - markdown records, front matter, slugs and rendering

mod error;
mod frontmatter;
pub mod loader;
mod markdown;
mod record;
pub mod slug;
mod validate;

pub use error::ParseError;
pub use frontmatter::{parse_date_string, FrontMatter, Metadata};
pub use loader::{load_record, parse_file, ParsedFile};
pub use markdown::MarkdownRenderer;
pub use record::{ContentKind, ContentRecord};
pub use validate::{validate, ValidationReport};
