//! Full-text validation used before any admin write

use serde::Serialize;

use super::{ContentKind, FrontMatter, MarkdownRenderer};

/// Outcome of validating a content file's text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validate a complete file (front matter plus body)
///
/// Every failed check is reported. Empty text and unparseable front matter
/// stop early since nothing after them can be checked.
pub fn validate(text: &str, renderer: &MarkdownRenderer) -> ValidationReport {
    if text.trim().is_empty() {
        return ValidationReport::from_errors(vec!["Content cannot be empty".to_string()]);
    }

    let (fm, body) = match FrontMatter::parse(text) {
        Ok(parsed) => parsed,
        Err(e) => {
            return ValidationReport::from_errors(vec![format!("Invalid front matter: {}", e)]);
        }
    };

    let mut errors = Vec::new();

    if fm.title().is_none() {
        errors.push("Title is required".to_string());
    }

    match fm.raw_type() {
        None => errors.push("Type is required (blog or page)".to_string()),
        Some(raw) if raw.parse::<ContentKind>().is_err() => {
            errors.push(format!("Type must be \"blog\" or \"page\", got {:?}", raw));
        }
        Some(_) => {}
    }

    if body.trim().is_empty() {
        errors.push("Body cannot be empty".to_string());
    } else if let Err(e) = renderer.render(body) {
        errors.push(format!("Markdown failed to render: {}", e));
    }

    ValidationReport::from_errors(errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_file() {
        let renderer = MarkdownRenderer::new();
        let report = validate("---\ntitle: Hi\ntype: blog\n---\nBody\n", &renderer);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_empty_content() {
        let renderer = MarkdownRenderer::new();
        let report = validate("  \n", &renderer);
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["Content cannot be empty"]);
    }

    #[test]
    fn test_bad_front_matter_stops_early() {
        let renderer = MarkdownRenderer::new();
        let report = validate("---\ntitle: [oops\n---\n", &renderer);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Invalid front matter"));
    }

    #[test]
    fn test_collects_every_error() {
        let renderer = MarkdownRenderer::new();
        let report = validate("---\ntitle: \"\"\ntype: news\n---\n\n", &renderer);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 3, "{:?}", report.errors);
        assert_eq!(report.errors[0], "Title is required");
        assert!(report.errors[1].contains("news"));
        assert_eq!(report.errors[2], "Body cannot be empty");
    }

    #[test]
    fn test_type_must_match_exactly() {
        let renderer = MarkdownRenderer::new();
        let report = validate("---\ntitle: Hi\ntype: \" BLOG \"\n---\nBody", &renderer);
        assert!(!report.valid);
        assert_eq!(
            report.errors,
            vec![r#"Type must be "blog" or "page", got " BLOG ""#]
        );
    }

    #[test]
    fn test_missing_type() {
        let renderer = MarkdownRenderer::new();
        let report = validate("---\ntitle: Hi\n---\nBody", &renderer);
        assert_eq!(report.errors, vec!["Type is required (blog or page)"]);
    }
}
