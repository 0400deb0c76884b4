//! HTML page templates for error responses and directory listings.
//!
//! Placeholders are plain `${NAME}` tokens. In the listing template, the
//! line containing `${ITEM.NAME}` is the row template: it is repeated once
//! per directory entry.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::http::{ProtocolError, SERVER_NAME};

const EMBEDDED_ERROR: &str = include_str!("../../assets/templates/error.html");
const EMBEDDED_LISTING: &str = include_str!("../../assets/templates/listing.html");

pub const ERROR_TEMPLATE_FILE: &str = "error.html";
pub const LISTING_TEMPLATE_FILE: &str = "listing.html";

/// Errors produced while loading templates.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One pre-formatted row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingItem {
    pub name: String,
    pub link: String,
    /// `/` for directories, empty otherwise.
    pub bs: String,
    pub modified: String,
    pub size: String,
    pub kind: String,
}

/// The error and listing page templates.
#[derive(Debug, Clone)]
pub struct Templates {
    error: String,
    listing: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self::embedded()
    }
}

impl Templates {
    /// The templates compiled into the binary.
    pub fn embedded() -> Self {
        Self::new(EMBEDDED_ERROR, EMBEDDED_LISTING)
    }

    pub fn new(error: impl Into<String>, listing: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            listing: listing.into(),
        }
    }

    /// Loads `error.html` and `listing.html` from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Read`] naming the first file that cannot be read.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(|source| TemplateError::Read { path, source })
        };
        Ok(Self::new(
            read(ERROR_TEMPLATE_FILE)?,
            read(LISTING_TEMPLATE_FILE)?,
        ))
    }

    /// Renders the error page for `error`.
    pub fn render_error(&self, error: &ProtocolError) -> String {
        let title = html_escape(&format!("{} - {}", error.code(), error.reason()));
        fill(&self.error, |token| match token {
            "TITLE" => Some(title.clone()),
            "SERVER" => Some(SERVER_NAME.to_owned()),
            _ => None,
        })
    }

    /// Renders the listing page for the directory at `path`.
    pub fn render_listing(&self, path: &str, items: &[ListingItem]) -> String {
        let path = html_escape(path);
        let title = format!("Index of {path}");
        let mut html = String::with_capacity(self.listing.len() + items.len() * 256);

        for line in self.listing.lines() {
            if line.contains("${ITEM.NAME}") {
                for item in items {
                    html.push_str(&render_item(line, item));
                    html.push('\n');
                }
                continue;
            }
            html.push_str(&fill(line, |token| match token {
                "TITLE" => Some(title.clone()),
                "PATH" => Some(path.clone()),
                "SERVER" => Some(SERVER_NAME.to_owned()),
                _ => None,
            }));
            html.push('\n');
        }
        html
    }
}

fn render_item(row: &str, item: &ListingItem) -> String {
    fill(row, |token| match token {
        "ITEM.NAME" => Some(html_escape(&item.name)),
        "ITEM.LINK" => Some(html_escape(&item.link)),
        "ITEM.BS" => Some(item.bs.clone()),
        "ITEM.MODIFIED" => Some(html_escape(&item.modified)),
        "ITEM.SIZE" => Some(html_escape(&item.size)),
        "ITEM.TYPE" => Some(html_escape(&item.kind)),
        _ => None,
    })
}

/// Replaces every `${NAME}` in `template` in a single pass.
///
/// Inserted values are never rescanned. Unknown tokens are kept as written.
fn fill(template: &str, value: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}').and_then(|end| Some((end, value(&after[..end])?))) {
            Some((end, text)) => {
                out.push_str(&text);
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escapes the five HTML special characters.
pub fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
