//! File-extension to content-type mapping.
//!
//! The table format is the classic `mime.types` layout: one
//! `<mime-type>\t<ext1> <ext2> ...` entry per line, `#` comments ignored.
//! A default table ships inside the binary.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Content type used when nothing else matches.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const EMBEDDED_TABLE: &str = include_str!("../../assets/mime.types");

/// Errors produced while loading a mime table.
#[derive(Debug, Error)]
pub enum MimeError {
    #[error("failed to read mime table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Immutable extension → content-type table.
///
/// # Examples
///
/// ```
/// use staticd::mime::MimeTypes;
///
/// let mime = MimeTypes::parse("text/html\thtml htm\n# comment\nimage/png\t\tpng\n");
/// assert_eq!(mime.lookup("/srv/www/index.HTML"), "text/html");
/// assert_eq!(mime.lookup("logo.png"), "image/png");
/// assert_eq!(mime.lookup("archive.unknown"), "application/octet-stream");
/// ```
#[derive(Debug, Clone)]
pub struct MimeTypes {
    map: HashMap<String, String>,
}

impl Default for MimeTypes {
    fn default() -> Self {
        Self::embedded()
    }
}

impl MimeTypes {
    /// The table compiled into the binary.
    pub fn embedded() -> Self {
        Self::parse(EMBEDDED_TABLE)
    }

    /// Reads a table from disk.
    ///
    /// # Errors
    ///
    /// Returns [`MimeError::Read`] if the file cannot be read.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MimeError> {
        let path = path.as_ref();
        let table = std::fs::read_to_string(path).map_err(|source| MimeError::Read {
            path: path.to_owned(),
            source,
        })?;
        let mime = Self::parse(&table);
        debug!(path = %path.display(), extensions = mime.len(), "loaded mime table");
        Ok(mime)
    }

    /// Parses a table. Malformed lines are skipped; later entries win.
    pub fn parse(table: &str) -> Self {
        let mut map = HashMap::new();
        for line in table.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t').filter(|f| !f.is_empty());
            let (Some(mime_type), Some(extensions), None) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            for ext in extensions.split_whitespace() {
                map.insert(ext.to_ascii_lowercase(), mime_type.trim().to_owned());
            }
        }
        Self { map }
    }

    /// Number of known extensions.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Content type for a file name or path.
    ///
    /// Tries the table, then `mime_guess`'s extension database, then falls back to
    /// [`DEFAULT_MIME_TYPE`].
    pub fn lookup(&self, name: impl AsRef<Path>) -> &str {
        let Some(ext) = name
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
        else {
            return DEFAULT_MIME_TYPE;
        };

        match self.map.get(&ext) {
            Some(mime_type) if !mime_type.is_empty() => mime_type.as_str(),
            _ => mime_guess::from_ext(&ext)
                .first_raw()
                .unwrap_or(DEFAULT_MIME_TYPE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_table_covers_html() {
        let mime = MimeTypes::embedded();
        assert!(!mime.is_empty());
        assert_eq!(mime.lookup("index.html"), "text/html");
        assert_eq!(mime.lookup("a/b/style.css"), "text/css");
        assert_eq!(mime.lookup("photo.JPG"), "image/jpeg");
    }

    #[test]
    fn comments_and_malformed_lines_are_skipped() {
        let mime = MimeTypes::parse("#text/plain\ttxt\nbroken line\ntext/x-a\ta\textra\n");
        assert!(mime.is_empty());
    }

    #[test]
    fn multiple_tabs_and_extensions() {
        let mime = MimeTypes::parse("image/jpeg\t\t\tjpeg jpg jpe\n");
        assert_eq!(mime.len(), 3);
        assert_eq!(mime.lookup("x.jpe"), "image/jpeg");
    }

    #[test]
    fn later_entries_override() {
        let mime = MimeTypes::parse("text/x-old\tfoo\ntext/x-new\tfoo\n");
        assert_eq!(mime.lookup("a.foo"), "text/x-new");
    }

    #[test]
    fn falls_back_to_guess_then_default() {
        let mime = MimeTypes::parse("");
        assert_eq!(mime.lookup("clip.webm"), "video/webm");
        assert_eq!(mime.lookup("movie.MP4"), "video/mp4");
        assert_eq!(mime.lookup("README"), DEFAULT_MIME_TYPE);
        assert_eq!(mime.lookup("data.qqq"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn load_missing_file() {
        let err = MimeTypes::load("/definitely/not/here/mime.types").unwrap_err();
        assert!(matches!(err, MimeError::Read { .. }));
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mime.types");
        std::fs::write(&path, "text/x-custom\tcst\n").unwrap();
        let mime = MimeTypes::load(&path).unwrap();
        assert_eq!(mime.lookup("file.cst"), "text/x-custom");
    }
}
