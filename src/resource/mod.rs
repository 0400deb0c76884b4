//! Maps request URIs onto the filesystem under a fixed root.
//!
//! Containment is enforced twice: lexically, before the filesystem is
//! touched, and again on the canonical path, which catches symlinks that
//! point outside the root.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, trace};

pub mod listing;

pub use listing::DirEntry;

/// What a URI resolved to. Produced fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedResource {
    /// A readable regular file (possibly a directory's index file).
    RegularFile {
        path: PathBuf,
        size: u64,
        modified: SystemTime,
    },
    /// A directory without an index file, with its entries sorted
    /// directories-first, then by name.
    Directory {
        path: PathBuf,
        entries: Vec<DirEntry>,
    },
    NotFound,
    Forbidden,
}

/// Resolves URIs against a canonical root directory.
///
/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    index_names: Vec<String>,
}

impl Resolver {
    /// Creates a resolver for `root`, probing `index_names` in order when a
    /// URI names a directory.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if `root` cannot be canonicalized.
    pub fn new(root: impl AsRef<Path>, index_names: Vec<String>) -> io::Result<Self> {
        let root = std::fs::canonicalize(root)?;
        Ok(Self { root, index_names })
    }

    /// The canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    /// Classifies `uri` (already percent-decoded, without query).
    pub async fn resolve(&self, uri: &str) -> ResolvedResource {
        let Some(relative) = normalize(uri) else {
            debug!(uri, "URI climbs above the root");
            return ResolvedResource::Forbidden;
        };

        let canonical = match fs::canonicalize(self.root.join(relative)).await {
            Ok(path) => path,
            Err(e) => return classify(&e),
        };
        if !canonical.starts_with(&self.root) {
            debug!(uri, path = %canonical.display(), "resolved path escapes the root");
            return ResolvedResource::Forbidden;
        }

        let metadata = match fs::metadata(&canonical).await {
            Ok(metadata) => metadata,
            Err(e) => return classify(&e),
        };

        if metadata.is_dir() {
            if let Some(index) = self.find_index(&canonical).await {
                return index;
            }
            return list_directory(canonical).await;
        }

        open_file(canonical, &metadata).await
    }

    /// First configured index file that exists, stays inside the root and
    /// can be opened.
    async fn find_index(&self, dir: &Path) -> Option<ResolvedResource> {
        for name in &self.index_names {
            let Ok(candidate) = fs::canonicalize(dir.join(name)).await else {
                continue;
            };
            if !candidate.starts_with(&self.root) {
                continue;
            }
            let Ok(metadata) = fs::metadata(&candidate).await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            match open_file(candidate, &metadata).await {
                file @ ResolvedResource::RegularFile { .. } => {
                    trace!(index = %name, "serving index file");
                    return Some(file);
                }
                _ => continue,
            }
        }
        None
    }
}

/// Lexically resolves `.` and `..` segments.
///
/// Returns `None` when a `..` would climb above the root.
fn normalize(uri: &str) -> Option<PathBuf> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in uri.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => segments.push(segment),
        }
    }
    Some(segments.iter().collect())
}

fn classify(error: &io::Error) -> ResolvedResource {
    match error.kind() {
        io::ErrorKind::PermissionDenied => ResolvedResource::Forbidden,
        _ => ResolvedResource::NotFound,
    }
}

async fn open_file(path: PathBuf, metadata: &std::fs::Metadata) -> ResolvedResource {
    // Devices, sockets and FIFOs are never served.
    if !metadata.is_file() {
        return ResolvedResource::Forbidden;
    }
    // Readability is only known once the file is actually opened.
    if let Err(e) = fs::File::open(&path).await {
        return classify(&e);
    }
    ResolvedResource::RegularFile {
        path,
        size: metadata.len(),
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    }
}

async fn list_directory(path: PathBuf) -> ResolvedResource {
    let mut reader = match fs::read_dir(&path).await {
        Ok(reader) => reader,
        Err(e) => return classify(&e),
    };

    let mut entries = Vec::new();
    loop {
        let entry = match reader.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "stopped reading directory");
                break;
            }
        };

        // Follow symlinks; fall back to the link itself when it dangles.
        let metadata = match fs::metadata(entry.path()).await {
            Ok(metadata) => metadata,
            Err(_) => match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => continue,
            },
        };

        entries.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    listing::sort_entries(&mut entries);
    ResolvedResource::Directory { path, entries }
}

#[cfg(test)]
mod tests {
    use std::fs as stdfs;

    use tempfile::TempDir;

    use super::*;

    fn site() -> (TempDir, Resolver) {
        let dir = tempfile::tempdir().unwrap();
        stdfs::write(dir.path().join("index.html"), "<h1>hi</h1>\n").unwrap();
        stdfs::write(dir.path().join("notes.txt"), "notes").unwrap();
        stdfs::create_dir(dir.path().join("img")).unwrap();
        stdfs::write(dir.path().join("img/logo.png"), [0u8; 4]).unwrap();
        stdfs::create_dir(dir.path().join("docs")).unwrap();
        stdfs::write(dir.path().join("docs/index.htm"), "docs").unwrap();
        let resolver = Resolver::new(
            dir.path(),
            vec!["index.html".to_owned(), "index.htm".to_owned()],
        )
        .unwrap();
        (dir, resolver)
    }

    #[test]
    fn normalize_segments() {
        assert_eq!(normalize("/"), Some(PathBuf::new()));
        assert_eq!(normalize("/a/./b//c"), Some(PathBuf::from("a/b/c")));
        assert_eq!(normalize("/a/b/../c"), Some(PathBuf::from("a/c")));
        assert_eq!(normalize("/../etc/passwd"), None);
        assert_eq!(normalize("/a/../../b"), None);
    }

    #[tokio::test]
    async fn root_serves_index() {
        let (dir, resolver) = site();
        match resolver.resolve("/").await {
            ResolvedResource::RegularFile { path, size, .. } => {
                assert_eq!(path, dir.path().canonicalize().unwrap().join("index.html"));
                assert_eq!(size, 12);
            }
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn index_names_are_probed_in_order() {
        let (_dir, resolver) = site();
        match resolver.resolve("/docs").await {
            ResolvedResource::RegularFile { path, .. } => assert!(path.ends_with("docs/index.htm")),
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn directory_without_index_is_listed() {
        let (_dir, resolver) = site();
        match resolver.resolve("/img/").await {
            ResolvedResource::Directory { entries, .. } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].name, "logo.png");
                assert!(!entries[0].is_dir);
                assert_eq!(entries[0].size, 4);
            }
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_index_names_lists_root() {
        let (dir, _) = site();
        let resolver = Resolver::new(dir.path(), Vec::new()).unwrap();
        match resolver.resolve("/").await {
            ResolvedResource::Directory { entries, .. } => {
                let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
                assert_eq!(names, ["docs", "img", "index.html", "notes.txt"]);
            }
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_is_not_found() {
        let (_dir, resolver) = site();
        assert_eq!(resolver.resolve("/missing.txt").await, ResolvedResource::NotFound);
        assert_eq!(resolver.resolve("/img/nope/x").await, ResolvedResource::NotFound);
    }

    #[tokio::test]
    async fn traversal_is_forbidden_even_if_target_missing() {
        let (_dir, resolver) = site();
        assert_eq!(resolver.resolve("/../etc/passwd").await, ResolvedResource::Forbidden);
        assert_eq!(
            resolver.resolve("/img/../../nothing-here").await,
            ResolvedResource::Forbidden
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escape_is_forbidden() {
        let (dir, resolver) = site();
        let outside = tempfile::tempdir().unwrap();
        stdfs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            dir.path().join("secret.txt"),
        )
        .unwrap();

        assert_eq!(resolver.resolve("/escape/secret.txt").await, ResolvedResource::Forbidden);
        assert_eq!(resolver.resolve("/secret.txt").await, ResolvedResource::Forbidden);
        assert_eq!(resolver.resolve("/escape").await, ResolvedResource::Forbidden);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_inside_root_is_followed() {
        let (dir, resolver) = site();
        std::os::unix::fs::symlink(dir.path().join("notes.txt"), dir.path().join("alias.txt"))
            .unwrap();
        assert!(matches!(
            resolver.resolve("/alias.txt").await,
            ResolvedResource::RegularFile { .. }
        ));
    }

    #[tokio::test]
    async fn plain_file() {
        let (_dir, resolver) = site();
        match resolver.resolve("/notes.txt").await {
            ResolvedResource::RegularFile { size, .. } => assert_eq!(size, 5),
            other => panic!("expected file, got {other:?}"),
        }
    }
}
