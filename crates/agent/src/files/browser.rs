//! Directory browsing rooted at the shared directory.
//!
//! Request paths are resolved against a fixed root. With containment enforced
//! (the default), `..` segments are rejected and targets whose canonical path
//! leaves the canonical root (for example through a symlink) are refused.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur while resolving a request path.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// The resolved target is outside the shared root.
    #[error("path is outside allowed boundaries: {0}")]
    PathOutsideBoundary(PathBuf),

    /// The request path contains a parent-directory segment.
    #[error("path traversal detected: {0}")]
    PathTraversal(String),

    /// The filesystem refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BrowserError {
    /// Whether the error means "not allowed" rather than "broken".
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            BrowserError::PathOutsideBoundary(_)
                | BrowserError::PathTraversal(_)
                | BrowserError::PermissionDenied(_)
        )
    }
}

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

/// A child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Path relative to the root, `/`-separated, without a leading slash.
    pub rel_path: String,
    pub kind: EntryKind,
    /// Size in bytes (0 for directories).
    pub size: u64,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Outcome of resolving a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// A regular file to stream.
    File { path: PathBuf, size: u64 },
    /// A directory with its sorted children.
    Directory {
        rel_path: String,
        entries: Vec<DirectoryEntry>,
    },
    /// Nothing usable exists at the path.
    Missing { rel_path: String },
}

/// Maps request paths to files and directory listings under one root.
#[derive(Debug, Clone)]
pub struct DirectoryBrowser {
    root: PathBuf,
    enforce_containment: bool,
    include_hidden: bool,
}

impl DirectoryBrowser {
    /// Create a browser for `root` with containment enforced and hidden
    /// entries listed.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            enforce_containment: true,
            include_hidden: true,
        }
    }

    /// Set whether paths must stay inside the root.
    ///
    /// Disabling this applies `..` segments as given and serves whatever they
    /// reach.
    pub fn enforce_containment(mut self, enforce: bool) -> Self {
        self.enforce_containment = enforce;
        self
    }

    /// Set whether dot-files are listed.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a percent-decoded request path such as `/photos/a.jpg`.
    pub fn resolve(&self, request_path: &str) -> Result<Resolved, BrowserError> {
        let segments = self.segments(request_path)?;
        let rel_path = segments.join("/");

        if segments.iter().any(|s| s.contains('\0')) {
            return Ok(Resolved::Missing { rel_path });
        }

        let target = segments.iter().fold(self.root.clone(), |p, s| p.join(s));

        let metadata = match fs::metadata(&target) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Resolved::Missing { rel_path });
            }
            Err(e) => return Err(map_io(e, &target)),
        };

        if self.enforce_containment {
            self.check_containment(&target)?;
        }

        if metadata.is_dir() {
            let entries = self.list_directory(&target, &rel_path)?;
            Ok(Resolved::Directory { rel_path, entries })
        } else if metadata.is_file() {
            Ok(Resolved::File {
                path: target,
                size: metadata.len(),
            })
        } else {
            Ok(Resolved::Missing { rel_path })
        }
    }

    /// Split a request path into root-relative segments.
    fn segments<'a>(&self, request_path: &'a str) -> Result<Vec<&'a str>, BrowserError> {
        let mut segments: Vec<&str> = Vec::new();

        for segment in request_path.split('/') {
            match segment {
                "" | "." => {}
                ".." if self.enforce_containment => {
                    return Err(BrowserError::PathTraversal(request_path.to_string()));
                }
                ".." => match segments.last() {
                    Some(&last) if last != ".." => {
                        segments.pop();
                    }
                    _ => segments.push(".."),
                },
                other => segments.push(other),
            }
        }

        Ok(segments)
    }

    fn check_containment(&self, target: &Path) -> Result<(), BrowserError> {
        let root = fs::canonicalize(&self.root).map_err(|e| map_io(e, &self.root))?;
        let canonical = fs::canonicalize(target).map_err(|e| map_io(e, target))?;

        if canonical.starts_with(&root) {
            Ok(())
        } else {
            Err(BrowserError::PathOutsideBoundary(target.to_path_buf()))
        }
    }

    /// List immediate children, directories first, then by name ignoring case.
    fn list_directory(&self, dir: &Path, rel_path: &str) -> Result<Vec<DirectoryEntry>, BrowserError> {
        let read = fs::read_dir(dir).map_err(|e| map_io(e, dir))?;
        let mut results = Vec::new();

        for entry_result in read {
            let entry = match entry_result {
                Ok(e) => e,
                Err(_) => continue,
            };

            let name = entry.file_name().to_string_lossy().to_string();
            if !self.include_hidden && name.starts_with('.') {
                continue;
            }

            // Follows symlinks; dangling links are skipped.
            let metadata = match fs::metadata(entry.path()) {
                Ok(m) => m,
                Err(_) => continue,
            };

            let kind = if metadata.is_dir() {
                EntryKind::Directory
            } else if metadata.is_file() {
                EntryKind::File
            } else {
                EntryKind::Other
            };

            let child_rel = if rel_path.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel_path, name)
            };

            results.push(DirectoryEntry {
                name,
                rel_path: child_rel,
                kind,
                size: if metadata.is_file() { metadata.len() } else { 0 },
            });
        }

        results.sort_by(|a, b| match (a.is_dir(), b.is_dir()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(results)
    }
}

fn map_io(e: io::Error, path: &Path) -> BrowserError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        BrowserError::PermissionDenied(path.to_path_buf())
    } else {
        BrowserError::Io(e)
    }
}
