//! Repository file discovery
//!
//! Produces [`FileInfo`] for every eligible regular file under a root:
//! not excluded by glob or directory rules, within the size bounds,
//! readable, and text (a short probe rejects binaries). Two modes share
//! one eligibility filter: sequential (single traversal worker) and
//! parallel (N directory workers feeding a bounded channel), both
//! yielding the same set for the same inputs.

use crossbeam_channel::{bounded, Receiver};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::config::ExclusionConfig;
use crate::language::Language;
use crate::rel_display;

/// Output buffer between walk workers and the consumer.
const DISCOVERY_BUFFER: usize = 256;

/// Bytes read to decide whether a file is text.
const PROBE_BYTES: usize = 8192;

/// Directory names skipped at any depth unless defaults are disabled.
const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    "vendor",
    "__pycache__",
    ".venv",
    "venv",
    ".idea",
    ".vscode",
    ".codesift",
];

/// Glob patterns excluded by default (generated and binary artifacts).
const DEFAULT_EXCLUDED_PATTERNS: &[&str] = &[
    "**/*.min.js",
    "**/*.min.css",
    "**/*.map",
    "**/*.lock",
    "**/package-lock.json",
    "**/yarn.lock",
    "**/pnpm-lock.yaml",
];

/// Extensions excluded by default (binary formats the probe would
/// reject anyway; filtering on name avoids the read).
const DEFAULT_EXCLUDED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "bmp", "webp", "svgz", "pdf", "zip", "gz", "tar", "xz",
    "zst", "7z", "jar", "class", "exe", "dll", "so", "dylib", "a", "o", "obj", "wasm", "woff",
    "woff2", "ttf", "otf", "eot", "mp3", "mp4", "avi", "mov", "sqlite", "db", "bin",
];

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("cannot read walk root {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid exclusion pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },
}

/// An eligible file discovered under the walk root. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub absolute_path: PathBuf,
    /// Forward-slash normalized path relative to the walk root
    pub relative_path: String,
    pub size_bytes: u64,
    /// Mtime as unix seconds (0 when unavailable)
    pub last_modified: i64,
    /// Extension without the dot, lowercase; empty when absent
    pub extension: String,
    pub language: Option<Language>,
}

/// Configurable repository walker.
///
/// ```no_run
/// use codesift::walker::Walker;
/// # fn main() -> anyhow::Result<()> {
/// let files = Walker::new("/path/to/repo")
///     .exclude_patterns(&["**/generated/**".to_string()])
///     .max_file_size(512 * 1024)
///     .discover()?;
/// for file in files {
///     println!("{}", file.relative_path);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Walker {
    root: PathBuf,
    patterns: Vec<String>,
    extensions: Vec<String>,
    directories: Vec<String>,
    max_file_size: u64,
    min_file_size: u64,
    workers: usize,
    no_defaults: bool,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            patterns: Vec::new(),
            extensions: Vec::new(),
            directories: Vec::new(),
            max_file_size: 1_048_576,
            min_file_size: 1,
            workers: 1,
            no_defaults: false,
        }
    }

    /// Apply an exclusion section from the config wholesale.
    pub fn with_exclusions(mut self, exclusions: &ExclusionConfig) -> Self {
        self.patterns = exclusions.patterns.clone();
        self.extensions = exclusions.extensions.clone();
        self.directories = exclusions.directories.clone();
        self.max_file_size = exclusions.max_file_size;
        self.min_file_size = exclusions.min_file_size;
        self.no_defaults = exclusions.no_defaults;
        self
    }

    pub fn exclude_patterns(mut self, patterns: &[String]) -> Self {
        self.patterns.extend_from_slice(patterns);
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn min_file_size(mut self, bytes: u64) -> Self {
        self.min_file_size = bytes;
        self
    }

    /// Number of directory workers; 1 selects the sequential mode.
    pub fn parallel(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Start the traversal. Returns a lazy, finite iterator backed by a
    /// bounded channel; dropping the iterator stops the walk workers.
    pub fn discover(self) -> Result<Discovery, WalkError> {
        // A root that cannot be read at all is fatal, unlike individual
        // entries which are skipped with a warning.
        std::fs::metadata(&self.root).map_err(|e| WalkError::RootUnreadable {
            path: self.root.clone(),
            source: e,
        })?;

        let filter = EligibilityFilter::new(&self)?;
        let (tx, rx) = bounded::<FileInfo>(DISCOVERY_BUFFER);
        let root = self.root.clone();
        let workers = self.workers;

        let mut builder = WalkBuilder::new(&root);
        builder
            .hidden(false)
            .git_ignore(true)
            .git_global(false)
            .git_exclude(true)
            .follow_links(false);
        let excluded_dirs = filter.directories.clone();
        builder.filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                return true;
            }
            entry
                .file_name()
                .to_str()
                .map(|name| !excluded_dirs.iter().any(|d| d == name))
                .unwrap_or(true)
        });

        if workers > 1 {
            builder.threads(workers);
            let walker = builder.build_parallel();
            let filter = std::sync::Arc::new(filter);
            std::thread::spawn(move || {
                walker.run(|| {
                    let tx = tx.clone();
                    let filter = std::sync::Arc::clone(&filter);
                    let root = root.clone();
                    Box::new(move |entry| {
                        use ignore::WalkState;
                        let entry = match entry {
                            Ok(e) => e,
                            Err(e) => {
                                tracing::warn!(error = %e, "Skipping unreadable entry during walk");
                                return WalkState::Continue;
                            }
                        };
                        if let Some(info) = filter.admit(entry.path(), &root) {
                            // Receiver dropped means the consumer is done
                            if tx.send(info).is_err() {
                                return WalkState::Quit;
                            }
                        }
                        WalkState::Continue
                    })
                });
            });
        } else {
            let walker = builder.build();
            std::thread::spawn(move || {
                for entry in walker {
                    let entry = match entry {
                        Ok(e) => e,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping unreadable entry during walk");
                            continue;
                        }
                    };
                    if let Some(info) = filter.admit(entry.path(), &root) {
                        if tx.send(info).is_err() {
                            break;
                        }
                    }
                }
            });
        }

        Ok(Discovery { rx })
    }
}

/// Lazy stream of discovered files.
pub struct Discovery {
    rx: Receiver<FileInfo>,
}

impl Iterator for Discovery {
    type Item = FileInfo;

    fn next(&mut self) -> Option<FileInfo> {
        self.rx.recv().ok()
    }
}

/// Shared eligibility filter applied by both walk modes.
struct EligibilityFilter {
    glob_set: GlobSet,
    directories: Vec<String>,
    extensions: Vec<String>,
    max_file_size: u64,
    min_file_size: u64,
}

impl EligibilityFilter {
    fn new(walker: &Walker) -> Result<Self, WalkError> {
        let mut patterns: Vec<String> = Vec::new();
        let mut directories: Vec<String> = Vec::new();
        let mut extensions: Vec<String> = Vec::new();
        if !walker.no_defaults {
            patterns.extend(DEFAULT_EXCLUDED_PATTERNS.iter().map(|s| s.to_string()));
            directories.extend(DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()));
            extensions.extend(DEFAULT_EXCLUDED_EXTENSIONS.iter().map(|s| s.to_string()));
        }
        patterns.extend(walker.patterns.iter().cloned());
        directories.extend(walker.directories.iter().cloned());
        extensions.extend(walker.extensions.iter().map(|e| e.to_ascii_lowercase()));

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            let glob = Glob::new(pattern).map_err(|e| WalkError::Pattern {
                pattern: pattern.clone(),
                source: e,
            })?;
            builder.add(glob);
        }
        let glob_set = builder.build().map_err(|e| WalkError::Pattern {
            pattern: "<combined>".to_string(),
            source: e,
        })?;

        Ok(Self {
            glob_set,
            directories,
            extensions,
            max_file_size: walker.max_file_size,
            min_file_size: walker.min_file_size,
        })
    }

    /// Run the full eligibility check; `Some(FileInfo)` admits the file.
    fn admit(&self, path: &Path, root: &Path) -> Option<FileInfo> {
        let meta = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };
        if !meta.is_file() {
            return None;
        }
        if meta.len() > self.max_file_size || meta.len() < self.min_file_size {
            tracing::debug!(path = %path.display(), size = meta.len(), "Skipping file outside size bounds");
            return None;
        }

        let relative = rel_display(path, root);
        // Directory-name rule also applies to path components that the
        // pruner could not see (e.g. root passed inside an excluded dir)
        if relative
            .split('/')
            .any(|part| self.directories.iter().any(|d| d == part))
        {
            return None;
        }
        if self.glob_set.is_match(&relative) {
            tracing::debug!(path = %relative, "Excluded by pattern");
            return None;
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !extension.is_empty() && self.extensions.iter().any(|e| e == &extension) {
            return None;
        }

        if !probe_is_text(path) {
            tracing::debug!(path = %relative, "Skipping binary file");
            return None;
        }

        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Some(FileInfo {
            absolute_path: path.to_path_buf(),
            language: Language::from_path(path),
            relative_path: relative,
            size_bytes: meta.len(),
            last_modified,
            extension,
        })
    }
}

/// Short content probe: a NUL byte or invalid UTF-8 (away from the
/// probe's truncation edge) marks the file as binary.
fn probe_is_text(path: &Path) -> bool {
    use std::io::Read;
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Skipping unopenable file");
            return false;
        }
    };
    let mut buf = [0u8; PROBE_BYTES];
    let mut read = 0;
    while read < buf.len() {
        match file.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Read failed during probe");
                return false;
            }
        }
    }
    let probe = &buf[..read];
    if probe.contains(&0) {
        return false;
    }
    match std::str::from_utf8(probe) {
        Ok(_) => true,
        // A multi-byte sequence may be cut by the probe window; only an
        // error before the final partial sequence means non-UTF-8.
        Err(e) => read == PROBE_BYTES && e.valid_up_to() + 4 > read && e.error_len().is_none(),
    }
}
