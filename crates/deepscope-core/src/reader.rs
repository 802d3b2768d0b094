// Secure source reader
//
// The only component that touches the filesystem. Every read is confined
// to the project root, restricted to an extension allow-list, and capped
// at 10 MiB. Content is cached per requested path; the cache is dropped
// on explicit clear and on root change.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::error::{AnalysisError, Result};

/// Regular files above this size are rejected
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Extensions the reader will serve: source, config, docs
const ALLOWED_EXTENSIONS: &[&str] = &[
    // source
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "rb", "c", "h", "cc", "cpp",
    "hpp", "cs", "swift", "kt", "kts", "scala", "php", "sql", "sh", "bash", "proto", "vue",
    "svelte", // config
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "env", "properties", "xml", "lock",
    // docs
    "md", "mdx", "txt", "rst", "adoc", "html", "css",
];

/// Name fragments used by related-file discovery
const RELATED_SUFFIXES: &[&str] = &["test", "spec", "Service", "Controller", "Client"];

/// Path-confined, size-capped, cached file reader
pub struct SecureReader {
    root: RwLock<PathBuf>,
    cache: RwLock<HashMap<PathBuf, Arc<String>>>,
}

impl SecureReader {
    /// Create a reader rooted at an absolute project directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(AnalysisError::fs(
                root.display().to_string(),
                "project root must be an absolute path",
            ));
        }
        Ok(Self {
            root: RwLock::new(normalize_lexically(&root)),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Current project root
    pub fn root(&self) -> PathBuf {
        self.root.read().expect("reader root poisoned").clone()
    }

    /// Change the project root; invalidates the cache
    pub fn set_root(&self, root: impl Into<PathBuf>) -> Result<()> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(AnalysisError::fs(
                root.display().to_string(),
                "project root must be an absolute path",
            ));
        }
        *self.root.write().expect("reader root poisoned") = normalize_lexically(&root);
        self.clear_cache();
        Ok(())
    }

    /// Drop all cached content
    pub fn clear_cache(&self) {
        self.cache.write().expect("reader cache poisoned").clear();
    }

    /// Validate a path without reading it.
    ///
    /// Returns the resolved absolute path strictly inside the root.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let requested = path.as_ref();
        let root = self.root();

        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            root.join(requested)
        };
        let normalized = normalize_lexically(&joined);

        // Any surviving `..` means normalization could not absorb it.
        if normalized
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(AnalysisError::PathTraversal(
                requested.display().to_string(),
            ));
        }
        if !normalized.starts_with(&root) || normalized == root {
            return Err(AnalysisError::PathTraversal(
                requested.display().to_string(),
            ));
        }
        Ok(normalized)
    }

    fn check_extension(&self, resolved: &Path, requested: &Path) -> Result<()> {
        let allowed = resolved
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_ascii_lowercase();
                ALLOWED_EXTENSIONS.contains(&lower.as_str())
            })
            .unwrap_or(false);
        if allowed {
            Ok(())
        } else {
            Err(AnalysisError::InvalidFileType(
                requested.display().to_string(),
            ))
        }
    }

    /// Read a file inside the project root.
    ///
    /// Read-through cached by requested path. Enforces, in order: path
    /// confinement, extension allow-list, regular-file check, size cap.
    pub async fn read(&self, path: impl AsRef<Path>) -> Result<Arc<String>> {
        let requested = path.as_ref().to_path_buf();

        if let Some(cached) = self
            .cache
            .read()
            .expect("reader cache poisoned")
            .get(&requested)
        {
            return Ok(cached.clone());
        }

        let resolved = self.validate_path(&requested)?;
        self.check_extension(&resolved, &requested)?;

        let meta = tokio::fs::metadata(&resolved).await.map_err(|e| {
            AnalysisError::fs(requested.display().to_string(), e.to_string())
        })?;
        if !meta.is_file() {
            return Err(AnalysisError::NotAFile(requested.display().to_string()));
        }
        if meta.len() > MAX_FILE_SIZE {
            return Err(AnalysisError::FileTooLarge {
                path: requested.display().to_string(),
                size: meta.len(),
            });
        }

        let content = tokio::fs::read_to_string(&resolved).await.map_err(|e| {
            AnalysisError::fs(requested.display().to_string(), e.to_string())
        })?;
        debug!(path = %requested.display(), bytes = content.len(), "read source file");

        let content = Arc::new(content);
        self.cache
            .write()
            .expect("reader cache poisoned")
            .insert(requested, content.clone());
        Ok(content)
    }

    /// Read several files, keyed by the requested path string.
    ///
    /// File errors are never recovered; the first failure surfaces.
    pub async fn read_many<I, S>(&self, paths: I) -> Result<HashMap<String, Arc<String>>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = HashMap::new();
        for path in paths {
            let path = path.as_ref();
            let content = self.read(path).await?;
            out.insert(path.to_string(), content);
        }
        Ok(out)
    }

    /// Find sibling files related to `base`: same stem, or stem plus one
    /// of the well-known suffixes, still confined to the root.
    pub async fn find_related(&self, base: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let resolved = self.validate_path(base.as_ref())?;
        let stem = resolved
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let dir = match resolved.parent() {
            Some(dir) => dir.to_path_buf(),
            None => return Ok(Vec::new()),
        };

        let mut related = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot list directory for related files");
                return Ok(Vec::new());
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path == resolved || !path.is_file() {
                continue;
            }
            let name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let shares_stem = name != stem && (name.starts_with(&stem) || stem.starts_with(&name));
            let has_suffix = RELATED_SUFFIXES.iter().any(|suffix| {
                name == format!("{stem}.{suffix}")
                    || name == format!("{stem}{suffix}")
                    || name == format!("{stem}_{suffix}")
            });
            if (shares_stem || has_suffix) && self.validate_path(&path).is_ok() {
                related.push(path);
            }
        }
        related.sort();
        Ok(related)
    }
}

/// Lexical normalization: resolves `.` and absorbs `..` into preceding
/// components without touching the filesystem. A `..` that cannot be
/// absorbed is kept, and rejected by the caller.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

// ============================================================================
// Tests
// ============================================================================
