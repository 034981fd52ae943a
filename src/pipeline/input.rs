//! Input resolution: name uploads, read local files, list sandboxed directories.
//!
//! Every input becomes a [`SourceFile`] (name + bytes). The name is reduced
//! to a `file_id`, the key used for aggregation and for the `<file_id>.txt`
//! entry in the output archive, so it must be unique within a batch and safe
//! as a flat archive entry name.

use crate::error::Sheet2MdError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

/// File id used when a name reduces to nothing.
pub const FALLBACK_FILE_ID: &str = "document";

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._ ()\-]").unwrap());

/// One input PDF as received: upload name (or path) and raw bytes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Reduce an upload name to its base name without the final extension.
///
/// Directory components (either separator) are dropped, characters outside
/// `[A-Za-z0-9._ ()-]` become `_`, and leading dots are stripped so the id
/// can never name a hidden file.
pub fn file_id_from_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = match base.rfind('.') {
        Some(i) if i > 0 => &base[..i],
        _ => base,
    };
    let cleaned = RE_UNSAFE.replace_all(stem, "_");
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        FALLBACK_FILE_ID.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Assign a unique `file_id` to each name, in input order.
///
/// The first occurrence keeps its id; later collisions get `-2`, `-3`, …,
/// skipping any suffix already taken. Ids are compared case-insensitively
/// so no two outputs share a file on a case-folding filesystem.
pub fn assign_file_ids<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut ids = Vec::new();

    for name in names {
        let base = file_id_from_name(name);
        let mut candidate = base.clone();
        let mut n = 1;
        while used.contains(&candidate.to_lowercase()) {
            n += 1;
            candidate = format!("{base}-{n}");
        }
        if n > 1 {
            debug!("Duplicate file id '{}' for '{}' → '{}'", base, name, candidate);
        }
        used.insert(candidate.to_lowercase());
        ids.push(candidate);
    }

    ids
}

/// Read a local PDF into memory.
pub async fn read_local(path: &Path) -> Result<SourceFile, Sheet2MdError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => Sheet2MdError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Sheet2MdError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;
    debug!("Read {} ({} bytes)", path.display(), bytes.len());
    Ok(SourceFile::new(path.to_string_lossy(), bytes))
}

/// List `*.pdf` files directly inside `dir`, sorted by path.
pub async fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>, Sheet2MdError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Sheet2MdError::InvalidDirectory {
            name: dir.display().to_string(),
            reason: e.to_string(),
        })?;

    let mut pdfs = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Sheet2MdError::Internal(format!("read_dir: {e}")))?
    {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            continue;
        }
        // follows symlinks; a dangling link is skipped
        let is_file = tokio::fs::metadata(&path)
            .await
            .is_ok_and(|m| m.is_file());
        if is_file {
            pdfs.push(path);
        }
    }

    pdfs.sort();
    info!("Found {} PDF(s) in {}", pdfs.len(), dir.display());
    Ok(pdfs)
}

/// Resolve `name` as a directory strictly inside `root`.
///
/// Rejects absolute paths, `..`, and anything that canonicalises (through
/// symlinks) to a location outside `root`.
pub async fn resolve_sandboxed_dir(root: &Path, name: &str) -> Result<PathBuf, Sheet2MdError> {
    let invalid = |reason: &str| Sheet2MdError::InvalidDirectory {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let rel = Path::new(name);
    if name.trim().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(invalid("must be a relative path without '.' or '..' components"));
    }

    let root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| Sheet2MdError::Internal(format!("input root unavailable: {e}")))?;

    let dir = tokio::fs::canonicalize(root.join(rel))
        .await
        .map_err(|_| Sheet2MdError::FileNotFound {
            path: PathBuf::from(name),
        })?;

    if !dir.starts_with(&root) {
        return Err(invalid("escapes the input root"));
    }
    let is_dir = tokio::fs::metadata(&dir)
        .await
        .map(|m| m.is_dir())
        .map_err(|e| Sheet2MdError::Internal(format!("metadata of {}: {e}", dir.display())))?;
    if !is_dir {
        return Err(invalid("not a directory"));
    }

    Ok(dir)
}
