//! Vault scanner.
//!
//! Walks the configured vault root, applies include/exclude globs, reads
//! each note as UTF-8 (lossy) and chunks it. Also reports the newest
//! modification time under the root, which the index uses as its sync
//! watermark.
//!
//! A vault root that does not exist is not an error: the scan is simply
//! empty, and retrieval degrades to "no information" answers.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::models::VaultFile;

/// Everything a scan found under the vault root.
#[derive(Debug, Clone, Default)]
pub struct VaultScan {
    pub files: Vec<VaultFile>,
}

impl VaultScan {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn indexed_files(&self) -> usize {
        self.files.iter().filter(|f| !f.chunks.is_empty()).count()
    }

    pub fn empty_files(&self) -> usize {
        self.files.iter().filter(|f| f.chunks.is_empty()).count()
    }
}

struct Filters {
    include: GlobSet,
    exclude: GlobSet,
}

impl Filters {
    fn new(config: &Config) -> Result<Self> {
        let mut default_excludes = vec![
            "**/.git/**".to_string(),
            "**/.obsidian/**".to_string(),
            "**/.trash/**".to_string(),
        ];
        default_excludes.extend(config.vault.exclude_globs.clone());
        Ok(Self {
            include: build_globset(&config.vault.include_globs)?,
            exclude: build_globset(&default_excludes)?,
        })
    }
}

/// Read and chunk every matching note under the vault root.
pub fn scan_vault(config: &Config) -> Result<VaultScan> {
    let root = &config.vault.root;
    if !root.exists() {
        tracing::warn!(vault = %root.display(), "vault root does not exist; scanning nothing");
        return Ok(VaultScan::default());
    }

    let filters = Filters::new(config)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.vault.follow_symlinks) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable vault entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if filters.exclude.is_match(&rel_str) || !filters.include.is_match(&rel_str) {
            continue;
        }

        files.push(read_note(path, &rel_str, config));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(VaultScan { files })
}

/// Newest modification time of any non-excluded file under the root, or
/// `None` when the root is missing or holds no files.
pub fn latest_mtime(config: &Config) -> Result<Option<SystemTime>> {
    let root = &config.vault.root;
    if !root.exists() {
        return Ok(None);
    }

    let filters = Filters::new(config)?;
    let mut latest: Option<SystemTime> = None;

    for entry in WalkDir::new(root)
        .follow_links(config.vault.follow_symlinks)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if filters.exclude.is_match(rel) {
            continue;
        }
        let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) else {
            continue;
        };
        if latest.map_or(true, |l| modified > l) {
            latest = Some(modified);
        }
    }

    Ok(latest)
}

fn read_note(path: &Path, relative_path: &str, config: &Config) -> VaultFile {
    let body = match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(file = relative_path, error = %e, "failed to read note");
            String::new()
        }
    };

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let chunks = chunk_text(
        &name,
        &body,
        config.chunking.chunk_words,
        config.chunking.overlap_words,
    );

    VaultFile {
        name,
        path: relative_path.to_string(),
        extension,
        chunks,
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
