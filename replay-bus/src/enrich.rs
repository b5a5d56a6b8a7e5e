//! Post-save enrichment: tag a finished clip with a context label and write
//! a metadata sidecar next to it. Nothing here can fail a save, errors are
//! logged and the best path reached so far is returned.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const METADATA_DIR: &str = "clips-metadata";

const MAX_LABEL_CHARS: usize = 50;
const ILLEGAL: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Which audio tracks were recorded with the clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioTracks {
    pub track1: bool,
    pub track2: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipMetadata {
    pub favorite: bool,
    pub tags: Vec<String>,
    pub game: String,
    pub audio: AudioTracks,
    pub created_at: DateTime<Utc>,
}

/// Makes a label safe to embed in a file name.
///
/// Applying it twice gives the same result as applying it once.
pub fn sanitize_label(label: &str) -> String {
    let mut out: String = label
        .chars()
        .filter(|c| !ILLEGAL.contains(c) && !c.is_control())
        .map(|c| if c == ' ' { '_' } else { c })
        .collect();

    strip_extensions(&mut out);
    if out.chars().count() > MAX_LABEL_CHARS {
        out = out.chars().take(MAX_LABEL_CHARS).collect();
        // Truncation can expose a new suffix.
        strip_extensions(&mut out);
    }
    out
}

fn strip_extensions(s: &mut String) {
    while let Some(stripped) = strip_extension_suffix(s) {
        s.truncate(stripped);
    }
}

// Byte offset of a trailing ".abc" style suffix, if any.
fn strip_extension_suffix(s: &str) -> Option<usize> {
    let dot = s.rfind('.')?;
    let suffix = &s[dot + 1..];
    let looks_like_ext =
        (2..=4).contains(&suffix.len()) && suffix.chars().all(|c| c.is_ascii_alphabetic());
    looks_like_ext.then_some(dot)
}

pub fn metadata_path(clip: &Path) -> Option<PathBuf> {
    let dir = clip.parent()?;
    let stem = clip.file_stem()?;
    let mut name = stem.to_os_string();
    name.push(".json");
    Some(dir.join(METADATA_DIR).join(name))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Enricher;

impl Enricher {
    pub fn new() -> Self {
        Self
    }

    /// Renames `clip` to carry `label` and writes its sidecar. Returns the
    /// final clip path, which is the original path if the rename failed.
    pub fn apply(&self, clip: &Path, label: &str, audio: AudioTracks) -> PathBuf {
        let label = sanitize_label(label);
        if label.is_empty() {
            log::warn!("context label is empty after sanitizing, clip left as is");
            return clip.to_path_buf();
        }

        let final_path = match rename_with_label(clip, &label) {
            Ok(path) => {
                log::info!("clip renamed to {}", path.display());
                path
            }
            Err(e) => {
                log::warn!("failed to rename {}: {:#}", clip.display(), e);
                clip.to_path_buf()
            }
        };

        let metadata = ClipMetadata {
            favorite: false,
            tags: vec![label.clone()],
            game: label,
            audio,
            created_at: Utc::now(),
        };
        match write_metadata(&final_path, &metadata) {
            Ok(sidecar) => log::info!("clip metadata written to {}", sidecar.display()),
            Err(e) => log::warn!(
                "failed to write metadata for {}: {:#}",
                final_path.display(),
                e
            ),
        }
        final_path
    }
}

fn rename_with_label(clip: &Path, label: &str) -> anyhow::Result<PathBuf> {
    let stem = clip
        .file_stem()
        .and_then(|s| s.to_str())
        .context("clip path has no usable file stem")?;
    let mut name = format!("{}_{}", stem, label);
    if let Some(ext) = clip.extension().and_then(|s| s.to_str()) {
        name.push('.');
        name.push_str(ext);
    }
    let target = clip.with_file_name(name);
    if target.exists() {
        anyhow::bail!("{} already exists", target.display());
    }
    std::fs::rename(clip, &target)
        .with_context(|| format!("rename to {}", target.display()))?;
    Ok(target)
}

fn write_metadata(clip: &Path, metadata: &ClipMetadata) -> anyhow::Result<PathBuf> {
    let path = metadata_path(clip).context("clip path has no parent directory")?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(metadata)?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
