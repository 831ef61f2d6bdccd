//! Directory overlays for sandbox evaluation.
//!
//! An overlay mirrors a base repository with symlinks so that only the files
//! being replaced are materialized. It mimics the behaviour of an overlayfs
//! mount without needing privileges.

use crate::core::error::HiveError;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Names never mirrored by [`mirror_with_symlink_exceptions`].
pub const DEFAULT_SKIP_NAMES: &[&str] = &[
    "__pycache__",
    ".git",
    ".mypy_cache",
    ".pytest_cache",
    ".DS_Store",
];

/// Mirror `base_dir` into `overlay_dir` so that:
/// - items not on the path to any target are symlinked in one go;
/// - directories on a target path are real directories whose other
///   contents are symlinked;
/// - target files themselves are left out, ready to be materialized.
///
/// An existing `overlay_dir` is removed first.
pub fn mirror_overlay(
    base_dir: &Path,
    overlay_dir: &Path,
    target_file_relatives: &[String],
) -> Result<(), HiveError> {
    let targets: Vec<Vec<String>> = target_file_relatives
        .iter()
        .map(|rel| path_parts(rel))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if overlay_dir.exists() || overlay_dir.is_symlink() {
        fs::remove_dir_all(overlay_dir)?;
    }
    process_target_paths(base_dir, overlay_dir, &targets)
}

fn process_target_paths(
    curr_base: &Path,
    curr_overlay: &Path,
    target_parts: &[Vec<String>],
) -> Result<(), HiveError> {
    fs::create_dir_all(curr_overlay)?;

    for entry in fs::read_dir(curr_base)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let base_item = entry.path();
        let overlay_item = curr_overlay.join(&name);

        let sub_targets: Vec<Vec<String>> = target_parts
            .iter()
            .filter(|parts| parts.first() == Some(&name))
            .map(|parts| parts[1..].to_vec())
            .collect();

        if sub_targets.is_empty() {
            symlink(&base_item, &overlay_item)?;
        } else if base_item.is_dir() && sub_targets.iter().all(|p| !p.is_empty()) {
            process_target_paths(&base_item, &overlay_item, &sub_targets)?;
        }
        // Otherwise the item is itself a target and is not linked.
    }
    Ok(())
}

/// Replace each path in `file_content_map` under `overlay_dir` with a real
/// file holding the given content. Symlinks in the way are removed.
pub fn materialize_overrides(
    overlay_dir: &Path,
    file_content_map: &BTreeMap<String, String>,
) -> Result<(), HiveError> {
    for (rel_path, content) in file_content_map {
        let normalized = sanitize_relative(rel_path)?;
        let full_path = overlay_dir.join(&normalized);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        if full_path.is_symlink() {
            fs::remove_file(&full_path)?;
        }
        fs::write(&full_path, content)?;
    }
    Ok(())
}

/// [`mirror_overlay`] followed by [`materialize_overrides`].
pub fn mirror_overlay_and_overwrite(
    base_dir: &Path,
    overlay_dir: &Path,
    file_content_map: &BTreeMap<String, String>,
) -> Result<(), HiveError> {
    for rel in file_content_map.keys() {
        sanitize_relative(rel)?;
    }
    let targets: Vec<String> = file_content_map.keys().cloned().collect();
    mirror_overlay(base_dir, overlay_dir, &targets)?;
    materialize_overrides(overlay_dir, file_content_map)
}

/// Copy `repo_dir` into `dest_dir`, except that nodes whose POSIX relative
/// path matches one of `symlink_patterns` are symlinked to the source.
///
/// Names in [`DEFAULT_SKIP_NAMES`] and `skip_names` are skipped entirely;
/// existing symlinks are recreated pointing at their resolved target, or at
/// their literal target when it does not exist.
pub fn mirror_with_symlink_exceptions(
    repo_dir: &Path,
    dest_dir: &Path,
    symlink_patterns: &[&str],
    skip_names: &[&str],
) -> Result<(), HiveError> {
    let repo = repo_dir.canonicalize()?;
    fs::create_dir_all(dest_dir)?;
    let dest = dest_dir.canonicalize()?;

    let combined = if symlink_patterns.is_empty() {
        None
    } else {
        let joined = symlink_patterns
            .iter()
            .map(|p| format!("(?:{})", p))
            .collect::<Vec<_>>()
            .join("|");
        Some(Regex::new(&joined).map_err(|e| HiveError::ValidationError(e.to_string()))?)
    };

    let mut skips: BTreeSet<&str> = DEFAULT_SKIP_NAMES.iter().copied().collect();
    skips.extend(skip_names.iter().copied());

    let mirror = Mirror {
        repo: &repo,
        pattern: combined.as_ref(),
        skips: &skips,
    };
    for entry in fs::read_dir(&repo)? {
        let entry = entry?;
        mirror.node(&entry.path(), &dest.join(entry.file_name()))?;
    }
    Ok(())
}

struct Mirror<'a> {
    repo: &'a Path,
    pattern: Option<&'a Regex>,
    skips: &'a BTreeSet<&'a str>,
}

impl Mirror<'_> {
    fn rel_posix(&self, path: &Path) -> String {
        path.strip_prefix(self.repo)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn node(&self, src: &Path, dst: &Path) -> Result<(), HiveError> {
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.skips.contains(name.as_str()) {
            return Ok(());
        }

        if self
            .pattern
            .is_some_and(|re| re.is_match(&self.rel_posix(src)))
        {
            return link_path(src, dst);
        }

        let meta = fs::symlink_metadata(src)?;
        if meta.file_type().is_symlink() {
            // Dangling links keep their literal target.
            let target = src.canonicalize().or_else(|_| fs::read_link(src))?;
            link_path(&target, dst)
        } else if meta.is_dir() {
            fs::create_dir_all(dst)?;
            for entry in fs::read_dir(src)? {
                let entry = entry?;
                self.node(&entry.path(), &dst.join(entry.file_name()))?;
            }
            Ok(())
        } else if meta.is_file() {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(src, dst)?;
            Ok(())
        } else {
            // sockets, fifos
            Ok(())
        }
    }
}

/// Write overlay files into `dest_dir`, replacing symlinks and directories
/// in the way so the original repository is never mutated.
pub fn apply_code_overlays(
    dest_dir: &Path,
    code_files: &BTreeMap<String, String>,
) -> Result<(), HiveError> {
    for (rel_path, content) in code_files {
        let dst = dest_dir.join(sanitize_relative(rel_path)?);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        if dst.is_symlink() {
            fs::remove_file(&dst)?;
        } else if dst.is_dir() {
            fs::remove_dir_all(&dst)?;
        }
        fs::write(&dst, content)?;
    }
    Ok(())
}

/// Recursively copy `src` into `dest`, merging with existing content.
/// Symlinks are followed.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<(), HiveError> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dest.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else if from.is_file() {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Reject absolute paths and `..` segments.
pub fn sanitize_relative(rel_path: &str) -> Result<PathBuf, HiveError> {
    let path = Path::new(rel_path);
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(HiveError::ValidationError(format!(
                    "Invalid relative path detected: {}",
                    rel_path
                )));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(HiveError::ValidationError(format!(
            "Invalid relative path detected: {}",
            rel_path
        )));
    }
    Ok(normalized)
}

fn path_parts(rel: &str) -> Vec<String> {
    Path::new(rel)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn link_path(src: &Path, dst: &Path) -> Result<(), HiveError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if dst.is_symlink() || dst.is_file() {
        fs::remove_file(dst)?;
    } else if dst.is_dir() {
        fs::remove_dir_all(dst)?;
    }
    symlink(src, dst)
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> Result<(), HiveError> {
    std::os::unix::fs::symlink(src, dst)?;
    Ok(())
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> Result<(), HiveError> {
    if src.is_dir() {
        std::os::windows::fs::symlink_dir(src, dst)?;
    } else {
        std::os::windows::fs::symlink_file(src, dst)?;
    }
    Ok(())
}
