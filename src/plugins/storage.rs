//! Experiment artifacts in Google Cloud Storage, and the
//! `evolve_files_and_ranges` selector syntax.

use crate::core::error::HiveError;
use crate::core::exec;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_BUCKET: &str = "hi-artifacts";

/// Inclusive line range `(start, end)`.
pub type LineRange = (u32, u32);

/// File -> ranges to evolve; `None` means the whole file.
pub type FileRanges = BTreeMap<String, Option<Vec<LineRange>>>;

/// Parse `file.py:1-10&20-30,other.py` into a [`FileRanges`] map.
pub fn parse_files_and_ranges(files_and_ranges: &str) -> Result<FileRanges, HiveError> {
    let mut file_ranges = FileRanges::new();
    if files_and_ranges.trim().is_empty() {
        return Ok(file_ranges);
    }

    for entry in files_and_ranges.split(',').map(str::trim) {
        if entry.is_empty() {
            continue;
        }
        match entry.split_once(':') {
            Some((filename, ranges)) => {
                let parsed = ranges
                    .split('&')
                    .map(|r| parse_range(entry, r))
                    .collect::<Result<Vec<_>, _>>()?;
                file_ranges.insert(filename.to_string(), Some(parsed));
            }
            None => {
                file_ranges.insert(entry.to_string(), None);
            }
        }
    }
    Ok(file_ranges)
}

fn parse_range(entry: &str, range: &str) -> Result<LineRange, HiveError> {
    let invalid = || {
        HiveError::ValidationError(format!(
            "invalid line range '{}' in '{}': expected START-END",
            range, entry
        ))
    };
    let (start, end) = range.split_once('-').ok_or_else(invalid)?;
    let start: u32 = start.trim().parse().map_err(|_| invalid())?;
    let end: u32 = end.trim().parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

/// Object name for `relative_path` under `prefix`, always with forward slashes.
pub fn blob_name(prefix: &str, relative_path: &str) -> String {
    let rel = relative_path.replace('\\', "/");
    let prefix = prefix.replace('\\', "/");
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        rel
    } else {
        format!("{}/{}", prefix, rel.trim_start_matches('/'))
    }
}

/// Upload specific files from `source_directory` to `gs://<bucket>/<prefix>/`.
///
/// Missing files are skipped. Returns the uploaded object URLs.
pub fn upload_directory(
    source_directory: &Path,
    list_of_files: &[String],
    destination_blob_prefix: &str,
    bucket_name: &str,
) -> Result<Vec<String>, HiveError> {
    let present: Vec<&String> = list_of_files
        .iter()
        .filter(|rel| {
            let exists = source_directory.join(rel.as_str()).is_file();
            if !exists {
                tracing::info!("Skipping {} (not found)", rel);
            }
            exists
        })
        .collect();

    present
        .par_iter()
        .map(|rel| -> Result<String, HiveError> {
            let local = source_directory.join(rel.as_str());
            let url = format!(
                "gs://{}/{}",
                bucket_name,
                blob_name(destination_blob_prefix, rel)
            );
            exec::run_tool(
                "gcloud",
                &[
                    "storage".to_string(),
                    "cp".to_string(),
                    local.to_string_lossy().into_owned(),
                    url.clone(),
                ],
                None,
            )?;
            tracing::info!("Uploaded {} to {}", local.display(), url);
            Ok(url)
        })
        .collect()
}
