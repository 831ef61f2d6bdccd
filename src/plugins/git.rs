//! Codebase acquisition: clone a remote repository or copy a local one into
//! an experiment build directory, and report the code version id.

use crate::core::error::HiveError;
use crate::core::exec;
use crate::core::time;
use crate::plugins::overlay;
use std::fs;
use std::path::{Path, PathBuf};

pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Length of the short commit id reported for cloned repositories.
const SHORT_SHA_LEN: usize = 7;

/// Copy/clone a repository from `source` into `dest` and return its code version id.
///
/// Remote sources (`https://`) yield the short HEAD hash of the checked out
/// `branch`. Local git directories yield the full HEAD hash of the source.
/// Plain directories yield a random 7-char id.
pub fn get_codebase(source: &str, dest: &Path, branch: &str) -> Result<String, HiveError> {
    if source.starts_with("https://") {
        tracing::debug!(source = %source, dest = %dest.display(), "cloning repository");
        let sha = clone_repo(source, dest, branch)?;
        tracing::debug!(commit = %sha, "repository cloned");
        return Ok(sha.chars().take(SHORT_SHA_LEN).collect());
    }

    let source_path = resolve_local_source(source)?;
    tracing::debug!(source = %source_path.display(), dest = %dest.display(), "copying repository");
    overlay::copy_tree(&source_path, dest)?;

    if source_path.join(".git").exists() {
        let sha = head_commit(&source_path)?;
        tracing::debug!(commit = %sha, "repository copied");
        Ok(sha)
    } else {
        tracing::warn!(
            "Source path {} is not a git repository. Using a random string as commit ID.",
            source
        );
        Ok(time::random_id(SHORT_SHA_LEN))
    }
}

fn resolve_local_source(source: &str) -> Result<PathBuf, HiveError> {
    let path = Path::new(source);
    if !path.exists() {
        return Err(HiveError::NotFound(format!(
            "Source path {} does not exist",
            source
        )));
    }
    if !path.is_dir() {
        return Err(HiveError::NotADirectory(format!(
            "Source path {} is not a directory",
            source
        )));
    }
    Ok(path.canonicalize()?)
}

/// Clone `url` into `dest`, check out `branch` and return the full HEAD hash.
///
/// `GITHUB_TOKEN`, when set, is injected into `https://` URLs.
pub fn clone_repo(url: &str, dest: &Path, branch: &str) -> Result<String, HiveError> {
    fs::create_dir_all(dest)?;
    let token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
    let clone_url = match &token {
        Some(token) => inject_token(url, token),
        None => url.to_string(),
    };

    let dest_str = path_str(dest)?;
    exec::run_tool(
        "git",
        &["clone".to_string(), clone_url, dest_str],
        None,
    )
    .map_err(|err| redact(err, token.as_deref()))?;

    head_commit(dest).map_err(|_| {
        HiveError::ValidationError(format!("Repository {} has no commits yet", url))
    })?;
    git(dest, &["checkout", branch])?;
    head_commit(dest)
}

/// `https://host/...` -> `https://x-access-token:<token>@host/...`
pub fn inject_token(url: &str, token: &str) -> String {
    url.replacen("https://", &format!("https://x-access-token:{}@", token), 1)
}

pub fn head_commit(repo: &Path) -> Result<String, HiveError> {
    git_output(repo, &["rev-parse", "HEAD"])
}

fn git(repo: &Path, args: &[&str]) -> Result<(), HiveError> {
    git_output(repo, args).map(|_| ())
}

fn git_output(repo: &Path, args: &[&str]) -> Result<String, HiveError> {
    let mut full = vec!["-C".to_string(), path_str(repo)?];
    full.extend(args.iter().map(|s| s.to_string()));
    exec::tool_output("git", &full, None)
}

fn path_str(path: &Path) -> Result<String, HiveError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| HiveError::ValidationError(format!("invalid path: {}", path.display())))
}

/// Never surface the injected token in error messages.
fn redact(err: HiveError, token: Option<&str>) -> HiveError {
    match (err, token) {
        (HiveError::ToolError { tool, message }, Some(token)) => HiveError::ToolError {
            tool,
            message: message.replace(token, "***"),
        },
        (other, _) => other,
    }
}
