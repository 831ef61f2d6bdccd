//! Shell completion candidates. These never fail: any error or timeout
//! yields an empty list.

use crate::core::config::{self, HiveConfig, PlatformType};
use crate::plugins::platform::{self, K8sPlatform, Platform};
use std::fs;
use std::path::{MAIN_SEPARATOR, Path};
use std::time::Duration;

pub const COMPLETION_BUDGET: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CompletionKind {
    Experiments,
    Sandboxes,
    ConfigFiles,
}

fn platform_for(config: &HiveConfig) -> Box<dyn Platform> {
    match config.platform {
        PlatformType::K8s => {
            Box::new(K8sPlatform::from_config(config).with_query_timeout(COMPLETION_BUDGET))
        }
        other => platform::for_config(other, config),
    }
}

fn filter_prefix(names: Vec<String>, prefix: &str) -> Vec<String> {
    names.into_iter().filter(|n| n.starts_with(prefix)).collect()
}

pub fn experiment_completer(prefix: &str, config_path: &Path) -> Vec<String> {
    let Ok(config) = config::load_config(config_path) else {
        return Vec::new();
    };
    match platform_for(&config).list_experiments() {
        Ok(names) => filter_prefix(names, prefix),
        Err(err) => {
            tracing::debug!(error = %err, "experiment completion failed");
            Vec::new()
        }
    }
}

pub fn sandbox_completer(prefix: &str, config_path: &Path, experiment: Option<&str>) -> Vec<String> {
    let Ok(config) = config::load_config(config_path) else {
        return Vec::new();
    };
    match platform_for(&config).list_sandboxes(experiment) {
        Ok(names) => filter_prefix(names, prefix),
        Err(err) => {
            tracing::debug!(error = %err, "sandbox completion failed");
            Vec::new()
        }
    }
}

/// Paths whose text starts with `prefix`; directories get a trailing separator.
pub fn config_file_completer(prefix: &str) -> Vec<String> {
    let (dir_part, file_part) = match prefix.rfind(['/', MAIN_SEPARATOR]) {
        Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
        None => ("", prefix),
    };
    let dir = if dir_part.is_empty() { Path::new(".") } else { Path::new(dir_part) };

    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut out: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(file_part) || (file_part.is_empty() && name.starts_with('.')) {
                return None;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let suffix = if is_dir { "/" } else { "" };
            Some(format!("{}{}{}", dir_part, name, suffix))
        })
        .collect();
    out.sort();
    out
}

pub fn complete(kind: CompletionKind, prefix: &str, config_path: &Path, experiment: Option<&str>) -> Vec<String> {
    match kind {
        CompletionKind::Experiments => experiment_completer(prefix, config_path),
        CompletionKind::Sandboxes => sandbox_completer(prefix, config_path, experiment),
        CompletionKind::ConfigFiles => config_file_completer(prefix),
    }
}
